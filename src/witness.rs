//! Witness assembly for the fixed 2-in/2-out proving shape
//!
//! Every operation - shield, transfer, unshield - is expressed through the
//! same circuit shape: exactly two input-note slots and two output-note
//! slots, so observers cannot infer what an operation does from proof
//! metadata. Unused slots are padded with dummy notes (all fields zero
//! except the real token id); their commitment and nullifier are still
//! computed for circuit uniformity, and slots with amount zero are exempt
//! from the inclusion and nullifier-uniqueness checks downstream.
//!
//! Assembly reads only locally known plaintext notes, the reconciled
//! accumulator, and the spending key - which is scoped to the call and
//! scrubbed when the witness is dropped.

use halo2_proofs::pasta::Fp;
use rand::{CryptoRng, RngCore};
use serde::ser::{Serialize, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::constants::{MERKLE_TREE_DEPTH, WITNESS_INPUTS, WITNESS_OUTPUTS};
use crate::hash::fp_to_bytes;
use crate::keys::{OwnerKey, SpendingKey};
use crate::merkle::{Accumulator, MerkleError, MerklePath};
use crate::note::{Note, NoteCommitment, Nullifier};
use crate::prover::OperationTag;
use crate::store::{OwnedNote, WalletStore};
use crate::value::{encode_public_amount, AmountError, PoolDelta};

/// Cheap local validation failures, raised before any proof-generation
/// round trip
#[derive(Debug, Error)]
pub enum WitnessError {
    #[error("insufficient shielded funds: need {needed}, spendable {available} (at most two input notes per operation)")]
    InsufficientFunds { needed: u128, available: u128 },

    #[error("note {0:?} not found at its recorded leaf position")]
    NoteNotFound(NoteCommitment),

    #[error("spending key does not control note {0:?}")]
    WrongSpendingKey(NoteCommitment),

    #[error(transparent)]
    Amount(#[from] AmountError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// A named witness value as the proof service consumes it
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WitnessValue {
    Field(Fp),
    FieldArray(Vec<Fp>),
}

impl Serialize for WitnessValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            WitnessValue::Field(f) => {
                serializer.serialize_str(&format!("0x{}", hex::encode(fp_to_bytes(f))))
            }
            WitnessValue::FieldArray(values) => {
                let mut seq = serializer.serialize_seq(Some(values.len()))?;
                for f in values {
                    seq.serialize_element(&format!("0x{}", hex::encode(fp_to_bytes(f))))?;
                }
                seq.end()
            }
        }
    }
}

/// The full named input set for one proving call
///
/// Field names follow the proof service's contract exactly; `to_named_map`
/// flattens to those names. The spending key is zeroed when the struct is
/// dropped and is redacted from `Debug` output.
#[derive(Clone)]
pub struct ProofInputs {
    pub merkle_root: Fp,
    pub nullifiers: [Fp; WITNESS_INPUTS],
    pub output_commitments: [Fp; WITNESS_OUTPUTS],
    pub public_amount: Fp,
    pub token_mint: Fp,
    pub in_amounts: [Fp; WITNESS_INPUTS],
    pub in_owner_pubkeys: [Fp; WITNESS_INPUTS],
    pub in_randomness: [Fp; WITNESS_INPUTS],
    pub in_path_indices: [[Fp; MERKLE_TREE_DEPTH]; WITNESS_INPUTS],
    pub in_path_elements: [[Fp; MERKLE_TREE_DEPTH]; WITNESS_INPUTS],
    pub out_amounts: [Fp; WITNESS_OUTPUTS],
    pub out_recipients: [Fp; WITNESS_OUTPUTS],
    pub out_randomness: [Fp; WITNESS_OUTPUTS],
    pub spending_key: Fp,
}

impl ProofInputs {
    /// Flatten to the named map the proof service expects
    pub fn to_named_map(&self) -> BTreeMap<String, WitnessValue> {
        let mut map = BTreeMap::new();
        map.insert("merkle_root".to_string(), WitnessValue::Field(self.merkle_root));
        map.insert(
            "public_amount".to_string(),
            WitnessValue::Field(self.public_amount),
        );
        map.insert("token_mint".to_string(), WitnessValue::Field(self.token_mint));
        map.insert(
            "spending_key".to_string(),
            WitnessValue::Field(self.spending_key),
        );

        for i in 0..WITNESS_INPUTS {
            let slot = i + 1;
            map.insert(
                format!("nullifier_{slot}"),
                WitnessValue::Field(self.nullifiers[i]),
            );
            map.insert(
                format!("in_amount_{slot}"),
                WitnessValue::Field(self.in_amounts[i]),
            );
            map.insert(
                format!("in_owner_pubkey_{slot}"),
                WitnessValue::Field(self.in_owner_pubkeys[i]),
            );
            map.insert(
                format!("in_randomness_{slot}"),
                WitnessValue::Field(self.in_randomness[i]),
            );
            map.insert(
                format!("in_path_indices_{slot}"),
                WitnessValue::FieldArray(self.in_path_indices[i].to_vec()),
            );
            map.insert(
                format!("in_path_elements_{slot}"),
                WitnessValue::FieldArray(self.in_path_elements[i].to_vec()),
            );
        }

        for i in 0..WITNESS_OUTPUTS {
            let slot = i + 1;
            map.insert(
                format!("output_commitment_{slot}"),
                WitnessValue::Field(self.output_commitments[i]),
            );
            map.insert(
                format!("out_amount_{slot}"),
                WitnessValue::Field(self.out_amounts[i]),
            );
            map.insert(
                format!("out_recipient_{slot}"),
                WitnessValue::Field(self.out_recipients[i]),
            );
            map.insert(
                format!("out_randomness_{slot}"),
                WitnessValue::Field(self.out_randomness[i]),
            );
        }

        map
    }

    /// The canonical public-signal ordering the verifier checks
    pub fn public_signals(&self) -> Vec<Fp> {
        vec![
            self.merkle_root,
            self.nullifiers[0],
            self.nullifiers[1],
            self.output_commitments[0],
            self.output_commitments[1],
            self.public_amount,
            self.token_mint,
        ]
    }
}

impl Drop for ProofInputs {
    fn drop(&mut self) {
        self.spending_key = Fp::zero();
    }
}

impl fmt::Debug for ProofInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProofInputs")
            .field("merkle_root", &self.merkle_root)
            .field("public_amount", &self.public_amount)
            .field("token_mint", &self.token_mint)
            .field("spending_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

/// One assembled operation, ready for the proof service
#[derive(Clone, Debug)]
pub struct Operation {
    pub op: OperationTag,
    pub proof_inputs: ProofInputs,
    /// Commitments of the real notes consumed, for local spent-marking once
    /// the ledger accepts
    pub spent_commitments: Vec<NoteCommitment>,
    /// Nullifiers that will be published for the real inputs
    pub published_nullifiers: Vec<Nullifier>,
    /// Real notes minted by this operation (change and recipient notes),
    /// awaiting ledger inclusion
    pub created_notes: Vec<Note>,
}

/// Builds witnesses from the reconciled accumulator and the wallet store
pub struct WitnessBuilder<'a> {
    tree: &'a Accumulator,
    store: &'a WalletStore,
}

impl<'a> WitnessBuilder<'a> {
    pub fn new(tree: &'a Accumulator, store: &'a WalletStore) -> Self {
        Self { tree, store }
    }

    /// Shield: mint `amount` of new shielded value to the holder of `sk`
    ///
    /// Both input slots are dummies; `public_amount = +amount`.
    pub fn shield<R: RngCore + CryptoRng>(
        &self,
        sk: &SpendingKey,
        amount: u64,
        token_id: Fp,
        rng: &mut R,
    ) -> Result<Operation, WitnessError> {
        let minted = Note::new(amount, sk.owner_key(), token_id, rng);
        let outputs = [minted.clone(), Note::dummy(token_id)];
        let proof_inputs = self.assemble(sk, &[], outputs, token_id)?;

        Ok(Operation {
            op: OperationTag::Shield,
            proof_inputs,
            spent_commitments: Vec::new(),
            published_nullifiers: Vec::new(),
            created_notes: vec![minted],
        })
    }

    /// Transfer: spend owned notes and mint `amount` to `recipient`
    /// privately, with change back to the sender
    ///
    /// `public_amount = 0`; nothing about the flow is revealed.
    pub fn transfer<R: RngCore + CryptoRng>(
        &self,
        sk: &SpendingKey,
        recipient: OwnerKey,
        amount: u64,
        token_id: Fp,
        rng: &mut R,
    ) -> Result<Operation, WitnessError> {
        let inputs = self.select_inputs(sk, amount, token_id)?;
        let total: u128 = inputs.iter().map(|o| o.note.amount() as u128).sum();
        let change = (total - amount as u128) as u64;

        let sent = Note::new(amount, recipient, token_id, rng);
        let change_note = if change > 0 {
            Note::new(change, sk.owner_key(), token_id, rng)
        } else {
            Note::dummy(token_id)
        };

        let created_notes = std::iter::once(sent.clone())
            .chain((change > 0).then(|| change_note.clone()))
            .collect();
        let spent_commitments = inputs.iter().map(|o| o.note.commitment()).collect();
        let published_nullifiers = inputs.iter().map(|o| o.note.nullifier(sk)).collect();

        let proof_inputs = self.assemble(sk, &inputs, [sent, change_note], token_id)?;

        Ok(Operation {
            op: OperationTag::Transfer,
            proof_inputs,
            spent_commitments,
            published_nullifiers,
            created_notes,
        })
    }

    /// Unshield: spend owned notes and release `amount` out of the pool
    ///
    /// `public_amount = -amount` (encoded by field wraparound); change stays
    /// shielded.
    pub fn unshield<R: RngCore + CryptoRng>(
        &self,
        sk: &SpendingKey,
        amount: u64,
        token_id: Fp,
        rng: &mut R,
    ) -> Result<Operation, WitnessError> {
        let inputs = self.select_inputs(sk, amount, token_id)?;
        let total: u128 = inputs.iter().map(|o| o.note.amount() as u128).sum();
        let change = (total - amount as u128) as u64;

        let change_note = if change > 0 {
            Note::new(change, sk.owner_key(), token_id, rng)
        } else {
            Note::dummy(token_id)
        };

        let created_notes = (change > 0).then(|| change_note.clone()).into_iter().collect();
        let spent_commitments = inputs.iter().map(|o| o.note.commitment()).collect();
        let published_nullifiers = inputs.iter().map(|o| o.note.nullifier(sk)).collect();

        let proof_inputs =
            self.assemble(sk, &inputs, [change_note, Note::dummy(token_id)], token_id)?;

        Ok(Operation {
            op: OperationTag::Unshield,
            proof_inputs,
            spent_commitments,
            published_nullifiers,
            created_notes,
        })
    }

    /// Pick up to two unspent owned notes covering `amount`, largest first
    fn select_inputs(
        &self,
        sk: &SpendingKey,
        amount: u64,
        token_id: Fp,
    ) -> Result<Vec<OwnedNote>, WitnessError> {
        let owner = sk.owner_key();
        let mut candidates: Vec<OwnedNote> = self
            .store
            .unspent(token_id)
            .filter(|o| o.note.owner_key() == owner)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| b.note.amount().cmp(&a.note.amount()));

        let needed = amount as u128;
        let spendable: u128 = candidates
            .iter()
            .take(WITNESS_INPUTS)
            .map(|o| o.note.amount() as u128)
            .sum();
        if spendable < needed || candidates.is_empty() {
            return Err(WitnessError::InsufficientFunds {
                needed,
                available: spendable,
            });
        }

        let take = if candidates[0].note.amount() as u128 >= needed {
            1
        } else {
            2
        };
        candidates.truncate(take);
        Ok(candidates)
    }

    /// Build the full named input set from selected inputs and fixed outputs
    fn assemble(
        &self,
        sk: &SpendingKey,
        inputs: &[OwnedNote],
        outputs: [Note; WITNESS_OUTPUTS],
        token_id: Fp,
    ) -> Result<ProofInputs, WitnessError> {
        debug_assert!(inputs.len() <= WITNESS_INPUTS);

        let mut nullifiers = [Fp::zero(); WITNESS_INPUTS];
        let mut in_amounts = [Fp::zero(); WITNESS_INPUTS];
        let mut in_owner_pubkeys = [Fp::zero(); WITNESS_INPUTS];
        let mut in_randomness = [Fp::zero(); WITNESS_INPUTS];
        let mut in_path_indices = [[Fp::zero(); MERKLE_TREE_DEPTH]; WITNESS_INPUTS];
        let mut in_path_elements = [[Fp::zero(); MERKLE_TREE_DEPTH]; WITNESS_INPUTS];

        for i in 0..WITNESS_INPUTS {
            let (note, path) = match inputs.get(i) {
                Some(owned) => {
                    let commitment = owned.note.commitment();
                    // cheap consistency checks before wasting a proving round trip
                    if self.store.leaf_at(owned.leaf_index) != Some(commitment) {
                        return Err(WitnessError::NoteNotFound(commitment));
                    }
                    if owned.note.owner_key() != sk.owner_key() {
                        return Err(WitnessError::WrongSpendingKey(commitment));
                    }
                    nullifiers[i] = owned.note.nullifier(sk).to_field();
                    (owned.note.clone(), self.tree.generate_proof(owned.leaf_index)?)
                }
                None => {
                    nullifiers[i] = Nullifier::dummy(token_id).to_field();
                    (Note::dummy(token_id), MerklePath::dummy())
                }
            };

            in_amounts[i] = Fp::from(note.amount());
            in_owner_pubkeys[i] = note.owner_key().to_field();
            in_randomness[i] = note.randomness();
            for level in 0..MERKLE_TREE_DEPTH {
                in_path_indices[i][level] = Fp::from(path.indices()[level] as u64);
                in_path_elements[i][level] = path.elements()[level];
            }
        }

        let mut output_commitments = [Fp::zero(); WITNESS_OUTPUTS];
        let mut out_amounts = [Fp::zero(); WITNESS_OUTPUTS];
        let mut out_recipients = [Fp::zero(); WITNESS_OUTPUTS];
        let mut out_randomness = [Fp::zero(); WITNESS_OUTPUTS];
        for (i, note) in outputs.iter().enumerate() {
            output_commitments[i] = note.commitment().to_field();
            out_amounts[i] = Fp::from(note.amount());
            out_recipients[i] = note.owner_key().to_field();
            out_randomness[i] = note.randomness();
        }

        let inputs_total: u128 = inputs.iter().map(|o| o.note.amount() as u128).sum();
        let outputs_total: u128 = outputs.iter().map(|n| n.amount() as u128).sum();
        let delta = PoolDelta::from_flows(outputs_total, inputs_total);
        let public_amount = encode_public_amount(&delta)?;

        debug!(
            real_inputs = inputs.len(),
            leaf_count = self.tree.leaf_count(),
            "witness assembled"
        );

        Ok(ProofInputs {
            merkle_root: self.tree.root(),
            nullifiers,
            output_commitments,
            public_amount,
            token_mint: token_id,
            in_amounts,
            in_owner_pubkeys,
            in_randomness,
            in_path_indices,
            in_path_elements,
            out_amounts,
            out_recipients,
            out_randomness,
            spending_key: sk.to_field(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn token() -> Fp {
        Fp::from(11u64)
    }

    /// A wallet with `amounts` confirmed on a fresh ledger
    fn funded_wallet(amounts: &[u64]) -> (Accumulator, WalletStore, SpendingKey) {
        let sk = SpendingKey::random(&mut OsRng);
        let mut tree = Accumulator::new();
        let mut store = WalletStore::new();

        for &amount in amounts {
            let note = Note::new(amount, sk.owner_key(), token(), &mut OsRng);
            let cm = note.commitment();
            tree.insert(cm.to_field()).unwrap();
            let idx = store.push_leaf(cm);
            store.add_owned(note, idx);
        }
        (tree, store, sk)
    }

    #[test]
    fn test_shield_pads_both_inputs_with_dummies() {
        let (tree, store, sk) = funded_wallet(&[]);
        let builder = WitnessBuilder::new(&tree, &store);

        let op = builder.shield(&sk, 5000, token(), &mut OsRng).unwrap();
        let w = &op.proof_inputs;

        assert_eq!(w.public_amount, Fp::from(5000u64));
        assert_eq!(w.in_amounts, [Fp::zero(); 2]);
        let dummy_nf = Nullifier::dummy(token()).to_field();
        assert_eq!(w.nullifiers, [dummy_nf, dummy_nf]);
        assert_eq!(w.output_commitments[1], NoteCommitment::dummy(token()).to_field());
        assert_eq!(op.created_notes.len(), 1);
        assert!(op.spent_commitments.is_empty());
    }

    #[test]
    fn test_transfer_balances_to_zero_public_amount() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let builder = WitnessBuilder::new(&tree, &store);
        let recipient = SpendingKey::random(&mut OsRng).owner_key();

        let op = builder
            .transfer(&sk, recipient, 400, token(), &mut OsRng)
            .unwrap();
        let w = &op.proof_inputs;

        assert_eq!(w.public_amount, Fp::zero());
        assert_eq!(w.in_amounts[0], Fp::from(1000u64));
        assert_eq!(w.in_amounts[1], Fp::zero());
        assert_eq!(w.out_amounts[0], Fp::from(400u64));
        assert_eq!(w.out_amounts[1], Fp::from(600u64));
        assert_eq!(w.out_recipients[0], recipient.to_field());
        assert_eq!(w.out_recipients[1], sk.owner_key().to_field());
        // sent note + change note
        assert_eq!(op.created_notes.len(), 2);
        assert_eq!(op.published_nullifiers.len(), 1);
    }

    #[test]
    fn test_exact_transfer_degrades_change_to_dummy() {
        let (tree, store, sk) = funded_wallet(&[400]);
        let builder = WitnessBuilder::new(&tree, &store);
        let recipient = SpendingKey::random(&mut OsRng).owner_key();

        let op = builder
            .transfer(&sk, recipient, 400, token(), &mut OsRng)
            .unwrap();

        assert_eq!(
            op.proof_inputs.output_commitments[1],
            NoteCommitment::dummy(token()).to_field()
        );
        assert_eq!(op.created_notes.len(), 1);
    }

    #[test]
    fn test_unshield_encodes_negative_delta() {
        let (tree, store, sk) = funded_wallet(&[100_000]);
        let builder = WitnessBuilder::new(&tree, &store);

        let op = builder.unshield(&sk, 100_000, token(), &mut OsRng).unwrap();
        let w = &op.proof_inputs;

        assert_eq!(w.public_amount, -Fp::from(100_000u64));
        assert_eq!(
            crate::value::decode_public_amount(w.public_amount)
                .unwrap()
                .to_i128(),
            Some(-100_000)
        );
        // both output slots are dummies on a full unshield
        let dummy_cm = NoteCommitment::dummy(token()).to_field();
        assert_eq!(w.output_commitments, [dummy_cm, dummy_cm]);
        assert!(op.created_notes.is_empty());
    }

    #[test]
    fn test_two_note_selection() {
        let (tree, store, sk) = funded_wallet(&[300, 500, 100]);
        let builder = WitnessBuilder::new(&tree, &store);

        // 700 needs the two largest notes (500 + 300)
        let op = builder.unshield(&sk, 700, token(), &mut OsRng).unwrap();
        let w = &op.proof_inputs;

        assert_eq!(w.in_amounts[0], Fp::from(500u64));
        assert_eq!(w.in_amounts[1], Fp::from(300u64));
        assert_eq!(w.out_amounts[0], Fp::from(100u64));
        assert_eq!(op.published_nullifiers.len(), 2);
    }

    #[test]
    fn test_insufficient_funds_rejected_before_assembly() {
        let (tree, store, sk) = funded_wallet(&[300, 500, 100]);
        let builder = WitnessBuilder::new(&tree, &store);

        // Total is 900 but only two notes may be spent at once
        let err = builder
            .unshield(&sk, 850, token(), &mut OsRng)
            .unwrap_err();
        assert!(matches!(
            err,
            WitnessError::InsufficientFunds {
                needed: 850,
                available: 800
            }
        ));
    }

    #[test]
    fn test_stale_note_position_rejected() {
        let (tree, mut store, sk) = funded_wallet(&[1000]);

        // Corrupt the owned record's position
        let note = store.owned()[0].note.clone();
        let cm = note.commitment();
        store.mark_note_spent(&cm);
        store.add_owned(note, 7);

        let builder = WitnessBuilder::new(&tree, &store);
        let err = builder
            .unshield(&sk, 1000, token(), &mut OsRng)
            .unwrap_err();
        assert!(matches!(err, WitnessError::NoteNotFound(_)));
    }

    #[test]
    fn test_named_map_covers_the_contract() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let builder = WitnessBuilder::new(&tree, &store);
        let op = builder.unshield(&sk, 600, token(), &mut OsRng).unwrap();

        let map = op.proof_inputs.to_named_map();
        for name in [
            "merkle_root",
            "nullifier_1",
            "nullifier_2",
            "output_commitment_1",
            "output_commitment_2",
            "public_amount",
            "token_mint",
            "in_amount_1",
            "in_amount_2",
            "in_owner_pubkey_1",
            "in_owner_pubkey_2",
            "in_randomness_1",
            "in_randomness_2",
            "in_path_indices_1",
            "in_path_indices_2",
            "in_path_elements_1",
            "in_path_elements_2",
            "out_amount_1",
            "out_amount_2",
            "out_recipient_1",
            "out_recipient_2",
            "out_randomness_1",
            "out_randomness_2",
            "spending_key",
        ] {
            assert!(map.contains_key(name), "missing witness input {name}");
        }
        assert_eq!(map.len(), 24);

        match &map["in_path_elements_1"] {
            WitnessValue::FieldArray(elements) => {
                assert_eq!(elements.len(), MERKLE_TREE_DEPTH)
            }
            other => panic!("unexpected value shape: {other:?}"),
        }
    }

    #[test]
    fn test_public_signal_order() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let builder = WitnessBuilder::new(&tree, &store);
        let op = builder.shield(&sk, 10, token(), &mut OsRng).unwrap();
        let w = &op.proof_inputs;

        assert_eq!(
            w.public_signals(),
            vec![
                w.merkle_root,
                w.nullifiers[0],
                w.nullifiers[1],
                w.output_commitments[0],
                w.output_commitments[1],
                w.public_amount,
                w.token_mint,
            ]
        );
    }

    #[test]
    fn test_debug_redacts_spending_key() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let builder = WitnessBuilder::new(&tree, &store);
        let op = builder.shield(&sk, 10, token(), &mut OsRng).unwrap();

        let rendered = format!("{:?}", op.proof_inputs);
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&format!("{:?}", sk.to_field())));
    }
}
