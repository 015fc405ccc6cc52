//! Proof service and ledger boundaries
//!
//! Both sides of the proving pipeline are external collaborators: the proof
//! service turns an assembled witness into `(proof bytes, public signals)`,
//! and the ledger program verifies the proof and enforces nullifier
//! uniqueness. This module defines the contracts the core speaks, plus a
//! mock proof service that natively enforces the same constraint semantics
//! for tests and demos.

use blake2::{Blake2b512, Digest};
use halo2_proofs::pasta::Fp;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::constants::{domains, MERKLE_TREE_DEPTH, WITNESS_INPUTS, WITNESS_OUTPUTS};
use crate::hash::{fp_to_bytes, hash1, hash2, hash4};
use crate::witness::ProofInputs;

/// The kind of pool operation a submission claims
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationTag {
    Shield,
    Transfer,
    Unshield,
}

/// What the proof service returns on success
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProofOutput {
    pub proof: Vec<u8>,
    pub public_signals: Vec<Fp>,
}

/// Failures from the external proof service
#[derive(Debug, Error)]
pub enum ProofServiceError {
    /// The witness violated a circuit constraint. This means the local view
    /// disagreed with what was fed in - a local bug, not a transient fault.
    #[error("proving constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("proof service unavailable: {0}")]
    Unavailable(String),
}

/// The external proving system
///
/// Blocking from the core's perspective; callers own retry and cancellation
/// policy beyond the single local retry below.
pub trait ProofService {
    fn prove(&self, inputs: &ProofInputs) -> Result<ProofOutput, ProofServiceError>;
}

/// Call the proof service with at most one local retry
///
/// Transient failures get one more attempt. Constraint violations are
/// surfaced immediately: the witness itself is malformed and retrying the
/// same inputs cannot succeed.
pub fn prove_with_retry(
    service: &impl ProofService,
    inputs: &ProofInputs,
) -> Result<ProofOutput, ProofServiceError> {
    match service.prove(inputs) {
        Ok(output) => Ok(output),
        Err(err @ ProofServiceError::ConstraintViolation(_)) => Err(err),
        Err(err) => {
            warn!(error = %err, "proof service failed, retrying once");
            service.prove(inputs)
        }
    }
}

/// A submission to the on-chain verifier
#[derive(Clone, Debug)]
pub struct LedgerSubmission {
    pub op: OperationTag,
    pub proof: Vec<u8>,
    pub public_signals: Vec<Fp>,
}

impl LedgerSubmission {
    pub fn new(op: OperationTag, output: ProofOutput) -> Self {
        Self {
            op,
            proof: output.proof,
            public_signals: output.public_signals,
        }
    }
}

/// Ledger-side rejection of a submission
#[derive(Debug, Error)]
pub enum SubmitError {
    /// A stale-root race or a genuine bug; fatal for this attempt, never
    /// blindly retried.
    #[error("ledger rejected the proof: {0}")]
    InvalidProofRejection(String),

    /// The nullifier was already accepted once; resubmitting an accepted
    /// proof lands here, which makes submission retry-idempotent.
    #[error("nullifier already spent on the ledger")]
    DuplicateNullifier,
}

/// Native stand-in for the external prover
///
/// Re-implements the circuit's constraint semantics over the same witness:
/// Merkle inclusion and nullifier derivation for every slot carrying value,
/// output commitment correctness, and value conservation through the
/// field-encoded public amount. Slots with amount zero are exempt from the
/// inclusion check and must carry the fixed dummy commitment/nullifier pair.
#[derive(Clone, Copy, Debug, Default)]
pub struct MockProofService;

impl MockProofService {
    pub fn new() -> Self {
        Self
    }

    fn check_input_slot(w: &ProofInputs, slot: usize) -> Result<(), ProofServiceError> {
        let amount = w.in_amounts[slot];

        if amount == Fp::zero() {
            // Exemption path: no inclusion or uniqueness enforcement, but the
            // slot must still carry the canonical dummy pair for this token.
            let dummy_commitment = hash4(Fp::zero(), Fp::zero(), Fp::zero(), w.token_mint);
            let expected = hash2(dummy_commitment, hash1(Fp::zero()));
            if w.nullifiers[slot] != expected {
                return Err(ProofServiceError::ConstraintViolation(format!(
                    "input {} is a dummy slot with a malformed nullifier",
                    slot + 1
                )));
            }
            return Ok(());
        }

        let owner_hash = hash1(w.spending_key);
        if w.in_owner_pubkeys[slot] != owner_hash {
            return Err(ProofServiceError::ConstraintViolation(format!(
                "input {} is not controlled by the spending key",
                slot + 1
            )));
        }

        let commitment = hash4(
            amount,
            w.in_owner_pubkeys[slot],
            w.in_randomness[slot],
            w.token_mint,
        );

        if w.nullifiers[slot] != hash2(commitment, owner_hash) {
            return Err(ProofServiceError::ConstraintViolation(format!(
                "input {} nullifier does not match its note",
                slot + 1
            )));
        }

        // Fold the claimed path and compare against the anchored root
        let mut node = commitment;
        for level in 0..MERKLE_TREE_DEPTH {
            let index = w.in_path_indices[slot][level];
            let sibling = w.in_path_elements[slot][level];
            node = if index == Fp::one() {
                hash2(sibling, node)
            } else if index == Fp::zero() {
                hash2(node, sibling)
            } else {
                return Err(ProofServiceError::ConstraintViolation(format!(
                    "input {} path index at level {level} is not boolean",
                    slot + 1
                )));
            };
        }
        if node != w.merkle_root {
            return Err(ProofServiceError::ConstraintViolation(format!(
                "input {} is not included under the claimed merkle root",
                slot + 1
            )));
        }

        Ok(())
    }

    fn check_output_slot(w: &ProofInputs, slot: usize) -> Result<(), ProofServiceError> {
        let commitment = hash4(
            w.out_amounts[slot],
            w.out_recipients[slot],
            w.out_randomness[slot],
            w.token_mint,
        );
        if w.output_commitments[slot] != commitment {
            return Err(ProofServiceError::ConstraintViolation(format!(
                "output {} commitment does not match its note fields",
                slot + 1
            )));
        }
        Ok(())
    }
}

impl ProofService for MockProofService {
    fn prove(&self, w: &ProofInputs) -> Result<ProofOutput, ProofServiceError> {
        for slot in 0..WITNESS_INPUTS {
            Self::check_input_slot(w, slot)?;
        }
        for slot in 0..WITNESS_OUTPUTS {
            Self::check_output_slot(w, slot)?;
        }

        // Value conservation: outputs - inputs must equal the public amount.
        // Field arithmetic wraps exactly the way the encoding does, so one
        // subtraction covers both signs.
        let inputs_total = w.in_amounts.iter().fold(Fp::zero(), |acc, v| acc + v);
        let outputs_total = w.out_amounts.iter().fold(Fp::zero(), |acc, v| acc + v);
        if outputs_total - inputs_total != w.public_amount {
            return Err(ProofServiceError::ConstraintViolation(
                "public amount does not balance the value flow".to_string(),
            ));
        }

        let public_signals = w.public_signals();

        // Deterministic mock transcript over the public signals
        let mut hasher = Blake2b512::new();
        hasher.update(domains::MOCK_PROOF);
        for signal in &public_signals {
            hasher.update(fp_to_bytes(signal));
        }
        let proof = hasher.finalize()[..32].to_vec();

        Ok(ProofOutput {
            proof,
            public_signals,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use crate::merkle::Accumulator;
    use crate::note::{Note, NoteCommitment, Nullifier};
    use crate::store::WalletStore;
    use crate::witness::WitnessBuilder;
    use rand::rngs::OsRng;
    use std::cell::Cell;

    fn token() -> Fp {
        Fp::from(11u64)
    }

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
    fn test_shield_proof_verifies() {
        let (tree, store, sk) = funded_wallet(&[]);
        let op = WitnessBuilder::new(&tree, &store)
            .shield(&sk, 100_000, token(), &mut OsRng)
            .unwrap();

        let output = MockProofService::new().prove(&op.proof_inputs).unwrap();
        assert_eq!(output.public_signals, op.proof_inputs.public_signals());
        assert_eq!(output.proof.len(), 32);
    }

    #[test]
    fn test_shield_then_full_unshield() {
        // Shield 100000 units, reconcile, then unshield the full amount in
        // one dummy-padded transaction.
        let (mut tree, mut store, sk) = funded_wallet(&[]);
        let shield = WitnessBuilder::new(&tree, &store)
            .shield(&sk, 100_000, token(), &mut OsRng)
            .unwrap();
        MockProofService::new().prove(&shield.proof_inputs).unwrap();

        // The ledger inserts both output commitments in order
        for cm in shield.proof_inputs.output_commitments {
            tree.insert(cm).unwrap();
            store.push_leaf(NoteCommitment::from_field(cm));
        }
        store.add_owned(shield.created_notes[0].clone(), 0);

        let unshield = WitnessBuilder::new(&tree, &store)
            .unshield(&sk, 100_000, token(), &mut OsRng)
            .unwrap();
        let w = &unshield.proof_inputs;

        // public amount wraps to p - 100000
        assert_eq!(w.public_amount, -Fp::from(100_000u64));
        // slot 1 is the real spend, slot 2 the dummy, both against the fresh root
        assert_eq!(w.merkle_root, tree.root());
        assert_eq!(w.nullifiers[1], Nullifier::dummy(token()).to_field());

        let output = MockProofService::new().prove(w).unwrap();
        assert_eq!(output.public_signals[5], -Fp::from(100_000u64));
    }

    #[test]
    fn test_transfer_proof_verifies() {
        let (tree, store, sk) = funded_wallet(&[600, 900]);
        let recipient = SpendingKey::random(&mut OsRng).owner_key();

        let op = WitnessBuilder::new(&tree, &store)
            .transfer(&sk, recipient, 1200, token(), &mut OsRng)
            .unwrap();

        MockProofService::new().prove(&op.proof_inputs).unwrap();
    }

    #[test]
    fn test_tampered_amount_violates_balance() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let op = WitnessBuilder::new(&tree, &store)
            .unshield(&sk, 500, token(), &mut OsRng)
            .unwrap();

        let mut w = op.proof_inputs.clone();
        // Claim less left the pool than actually did
        w.public_amount = -Fp::from(100u64);

        let err = MockProofService::new().prove(&w).unwrap_err();
        assert!(matches!(err, ProofServiceError::ConstraintViolation(_)));
    }

    #[test]
    fn test_unanchored_input_is_rejected() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let op = WitnessBuilder::new(&tree, &store)
            .unshield(&sk, 500, token(), &mut OsRng)
            .unwrap();

        let mut w = op.proof_inputs.clone();
        // Break the claimed root; the real input no longer anchors
        w.merkle_root = w.merkle_root + Fp::one();

        let err = MockProofService::new().prove(&w).unwrap_err();
        assert!(matches!(err, ProofServiceError::ConstraintViolation(_)));
    }

    #[test]
    fn test_wrong_spending_key_is_rejected() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let op = WitnessBuilder::new(&tree, &store)
            .unshield(&sk, 500, token(), &mut OsRng)
            .unwrap();

        let mut w = op.proof_inputs.clone();
        w.spending_key = SpendingKey::random(&mut OsRng).to_field();

        let err = MockProofService::new().prove(&w).unwrap_err();
        assert!(matches!(err, ProofServiceError::ConstraintViolation(_)));
    }

    #[test]
    fn test_malformed_dummy_nullifier_is_rejected() {
        let (tree, store, sk) = funded_wallet(&[]);
        let op = WitnessBuilder::new(&tree, &store)
            .shield(&sk, 10, token(), &mut OsRng)
            .unwrap();

        let mut w = op.proof_inputs.clone();
        w.nullifiers[1] = Fp::from(99u64);

        let err = MockProofService::new().prove(&w).unwrap_err();
        assert!(matches!(err, ProofServiceError::ConstraintViolation(_)));
    }

    /// Fails transiently a fixed number of times, then succeeds
    struct FlakyService {
        failures_left: Cell<u32>,
        inner: MockProofService,
    }

    impl ProofService for FlakyService {
        fn prove(&self, inputs: &ProofInputs) -> Result<ProofOutput, ProofServiceError> {
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(ProofServiceError::Unavailable("mock outage".to_string()));
            }
            self.inner.prove(inputs)
        }
    }

    #[test]
    fn test_single_retry_on_transient_failure() {
        let (tree, store, sk) = funded_wallet(&[]);
        let op = WitnessBuilder::new(&tree, &store)
            .shield(&sk, 10, token(), &mut OsRng)
            .unwrap();

        let one_failure = FlakyService {
            failures_left: Cell::new(1),
            inner: MockProofService::new(),
        };
        assert!(prove_with_retry(&one_failure, &op.proof_inputs).is_ok());

        let two_failures = FlakyService {
            failures_left: Cell::new(2),
            inner: MockProofService::new(),
        };
        assert!(matches!(
            prove_with_retry(&two_failures, &op.proof_inputs),
            Err(ProofServiceError::Unavailable(_))
        ));
    }

    #[test]
    fn test_constraint_violation_is_not_retried() {
        let (tree, store, sk) = funded_wallet(&[1000]);
        let op = WitnessBuilder::new(&tree, &store)
            .unshield(&sk, 500, token(), &mut OsRng)
            .unwrap();

        let mut w = op.proof_inputs.clone();
        w.public_amount = Fp::zero();

        struct CountingService {
            calls: Cell<u32>,
        }
        impl ProofService for CountingService {
            fn prove(&self, inputs: &ProofInputs) -> Result<ProofOutput, ProofServiceError> {
                self.calls.set(self.calls.get() + 1);
                MockProofService::new().prove(inputs)
            }
        }

        let service = CountingService { calls: Cell::new(0) };
        assert!(prove_with_retry(&service, &w).is_err());
        assert_eq!(service.calls.get(), 1);
    }
}
