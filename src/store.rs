//! Persisted wallet-local state
//!
//! Everything this core needs to survive a restart:
//! - the ordered leaf list `(commitment, leaf_index)` mirroring the ledger,
//! - the wallet's owned notes with their positions and spent flags,
//! - the set of published nullifiers the wallet knows about,
//! - the last confirmed `(root, leaf_count)` checkpoint.
//!
//! Leaves are append-only; spending a note only flips its local spent flag,
//! the leaf itself stays forever.

use halo2_proofs::pasta::Fp;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::note::{Note, NoteCommitment, Nullifier, NullifierSet};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("wallet store serialization failed: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Last confirmed reconciliation position
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(with = "crate::hash::serde_fp")]
    pub root: Fp,
    pub leaf_count: u64,
}

/// A ledger leaf as the wallet recorded it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafRecord {
    pub commitment: NoteCommitment,
    pub leaf_index: u64,
}

/// An owned note bound to its accumulator position
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OwnedNote {
    pub note: Note,
    pub leaf_index: u64,
    /// Set once the note's nullifier has been published; the plaintext is
    /// kept for records, the leaf is never deleted.
    pub spent: bool,
}

/// The wallet's persisted state
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct WalletStore {
    leaves: Vec<LeafRecord>,
    owned: Vec<OwnedNote>,
    spent_nullifiers: NullifierSet,
    checkpoint: Option<Checkpoint>,
}

impl WalletStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a leaf, assigning the next index. Returns the assigned index.
    pub fn push_leaf(&mut self, commitment: NoteCommitment) -> u64 {
        let leaf_index = self.leaves.len() as u64;
        self.leaves.push(LeafRecord {
            commitment,
            leaf_index,
        });
        leaf_index
    }

    /// The ordered leaf records
    pub fn leaves(&self) -> &[LeafRecord] {
        &self.leaves
    }

    /// The ordered leaf values, ready for an accumulator rebuild
    pub fn leaf_values(&self) -> Vec<Fp> {
        self.leaves.iter().map(|l| l.commitment.to_field()).collect()
    }

    /// The commitment recorded at a leaf index, if any
    pub fn leaf_at(&self, leaf_index: u64) -> Option<NoteCommitment> {
        self.leaves.get(leaf_index as usize).map(|l| l.commitment)
    }

    /// Record a newly received or minted note at its confirmed position
    pub fn add_owned(&mut self, note: Note, leaf_index: u64) {
        self.owned.push(OwnedNote {
            note,
            leaf_index,
            spent: false,
        });
    }

    /// All owned records, spent or not
    pub fn owned(&self) -> &[OwnedNote] {
        &self.owned
    }

    /// Owned unspent notes for a token
    pub fn unspent(&self, token_id: Fp) -> impl Iterator<Item = &OwnedNote> {
        self.owned
            .iter()
            .filter(move |o| !o.spent && o.note.token_id() == token_id)
    }

    /// Total unspent balance for a token
    pub fn balance(&self, token_id: Fp) -> u128 {
        self.unspent(token_id)
            .map(|o| o.note.amount() as u128)
            .sum()
    }

    /// Find an owned record by its commitment
    pub fn find_owned(&self, commitment: &NoteCommitment) -> Option<&OwnedNote> {
        self.owned
            .iter()
            .find(|o| o.note.commitment() == *commitment)
    }

    /// Flip the local spent flag for a note. Returns false if unknown or
    /// already spent.
    pub fn mark_note_spent(&mut self, commitment: &NoteCommitment) -> bool {
        match self
            .owned
            .iter_mut()
            .find(|o| !o.spent && o.note.commitment() == *commitment)
        {
            Some(record) => {
                record.spent = true;
                true
            }
            None => false,
        }
    }

    /// Record a published nullifier. Returns false on a duplicate.
    pub fn record_nullifier(&mut self, nf: Nullifier) -> bool {
        self.spent_nullifiers.insert(nf)
    }

    /// Whether a nullifier is known published
    pub fn is_nullifier_spent(&self, nf: &Nullifier) -> bool {
        self.spent_nullifiers.contains(nf)
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.checkpoint
    }

    pub fn set_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.checkpoint = Some(checkpoint);
    }

    /// Serialize the full store to JSON
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Load a store from JSON
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SpendingKey;
    use rand::rngs::OsRng;

    fn token() -> Fp {
        Fp::from(5u64)
    }

    fn sample_store() -> (WalletStore, SpendingKey) {
        let sk = SpendingKey::random(&mut OsRng);
        let mut store = WalletStore::new();

        for amount in [100u64, 250, 40] {
            let note = Note::new(amount, sk.owner_key(), token(), &mut OsRng);
            let idx = store.push_leaf(note.commitment());
            store.add_owned(note, idx);
        }
        (store, sk)
    }

    #[test]
    fn test_leaf_indices_are_sequential() {
        let (store, _) = sample_store();
        for (i, leaf) in store.leaves().iter().enumerate() {
            assert_eq!(leaf.leaf_index, i as u64);
        }
        assert_eq!(store.leaf_at(1), Some(store.leaves()[1].commitment));
        assert_eq!(store.leaf_at(99), None);
    }

    #[test]
    fn test_balance_and_spending() {
        let (mut store, _) = sample_store();
        assert_eq!(store.balance(token()), 390);

        let cm = store.owned()[1].note.commitment();
        assert!(store.mark_note_spent(&cm));
        assert_eq!(store.balance(token()), 140);

        // Double-marking fails
        assert!(!store.mark_note_spent(&cm));

        // Other tokens see nothing
        assert_eq!(store.balance(token() + Fp::one()), 0);
    }

    #[test]
    fn test_nullifier_bookkeeping() {
        let (mut store, sk) = sample_store();
        let nf = store.owned()[0].note.nullifier(&sk);

        assert!(!store.is_nullifier_spent(&nf));
        assert!(store.record_nullifier(nf));
        assert!(store.is_nullifier_spent(&nf));
        assert!(!store.record_nullifier(nf));
    }

    #[test]
    fn test_json_roundtrip() {
        let (mut store, sk) = sample_store();
        let nf = store.owned()[2].note.nullifier(&sk);
        store.record_nullifier(nf);
        store.set_checkpoint(Checkpoint {
            root: Fp::from(77u64),
            leaf_count: 3,
        });

        let json = store.to_json().unwrap();
        let recovered = WalletStore::from_json(&json).unwrap();

        assert_eq!(recovered.leaves(), store.leaves());
        assert_eq!(recovered.balance(token()), store.balance(token()));
        assert!(recovered.is_nullifier_spent(&nf));
        assert_eq!(recovered.checkpoint(), store.checkpoint());
    }
}
