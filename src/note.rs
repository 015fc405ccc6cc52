//! Note structure - the fundamental unit of value in the pool
//!
//! A note represents shielded value that can be spent. It contains:
//! - amount: the value in base units
//! - owner_key: the public key hash that can spend this note
//! - randomness: blinding for the commitment
//! - token_id: the token mint this value denominates
//!
//! The note plaintext is known only to its owner. What the ledger sees is the
//! commitment `H4(amount, owner_key, randomness, token_id)`, and - once the
//! note is spent - the nullifier `H2(commitment, H1(spending key))`.

use ff::FromUniformBytes;
use halo2_proofs::pasta::Fp;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::hash::{self, fp_from_bytes, fp_to_bytes};
use crate::keys::{OwnerKey, SpendingKey};

/// A note representing a unit of shielded value
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    /// The value of this note in base units
    amount: u64,
    /// The owner key that can spend this note
    owner_key: OwnerKey,
    /// Commitment blinding
    #[serde(with = "crate::hash::serde_fp")]
    randomness: Fp,
    /// The token mint this note denominates
    #[serde(with = "crate::hash::serde_fp")]
    token_id: Fp,
}

impl Note {
    /// Create a new note with fresh randomness
    pub fn new<R: RngCore + CryptoRng>(
        amount: u64,
        owner_key: OwnerKey,
        token_id: Fp,
        rng: &mut R,
    ) -> Self {
        let randomness = {
            let mut wide = [0u8; 64];
            rng.fill_bytes(&mut wide);
            Fp::from_uniform_bytes(&wide)
        };

        Self {
            amount,
            owner_key,
            randomness,
            token_id,
        }
    }

    /// Create a note with specific randomness (for testing/determinism)
    pub fn from_parts(amount: u64, owner_key: OwnerKey, randomness: Fp, token_id: Fp) -> Self {
        Self {
            amount,
            owner_key,
            randomness,
            token_id,
        }
    }

    /// The all-zero placeholder note used to pad operations to the fixed
    /// 2-in/2-out shape
    ///
    /// Every field is zero except the token id, which stays the real token of
    /// the transaction. Its commitment and nullifier are therefore the same
    /// fixed pair for every operation on a given token.
    pub fn dummy(token_id: Fp) -> Self {
        Self {
            amount: 0,
            owner_key: OwnerKey::from_field(Fp::zero()),
            randomness: Fp::zero(),
            token_id,
        }
    }

    /// Whether this is a padding slot (amount zero)
    pub fn is_dummy(&self) -> bool {
        self.amount == 0
    }

    /// Get the value of this note
    pub fn amount(&self) -> u64 {
        self.amount
    }

    /// Get the owner key
    pub fn owner_key(&self) -> OwnerKey {
        self.owner_key
    }

    /// Get the commitment blinding
    pub fn randomness(&self) -> Fp {
        self.randomness
    }

    /// Get the token id
    pub fn token_id(&self) -> Fp {
        self.token_id
    }

    /// Compute the note commitment
    ///
    /// This is what gets appended to the Merkle accumulator.
    pub fn commitment(&self) -> NoteCommitment {
        NoteCommitment(hash::hash4(
            Fp::from(self.amount),
            self.owner_key.to_field(),
            self.randomness,
            self.token_id,
        ))
    }

    /// Compute the nullifier for this note given the spending key
    ///
    /// The nullifier is published when spending to prevent double-spends.
    /// Only the holder of the spending key whose `H1` matches this note's
    /// owner key produces the nullifier the ledger will accept.
    pub fn nullifier(&self, sk: &SpendingKey) -> Nullifier {
        Nullifier(hash::hash2(
            self.commitment().0,
            sk.owner_key().to_field(),
        ))
    }
}

impl fmt::Debug for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Note")
            .field("amount", &self.amount)
            .field("owner_key", &self.owner_key)
            .field("commitment", &self.commitment())
            .finish()
    }
}

/// A note commitment - the public representation of a note
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCommitment(#[serde(with = "crate::hash::serde_fp")] Fp);

impl NoteCommitment {
    /// The fixed commitment of the dummy note for a token: `H4(0, 0, 0, t)`
    pub fn dummy(token_id: Fp) -> Self {
        Note::dummy(token_id).commitment()
    }

    /// Create from a raw field element (for deserialization)
    pub fn from_field(f: Fp) -> Self {
        Self(f)
    }

    /// Get the inner field element
    pub fn to_field(&self) -> Fp {
        self.0
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        fp_to_bytes(&self.0)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        fp_from_bytes(bytes).map(Self)
    }
}

impl fmt::Debug for NoteCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "NoteCommitment({:02x}{:02x}...)", bytes[0], bytes[1])
    }
}

/// A nullifier - revealed when spending a note to prevent double-spending
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nullifier(#[serde(with = "crate::hash::serde_fp")] Fp);

// Custom Hash implementation since Fp doesn't implement Hash
impl std::hash::Hash for Nullifier {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Nullifier {
    /// The fixed nullifier of the dummy note for a token:
    /// `H2(H4(0, 0, 0, t), H1(0))`
    ///
    /// Dummy slots carry a zero spending key, so their nullifier is the same
    /// known constant in every transaction; the verifier exempts it from
    /// uniqueness because the slot's amount is zero.
    pub fn dummy(token_id: Fp) -> Self {
        Self(hash::hash2(
            NoteCommitment::dummy(token_id).to_field(),
            hash::hash1(Fp::zero()),
        ))
    }

    /// Create from a raw field element
    pub fn from_field(f: Fp) -> Self {
        Self(f)
    }

    /// Get the inner field element
    pub fn to_field(&self) -> Fp {
        self.0
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> [u8; 32] {
        fp_to_bytes(&self.0)
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        fp_from_bytes(bytes).map(Self)
    }
}

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "Nullifier({:02x}{:02x}...)", bytes[0], bytes[1])
    }
}

/// A set of nullifiers (used to track spent notes)
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct NullifierSet {
    nullifiers: std::collections::HashSet<Nullifier>,
}

impl NullifierSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a nullifier has been seen (note already spent)
    pub fn contains(&self, nf: &Nullifier) -> bool {
        self.nullifiers.contains(nf)
    }

    /// Add a nullifier (mark note as spent)
    /// Returns false if already present (double-spend attempt)
    pub fn insert(&mut self, nf: Nullifier) -> bool {
        self.nullifiers.insert(nf)
    }

    /// Number of spent notes
    pub fn len(&self) -> usize {
        self.nullifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nullifiers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn token() -> Fp {
        Fp::from(42u64)
    }

    #[test]
    fn test_commitment_deterministic() {
        let sk = SpendingKey::random(&mut OsRng);
        let note = Note::new(1000, sk.owner_key(), token(), &mut OsRng);

        assert_eq!(note.commitment(), note.commitment());
    }

    #[test]
    fn test_each_field_changes_commitment() {
        let sk = SpendingKey::random(&mut OsRng);
        let other = SpendingKey::random(&mut OsRng);

        for _ in 0..50 {
            let base = Note::new(1000, sk.owner_key(), token(), &mut OsRng);
            let cm = base.commitment();

            let bumped_amount =
                Note::from_parts(1001, base.owner_key(), base.randomness(), base.token_id());
            let other_owner =
                Note::from_parts(1000, other.owner_key(), base.randomness(), base.token_id());
            let other_randomness = Note::from_parts(
                1000,
                base.owner_key(),
                base.randomness() + Fp::one(),
                base.token_id(),
            );
            let other_token = Note::from_parts(
                1000,
                base.owner_key(),
                base.randomness(),
                base.token_id() + Fp::one(),
            );

            assert_ne!(cm, bumped_amount.commitment());
            assert_ne!(cm, other_owner.commitment());
            assert_ne!(cm, other_randomness.commitment());
            assert_ne!(cm, other_token.commitment());
        }
    }

    #[test]
    fn test_nullifier_requires_spending_key() {
        let sk = SpendingKey::random(&mut OsRng);
        let note = Note::new(1000, sk.owner_key(), token(), &mut OsRng);

        let nf = note.nullifier(&sk);
        assert_eq!(nf, note.nullifier(&sk));

        // A different spending key produces a different (useless) nullifier
        let sk2 = SpendingKey::random(&mut OsRng);
        assert_ne!(nf, note.nullifier(&sk2));
    }

    #[test]
    fn test_nullifier_binds_owner_key_hash() {
        let sk = SpendingKey::random(&mut OsRng);
        let note = Note::new(500, sk.owner_key(), token(), &mut OsRng);

        let expected = crate::hash::hash2(
            note.commitment().to_field(),
            crate::hash::hash1(sk.to_field()),
        );
        assert_eq!(note.nullifier(&sk).to_field(), expected);
    }

    #[test]
    fn test_dummy_pair_fixed_per_token() {
        let t = token();

        let cm1 = NoteCommitment::dummy(t);
        let cm2 = Note::dummy(t).commitment();
        assert_eq!(cm1, cm2);

        let nf1 = Nullifier::dummy(t);
        let nf2 = Nullifier::dummy(t);
        assert_eq!(nf1, nf2);

        // Different tokens give a different pair
        let other = t + Fp::one();
        assert_ne!(NoteCommitment::dummy(other), cm1);
        assert_ne!(Nullifier::dummy(other), nf1);
    }

    #[test]
    fn test_commitment_serialization() {
        let sk = SpendingKey::random(&mut OsRng);
        let note = Note::new(1000, sk.owner_key(), token(), &mut OsRng);

        let cm = note.commitment();
        let bytes = cm.to_bytes();
        assert_eq!(NoteCommitment::from_bytes(&bytes), Some(cm));
    }

    #[test]
    fn test_note_json_roundtrip() {
        let sk = SpendingKey::random(&mut OsRng);
        let note = Note::new(1234, sk.owner_key(), token(), &mut OsRng);

        let json = serde_json::to_string(&note).unwrap();
        let recovered: Note = serde_json::from_str(&json).unwrap();

        assert_eq!(recovered, note);
        assert_eq!(recovered.commitment(), note.commitment());
    }

    #[test]
    fn test_nullifier_set() {
        let sk = SpendingKey::random(&mut OsRng);
        let note = Note::new(1000, sk.owner_key(), token(), &mut OsRng);
        let nf = note.nullifier(&sk);

        let mut nf_set = NullifierSet::new();

        // First insertion succeeds
        assert!(nf_set.insert(nf));

        // Second insertion fails (double-spend)
        assert!(!nf_set.insert(nf));

        assert!(nf_set.contains(&nf));
    }
}
