//! Spending key and owner key
//!
//! Ownership in the pool is a single hash relation:
//!
//! ```text
//! SpendingKey (secret)
//!     |
//!     +---> OwnerKey = H1(spending key)   - the public receiving identity
//!     |
//!     +---> vault key                      - symmetric key for the local note store
//! ```
//!
//! A note is spendable only by whoever can reproduce its `owner_key` from a
//! spending key. The spending key itself is held transiently: it enters
//! witness assembly, is scrubbed when dropped, and is never logged or
//! persisted in plaintext.

use blake2::{Blake2b512, Digest};
use ff::FromUniformBytes;
use halo2_proofs::pasta::Fp;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::domains;
use crate::hash::{self, fp_from_bytes, fp_to_bytes};

/// The secret spending key - must be kept secret and short-lived in memory
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SpendingKey {
    inner: [u8; 32],
}

impl SpendingKey {
    /// Generate a new random spending key
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut inner = [0u8; 32];
        rng.fill_bytes(&mut inner);
        Self { inner }
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { inner: bytes }
    }

    /// Map the key material into the field
    ///
    /// This is the `spending_key` value the proving system receives.
    pub fn to_field(&self) -> Fp {
        let mut wide = [0u8; 64];
        wide[..32].copy_from_slice(&self.inner);
        Fp::from_uniform_bytes(&wide)
    }

    /// Derive the public owner key: `H1(spending key)`
    pub fn owner_key(&self) -> OwnerKey {
        OwnerKey(hash::hash1(self.to_field()))
    }

    /// Derive the symmetric key for the local note vault
    ///
    /// The vault key is storage material, not spend authority: it cannot be
    /// inverted back to the spending key.
    pub fn vault_key(&self) -> [u8; 32] {
        let mut hasher = Blake2b512::new();
        hasher.update(domains::VAULT_KEY);
        hasher.update(self.inner);
        let hash = hasher.finalize();

        let mut key = [0u8; 32];
        key.copy_from_slice(&hash[..32]);
        key
    }
}

impl fmt::Debug for SpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpendingKey")
            .field("inner", &"[REDACTED]")
            .finish()
    }
}

/// Public receiving identity: `H1(spending key)`
///
/// Notes are addressed to an owner key. Only the holder of the matching
/// spending key can reproduce it and authorize a spend.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerKey(#[serde(with = "crate::hash::serde_fp")] Fp);

impl OwnerKey {
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

impl fmt::Debug for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.to_bytes();
        write!(f, "OwnerKey({:02x}{:02x}...)", bytes[0], bytes[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn test_owner_key_deterministic() {
        let sk = SpendingKey::random(&mut OsRng);

        assert_eq!(sk.owner_key(), sk.owner_key());
    }

    #[test]
    fn test_different_keys_different_owners() {
        let sk1 = SpendingKey::random(&mut OsRng);
        let sk2 = SpendingKey::random(&mut OsRng);

        assert_ne!(sk1.owner_key(), sk2.owner_key());
    }

    #[test]
    fn test_owner_key_is_hash_of_key_field() {
        let sk = SpendingKey::from_bytes([7u8; 32]);

        assert_eq!(
            sk.owner_key().to_field(),
            crate::hash::hash1(sk.to_field())
        );
    }

    #[test]
    fn test_vault_key_differs_from_key_material() {
        let sk = SpendingKey::from_bytes([9u8; 32]);
        let vk = sk.vault_key();

        assert_ne!(vk, [9u8; 32]);
        assert_eq!(vk, SpendingKey::from_bytes([9u8; 32]).vault_key());
    }

    #[test]
    fn test_owner_key_byte_roundtrip() {
        let sk = SpendingKey::random(&mut OsRng);
        let ok = sk.owner_key();

        assert_eq!(OwnerKey::from_bytes(&ok.to_bytes()), Some(ok));
    }
}
