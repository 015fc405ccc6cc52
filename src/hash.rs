//! Poseidon hash family over the Pallas base field
//!
//! Every cryptographic derivation in the pool - commitments, nullifiers,
//! owner keys, tree nodes - goes through one of the fixed-arity hashes below.
//! Arity is part of the hash identity: `hash2(a, b)` and `hash4(a, b, 0, 0)`
//! are unrelated values, so callers cannot accidentally collide derivations
//! that take different numbers of inputs.
//!
//! Poseidon parameters (P128Pow5T3 over Pasta):
//! - Width: 3 (rate 2 + 1 capacity)
//! - Full rounds: 8
//! - Partial rounds: 56
//! - S-box: x^5

use blake2::{Blake2b512, Digest};
use ff::{FromUniformBytes, PrimeField};
use halo2_gadgets::poseidon::primitives::{self as poseidon, ConstantLength, P128Pow5T3};
use halo2_proofs::pasta::Fp;

/// Hash a single field element
pub fn hash1(a: Fp) -> Fp {
    poseidon::Hash::<_, P128Pow5T3, ConstantLength<1>, 3, 2>::init().hash([a])
}

/// Hash two field elements (used for Merkle nodes and nullifiers)
pub fn hash2(a: Fp, b: Fp) -> Fp {
    poseidon::Hash::<_, P128Pow5T3, ConstantLength<2>, 3, 2>::init().hash([a, b])
}

/// Hash three field elements
pub fn hash3(a: Fp, b: Fp, c: Fp) -> Fp {
    poseidon::Hash::<_, P128Pow5T3, ConstantLength<3>, 3, 2>::init().hash([a, b, c])
}

/// Hash four field elements (used for note commitments)
pub fn hash4(a: Fp, b: Fp, c: Fp, d: Fp) -> Fp {
    poseidon::Hash::<_, P128Pow5T3, ConstantLength<4>, 3, 2>::init().hash([a, b, c, d])
}

/// Map an ASCII domain tag to a field element
///
/// The tag is stretched with Blake2b and reduced from 64 uniform bytes, so
/// the result is a fixed constant outside anyone's control.
pub fn domain_separator_field(domain: &[u8]) -> Fp {
    let mut hasher = Blake2b512::new();
    hasher.update(domain);
    let hash = hasher.finalize();

    let mut wide = [0u8; 64];
    wide.copy_from_slice(&hash);
    Fp::from_uniform_bytes(&wide)
}

/// Canonical little-endian byte representation of a field element
pub fn fp_to_bytes(f: &Fp) -> [u8; 32] {
    f.to_repr()
}

/// Parse a field element from its canonical byte representation
///
/// Returns `None` for non-canonical encodings (values >= the modulus).
pub fn fp_from_bytes(bytes: &[u8; 32]) -> Option<Fp> {
    Option::from(Fp::from_repr(*bytes))
}

/// Serde adapter for `Fp` as a 0x-prefixed hex string of the canonical repr
pub mod serde_fp {
    use super::*;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(fp: &Fp, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(fp_to_bytes(fp))))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fp, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let stripped = s.strip_prefix("0x").unwrap_or(&s);
        if stripped.len() != 64 {
            return Err(de::Error::custom(format!(
                "expected 64 hex chars, got {}",
                stripped.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(stripped, &mut bytes).map_err(de::Error::custom)?;
        fp_from_bytes(&bytes).ok_or_else(|| de::Error::custom("invalid field element encoding"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = Fp::from(123u64);
        let b = Fp::from(456u64);

        assert_eq!(hash2(a, b), hash2(a, b));
        assert_ne!(hash2(a, b), hash2(b, a));
    }

    #[test]
    fn test_arity_is_part_of_identity() {
        let a = Fp::from(7u64);
        let z = Fp::zero();

        // Padding with zeros must not collide across arities
        assert_ne!(hash1(a), hash2(a, z));
        assert_ne!(hash2(a, z), hash3(a, z, z));
        assert_ne!(hash3(a, z, z), hash4(a, z, z, z));
    }

    #[test]
    fn test_domain_separator_fixed() {
        let d1 = domain_separator_field(b"tag-one");
        let d2 = domain_separator_field(b"tag-one");
        let d3 = domain_separator_field(b"tag-two");

        assert_eq!(d1, d2);
        assert_ne!(d1, d3);
        assert_ne!(d1, Fp::zero());
    }

    #[test]
    fn test_field_byte_roundtrip() {
        let v = hash1(Fp::from(99u64));
        let bytes = fp_to_bytes(&v);
        assert_eq!(fp_from_bytes(&bytes), Some(v));
    }

    #[test]
    fn test_non_canonical_bytes_rejected() {
        // All-0xff is far above the Pallas modulus
        let bytes = [0xffu8; 32];
        assert!(fp_from_bytes(&bytes).is_none());
    }
}
