//! Signed pool-delta encoding
//!
//! Each operation moves a net amount into (positive) or out of (negative)
//! the shielded pool: `delta = sum(outputs) - sum(inputs)`. The proving
//! system only speaks field elements, so the sign rides on field
//! wraparound: a negative delta encodes as `p - |delta|`.
//!
//! Decoding is unambiguous only while `|delta| < p/2`; both directions
//! reject magnitudes at or beyond that boundary.

use ff::PrimeField;
use halo2_proofs::pasta::Fp;
use thiserror::Error;

/// Little-endian canonical repr of floor(p / 2) for the Pallas base field,
/// p = 0x40000000000000000000000000000000224698fc094cf91b992d30ed00000001
const HALF_MODULUS_REPR: [u8; 32] = [
    0x00, 0x00, 0x00, 0x80, 0x76, 0x98, 0x96, 0xcc, 0x8d, 0x7c, 0xa6, 0x04, 0x7e, 0x4c, 0x23,
    0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x20,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AmountError {
    #[error("delta magnitude at or beyond half the field modulus is ambiguous")]
    AmbiguousAmount,
}

/// Net value flow of one operation, as a sign and a field magnitude
///
/// The magnitude is kept as a field element so the full encodable range
/// (anything below p/2) is representable, not just what fits an integer
/// type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolDelta {
    magnitude: Fp,
    negative: bool,
}

impl PoolDelta {
    /// The zero delta (a pure shielded-to-shielded transfer)
    pub fn zero() -> Self {
        Self {
            magnitude: Fp::zero(),
            negative: false,
        }
    }

    /// A non-negative delta (value entering the pool)
    pub fn positive(magnitude: Fp) -> Self {
        Self {
            magnitude,
            negative: false,
        }
    }

    /// A non-positive delta (value leaving the pool)
    ///
    /// Negative zero is canonicalized to zero.
    pub fn negative(magnitude: Fp) -> Self {
        Self {
            negative: magnitude != Fp::zero(),
            magnitude,
        }
    }

    /// Build from a machine integer
    pub fn from_i128(delta: i128) -> Self {
        if delta < 0 {
            Self::negative(Fp::from_u128(delta.unsigned_abs()))
        } else {
            Self::positive(Fp::from_u128(delta as u128))
        }
    }

    /// Build from the two sides of an operation's value flow
    pub fn from_flows(outputs_total: u128, inputs_total: u128) -> Self {
        if outputs_total >= inputs_total {
            Self::positive(Fp::from_u128(outputs_total - inputs_total))
        } else {
            Self::negative(Fp::from_u128(inputs_total - outputs_total))
        }
    }

    /// Recover a machine integer, if the magnitude fits
    pub fn to_i128(&self) -> Option<i128> {
        let repr = self.magnitude.to_repr();
        if repr[16..].iter().any(|&b| b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&repr[..16]);
        let magnitude = u128::from_le_bytes(low);
        if magnitude > i128::MAX as u128 {
            return None;
        }
        let signed = magnitude as i128;
        Some(if self.negative { -signed } else { signed })
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> Fp {
        self.magnitude
    }
}

/// Whether a field element, read as an integer, is strictly below floor(p/2)
fn below_half_modulus(value: &Fp) -> bool {
    let repr = value.to_repr();
    for i in (0..32).rev() {
        if repr[i] != HALF_MODULUS_REPR[i] {
            return repr[i] < HALF_MODULUS_REPR[i];
        }
    }
    false
}

/// Encode a signed delta as the `public_amount` field element
///
/// `delta >= 0` maps to itself; `delta < 0` maps to `p - |delta|`. Rejects
/// magnitudes at or beyond p/2, which the half-field rule cannot represent
/// unambiguously.
pub fn encode_public_amount(delta: &PoolDelta) -> Result<Fp, AmountError> {
    if !below_half_modulus(&delta.magnitude) {
        return Err(AmountError::AmbiguousAmount);
    }
    Ok(if delta.negative {
        -delta.magnitude
    } else {
        delta.magnitude
    })
}

/// Decode a `public_amount` field element back to a signed delta
///
/// The inverse half-field rule: values below p/2 read as positive, values
/// whose negation is below p/2 read as negative. The two field values
/// readable under neither sign are rejected.
pub fn decode_public_amount(value: Fp) -> Result<PoolDelta, AmountError> {
    if below_half_modulus(&value) {
        return Ok(PoolDelta::positive(value));
    }
    let negated = -value;
    if below_half_modulus(&negated) {
        return Ok(PoolDelta::negative(negated));
    }
    Err(AmountError::AmbiguousAmount)
}
