//! Encrypted at-rest storage for note plaintexts
//!
//! Note plaintexts never touch disk unencrypted. Each note is sealed with
//! ChaCha20Poly1305 under the wallet's vault key (derived from the spending
//! key, see `keys`), with a fresh random nonce per entry.
//!
//! The sealed plaintext layout:
//! - 1 byte: note type flag
//! - 8 bytes: amount (u64, little-endian)
//! - 32 bytes: owner key
//! - 32 bytes: randomness
//! - 32 bytes: token id
//! - 8 bytes: leaf index (u64, little-endian)

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::{CryptoRng, RngCore};
use thiserror::Error;

use crate::constants::NOTE_PLAINTEXT_SIZE;
use crate::hash::{fp_from_bytes, fp_to_bytes};
use crate::keys::OwnerKey;
use crate::note::Note;

/// Note type flag for the current plaintext layout
const NOTE_FLAG: u8 = 0x01;

/// Errors from sealing/opening vault entries
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,
    #[error("decryption failed - wrong vault key or corrupted ciphertext")]
    DecryptionFailed,
    #[error("invalid sealed note length")]
    InvalidLength,
}

/// A note plaintext sealed for local storage
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SealedNote {
    /// Per-entry random nonce
    pub nonce: [u8; 12],
    /// Ciphertext including the AEAD tag
    pub ciphertext: Vec<u8>,
}

impl SealedNote {
    /// Get the size of the sealed note
    pub fn size(&self) -> usize {
        12 + self.ciphertext.len()
    }

    /// Serialize to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&self.ciphertext);
        bytes
    }

    /// Deserialize from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VaultError> {
        if bytes.len() < 12 + 16 {
            // At minimum: 12 byte nonce + 16 byte tag
            return Err(VaultError::InvalidLength);
        }

        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&bytes[..12]);

        Ok(Self {
            nonce,
            ciphertext: bytes[12..].to_vec(),
        })
    }
}

/// Seal a note and its leaf index under the vault key
pub fn seal_note<R: RngCore + CryptoRng>(
    note: &Note,
    leaf_index: u64,
    vault_key: &[u8; 32],
    rng: &mut R,
) -> Result<SealedNote, VaultError> {
    let mut plaintext = Vec::with_capacity(NOTE_PLAINTEXT_SIZE);
    plaintext.push(NOTE_FLAG);
    plaintext.extend_from_slice(&note.amount().to_le_bytes());
    plaintext.extend_from_slice(&note.owner_key().to_bytes());
    plaintext.extend_from_slice(&fp_to_bytes(&note.randomness()));
    plaintext.extend_from_slice(&fp_to_bytes(&note.token_id()));
    plaintext.extend_from_slice(&leaf_index.to_le_bytes());

    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut nonce);

    let cipher =
        ChaCha20Poly1305::new_from_slice(vault_key).map_err(|_| VaultError::InvalidLength)?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_ref())
        .map_err(|_| VaultError::EncryptionFailed)?;

    Ok(SealedNote { nonce, ciphertext })
}

/// Open a sealed note with the vault key
///
/// Returns the note plaintext and its leaf index.
pub fn open_note(sealed: &SealedNote, vault_key: &[u8; 32]) -> Result<(Note, u64), VaultError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(vault_key).map_err(|_| VaultError::InvalidLength)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), sealed.ciphertext.as_ref())
        .map_err(|_| VaultError::DecryptionFailed)?;

    if plaintext.len() != NOTE_PLAINTEXT_SIZE || plaintext[0] != NOTE_FLAG {
        return Err(VaultError::DecryptionFailed);
    }

    fn field_bytes(chunk: &[u8]) -> Result<[u8; 32], VaultError> {
        chunk.try_into().map_err(|_| VaultError::DecryptionFailed)
    }

    let amount = u64::from_le_bytes(
        plaintext[1..9]
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?,
    );
    let owner_key = OwnerKey::from_bytes(&field_bytes(&plaintext[9..41])?)
        .ok_or(VaultError::DecryptionFailed)?;
    let randomness =
        fp_from_bytes(&field_bytes(&plaintext[41..73])?).ok_or(VaultError::DecryptionFailed)?;
    let token_id =
        fp_from_bytes(&field_bytes(&plaintext[73..105])?).ok_or(VaultError::DecryptionFailed)?;
    let leaf_index = u64::from_le_bytes(
        plaintext[105..113]
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?,
    );

    Ok((Note::from_parts(amount, owner_key, randomness, token_id), leaf_index))
}
