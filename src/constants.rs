//! Protocol constants for the shielded pool

/// Merkle tree depth - 20 levels allows for 2^20 (~1 million) note commitments
pub const MERKLE_TREE_DEPTH: usize = 20;

/// Maximum number of leaves the accumulator can hold
pub const MAX_TREE_LEAVES: u64 = 1 << MERKLE_TREE_DEPTH;

/// Number of input-note slots in the fixed proving shape
pub const WITNESS_INPUTS: usize = 2;

/// Number of output-note slots in the fixed proving shape
pub const WITNESS_OUTPUTS: usize = 2;

/// Sealed note plaintext size in bytes:
/// - 1 byte: note type flag
/// - 8 bytes: amount (u64)
/// - 32 bytes: owner key
/// - 32 bytes: randomness
/// - 32 bytes: token id
/// - 8 bytes: leaf index (u64)
pub const NOTE_PLAINTEXT_SIZE: usize = 1 + 8 + 32 + 32 + 32 + 8;

/// Sealed note ciphertext size (plaintext + 16 byte AEAD tag)
pub const SEALED_NOTE_SIZE: usize = NOTE_PLAINTEXT_SIZE + 16;

/// Maximum value in a note (64-bit unsigned integer)
pub const MAX_NOTE_VALUE: u64 = u64::MAX;

/// Domain separators for hash functions
pub mod domains {
    /// Domain separator for the empty-leaf value at the bottom of the tree
    pub const EMPTY_LEAF: &[u8] = b"ShieldedPool_EmptyLeaf";

    /// Domain separator for vault-key derivation
    pub const VAULT_KEY: &[u8] = b"ShieldedPool_VaultKey";

    /// Domain separator for the mock proof transcript
    pub const MOCK_PROOF: &[u8] = b"ShieldedPool_MockProof";
}
