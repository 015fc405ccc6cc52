//! Shielded-pool accounting core
//!
//! A note/commitment/nullifier scheme layered over an append-only Merkle
//! accumulator, feeding an external zero-knowledge proving system:
//! - Notes carry (amount, owner key, randomness, token id); the ledger only
//!   ever sees commitments and, on spend, nullifiers
//! - A fixed-depth (20 level) accumulator over commitments, with membership
//!   proofs regenerable from the ordered leaf list
//! - Chain reconciliation that rebuilds local state from ledger events and
//!   fails loudly when the recomputed root diverges from the chain
//! - Witness assembly into the fixed 2-in/2-out proving shape with
//!   dummy-note padding, so proof metadata reveals nothing about an
//!   operation's real complexity
//!
//! The proving circuit and the on-chain verifier are external collaborators;
//! this crate defines the interfaces it speaks to them (see `prover`).

pub mod constants;
pub mod hash;
pub mod keys;
pub mod merkle;
pub mod note;
pub mod prover;
pub mod reconcile;
pub mod store;
pub mod value;
pub mod vault;
pub mod witness;

// Re-exports for convenience
pub use constants::*;
pub use keys::{OwnerKey, SpendingKey};
pub use merkle::{Accumulator, MerkleError, MerklePath};
pub use note::{Note, NoteCommitment, Nullifier, NullifierSet};
pub use prover::{
    prove_with_retry, LedgerSubmission, MockProofService, OperationTag, ProofOutput,
    ProofService, ProofServiceError, SubmitError,
};
pub use reconcile::{LedgerEvent, ReconcileError, Reconciler};
pub use store::{Checkpoint, LeafRecord, OwnedNote, StoreError, WalletStore};
pub use value::{decode_public_amount, encode_public_amount, AmountError, PoolDelta};
pub use vault::{open_note, seal_note, SealedNote, VaultError};
pub use witness::{Operation, ProofInputs, WitnessBuilder, WitnessError, WitnessValue};
