//! Chain reconciliation
//!
//! Rebuilds the local accumulator and the wallet's owned/spent sets from an
//! ordered stream of ledger events, then checks the recomputed root against
//! the authoritative on-chain root.
//!
//! The accumulator root depends on insertion order, so events must apply in
//! strict leaf-index order: anything that arrives early is buffered in an
//! explicit pending queue owned by the reconciler, never dropped and never
//! applied out of order. Root divergence is fatal - there is no partial
//! repair, only a full resync from genesis.

use halo2_proofs::pasta::Fp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::merkle::{Accumulator, MerkleError};
use crate::note::{Note, NoteCommitment};
use crate::prover::OperationTag;
use crate::store::{Checkpoint, WalletStore};

/// How many of the most recent leaves `resume` re-verifies against the
/// network before trusting a checkpoint (rollback/reorg detection)
pub const REORG_PROBE_DEPTH: usize = 3;

/// One ledger event: an operation inserted one or two commitments starting
/// at `leaf_index`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub op: OperationTag,
    pub leaf_index: u64,
    pub commitments: Vec<NoteCommitment>,
}

impl LedgerEvent {
    pub fn new(op: OperationTag, leaf_index: u64, commitments: Vec<NoteCommitment>) -> Self {
        Self {
            op,
            leaf_index,
            commitments,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The recomputed local root does not match the authoritative on-chain
    /// root. Proofs generated from this state would be rejected - or worse,
    /// mask a real protocol violation. The only recovery is a full resync.
    #[error("local root diverged from the on-chain root at leaf count {leaf_count}; full resync from genesis required")]
    StaleRoot { leaf_count: u64 },

    /// Events are missing between the applied prefix and the buffered tail.
    #[error("gap in ledger event sequence: next expected leaf {expected}, earliest buffered {buffered}")]
    GapInSequence { expected: u64, buffered: u64 },

    /// A replayed event contradicts a commitment that is already applied.
    #[error("event for leaf {leaf_index} contradicts an already-applied commitment")]
    ConflictingEvent { leaf_index: u64 },

    /// An event that overlaps the applied prefix but extends past it was
    /// chunked differently than what we applied; the stream is inconsistent.
    #[error("event for leaf {leaf_index} straddles the applied boundary")]
    StraddlingEvent { leaf_index: u64 },

    #[error("ledger event carries {0} commitments; expected 1 or 2")]
    MalformedEvent(usize),

    /// The network's recent leaves no longer match the local tail; the chain
    /// rolled back past our checkpoint.
    #[error("recent leaves do not match the checkpointed tail; full resync from genesis required")]
    ReorgDetected,

    #[error(transparent)]
    Merkle(#[from] MerkleError),
}

/// Rebuilds local state from ledger events
pub struct Reconciler {
    tree: Accumulator,
    store: WalletStore,
    /// Out-of-order events, keyed by leaf index
    pending: BTreeMap<u64, LedgerEvent>,
    /// Our note plaintexts awaiting ledger inclusion
    expected_notes: Vec<Note>,
}

impl Reconciler {
    /// Start from genesis with an empty store
    pub fn new() -> Self {
        Self {
            tree: Accumulator::new(),
            store: WalletStore::new(),
            pending: BTreeMap::new(),
            expected_notes: Vec::new(),
        }
    }

    /// Rebuild the accumulator from a persisted store
    pub fn from_store(store: WalletStore) -> Result<Self, ReconcileError> {
        let tree = Accumulator::from_leaves(&store.leaf_values())?;
        Ok(Self {
            tree,
            store,
            pending: BTreeMap::new(),
            expected_notes: Vec::new(),
        })
    }

    /// Resume from a checkpointed store, re-verifying the most recent leaves
    /// against the network's view first
    ///
    /// `recent` is the network's last few `(leaf_index, commitment)` pairs.
    /// Any mismatch against the local tail, or a checkpoint the rebuilt root
    /// does not reproduce, means the ledger rolled back and the checkpoint
    /// cannot be trusted.
    pub fn resume(
        store: WalletStore,
        recent: &[(u64, NoteCommitment)],
    ) -> Result<Self, ReconcileError> {
        for &(leaf_index, commitment) in recent.iter().rev().take(REORG_PROBE_DEPTH) {
            if store.leaf_at(leaf_index) != Some(commitment) {
                warn!(leaf_index, "checkpoint tail mismatch against network");
                return Err(ReconcileError::ReorgDetected);
            }
        }

        let reconciler = Self::from_store(store)?;
        if let Some(checkpoint) = reconciler.store.checkpoint() {
            if reconciler.tree.leaf_count() == checkpoint.leaf_count
                && reconciler.tree.root() != checkpoint.root
            {
                return Err(ReconcileError::StaleRoot {
                    leaf_count: checkpoint.leaf_count,
                });
            }
        }

        info!(
            leaf_count = reconciler.tree.leaf_count(),
            "resumed from checkpoint"
        );
        Ok(reconciler)
    }

    /// Register an owned note plaintext awaiting inclusion; once a matching
    /// commitment lands, the note is stored with its leaf index.
    pub fn expect_note(&mut self, note: Note) {
        self.expected_notes.push(note);
    }

    /// Feed one ledger event
    ///
    /// In-order events apply immediately (draining any buffered successors);
    /// future events are buffered; already-applied events are verified
    /// against the stored leaves and skipped.
    pub fn apply(&mut self, event: LedgerEvent) -> Result<(), ReconcileError> {
        if event.commitments.is_empty() || event.commitments.len() > 2 {
            return Err(ReconcileError::MalformedEvent(event.commitments.len()));
        }

        let next = self.tree.leaf_count();
        let event_end = event.leaf_index + event.commitments.len() as u64;

        if event.leaf_index < next {
            if event_end > next {
                return Err(ReconcileError::StraddlingEvent {
                    leaf_index: event.leaf_index,
                });
            }
            // Replay of an applied event: idempotent if identical
            for (offset, commitment) in event.commitments.iter().enumerate() {
                let leaf_index = event.leaf_index + offset as u64;
                if self.store.leaf_at(leaf_index) != Some(*commitment) {
                    return Err(ReconcileError::ConflictingEvent { leaf_index });
                }
            }
            debug!(leaf_index = event.leaf_index, "skipping already-applied event");
            return Ok(());
        }

        if event.leaf_index > next {
            debug!(
                leaf_index = event.leaf_index,
                expected = next,
                "buffering out-of-order event"
            );
            self.pending.insert(event.leaf_index, event);
            return Ok(());
        }

        self.apply_in_order(event)?;

        // Drain whatever the new position unblocks
        while let Some(event) = self.pending.remove(&self.tree.leaf_count()) {
            self.apply_in_order(event)?;
        }
        Ok(())
    }

    fn apply_in_order(&mut self, event: LedgerEvent) -> Result<(), ReconcileError> {
        for commitment in &event.commitments {
            let leaf_index = self.tree.leaf_count();
            self.tree.insert(commitment.to_field())?;
            self.store.push_leaf(*commitment);

            if let Some(pos) = self
                .expected_notes
                .iter()
                .position(|note| note.commitment() == *commitment)
            {
                let note = self.expected_notes.remove(pos);
                info!(leaf_index, "owned note confirmed on ledger");
                self.store.add_owned(note, leaf_index);
            }
        }
        debug!(
            leaf_index = event.leaf_index,
            op = ?event.op,
            leaf_count = self.tree.leaf_count(),
            "applied ledger event"
        );
        Ok(())
    }

    /// Number of buffered out-of-order events
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Check the rebuilt state against the authoritative on-chain root and
    /// checkpoint on success
    ///
    /// Buffered events still waiting mean the stream has a gap; a root
    /// mismatch is fatal and leaves the checkpoint untouched.
    pub fn finish(&mut self, onchain_root: Fp) -> Result<Checkpoint, ReconcileError> {
        if let Some((&buffered, _)) = self.pending.iter().next() {
            return Err(ReconcileError::GapInSequence {
                expected: self.tree.leaf_count(),
                buffered,
            });
        }

        let leaf_count = self.tree.leaf_count();
        let root = self.tree.root();
        if root != onchain_root {
            warn!(leaf_count, "local root diverged from on-chain root");
            return Err(ReconcileError::StaleRoot { leaf_count });
        }

        let checkpoint = Checkpoint { root, leaf_count };
        self.store.set_checkpoint(checkpoint);
        info!(leaf_count, "reconciliation checkpoint confirmed");
        Ok(checkpoint)
    }

    /// The reconciled accumulator
    pub fn tree(&self) -> &Accumulator {
        &self.tree
    }

    /// The wallet store being rebuilt
    pub fn store(&self) -> &WalletStore {
        &self.store
    }

    /// Mutable access for spend bookkeeping after ledger acceptance
    pub fn store_mut(&mut self) -> &mut WalletStore {
        &mut self.store
    }

    /// Take the store out (for persistence)
    pub fn into_store(self) -> WalletStore {
        self.store
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}
