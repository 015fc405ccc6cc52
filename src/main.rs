//! Shielded-pool walkthrough
//!
//! Demonstrates the full lifecycle against the mock proof service and a
//! simulated ledger:
//! 1. Shield - public value enters the pool as a private note
//! 2. Transfer - private value moves between owners, nothing revealed
//! 3. Unshield - private value leaves the pool, only the amount revealed
//!
//! Every operation goes through the same fixed 2-in/2-out proving shape, so
//! the three submissions are indistinguishable in size and structure.

use halo2_proofs::pasta::Fp;
use rand::rngs::OsRng;

use shielded_pool::{
    decode_public_amount, hash::domain_separator_field, Accumulator, LedgerEvent,
    LedgerSubmission, MockProofService, NoteCommitment, Nullifier, NullifierSet, Operation,
    ProofOutput, Reconciler, SpendingKey, SubmitError, WitnessBuilder,
    prove_with_retry,
};

/// Minimal stand-in for the on-chain program
///
/// Checks the claimed root, enforces nullifier uniqueness (the well-known
/// dummy nullifier for the pool's token is exempt), appends the non-dummy
/// output commitments, and emits the ledger event the wallets reconcile
/// from.
struct SimulatedLedger {
    tree: Accumulator,
    nullifiers: NullifierSet,
    token: Fp,
    events: Vec<LedgerEvent>,
}

impl SimulatedLedger {
    fn new(token: Fp) -> Self {
        Self {
            tree: Accumulator::new(),
            nullifiers: NullifierSet::new(),
            token,
            events: Vec::new(),
        }
    }

    fn root(&self) -> Fp {
        self.tree.root()
    }

    fn submit(&mut self, submission: LedgerSubmission) -> Result<Option<LedgerEvent>, SubmitError> {
        let signals = &submission.public_signals;
        if signals.len() != 7 {
            return Err(SubmitError::InvalidProofRejection(format!(
                "expected 7 public signals, got {}",
                signals.len()
            )));
        }
        if signals[0] != self.tree.root() {
            return Err(SubmitError::InvalidProofRejection(
                "unknown merkle root".to_string(),
            ));
        }
        if signals[6] != self.token {
            return Err(SubmitError::InvalidProofRejection(
                "wrong token mint".to_string(),
            ));
        }

        let dummy_nf = Nullifier::dummy(self.token);
        for nf in [signals[1], signals[2]].map(Nullifier::from_field) {
            if nf != dummy_nf && !self.nullifiers.insert(nf) {
                return Err(SubmitError::DuplicateNullifier);
            }
        }

        // Dummy output commitments are a known constant and never take a leaf
        let dummy_cm = NoteCommitment::dummy(self.token);
        let commitments: Vec<NoteCommitment> = [signals[3], signals[4]]
            .into_iter()
            .map(NoteCommitment::from_field)
            .filter(|cm| *cm != dummy_cm)
            .collect();
        if commitments.is_empty() {
            return Ok(None);
        }

        let leaf_index = self.tree.leaf_count();
        for cm in &commitments {
            self.tree.insert(cm.to_field()).expect("ledger tree full");
        }

        let event = LedgerEvent::new(submission.op, leaf_index, commitments);
        self.events.push(event.clone());
        Ok(Some(event))
    }
}

fn prove_and_submit(
    ledger: &mut SimulatedLedger,
    wallets: &mut [&mut Reconciler],
    op: &Operation,
) -> ProofOutput {
    let output = prove_with_retry(&MockProofService::new(), &op.proof_inputs)
        .expect("witness must satisfy the circuit");

    let submission = LedgerSubmission::new(op.op, output.clone());
    let event = ledger.submit(submission).expect("ledger accepted the proof");

    if let Some(event) = event {
        for wallet in wallets.iter_mut() {
            wallet.apply(event.clone()).expect("event applies in order");
        }
    }
    for wallet in wallets.iter_mut() {
        wallet
            .finish(ledger.root())
            .expect("local root matches the chain");
    }

    output
}

fn settle_spends(wallet: &mut Reconciler, op: &Operation) {
    for cm in &op.spent_commitments {
        wallet.store_mut().mark_note_spent(cm);
    }
    for nf in &op.published_nullifiers {
        wallet.store_mut().record_nullifier(*nf);
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    println!("==============================================");
    println!("  Shielded Pool Walkthrough");
    println!("==============================================\n");

    let token = domain_separator_field(b"DemoToken");

    let alice_sk = SpendingKey::random(&mut OsRng);
    let bob_sk = SpendingKey::random(&mut OsRng);

    let mut ledger = SimulatedLedger::new(token);
    let mut alice = Reconciler::new();
    let mut bob = Reconciler::new();

    // ===== 1. Alice shields 100000 units =====
    println!("1. Alice shields 100000 units...");

    let shield = {
        let builder = WitnessBuilder::new(alice.tree(), alice.store());
        builder
            .shield(&alice_sk, 100_000, token, &mut OsRng)
            .expect("shield witness")
    };
    alice.expect_note(shield.created_notes[0].clone());

    prove_and_submit(&mut ledger, &mut [&mut alice, &mut bob], &shield);
    println!("   Pool balance (Alice): {} units", alice.store().balance(token));
    println!("   Ledger leaf count: {}\n", ledger.tree.leaf_count());

    // ===== 2. Alice privately transfers 40000 units to Bob =====
    println!("2. Alice transfers 40000 units to Bob (fully shielded)...");

    let transfer = {
        let builder = WitnessBuilder::new(alice.tree(), alice.store());
        builder
            .transfer(&alice_sk, bob_sk.owner_key(), 40_000, token, &mut OsRng)
            .expect("transfer witness")
    };
    // Out-of-band note handoff: Bob learns his incoming plaintext, Alice
    // watches for her change
    bob.expect_note(transfer.created_notes[0].clone());
    alice.expect_note(transfer.created_notes[1].clone());

    prove_and_submit(&mut ledger, &mut [&mut alice, &mut bob], &transfer);
    settle_spends(&mut alice, &transfer);

    println!("   public amount on the wire: 0 (nothing revealed)");
    println!("   Alice balance: {} units", alice.store().balance(token));
    println!("   Bob balance:   {} units\n", bob.store().balance(token));

    // ===== 3. Bob unshields his full 40000 units =====
    println!("3. Bob unshields 40000 units...");

    let unshield = {
        let builder = WitnessBuilder::new(bob.tree(), bob.store());
        builder
            .unshield(&bob_sk, 40_000, token, &mut OsRng)
            .expect("unshield witness")
    };

    let output = prove_and_submit(&mut ledger, &mut [&mut alice, &mut bob], &unshield);
    settle_spends(&mut bob, &unshield);

    let delta = decode_public_amount(output.public_signals[5]).expect("unambiguous");
    println!(
        "   public amount decodes to {} (field-wrapped negative)",
        delta.to_i128().expect("fits i128")
    );
    println!("   Bob balance: {} units\n", bob.store().balance(token));

    // ===== Summary =====
    println!("Summary:");
    println!("\n   PUBLIC (visible to everyone):");
    println!("   - {} commitments in the accumulator", ledger.tree.leaf_count());
    println!("   - {} ledger events emitted", ledger.events.len());
    println!("   - {} published nullifiers", ledger.nullifiers.len());
    println!("   - 100000 units entered, 40000 units left the pool");

    println!("\n   PRIVATE (hidden by the proofs):");
    println!("   - that Alice paid Bob, and how much");
    println!("   - Alice's change amount ({} units)", alice.store().balance(token));
    println!("   - which commitment each nullifier spent");

    println!("\n   All three operations used the identical 2-in/2-out proof shape.");
}
