//! End-to-end tests for the BlackBox financial core.
//!
//! Every test opens a real sled database (temporary or in a `tempfile`
//! directory), drives the ledger through its public API only, and checks
//! the money, the state machine and the audit chain together.

use blackbox_ledger::audit::{AuditEvent, ChainError, EventType};
use blackbox_ledger::config::{LedgerConfig, TAX_LAW_NAME};
use blackbox_ledger::crypto::{digest_hex, AuditKeypair};
use blackbox_ledger::storage::{LedgerDb, LedgerStore};
use blackbox_ledger::transaction::{ServiceCategory, TransactionStatus};
use blackbox_ledger::{BankTransfer, LedgerError, TransactionLedger};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn open_temp() -> TransactionLedger {
    TransactionLedger::open(
        LedgerDb::open_temporary().expect("temp db"),
        LedgerConfig::default(),
        AuditKeypair::generate(),
    )
    .expect("open ledger")
}

fn open_at(
    path: &std::path::Path,
    keypair: &AuditKeypair,
    config: LedgerConfig,
) -> TransactionLedger {
    TransactionLedger::open(LedgerDb::open(path).expect("db"), config, keypair.clone())
        .expect("open ledger")
}

fn transfer(payer: &str, receipt: &[u8], amount: u64) -> BankTransfer {
    BankTransfer::new(
        payer,
        "Test Payer",
        "Web development bootcamp",
        amount,
        receipt,
        ServiceCategory::Course,
    )
}

// ---------------------------------------------------------------------------
// Concrete scenarios
// ---------------------------------------------------------------------------

#[test]
fn scenario_a_plain_approval() {
    let ledger = open_temp();
    let id = ledger.submit(transfer("alice", b"H1", 500)).unwrap();
    assert_eq!(
        ledger.transaction(&id).unwrap().status,
        TransactionStatus::PendingVerification
    );

    let settlement = ledger.approve(&id, None).unwrap();
    let tx = ledger.transaction(&id).unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.settled_amount, Some(500));
    assert_eq!(settlement.tax_withheld, 50);
    assert_eq!(settlement.net_amount, 450);
    assert_eq!(ledger.reserve_balance(), 50);
    assert_eq!(ledger.wallet_balance("alice"), 0);
}

#[test]
fn scenario_b_duplicate_receipt() {
    let ledger = open_temp();
    ledger.submit(transfer("alice", b"H1", 500)).unwrap();
    let pending_before = ledger.pending_transactions();

    let err = ledger.submit(transfer("mallory", b"H1", 500)).unwrap_err();
    match &err {
        LedgerError::DuplicateReceiptFraud { hash } => assert_eq!(hash, &digest_hex(b"H1")),
        other => panic!("expected duplicate, got {other:?}"),
    }
    assert_eq!(err.user_message(), "this receipt was already used");
    assert_eq!(ledger.pending_transactions(), pending_before);
    assert_eq!(ledger.transactions().len(), 1);

    let last = ledger.audit_chain(Some(1)).pop().unwrap();
    assert_eq!(last.event_type, EventType::Security);
    assert!(matches!(last.payload, AuditEvent::DuplicateReceipt { .. }));
}

#[test]
fn scenario_c_smart_change() {
    let ledger = open_temp();
    let id = ledger.submit(transfer("bob", b"receipt-c", 500)).unwrap();
    let settlement = ledger.approve(&id, Some(550)).unwrap();

    assert_eq!(settlement.transaction.settled_amount, Some(550));
    assert_eq!(settlement.surplus, 50);
    assert_eq!(ledger.reserve_balance(), 55);

    let wallet = ledger.wallet("bob").expect("wallet created");
    assert_eq!(wallet.balance(), 50);
    assert_eq!(wallet.entries().len(), 1);
    assert_eq!(wallet.entries()[0].description, "smart change surplus");
    assert_eq!(wallet.entries()[0].reference.as_deref(), Some(id.as_str()));
}

#[test]
fn scenario_d_approving_rejected_transaction() {
    let ledger = open_temp();
    let id = ledger.submit(transfer("carol", b"receipt-d", 500)).unwrap();
    ledger.reject(&id).unwrap();
    let chain_len = ledger.audit_len();

    let err = ledger.approve(&id, None).unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidStateTransition {
            from: TransactionStatus::Rejected,
            ..
        }
    ));
    assert_eq!(err.user_message(), "transaction not found or already finalized");
    assert_eq!(ledger.transaction(&id).unwrap().status, TransactionStatus::Rejected);
    assert_eq!(ledger.audit_len(), chain_len);
    assert_eq!(ledger.reserve_balance(), 0);
    assert!(!ledger.approve_transaction(&id, None));
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[test]
fn money_is_conserved_across_approvals() {
    let ledger = open_temp();
    let cases: [(u64, Option<u64>); 5] = [
        (500, None),
        (500, Some(500)),
        (500, Some(750)),
        (1_234, Some(1_235)),
        (99, None),
    ];
    let mut expected_reserve = 0;
    let mut expected_wallet = 0;

    for (i, (declared, confirmed)) in cases.iter().enumerate() {
        let receipt = format!("receipt-{i}");
        let id = ledger
            .submit(transfer("dave", receipt.as_bytes(), *declared))
            .unwrap();
        let s = ledger.approve(&id, *confirmed).unwrap();
        let settled = s.transaction.settled_amount.unwrap();

        assert!(settled >= *declared);
        assert_eq!(settled - declared, s.surplus);
        assert_eq!(s.tax_withheld, settled / 10);
        assert_eq!(s.tax_withheld + s.net_amount, settled);

        expected_reserve += s.tax_withheld;
        expected_wallet += s.surplus;
        assert_eq!(ledger.reserve_balance(), expected_reserve);
    }
    assert_eq!(ledger.wallet_balance("dave"), expected_wallet);
    assert_eq!(
        ledger.reserve().entries().iter().map(|e| e.amount).sum::<u64>(),
        expected_reserve
    );
}

#[test]
fn terminal_states_are_closed() {
    let ledger = open_temp();
    let done = ledger.submit(transfer("erin", b"t1", 100)).unwrap();
    let gone = ledger.submit(transfer("erin", b"t2", 100)).unwrap();
    ledger.approve(&done, None).unwrap();
    ledger.reject(&gone).unwrap();

    for id in [&done, &gone] {
        let before = ledger.transaction(id).unwrap();
        assert!(ledger.approve(id, Some(1_000)).is_err());
        assert!(ledger.reject(id).is_err());
        assert!(!ledger.reject_transaction(id));
        assert_eq!(ledger.transaction(id).unwrap(), before);
    }
    assert!(ledger.pending_transactions().is_empty());
    assert!(matches!(
        ledger.approve(&"txn-missing".into(), None),
        Err(LedgerError::NotFound(_))
    ));
}

#[test]
fn rate_cannot_be_overridden() {
    let ledger = open_temp();
    for requested in [0, 500, 2_000] {
        assert!(matches!(
            ledger.override_law(TAX_LAW_NAME, requested, "administrator"),
            Err(LedgerError::ImmutableLawViolation { .. })
        ));
    }
    let id = ledger.submit(transfer("frank", b"f", 1_000)).unwrap();
    ledger.approve(&id, None).unwrap();
    assert_eq!(ledger.reserve_balance(), 100);
    assert!(ledger.verify_audit_integrity());
}

#[test]
fn every_step_is_mirrored_in_the_chain() {
    let ledger = open_temp();
    let a = ledger.submit(transfer("gina", b"g1", 300)).unwrap();
    let b = ledger.submit(transfer("gina", b"g2", 300)).unwrap();
    ledger.approve(&a, Some(310)).unwrap();
    ledger.reject(&b).unwrap();

    let kinds: Vec<&str> = ledger
        .audit_chain(None)
        .iter()
        .map(|block| match &block.payload {
            AuditEvent::Genesis { .. } => "genesis",
            AuditEvent::LedgerStarted { .. } => "started",
            AuditEvent::TransferSubmitted { .. } => "submitted",
            AuditEvent::TransferApproved { .. } => "approved",
            AuditEvent::TransferRejected { .. } => "rejected",
            AuditEvent::DuplicateReceipt { .. } => "duplicate",
            AuditEvent::LawOverrideRefused { .. } => "override",
        })
        .collect();
    assert_eq!(
        kinds,
        vec!["genesis", "started", "submitted", "submitted", "approved", "rejected"]
    );

    match &ledger.audit_chain(Some(2))[0].payload {
        AuditEvent::TransferApproved {
            settled_amount,
            surplus,
            tax_withheld,
            ..
        } => assert_eq!((*settled_amount, *surplus, *tax_withheld), (310, 10, 31)),
        other => panic!("unexpected payload {other:?}"),
    }
    assert!(ledger.verify_audit_integrity());
}

// ---------------------------------------------------------------------------
// Restart & tamper detection
// ---------------------------------------------------------------------------

#[test]
fn duplicates_are_caught_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = AuditKeypair::generate();

    let rejected_id = {
        let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
        ledger.submit(transfer("hana", b"kept", 500)).unwrap();
        let id = ledger.submit(transfer("hana", b"rejected", 500)).unwrap();
        ledger.reject(&id).unwrap();
        ledger.flush().unwrap();
        id
    };

    let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
    assert_eq!(ledger.transactions().len(), 2);
    assert_eq!(
        ledger.transaction(&rejected_id).unwrap().status,
        TransactionStatus::Rejected
    );
    for receipt in [&b"kept"[..], &b"rejected"[..]] {
        assert!(matches!(
            ledger.submit(transfer("ivan", receipt, 500)),
            Err(LedgerError::DuplicateReceiptFraud { .. })
        ));
    }
    assert!(ledger.verify_audit_integrity());
}

#[test]
fn released_receipts_can_be_resubmitted() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = AuditKeypair::generate();
    let config = LedgerConfig {
        release_rejected_receipts: true,
        ..Default::default()
    };

    {
        let ledger = open_at(dir.path(), &keypair, config.clone());
        let id = ledger.submit(transfer("jack", b"blurry", 500)).unwrap();
        ledger.reject(&id).unwrap();
        // Released immediately, in the same process.
        let again = ledger.submit(transfer("jack", b"blurry", 500)).unwrap();
        ledger.reject(&again).unwrap();
    }

    // And still released after a restart.
    let ledger = open_at(dir.path(), &keypair, config);
    assert!(ledger.submit(transfer("jack", b"blurry", 500)).is_ok());
}

#[test]
fn reopening_with_another_audit_key_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = AuditKeypair::generate();

    let chain_len = {
        let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
        ledger.submit(transfer("mona", b"m", 500)).unwrap();
        ledger.flush().unwrap();
        ledger.audit_len()
    };

    let stranger = AuditKeypair::generate();
    let result = TransactionLedger::open(
        LedgerDb::open(dir.path()).expect("db"),
        LedgerConfig::default(),
        stranger.clone(),
    );
    match result {
        Err(LedgerError::Chain(ChainError::ForeignKey { expected, found })) => {
            assert_eq!(expected, keypair.public_key_hex());
            assert_eq!(found, stranger.public_key_hex());
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("ledger opened with a foreign audit key"),
    }

    // Nothing was appended by the refused open.
    let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
    assert_eq!(ledger.audit_len(), chain_len + 1);
    assert!(ledger.verify_audit_integrity());
}

#[test]
fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = AuditKeypair::generate();

    let (id, chain_len) = {
        let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
        let id = ledger.submit(transfer("kate", b"k", 500)).unwrap();
        ledger.approve(&id, Some(520)).unwrap();
        (id, ledger.audit_len())
    };

    let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
    assert_eq!(ledger.reserve_balance(), 52);
    assert_eq!(ledger.wallet_balance("kate"), 20);
    assert_eq!(ledger.transaction(&id).unwrap().settled_amount, Some(520));
    assert_eq!(ledger.receipt(&id).unwrap().as_deref(), Some(&b"k"[..]));
    // One more LedgerStarted block on reopen.
    assert_eq!(ledger.audit_len(), chain_len + 1);
    assert!(ledger.verify_audit_integrity());
}

#[test]
fn tampering_with_stored_blocks_is_detected_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = AuditKeypair::generate();

    {
        let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
        let id = ledger.submit(transfer("liam", b"l", 500)).unwrap();
        ledger.approve(&id, None).unwrap();
    }

    // Inflate the settled amount in the approval block (index 3), rehash it
    // so the block looks self-consistent, and write it back.
    {
        let db = LedgerDb::open(dir.path()).unwrap();
        let mut block = db.get_block(3).unwrap().expect("approval block");
        match &mut block.payload {
            AuditEvent::TransferApproved { settled_amount, .. } => *settled_amount = 5_000,
            other => panic!("unexpected payload {other:?}"),
        }
        block.hash = block.compute_hash().unwrap();
        db.overwrite_block(&block).unwrap();
        db.flush().unwrap();
    }

    let ledger = open_at(dir.path(), &keypair, LedgerConfig::default());
    let report = ledger.audit_report();
    assert!(!report.valid);
    assert_eq!(report.first_invalid, Some(3));
    assert_eq!(report.verified_to, Some(2));
    assert!(!ledger.verify_audit_integrity());

    // The reopen itself was audited with the bad verdict.
    match &ledger.audit_chain(Some(1))[0].payload {
        AuditEvent::LedgerStarted { chain_valid, .. } => assert!(!chain_valid),
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn retention_keeps_verification_honest() {
    let dir = tempfile::tempdir().unwrap();
    let keypair = AuditKeypair::generate();
    let config = LedgerConfig {
        audit_retention: Some(5),
        ..Default::default()
    };

    {
        let ledger = open_at(dir.path(), &keypair, config.clone());
        for i in 0..10u64 {
            let receipt = format!("r{i}");
            ledger
                .submit(transfer("mia", receipt.as_bytes(), 100 + i))
                .unwrap();
        }
        assert_eq!(ledger.audit_len(), 5);
        let report = ledger.audit_report();
        assert!(report.valid);
        // genesis + started + 10 submissions = indices 0..=11
        assert_eq!(report.verified_from, 7);
        assert_eq!(report.verified_to, Some(11));
    }

    let ledger = open_at(dir.path(), &keypair, config);
    let report = ledger.audit_report();
    assert!(report.valid);
    assert_eq!(report.verified_from, 8);
    assert_eq!(report.verified_to, Some(12));
    assert_eq!(ledger.audit_chain(None).len(), 5);
    assert_eq!(ledger.transactions().len(), 10);
}
