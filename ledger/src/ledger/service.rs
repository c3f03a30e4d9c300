//! # TransactionLedger
//!
//! The service object that owns the transaction table, receipt vault,
//! reserve fund, payer wallets and audit chain. It is constructed once at
//! process start with [`TransactionLedger::open`], handed to whoever needs
//! it, and flushed on shutdown.
//!
//! ## Write Path
//!
//! ```text
//! lock ─► check ─► stage ChangeSet ─► store.commit ─► apply in memory ─► unlock
//!                                          │
//!                                          └─ error: nothing applied, lock released
//! ```
//!
//! One `parking_lot::Mutex` covers every piece of mutable state, so the
//! duplicate check and the hash recording of a submission, the status
//! check and transition of an approval, and every audit append happen
//! inside the same critical section.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use super::error::{LedgerError, LedgerResult};
use super::types::{BankTransfer, LedgerEvent, Settlement, SubmissionOutcome};
use crate::audit::{AuditBlock, AuditChain, AuditEvent, ChainCheckpoint, ChainReport};
use crate::config::{
    LedgerConfig, ShortfallPolicy, EVENT_CHANNEL_CAPACITY, MAX_RECEIPT_BYTES, PLATFORM_PAYEE_ID,
    PLATFORM_PAYEE_NAME, SMART_CHANGE_DESCRIPTION,
};
use crate::crypto::{digest_hex, AuditKeypair};
use crate::storage::{ChangeSet, LedgerDb, LedgerStore};
use crate::tax::TaxEnforcer;
use crate::transaction::{
    Party, PaymentMethod, ServiceCategory, Transaction, TransactionBook, TransactionId,
    TransactionStatus,
};
use crate::vault::{EntryType, ReceiptVault, ReserveFund, Wallet, WalletBook};

/// Everything the mutex protects.
struct LedgerState {
    book: TransactionBook,
    receipts: ReceiptVault,
    chain: AuditChain,
    reserve: ReserveFund,
    wallets: WalletBook,
}

/// A block ready to push once its change set is committed.
struct StagedBlock {
    block: AuditBlock,
    checkpoint: Option<ChainCheckpoint>,
}

/// The financial core.
pub struct TransactionLedger<S: LedgerStore = LedgerDb> {
    store: S,
    config: LedgerConfig,
    tax: TaxEnforcer,
    keypair: AuditKeypair,
    state: Mutex<LedgerState>,
    events: broadcast::Sender<LedgerEvent>,
}

impl<S: LedgerStore> TransactionLedger<S> {
    /// Hydrate a ledger from `store`.
    ///
    /// Rebuilds the transaction table, the receipt vault (from the whole
    /// history), the reserve fund, wallets and audit chain. An empty store
    /// gets a genesis block. Every start is recorded as a `SYSTEM_EVENT`
    /// block carrying the integrity verdict for what was loaded.
    pub fn open(store: S, config: LedgerConfig, keypair: AuditKeypair) -> LedgerResult<Self> {
        config.validate()?;
        let stored = store.load()?;

        let book = TransactionBook::from_history(stored.transactions);
        let receipts = ReceiptVault::hydrate(book.iter(), !config.release_rejected_receipts);
        let reserve = ReserveFund::from_entries(stored.reserve_entries)?;
        let wallets = WalletBook::from_wallets(stored.wallets);

        let chain = if stored.blocks.is_empty() {
            if stored.checkpoint.is_some() {
                // Pruned down to nothing: the anchor is gone and the chain
                // cannot be extended honestly.
                return Err(crate::audit::ChainError::Empty.into());
            }
            let mut chain = AuditChain::empty(config.audit_retention);
            let genesis = AuditBlock::genesis(Utc::now(), &keypair)
                .map_err(|e| LedgerError::HashComputationFailure(e.to_string()))?;
            store.commit(&ChangeSet::new().with_block(genesis.clone()))?;
            chain.push(genesis)?;
            info!("audit chain initialized with genesis block");
            chain
        } else {
            let chain =
                AuditChain::from_parts(stored.blocks, stored.checkpoint, config.audit_retention);
            // Every retained block carries the anchor's signer.
            if let Some(anchor) = chain.blocks().next() {
                let ours = keypair.public_key_hex();
                if anchor.signer != ours {
                    return Err(crate::audit::ChainError::ForeignKey {
                        expected: anchor.signer.clone(),
                        found: ours,
                    }
                    .into());
                }
            }
            chain
        };

        let report = chain.verify_report();
        if !report.valid {
            warn!(
                first_invalid = ?report.first_invalid,
                reason = ?report.reason,
                "audit chain failed verification on load"
            );
        }

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let ledger = Self {
            tax: TaxEnforcer::new(config.tax_rate_bps),
            store,
            config,
            keypair,
            state: Mutex::new(LedgerState {
                book,
                receipts,
                chain,
                reserve,
                wallets,
            }),
            events,
        };

        {
            let mut state = ledger.state.lock();
            let started = AuditEvent::LedgerStarted {
                transactions: state.book.len() as u64,
                pending: state.book.pending_count() as u64,
                reserve_balance: state.reserve.balance(),
                chain_valid: report.valid,
            };
            let (changes, staged) =
                ledger.stage_block(&state.chain, started, Utc::now(), ChangeSet::new())?;
            ledger.commit(&changes)?;
            Self::apply_block(&mut state.chain, staged)?;

            info!(
                transactions = state.book.len(),
                receipts = state.receipts.len(),
                reserve = state.reserve.balance(),
                chain_len = state.chain.len(),
                chain_valid = report.valid,
                "ledger opened"
            );
        }

        Ok(ledger)
    }

    // -----------------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------------

    /// Record a bank-transfer submission as `pending_verification`.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidSubmission`] for a zero amount, blank payer
    ///   or empty/oversized receipt.
    /// - [`LedgerError::DuplicateReceiptFraud`] if the receipt bytes were
    ///   seen before. No transaction is created; the attempt is logged to
    ///   the audit chain as a `SECURITY` event.
    /// - [`LedgerError::PersistenceFailure`] if the commit fails. Neither
    ///   the transaction, the receipt hash nor the audit block is kept.
    pub fn submit(&self, transfer: BankTransfer) -> LedgerResult<TransactionId> {
        validate_transfer(&transfer)?;
        let receipt_hash = digest_hex(&transfer.receipt);

        let mut state = self.state.lock();

        if state.receipts.is_duplicate(&receipt_hash) {
            warn!(
                payer = %transfer.payer.id,
                amount = transfer.amount,
                receipt_hash = %receipt_hash,
                "duplicate receipt refused"
            );
            let attempt = AuditEvent::DuplicateReceipt {
                receipt_hash: receipt_hash.clone(),
                payer_id: transfer.payer.id.clone(),
                amount: transfer.amount,
            };
            if let Err(e) = self.record_event(&mut state, attempt) {
                error!(error = %e, "failed to audit duplicate receipt attempt");
            }
            return Err(LedgerError::DuplicateReceiptFraud { hash: receipt_hash });
        }

        let now = Utc::now();
        let mut id = TransactionId::generate(now);
        while state.book.contains(&id) {
            id = TransactionId::generate(now);
        }

        let tx = Transaction {
            id: id.clone(),
            payee: transfer
                .payee
                .clone()
                .unwrap_or_else(|| Party::new(PLATFORM_PAYEE_ID, PLATFORM_PAYEE_NAME)),
            payer: transfer.payer.clone(),
            service_title: transfer.service_title.clone(),
            category: transfer.category,
            declared_amount: transfer.amount,
            settled_amount: None,
            shortfall: 0,
            status: TransactionStatus::PendingVerification,
            payment_method: PaymentMethod::BankTransfer,
            receipt_ref: format!("receipt://{receipt_hash}"),
            receipt_hash: receipt_hash.clone(),
            created_at: now,
            updated_at: now,
        };

        let event = AuditEvent::TransferSubmitted {
            transaction_id: id.clone(),
            payer_id: tx.payer.id.clone(),
            amount: tx.declared_amount,
            receipt_hash: receipt_hash.clone(),
            category: tx.category,
        };
        let changes = ChangeSet::new()
            .with_transaction(tx.clone())
            .with_receipt(&receipt_hash, &transfer.receipt);
        let (changes, staged) = self.stage_block(&state.chain, event, now, changes)?;

        self.commit(&changes)?;

        state.book.insert(tx);
        state.receipts.record(&receipt_hash);
        Self::apply_block(&mut state.chain, staged)?;

        info!(
            id = %id,
            payer = %transfer.payer.id,
            amount = transfer.amount,
            "bank transfer submitted"
        );
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Approval ("smart change")
    // -----------------------------------------------------------------------

    /// Settle a pending transaction.
    ///
    /// `confirmed` is what the administrator actually saw arrive. Above
    /// the declared amount, the surplus goes to the payer's wallet and the
    /// transaction settles at `confirmed`. Below it, the configured
    /// [`ShortfallPolicy`] decides. Tax is withheld on the settled amount.
    pub fn approve(&self, id: &TransactionId, confirmed: Option<u64>) -> LedgerResult<Settlement> {
        let mut state = self.state.lock();
        let current = pending_transaction(&state.book, id)?;

        let declared = current.declared_amount;
        let (settled, surplus, shortfall) = match confirmed {
            Some(amount) if amount > declared => (amount, amount - declared, 0),
            Some(amount) if amount < declared => {
                let shortfall = declared - amount;
                if self.config.shortfall_policy == ShortfallPolicy::Refuse {
                    warn!(id = %id, declared, confirmed = amount, "underpayment refused");
                    return Err(LedgerError::Underpayment {
                        id: id.clone(),
                        declared,
                        confirmed: amount,
                    });
                }
                warn!(id = %id, declared, confirmed = amount, shortfall, "underpayment accepted");
                (amount, 0, shortfall)
            }
            _ => (declared, 0, 0),
        };

        let now = Utc::now();
        let withholding =
            self.tax
                .assess(settled, &format!("tax on {id}"), now, &state.reserve)?;

        let wallet = if surplus > 0 {
            Some(state.wallets.staged_credit(
                &current.payer.id,
                EntryType::Deposit,
                surplus,
                SMART_CHANGE_DESCRIPTION,
                Some(id.as_str()),
                now,
            )?)
        } else {
            None
        };

        let mut updated = current.clone();
        updated
            .complete(settled, shortfall, now)
            .map_err(|e| LedgerError::InvalidStateTransition {
                id: id.clone(),
                from: e.from,
            })?;

        let event = AuditEvent::TransferApproved {
            transaction_id: id.clone(),
            payer_id: current.payer.id.clone(),
            declared_amount: declared,
            confirmed_amount: confirmed,
            settled_amount: settled,
            surplus,
            shortfall,
            tax_withheld: withholding.tax,
            net_amount: withholding.net,
            tax_rate_bps: self.tax.rate_bps(),
        };
        let mut changes = ChangeSet::new()
            .with_transaction(updated.clone())
            .with_reserve_entry(withholding.entry.clone());
        if let Some(w) = &wallet {
            changes = changes.with_wallet(w.clone());
        }
        let (changes, staged) = self.stage_block(&state.chain, event, now, changes)?;

        self.commit(&changes)?;

        state.book.replace(updated.clone());
        state.reserve.deposit(withholding.entry)?;
        if let Some(w) = wallet {
            state.wallets.put(w);
        }
        let block = Self::apply_block(&mut state.chain, staged)?;
        drop(state);

        info!(
            id = %id,
            settled,
            surplus,
            shortfall,
            tax = withholding.tax,
            "transaction approved"
        );
        self.notify(LedgerEvent::TransferApproved {
            transaction_id: id.clone(),
            payer_id: updated.payer.id.clone(),
            settled_amount: settled,
            surplus,
        });

        Ok(Settlement {
            transaction: updated,
            surplus,
            shortfall,
            tax_withheld: withholding.tax,
            net_amount: withholding.net,
            audit_index: block.index,
        })
    }

    // -----------------------------------------------------------------------
    // Rejection
    // -----------------------------------------------------------------------

    /// Reject a pending transaction. No money moves. The receipt stays
    /// blocked unless `release_rejected_receipts` is set.
    pub fn reject(&self, id: &TransactionId) -> LedgerResult<Transaction> {
        let mut state = self.state.lock();
        let current = pending_transaction(&state.book, id)?;

        let now = Utc::now();
        let mut updated = current.clone();
        updated
            .reject(now)
            .map_err(|e| LedgerError::InvalidStateTransition {
                id: id.clone(),
                from: e.from,
            })?;

        let released = self.config.release_rejected_receipts;
        let event = AuditEvent::TransferRejected {
            transaction_id: id.clone(),
            payer_id: current.payer.id.clone(),
            receipt_released: released,
        };
        let changes = ChangeSet::new().with_transaction(updated.clone());
        let (changes, staged) = self.stage_block(&state.chain, event, now, changes)?;

        self.commit(&changes)?;

        state.book.replace(updated.clone());
        if released {
            state.receipts.release(&updated.receipt_hash);
        }
        Self::apply_block(&mut state.chain, staged)?;
        drop(state);

        info!(id = %id, receipt_released = released, "transaction rejected");
        self.notify(LedgerEvent::TransferRejected {
            transaction_id: id.clone(),
            payer_id: updated.payer.id.clone(),
        });
        Ok(updated)
    }

    // -----------------------------------------------------------------------
    // Laws
    // -----------------------------------------------------------------------

    /// Attempt to change an immutable law. Always refused, whoever asks;
    /// the attempt is recorded as a `SECURITY` block.
    pub fn override_law(&self, law: &str, requested_bps: u32, actor: &str) -> LedgerResult<()> {
        let refusal = match self.tax.override_rate(law, requested_bps, actor) {
            Ok(()) => return Ok(()),
            Err(e) => LedgerError::from(e),
        };

        let mut state = self.state.lock();
        let event = AuditEvent::LawOverrideRefused {
            law: law.to_string(),
            current_bps: self.tax.rate_bps(),
            requested_bps,
            actor: actor.to_string(),
        };
        if let Err(e) = self.record_event(&mut state, event) {
            error!(error = %e, "failed to audit refused law override");
        }
        Err(refusal)
    }

    // -----------------------------------------------------------------------
    // External interface shapes
    // -----------------------------------------------------------------------

    /// Submission in the `{success, transaction_id?, error?}` shape. A
    /// fatal error is still returned as an error: the caller must stop.
    pub fn submit_bank_transfer(
        &self,
        payer_id: &str,
        payer_name: &str,
        service_title: &str,
        amount: u64,
        receipt: &[u8],
        category: ServiceCategory,
    ) -> LedgerResult<SubmissionOutcome> {
        let transfer = BankTransfer::new(
            payer_id,
            payer_name,
            service_title,
            amount,
            receipt,
            category,
        );
        match self.submit(transfer) {
            Ok(id) => Ok(SubmissionOutcome {
                success: true,
                transaction_id: Some(id),
                error: None,
            }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(SubmissionOutcome {
                success: false,
                transaction_id: None,
                error: Some(e.user_message()),
            }),
        }
    }

    /// `true` if the transaction was settled.
    pub fn approve_transaction(&self, id: &TransactionId, confirmed: Option<u64>) -> bool {
        match self.approve(id, confirmed) {
            Ok(_) => true,
            Err(e) => {
                debug!(id = %id, error = %e, "approval failed");
                false
            }
        }
    }

    /// `true` if the transaction was rejected by this call.
    pub fn reject_transaction(&self, id: &TransactionId) -> bool {
        match self.reject(id) {
            Ok(_) => true,
            Err(e) => {
                debug!(id = %id, error = %e, "rejection failed");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Transactions awaiting a decision, most recent first.
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.lock().book.pending()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().book.pending_count()
    }

    pub fn transaction(&self, id: &TransactionId) -> Option<Transaction> {
        self.state.lock().book.get(id).cloned()
    }

    /// Full history, oldest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.state.lock().book.iter().cloned().collect()
    }

    /// The stored receipt image for a transaction.
    pub fn receipt(&self, id: &TransactionId) -> LedgerResult<Option<Vec<u8>>> {
        let hash = {
            let state = self.state.lock();
            let tx = state
                .book
                .get(id)
                .ok_or_else(|| LedgerError::NotFound(id.clone()))?;
            tx.receipt_hash.clone()
        };
        Ok(self.store.receipt(&hash)?)
    }

    /// The newest `limit` audit blocks (all retained blocks for `None`),
    /// oldest first.
    pub fn audit_chain(&self, limit: Option<usize>) -> Vec<AuditBlock> {
        let state = self.state.lock();
        state.chain.tail(limit.unwrap_or(state.chain.len()))
    }

    pub fn verify_audit_integrity(&self) -> bool {
        self.state.lock().chain.verify()
    }

    /// Verification verdict with the index range it covers.
    pub fn audit_report(&self) -> ChainReport {
        self.state.lock().chain.verify_report()
    }

    pub fn audit_len(&self) -> usize {
        self.state.lock().chain.len()
    }

    pub fn reserve_balance(&self) -> u64 {
        self.state.lock().reserve.balance()
    }

    pub fn reserve(&self) -> ReserveFund {
        self.state.lock().reserve.clone()
    }

    pub fn wallet(&self, owner: &str) -> Option<Wallet> {
        self.state.lock().wallets.get(owner).cloned()
    }

    pub fn wallet_balance(&self, owner: &str) -> u64 {
        self.state.lock().wallets.balance(owner)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn tax_rate_bps(&self) -> u32 {
        self.tax.rate_bps()
    }

    /// Hex public key that signs this ledger's audit blocks.
    pub fn audit_public_key(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Receive approval and rejection notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    /// Push buffered writes to disk. Call on shutdown.
    pub fn flush(&self) -> LedgerResult<()> {
        let _state = self.state.lock();
        self.store.flush()?;
        info!("ledger flushed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn stage_block(
        &self,
        chain: &AuditChain,
        event: AuditEvent,
        at: DateTime<Utc>,
        changes: ChangeSet,
    ) -> LedgerResult<(ChangeSet, StagedBlock)> {
        let block = chain.next_block(&self.keypair, event, at)?;
        let mut changes = changes.with_block(block.clone());
        let checkpoint = chain.checkpoint_after(1);
        if let Some(cp) = &checkpoint {
            changes = changes.with_pruning(cp.clone(), chain.indices_below(cp.index));
        }
        Ok((changes, StagedBlock { block, checkpoint }))
    }

    fn apply_block(chain: &mut AuditChain, staged: StagedBlock) -> LedgerResult<AuditBlock> {
        chain.push(staged.block.clone())?;
        if let Some(cp) = staged.checkpoint {
            debug!(verified_from = cp.index, "audit retention moved checkpoint");
            chain.apply_checkpoint(cp);
        }
        Ok(staged.block)
    }

    /// Append a standalone audit event (no other state changes).
    fn record_event(&self, state: &mut LedgerState, event: AuditEvent) -> LedgerResult<AuditBlock> {
        let (changes, staged) = self.stage_block(&state.chain, event, Utc::now(), ChangeSet::new())?;
        self.commit(&changes)?;
        Self::apply_block(&mut state.chain, staged)
    }

    fn commit(&self, changes: &ChangeSet) -> LedgerResult<()> {
        self.store.commit(changes).map_err(|e| {
            error!(error = %e, "ledger commit failed, state left unchanged");
            LedgerError::PersistenceFailure(e)
        })
    }

    fn notify(&self, event: LedgerEvent) {
        // No subscribers is fine: delivery is someone else's job.
        let _ = self.events.send(event);
    }
}

fn validate_transfer(transfer: &BankTransfer) -> LedgerResult<()> {
    if transfer.amount == 0 {
        return Err(LedgerError::InvalidSubmission(
            "amount must be greater than zero".into(),
        ));
    }
    if transfer.payer.id.trim().is_empty() {
        return Err(LedgerError::InvalidSubmission("payer id is required".into()));
    }
    if transfer.receipt.is_empty() {
        return Err(LedgerError::InvalidSubmission(
            "a receipt image is required".into(),
        ));
    }
    if transfer.receipt.len() > MAX_RECEIPT_BYTES {
        return Err(LedgerError::InvalidSubmission(format!(
            "receipt exceeds {MAX_RECEIPT_BYTES} bytes"
        )));
    }
    Ok(())
}

/// The transaction, if it exists and can still change.
fn pending_transaction(book: &TransactionBook, id: &TransactionId) -> LedgerResult<Transaction> {
    let tx = book
        .get(id)
        .ok_or_else(|| LedgerError::NotFound(id.clone()))?;
    if !tx.is_pending() {
        return Err(LedgerError::InvalidStateTransition {
            id: id.clone(),
            from: tx.status,
        });
    }
    Ok(tx.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{StoreError, StoreResult, StoredLedger};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Wraps a real database and fails commits on demand.
    struct FlakyStore {
        inner: LedgerDb,
        fail: AtomicBool,
    }

    impl LedgerStore for FlakyStore {
        fn load(&self) -> StoreResult<StoredLedger> {
            self.inner.load()
        }

        fn commit(&self, changes: &ChangeSet) -> StoreResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Backend("disk unplugged".into()));
            }
            self.inner.commit(changes)
        }

        fn receipt(&self, hash: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.receipt(hash)
        }

        fn flush(&self) -> StoreResult<()> {
            self.inner.flush()
        }
    }

    fn ledger() -> TransactionLedger {
        TransactionLedger::open(
            LedgerDb::open_temporary().unwrap(),
            LedgerConfig::default(),
            AuditKeypair::generate(),
        )
        .unwrap()
    }

    fn transfer(receipt: &[u8], amount: u64) -> BankTransfer {
        BankTransfer::new(
            "payer-1",
            "Payer One",
            "Intro to Rust",
            amount,
            receipt,
            ServiceCategory::Course,
        )
    }

    #[test]
    fn open_writes_genesis_and_start_blocks() {
        let ledger = ledger();
        let chain = ledger.audit_chain(None);
        assert_eq!(chain.len(), 2);
        assert!(chain[0].is_genesis());
        assert!(matches!(chain[1].payload, AuditEvent::LedgerStarted { chain_valid: true, .. }));
        assert!(ledger.verify_audit_integrity());
    }

    #[test]
    fn invalid_submissions_are_refused_without_side_effects() {
        let ledger = ledger();
        let before = ledger.audit_len();
        for bad in [transfer(b"r", 0), transfer(b"", 10)] {
            assert!(matches!(
                ledger.submit(bad),
                Err(LedgerError::InvalidSubmission(_))
            ));
        }
        let mut blank = transfer(b"r", 10);
        blank.payer.id = "  ".into();
        assert!(ledger.submit(blank).is_err());
        assert_eq!(ledger.audit_len(), before);
        assert!(ledger.transactions().is_empty());
    }

    #[test]
    fn submission_lands_in_pending_and_chain() {
        let ledger = ledger();
        let id = ledger.submit(transfer(b"receipt-1", 500)).unwrap();
        let tx = ledger.transaction(&id).unwrap();
        assert_eq!(tx.status, TransactionStatus::PendingVerification);
        assert_eq!(tx.payee.id, PLATFORM_PAYEE_ID);
        assert_eq!(tx.receipt_hash, digest_hex(b"receipt-1"));
        assert_eq!(ledger.receipt(&id).unwrap().as_deref(), Some(&b"receipt-1"[..]));

        let last = ledger.audit_chain(Some(1)).pop().unwrap();
        assert!(matches!(last.payload, AuditEvent::TransferSubmitted { .. }));
    }

    #[test]
    fn failed_commit_leaves_no_trace() {
        let store = FlakyStore {
            inner: LedgerDb::open_temporary().unwrap(),
            fail: AtomicBool::new(false),
        };
        let ledger =
            TransactionLedger::open(store, LedgerConfig::default(), AuditKeypair::generate())
                .unwrap();
        let chain_before = ledger.audit_len();

        ledger.store.fail.store(true, Ordering::SeqCst);
        let err = ledger.submit(transfer(b"flaky", 500)).unwrap_err();
        assert!(matches!(err, LedgerError::PersistenceFailure(_)));
        assert!(ledger.transactions().is_empty());
        assert_eq!(ledger.audit_len(), chain_before);

        // The hash was not poisoned: the same receipt goes through later.
        ledger.store.fail.store(false, Ordering::SeqCst);
        let id = ledger.submit(transfer(b"flaky", 500)).unwrap();

        ledger.store.fail.store(true, Ordering::SeqCst);
        assert!(ledger.approve(&id, Some(600)).is_err());
        assert_eq!(ledger.reserve_balance(), 0);
        assert_eq!(ledger.wallet_balance("payer-1"), 0);
        assert!(ledger.transaction(&id).unwrap().is_pending());
        assert!(ledger.verify_audit_integrity());
    }

    #[test]
    fn refuse_policy_keeps_underpaid_transaction_pending() {
        let config = LedgerConfig {
            shortfall_policy: ShortfallPolicy::Refuse,
            ..Default::default()
        };
        let ledger = TransactionLedger::open(
            LedgerDb::open_temporary().unwrap(),
            config,
            AuditKeypair::generate(),
        )
        .unwrap();
        let id = ledger.submit(transfer(b"short", 500)).unwrap();
        assert!(matches!(
            ledger.approve(&id, Some(400)),
            Err(LedgerError::Underpayment {
                declared: 500,
                confirmed: 400,
                ..
            })
        ));
        assert!(ledger.transaction(&id).unwrap().is_pending());
        assert_eq!(ledger.reserve_balance(), 0);
    }

    #[test]
    fn accepted_shortfall_is_recorded() {
        let ledger = ledger();
        let id = ledger.submit(transfer(b"short", 500)).unwrap();
        let settlement = ledger.approve(&id, Some(400)).unwrap();
        assert_eq!(settlement.transaction.settled_amount, Some(400));
        assert_eq!(settlement.shortfall, 100);
        assert_eq!(settlement.transaction.shortfall, 100);
        assert_eq!(ledger.reserve_balance(), 40);
        assert_eq!(ledger.wallet_balance("payer-1"), 0);
    }

    #[test]
    fn override_is_refused_and_audited() {
        let ledger = ledger();
        let err = ledger
            .override_law(crate::config::TAX_LAW_NAME, 0, "administrator")
            .unwrap_err();
        assert!(matches!(err, LedgerError::ImmutableLawViolation { .. }));
        assert_eq!(ledger.tax_rate_bps(), 1_000);
        let last = ledger.audit_chain(Some(1)).pop().unwrap();
        assert_eq!(last.event_type, crate::audit::EventType::Security);
    }

    #[test]
    fn concurrent_duplicate_submissions_admit_exactly_one() {
        let ledger = Arc::new(ledger());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.submit(transfer(b"same-receipt", 500)).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert_eq!(ledger.pending_transactions().len(), 1);
        assert!(ledger.verify_audit_integrity());
    }

    #[test]
    fn concurrent_approvals_settle_once() {
        let ledger = Arc::new(ledger());
        let id = ledger.submit(transfer(b"race", 500)).unwrap();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let id = id.clone();
                std::thread::spawn(move || ledger.approve_transaction(&id, None))
            })
            .collect();
        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(wins, 1);
        assert_eq!(ledger.reserve_balance(), 50);
    }

    #[tokio::test]
    async fn subscribers_hear_decisions() {
        let ledger = ledger();
        let mut rx = ledger.subscribe();
        let a = ledger.submit(transfer(b"a", 100)).unwrap();
        let b = ledger.submit(transfer(b"b", 100)).unwrap();
        ledger.approve(&a, None).unwrap();
        ledger.reject(&b).unwrap();

        match rx.recv().await.unwrap() {
            LedgerEvent::TransferApproved { transaction_id, settled_amount, .. } => {
                assert_eq!(transaction_id, a);
                assert_eq!(settled_amount, 100);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(
            rx.recv().await.unwrap(),
            LedgerEvent::TransferRejected {
                transaction_id: b,
                payer_id: "payer-1".into(),
            }
        );
    }
}
