//! The persistence seam between the ledger service and durable storage.
//!
//! The ledger never writes piecemeal. Each mutating operation stages a
//! [`ChangeSet`] holding everything it wants to persist and hands it to
//! [`LedgerStore::commit`], which must apply it atomically: all of it or
//! none of it.

use std::sync::Arc;

use crate::audit::{AuditBlock, ChainCheckpoint};
use crate::transaction::Transaction;
use crate::vault::{ReserveEntry, Wallet};

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Everything one ledger operation persists.
#[derive(Clone, Debug, Default)]
pub struct ChangeSet {
    /// New or updated transaction record.
    pub transaction: Option<Transaction>,
    /// Receipt blob keyed by its hash.
    pub receipt: Option<(String, Vec<u8>)>,
    /// Blocks appended by this operation, in order.
    pub blocks: Vec<AuditBlock>,
    /// Block indices dropped by retention.
    pub pruned_blocks: Vec<u64>,
    /// New verified-from checkpoint, if retention moved it.
    pub checkpoint: Option<ChainCheckpoint>,
    pub reserve_entry: Option<ReserveEntry>,
    pub wallet: Option<Wallet>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transaction(mut self, tx: Transaction) -> Self {
        self.transaction = Some(tx);
        self
    }

    pub fn with_receipt(mut self, hash: &str, bytes: &[u8]) -> Self {
        self.receipt = Some((hash.to_string(), bytes.to_vec()));
        self
    }

    pub fn with_block(mut self, block: AuditBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn with_reserve_entry(mut self, entry: ReserveEntry) -> Self {
        self.reserve_entry = Some(entry);
        self
    }

    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    /// Record a retention move: blocks below the checkpoint are deleted.
    pub fn with_pruning(mut self, checkpoint: ChainCheckpoint, pruned: Vec<u64>) -> Self {
        self.checkpoint = Some(checkpoint);
        self.pruned_blocks = pruned;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.transaction.is_none()
            && self.receipt.is_none()
            && self.blocks.is_empty()
            && self.pruned_blocks.is_empty()
            && self.checkpoint.is_none()
            && self.reserve_entry.is_none()
            && self.wallet.is_none()
    }
}

/// The full persisted state, as read back on startup.
#[derive(Clone, Debug, Default)]
pub struct StoredLedger {
    pub transactions: Vec<Transaction>,
    /// Retained blocks, ascending by index.
    pub blocks: Vec<AuditBlock>,
    pub checkpoint: Option<ChainCheckpoint>,
    /// Reserve deposits, ascending by sequence.
    pub reserve_entries: Vec<ReserveEntry>,
    pub wallets: Vec<Wallet>,
}

/// Durable storage for a [`crate::TransactionLedger`].
pub trait LedgerStore: Send + Sync {
    /// Read back everything previously committed.
    fn load(&self) -> StoreResult<StoredLedger>;

    /// Apply a change set atomically.
    fn commit(&self, changes: &ChangeSet) -> StoreResult<()>;

    /// Fetch a stored receipt blob by hash.
    fn receipt(&self, hash: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Force buffered writes to durable media.
    fn flush(&self) -> StoreResult<()>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn load(&self) -> StoreResult<StoredLedger> {
        (**self).load()
    }

    fn commit(&self, changes: &ChangeSet) -> StoreResult<()> {
        (**self).commit(changes)
    }

    fn receipt(&self, hash: &str) -> StoreResult<Option<Vec<u8>>> {
        (**self).receipt(hash)
    }

    fn flush(&self) -> StoreResult<()> {
        (**self).flush()
    }
}
