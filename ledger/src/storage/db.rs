//! # LedgerDb — sled-backed Ledger Storage
//!
//! ## Tree Layout
//!
//! | Tree              | Key                  | Value                   |
//! |-------------------|----------------------|-------------------------|
//! | `transactions`    | `id` (UTF-8)         | `bincode(Transaction)`  |
//! | `receipts`        | `hash` (hex UTF-8)   | raw receipt bytes       |
//! | `audit_blocks`    | `index` (8B BE)      | `bincode(AuditBlock)`   |
//! | `reserve_entries` | `sequence` (8B BE)   | `bincode(ReserveEntry)` |
//! | `wallets`         | `owner` (UTF-8)      | `bincode(Wallet)`       |
//! | `metadata`        | key (UTF-8)          | value (bytes)           |
//!
//! Indices and sequence numbers are big-endian so sled's lexicographic
//! order matches numeric order and a plain scan returns them sorted.
//!
//! ## Atomicity
//!
//! [`LedgerDb::commit`] runs one sled transaction across all six trees.
//! Values are encoded before the transaction starts, so the closure can
//! only fail on storage errors, and on any failure nothing is written.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};
use std::path::Path;

use super::store::{ChangeSet, LedgerStore, StoreError, StoreResult, StoredLedger};
use crate::audit::{AuditBlock, ChainCheckpoint};
use crate::transaction::Transaction;
use crate::vault::{ReserveEntry, Wallet};

/// Metadata key for the retention checkpoint.
const META_CHECKPOINT: &[u8] = b"audit_checkpoint";

fn encode<T: Serialize>(value: &T) -> StoreResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StoreResult<T> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// A change set with every value already encoded.
struct EncodedChanges {
    transaction: Option<(Vec<u8>, Vec<u8>)>,
    receipt: Option<(Vec<u8>, Vec<u8>)>,
    blocks: Vec<([u8; 8], Vec<u8>)>,
    pruned: Vec<[u8; 8]>,
    checkpoint: Option<Vec<u8>>,
    reserve_entry: Option<([u8; 8], Vec<u8>)>,
    wallet: Option<(Vec<u8>, Vec<u8>)>,
}

impl EncodedChanges {
    fn new(changes: &ChangeSet) -> StoreResult<Self> {
        let transaction = changes
            .transaction
            .as_ref()
            .map(|tx| Ok::<_, StoreError>((tx.id.as_str().as_bytes().to_vec(), encode(tx)?)))
            .transpose()?;
        let receipt = changes
            .receipt
            .as_ref()
            .map(|(hash, bytes)| (hash.as_bytes().to_vec(), bytes.clone()));
        let blocks = changes
            .blocks
            .iter()
            .map(|b| Ok::<_, StoreError>((b.index.to_be_bytes(), encode(b)?)))
            .collect::<StoreResult<Vec<_>>>()?;
        let pruned = changes.pruned_blocks.iter().map(|i| i.to_be_bytes()).collect();
        let checkpoint = changes.checkpoint.as_ref().map(encode).transpose()?;
        let reserve_entry = changes
            .reserve_entry
            .as_ref()
            .map(|e| Ok::<_, StoreError>((e.sequence.to_be_bytes(), encode(e)?)))
            .transpose()?;
        let wallet = changes
            .wallet
            .as_ref()
            .map(|w| Ok::<_, StoreError>((w.owner().as_bytes().to_vec(), encode(w)?)))
            .transpose()?;

        Ok(Self {
            transaction,
            receipt,
            blocks,
            pruned,
            checkpoint,
            reserve_entry,
            wallet,
        })
    }
}

// ---------------------------------------------------------------------------
// LedgerDb
// ---------------------------------------------------------------------------

/// Persistent ledger storage on sled.
///
/// Cloning is cheap: sled handles are reference counted.
#[derive(Debug, Clone)]
pub struct LedgerDb {
    db: Db,
    transactions: Tree,
    receipts: Tree,
    audit_blocks: Tree,
    reserve_entries: Tree,
    wallets: Tree,
    metadata: Tree,
}

impl LedgerDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that lives in a temporary location and is removed on
    /// drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        Ok(Self {
            transactions: db.open_tree("transactions")?,
            receipts: db.open_tree("receipts")?,
            audit_blocks: db.open_tree("audit_blocks")?,
            reserve_entries: db.open_tree("reserve_entries")?,
            wallets: db.open_tree("wallets")?,
            metadata: db.open_tree("metadata")?,
            db,
        })
    }

    /// Read one persisted block by index.
    pub fn get_block(&self, index: u64) -> StoreResult<Option<AuditBlock>> {
        self.audit_blocks
            .get(index.to_be_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    /// Overwrite a persisted block, bypassing every ledger check.
    ///
    /// Exists so integrity tests can simulate an attacker with direct write
    /// access to the database.
    pub fn overwrite_block(&self, block: &AuditBlock) -> StoreResult<()> {
        self.audit_blocks
            .insert(block.index.to_be_bytes(), encode(block)?)?;
        Ok(())
    }

    fn scan<T: DeserializeOwned>(tree: &Tree) -> StoreResult<Vec<T>> {
        tree.iter()
            .values()
            .map(|v| -> StoreResult<T> { decode(&v?) })
            .collect()
    }
}

impl LedgerStore for LedgerDb {
    fn load(&self) -> StoreResult<StoredLedger> {
        let transactions: Vec<Transaction> = Self::scan(&self.transactions)?;
        let blocks: Vec<AuditBlock> = Self::scan(&self.audit_blocks)?;
        let reserve_entries: Vec<ReserveEntry> = Self::scan(&self.reserve_entries)?;
        let wallets: Vec<Wallet> = Self::scan(&self.wallets)?;
        let checkpoint: Option<ChainCheckpoint> = self
            .metadata
            .get(META_CHECKPOINT)?
            .map(|bytes| decode(&bytes))
            .transpose()?;

        Ok(StoredLedger {
            transactions,
            blocks,
            checkpoint,
            reserve_entries,
            wallets,
        })
    }

    fn commit(&self, changes: &ChangeSet) -> StoreResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let encoded = EncodedChanges::new(changes)?;

        let result: Result<(), TransactionError<StoreError>> = (
            &self.transactions,
            &self.receipts,
            &self.audit_blocks,
            &self.reserve_entries,
            &self.wallets,
            &self.metadata,
        )
            .transaction(
                |(transactions, receipts, blocks, reserve, wallets, metadata)|
                 -> ConflictableTransactionResult<(), StoreError> {
                    if let Some((key, value)) = &encoded.transaction {
                        transactions.insert(key.as_slice(), value.as_slice())?;
                    }
                    if let Some((key, value)) = &encoded.receipt {
                        receipts.insert(key.as_slice(), value.as_slice())?;
                    }
                    for key in &encoded.pruned {
                        blocks.remove(key.as_slice())?;
                    }
                    for (key, value) in &encoded.blocks {
                        blocks.insert(key.as_slice(), value.as_slice())?;
                    }
                    if let Some(value) = &encoded.checkpoint {
                        metadata.insert(META_CHECKPOINT, value.as_slice())?;
                    }
                    if let Some((key, value)) = &encoded.reserve_entry {
                        reserve.insert(key.as_slice(), value.as_slice())?;
                    }
                    if let Some((key, value)) = &encoded.wallet {
                        wallets.insert(key.as_slice(), value.as_slice())?;
                    }
                    Ok(())
                },
            );

        result.map_err(|e| match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => StoreError::Sled(inner),
        })?;

        self.db.flush()?;
        Ok(())
    }

    fn receipt(&self, hash: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.receipts.get(hash.as_bytes())?.map(|v| v.to_vec()))
    }

    fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditChain;
    use crate::crypto::AuditKeypair;
    use crate::transaction::test_support::pending_tx;
    use chrono::Utc;

    #[test]
    fn empty_database_loads_empty() {
        let db = LedgerDb::open_temporary().unwrap();
        let stored = db.load().unwrap();
        assert!(stored.transactions.is_empty());
        assert!(stored.blocks.is_empty());
        assert!(stored.checkpoint.is_none());
    }

    #[test]
    fn commit_persists_every_part() {
        let db = LedgerDb::open_temporary().unwrap();
        let kp = AuditKeypair::generate();
        let chain = AuditChain::genesis(&kp, None).unwrap();
        let genesis = chain.last().unwrap().clone();

        let mut wallet = Wallet::new("payer-1");
        wallet
            .credit(crate::vault::EntryType::Deposit, 50, "surplus", None, Utc::now())
            .unwrap();
        let entry = crate::vault::ReserveFund::new()
            .prepare(10, "tax", Utc::now())
            .unwrap();

        let changes = ChangeSet::new()
            .with_transaction(pending_tx("t1", "abc", 100))
            .with_receipt("abc", b"receipt-bytes")
            .with_block(genesis.clone())
            .with_reserve_entry(entry.clone())
            .with_wallet(wallet.clone());
        db.commit(&changes).unwrap();

        let stored = db.load().unwrap();
        assert_eq!(stored.transactions.len(), 1);
        assert_eq!(stored.blocks, vec![genesis]);
        assert_eq!(stored.reserve_entries, vec![entry]);
        assert_eq!(stored.wallets, vec![wallet]);
        assert_eq!(db.receipt("abc").unwrap().as_deref(), Some(&b"receipt-bytes"[..]));
        assert_eq!(db.receipt("missing").unwrap(), None);
    }

    #[test]
    fn blocks_load_in_index_order() {
        let db = LedgerDb::open_temporary().unwrap();
        let kp = AuditKeypair::generate();
        let mut chain = AuditChain::genesis(&kp, None).unwrap();
        for _ in 0..300 {
            chain
                .append(
                    &kp,
                    crate::audit::AuditEvent::Genesis {
                        message: "filler".into(),
                    },
                )
                .unwrap();
        }
        let mut changes = ChangeSet::new();
        changes.blocks = chain.blocks().cloned().collect();
        db.commit(&changes).unwrap();

        let stored = db.load().unwrap();
        let indices: Vec<u64> = stored.blocks.iter().map(|b| b.index).collect();
        assert_eq!(indices, (0..=300).collect::<Vec<_>>());
    }

    #[test]
    fn pruning_removes_blocks_and_stores_checkpoint() {
        let db = LedgerDb::open_temporary().unwrap();
        let kp = AuditKeypair::generate();
        let chain = AuditChain::genesis(&kp, Some(2)).unwrap();
        let mut changes = ChangeSet::new();
        changes.blocks = chain.blocks().cloned().collect();
        db.commit(&changes).unwrap();

        let checkpoint = ChainCheckpoint {
            index: 1,
            previous_hash: chain.last().unwrap().hash.clone(),
        };
        db.commit(&ChangeSet::new().with_pruning(checkpoint.clone(), vec![0]))
            .unwrap();

        let stored = db.load().unwrap();
        assert!(stored.blocks.is_empty());
        assert_eq!(stored.checkpoint, Some(checkpoint));
    }

    #[test]
    fn reopen_from_disk_sees_committed_data() {
        let dir = tempfile::tempdir().unwrap();
        {
            let db = LedgerDb::open(dir.path()).unwrap();
            db.commit(&ChangeSet::new().with_transaction(pending_tx("t9", "h9", 9)))
                .unwrap();
        }
        let db = LedgerDb::open(dir.path()).unwrap();
        let stored = db.load().unwrap();
        assert_eq!(stored.transactions[0].id.as_str(), "t9");
    }
}
