//! # Receipt Vault
//!
//! The set of every receipt fingerprint the ledger has accepted. A bank
//! transfer whose receipt image hashes to a known fingerprint is the same
//! physical receipt being reused, and is refused before any transaction
//! record exists.
//!
//! The set is rebuilt on startup by scanning the full transaction history.
//! Rejected transactions are included unless the ledger is configured to
//! release them: a rejected receipt may well have been a fraud attempt.

use std::collections::HashSet;

use crate::transaction::{Transaction, TransactionStatus};

/// Membership set of accepted receipt hashes.
#[derive(Clone, Debug, Default)]
pub struct ReceiptVault {
    seen: HashSet<String>,
}

impl ReceiptVault {
    /// An empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the vault from transaction history.
    ///
    /// With `include_rejected == false`, hashes of rejected transactions
    /// are left out so their receipts can be submitted again.
    pub fn hydrate<'a, I>(history: I, include_rejected: bool) -> Self
    where
        I: IntoIterator<Item = &'a Transaction>,
    {
        let seen = history
            .into_iter()
            .filter(|tx| include_rejected || tx.status != TransactionStatus::Rejected)
            .map(|tx| tx.receipt_hash.clone())
            .collect();
        Self { seen }
    }

    /// `true` if `hash` has been accepted before.
    pub fn is_duplicate(&self, hash: &str) -> bool {
        self.seen.contains(hash)
    }

    /// Record an accepted hash. Call only after the owning transaction has
    /// been persisted. Returns `false` if the hash was already present.
    pub fn record(&mut self, hash: &str) -> bool {
        self.seen.insert(hash.to_string())
    }

    /// Forget a hash so the receipt can be resubmitted.
    pub fn release(&mut self, hash: &str) -> bool {
        self.seen.remove(hash)
    }

    /// Number of fingerprints held.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// `true` if no fingerprint has been recorded.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::pending_tx;

    #[test]
    fn record_then_detect_duplicate() {
        let mut vault = ReceiptVault::new();
        assert!(!vault.is_duplicate("h1"));
        assert!(vault.record("h1"));
        assert!(vault.is_duplicate("h1"));
        assert!(!vault.record("h1"));
        assert_eq!(vault.len(), 1);
    }

    #[test]
    fn hydrate_includes_rejected_by_default_policy() {
        let accepted = pending_tx("a", "hash-a", 100);
        let mut rejected = pending_tx("b", "hash-b", 100);
        rejected.status = TransactionStatus::Rejected;

        let strict = ReceiptVault::hydrate([&accepted, &rejected], true);
        assert!(strict.is_duplicate("hash-a"));
        assert!(strict.is_duplicate("hash-b"));

        let relaxed = ReceiptVault::hydrate([&accepted, &rejected], false);
        assert!(relaxed.is_duplicate("hash-a"));
        assert!(!relaxed.is_duplicate("hash-b"));
    }

    #[test]
    fn release_frees_hash() {
        let mut vault = ReceiptVault::new();
        vault.record("h");
        assert!(vault.release("h"));
        assert!(!vault.is_duplicate("h"));
        assert!(vault.is_empty());
    }
}
