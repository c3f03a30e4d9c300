//! The transaction table. Owned by the ledger; nothing else mutates it.

use std::collections::HashMap;

use super::types::{Transaction, TransactionId};

/// All transactions ever recorded, in creation order.
#[derive(Clone, Debug, Default)]
pub struct TransactionBook {
    by_id: HashMap<TransactionId, Transaction>,
    order: Vec<TransactionId>,
}

impl TransactionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted history. Order is by creation time, ties
    /// broken by id.
    pub fn from_history(mut history: Vec<Transaction>) -> Self {
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        let mut book = Self::new();
        for tx in history {
            book.insert(tx);
        }
        book
    }

    /// Add a new transaction. Returns `false` (and changes nothing) if the
    /// id is already taken.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.by_id.contains_key(&tx.id) {
            return false;
        }
        self.order.push(tx.id.clone());
        self.by_id.insert(tx.id.clone(), tx);
        true
    }

    /// Replace an existing transaction with its updated version.
    /// Returns `false` if the id is unknown.
    pub fn replace(&mut self, tx: Transaction) -> bool {
        match self.by_id.get_mut(&tx.id) {
            Some(slot) => {
                *slot = tx;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &TransactionId) -> Option<&Transaction> {
        self.by_id.get(id)
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.by_id.contains_key(id)
    }

    /// Pending transactions, most recent first.
    pub fn pending(&self) -> Vec<Transaction> {
        self.order
            .iter()
            .rev()
            .filter_map(|id| self.by_id.get(id))
            .filter(|tx| tx.is_pending())
            .cloned()
            .collect()
    }

    /// Number of transactions awaiting a decision.
    pub fn pending_count(&self) -> usize {
        self.by_id.values().filter(|tx| tx.is_pending()).count()
    }

    /// Every transaction, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
