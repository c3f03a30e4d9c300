//! # Payer Wallets
//!
//! The ledger's view of the wallet system: per-user balances credited when
//! an approval settles above the declared amount ("smart change"). Each
//! credit is kept as a [`WalletEntry`] so a wallet's balance can always be
//! explained line by line.
//!
//! Wallets are staged like everything else in the core: `staged_credit`
//! returns an updated copy, the ledger persists it, and only then does
//! `put` replace the live wallet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur during wallet operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    /// A zero-amount credit is a no-op and almost certainly a caller bug.
    #[error("zero-amount operations are not permitted")]
    ZeroAmount,

    #[error("wallet {owner} overflow: balance {balance}, credit {credit}")]
    Overflow {
        owner: String,
        balance: u64,
        credit: u64,
    },
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// Kind of ledger entry in a wallet's history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum EntryType {
    Deposit,
}

/// One line in a wallet's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntry {
    pub kind: EntryType,
    pub amount: u64,
    pub description: String,
    /// Transaction that caused the entry, if any.
    pub reference: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

/// A single user's wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    owner: String,
    balance: u64,
    entries: Vec<WalletEntry>,
    created_at: DateTime<Utc>,
}

impl Wallet {
    /// An empty wallet for `owner`.
    pub fn new(owner: &str) -> Self {
        Self {
            owner: owner.to_string(),
            balance: 0,
            entries: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    pub fn entries(&self) -> &[WalletEntry] {
        &self.entries
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Credit the wallet and append an entry. Returns the new balance.
    ///
    /// # Errors
    ///
    /// [`WalletError::ZeroAmount`] for `amount == 0`,
    /// [`WalletError::Overflow`] if the balance would wrap.
    pub fn credit(
        &mut self,
        kind: EntryType,
        amount: u64,
        description: &str,
        reference: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, WalletError> {
        if amount == 0 {
            return Err(WalletError::ZeroAmount);
        }
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or_else(|| WalletError::Overflow {
                owner: self.owner.clone(),
                balance: self.balance,
                credit: amount,
            })?;
        self.entries.push(WalletEntry {
            kind,
            amount,
            description: description.to_string(),
            reference: reference.map(str::to_string),
            recorded_at: at,
        });
        Ok(self.balance)
    }
}

// ---------------------------------------------------------------------------
// WalletBook
// ---------------------------------------------------------------------------

/// All wallets known to the ledger, keyed by owner id.
#[derive(Clone, Debug, Default)]
pub struct WalletBook {
    wallets: HashMap<String, Wallet>,
}

impl WalletBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted wallets.
    pub fn from_wallets(wallets: Vec<Wallet>) -> Self {
        Self {
            wallets: wallets
                .into_iter()
                .map(|w| (w.owner.clone(), w))
                .collect(),
        }
    }

    pub fn get(&self, owner: &str) -> Option<&Wallet> {
        self.wallets.get(owner)
    }

    /// Balance for `owner`; unknown wallets hold nothing.
    pub fn balance(&self, owner: &str) -> u64 {
        self.wallets.get(owner).map(Wallet::balance).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Compute the credited wallet without touching the book.
    pub fn staged_credit(
        &self,
        owner: &str,
        kind: EntryType,
        amount: u64,
        description: &str,
        reference: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Wallet, WalletError> {
        let mut wallet = self
            .wallets
            .get(owner)
            .cloned()
            .unwrap_or_else(|| Wallet::new(owner));
        wallet.credit(kind, amount, description, reference, at)?;
        Ok(wallet)
    }

    /// Install a (staged) wallet, replacing any previous version.
    pub fn put(&mut self, wallet: Wallet) {
        self.wallets.insert(wallet.owner.clone(), wallet);
    }

    /// Credit directly. Returns the new balance.
    pub fn credit(
        &mut self,
        owner: &str,
        kind: EntryType,
        amount: u64,
        description: &str,
    ) -> Result<u64, WalletError> {
        let wallet = self.staged_credit(owner, kind, amount, description, None, Utc::now())?;
        let balance = wallet.balance();
        self.put(wallet);
        Ok(balance)
    }
}
