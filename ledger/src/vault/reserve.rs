//! # Reserve Fund
//!
//! Platform-held balance fed exclusively by tax withholding. The balance
//! only ever goes up: there is no withdrawal method. Each deposit is an
//! ordered, sequence-numbered [`ReserveEntry`], and the balance is always
//! the sum of the entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while crediting the reserve.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReserveError {
    #[error("reserve overflow: balance {balance}, deposit {amount}")]
    Overflow { balance: u64, amount: u64 },

    #[error("reserve entry out of sequence: expected {expected}, got {got}")]
    OutOfSequence { expected: u64, got: u64 },
}

/// One withholding deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveEntry {
    /// Position in the fund's history, starting at 0.
    pub sequence: u64,
    /// When the withholding was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Amount withheld, in smallest units.
    pub amount: u64,
    /// What the withholding was taken from.
    pub source: String,
}

/// Running balance plus the full list of deposits.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveFund {
    balance: u64,
    entries: Vec<ReserveEntry>,
}

impl ReserveFund {
    /// An empty fund.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a fund from persisted entries, re-deriving the balance.
    pub fn from_entries(mut entries: Vec<ReserveEntry>) -> Result<Self, ReserveError> {
        entries.sort_by_key(|e| e.sequence);
        let mut fund = Self::new();
        for entry in entries {
            fund.deposit(entry)?;
        }
        Ok(fund)
    }

    /// Current balance.
    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// All deposits, oldest first.
    pub fn entries(&self) -> &[ReserveEntry] {
        &self.entries
    }

    /// Sequence number the next deposit must carry.
    pub fn next_sequence(&self) -> u64 {
        self.entries.len() as u64
    }

    /// Build the next entry without applying it, checking for overflow.
    pub fn prepare(
        &self,
        amount: u64,
        source: &str,
        at: DateTime<Utc>,
    ) -> Result<ReserveEntry, ReserveError> {
        self.balance
            .checked_add(amount)
            .ok_or(ReserveError::Overflow {
                balance: self.balance,
                amount,
            })?;
        Ok(ReserveEntry {
            sequence: self.next_sequence(),
            recorded_at: at,
            amount,
            source: source.to_string(),
        })
    }

    /// Apply a prepared entry. Returns the new balance.
    pub fn deposit(&mut self, entry: ReserveEntry) -> Result<u64, ReserveError> {
        let expected = self.next_sequence();
        if entry.sequence != expected {
            return Err(ReserveError::OutOfSequence {
                expected,
                got: entry.sequence,
            });
        }
        self.balance = self
            .balance
            .checked_add(entry.amount)
            .ok_or(ReserveError::Overflow {
                balance: self.balance,
                amount: entry.amount,
            })?;
        self.entries.push(entry);
        Ok(self.balance)
    }
}
