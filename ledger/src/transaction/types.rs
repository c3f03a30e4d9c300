//! # Transaction Types
//!
//! A [`Transaction`] is one bank-transfer payment, from the moment the payer
//! uploads a receipt until an administrator settles or rejects it.
//!
//! ## Lifecycle
//!
//! ```text
//!                        ┌──────────► COMPLETED  (terminal)
//!  PENDING_VERIFICATION ─┤
//!                        └──────────► REJECTED   (terminal)
//! ```
//!
//! Terminal states are final. Once completed, `settled_amount` never changes
//! again. Rejected transactions are kept forever for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

// ---------------------------------------------------------------------------
// TransactionId
// ---------------------------------------------------------------------------

/// Process-wide sequence mixed into every generated id.
static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Unique transaction identifier.
///
/// Format: `txn-<unix millis, 13 digits>-<sequence, 6 digits>-<8 hex>`.
/// The sequence makes ids unique within a process even when the clock
/// stalls; the random suffix separates processes. Ids sort in creation
/// order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Mint a new id stamped with `at`.
    pub fn generate(at: DateTime<Utc>) -> Self {
        let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 1_000_000;
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!(
            "txn-{:013}-{:06}-{}",
            at.timestamp_millis().max(0),
            seq,
            &suffix[..8]
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Where a transaction is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    PendingVerification,
    Completed,
    Rejected,
}

impl TransactionStatus {
    /// The only legal moves are out of `PendingVerification`.
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (
                TransactionStatus::PendingVerification,
                TransactionStatus::Completed | TransactionStatus::Rejected
            )
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::PendingVerification => "pending_verification",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// How the payer sent the money.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum PaymentMethod {
    #[default]
    BankTransfer,
}

/// What the payment is for. Informational; no rule depends on it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Course,
    Marketplace,
    Job,
    Subscription,
    #[default]
    Other,
}

/// One side of a payment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub name: String,
}

impl Party {
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Rejected state-machine move.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

/// A monetary transaction under verification or already finalized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub payer: Party,
    pub payee: Party,
    pub service_title: String,
    pub category: ServiceCategory,
    /// What the payer says they sent.
    pub declared_amount: u64,
    /// Fixed at settlement; `None` until then.
    pub settled_amount: Option<u64>,
    /// Declared minus confirmed, when an administrator confirmed less.
    pub shortfall: u64,
    pub status: TransactionStatus,
    pub payment_method: PaymentMethod,
    /// Where the receipt blob is stored (`receipt://<hash>`).
    pub receipt_ref: String,
    /// SHA-256 of the raw receipt bytes.
    pub receipt_hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// `true` while awaiting an administrator decision.
    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::PendingVerification
    }

    /// Settle the transaction. Only legal from `PendingVerification`.
    pub fn complete(
        &mut self,
        settled_amount: u64,
        shortfall: u64,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.transition(TransactionStatus::Completed, at)?;
        self.settled_amount = Some(settled_amount);
        self.shortfall = shortfall;
        Ok(())
    }

    /// Reject the transaction. Only legal from `PendingVerification`.
    pub fn reject(&mut self, at: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(TransactionStatus::Rejected, at)
    }

    fn transition(&mut self, to: TransactionStatus, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = at;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::pending_tx;

    #[test]
    fn generated_ids_are_unique_and_ordered() {
        let now = Utc::now();
        let ids: Vec<TransactionId> = (0..1_000).map(|_| TransactionId::generate(now)).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert!(ids[0].as_str().starts_with("txn-"));
    }

    #[test]
    fn only_pending_can_move() {
        use TransactionStatus::*;
        assert!(PendingVerification.can_transition_to(Completed));
        assert!(PendingVerification.can_transition_to(Rejected));
        for from in [Completed, Rejected] {
            for to in [PendingVerification, Completed, Rejected] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(!PendingVerification.can_transition_to(PendingVerification));
    }

    #[test]
    fn complete_fixes_settled_amount() {
        let mut tx = pending_tx("t1", "h", 500);
        tx.complete(550, 0, Utc::now()).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.settled_amount, Some(550));

        let err = tx.complete(600, 0, Utc::now()).unwrap_err();
        assert_eq!(err.from, TransactionStatus::Completed);
        assert_eq!(tx.settled_amount, Some(550));
    }

    #[test]
    fn rejected_is_final() {
        let mut tx = pending_tx("t2", "h", 500);
        tx.reject(Utc::now()).unwrap();
        assert!(tx.reject(Utc::now()).is_err());
        assert!(tx.complete(500, 0, Utc::now()).is_err());
        assert_eq!(tx.settled_amount, None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TransactionStatus::PendingVerification).unwrap();
        assert_eq!(json, "\"pending_verification\"");
        assert_eq!(TransactionStatus::Rejected.to_string(), "rejected");
    }
}
