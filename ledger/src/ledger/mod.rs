//! # Ledger Service
//!
//! ```text
//! service.rs — TransactionLedger: submit, approve, reject, reads, lifecycle
//! types.rs   — BankTransfer, Settlement, SubmissionOutcome, LedgerEvent
//! error.rs   — LedgerError and the user-facing messages
//! ```
//!
//! Control flow for one bank transfer:
//!
//! ```text
//! submit ──► digest receipt ──► ReceiptVault ──► PENDING_VERIFICATION ──► audit
//! approve ─► smart change ──► WalletBook ──► TaxEnforcer ──► COMPLETED ──► audit
//! reject ──────────────────────────────────────────────────► REJECTED ───► audit
//! ```

pub mod error;
pub mod service;
pub mod types;

pub use error::{LedgerError, LedgerResult};
pub use service::TransactionLedger;
pub use types::{BankTransfer, LedgerEvent, Settlement, SubmissionOutcome};
