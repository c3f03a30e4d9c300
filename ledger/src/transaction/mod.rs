//! # Transaction Module
//!
//! ```text
//! types.rs — Transaction, its id, status machine, and enumerations
//! book.rs  — the in-memory transaction table
//! ```
//!
//! The state machine lives on [`Transaction`] itself (`complete`, `reject`)
//! so no caller can move a status without going through the legality check.

pub mod book;
pub mod types;

pub use book::TransactionBook;
pub use types::{
    Party, PaymentMethod, ServiceCategory, Transaction, TransactionId, TransactionStatus,
    TransitionError,
};
