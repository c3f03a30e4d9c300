//! # Vault Module — Receipts, Reserve & Wallets
//!
//! Where the ledger keeps the things that must never be double-counted.
//!
//! ```text
//! receipt.rs  — fingerprints of every accepted receipt image
//! reserve.rs  — the tax reserve fund (balance only goes up)
//! wallet.rs   — payer wallets credited with smart-change surplus
//! ```
//!
//! All amounts are `u64` in smallest-unit denomination, with checked
//! arithmetic on every credit.

pub mod receipt;
pub mod reserve;
pub mod wallet;

pub use receipt::ReceiptVault;
pub use reserve::{ReserveEntry, ReserveError, ReserveFund};
pub use wallet::{EntryType, Wallet, WalletBook, WalletEntry, WalletError};
