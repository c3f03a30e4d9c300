//! # Storage Module
//!
//! ```text
//! store.rs — LedgerStore trait, ChangeSet, StoredLedger
//! db.rs    — LedgerDb, the sled implementation
//! ```
//!
//! The ledger talks only to [`LedgerStore`]. Tests wrap it to inject
//! failures; production uses [`LedgerDb`]. Values are bincode on disk;
//! JSON is for the API.

pub mod db;
pub mod store;

pub use db::LedgerDb;
pub use store::{ChangeSet, LedgerStore, StoreError, StoreResult, StoredLedger};
