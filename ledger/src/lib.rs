// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # BlackBox Ledger — Financial Core
//!
//! The part of the platform that is allowed to touch money. Bank-transfer
//! submissions come in with a receipt image, an administrator approves or
//! rejects them, and every step lands in a hash-linked audit chain that
//! anyone can re-verify.
//!
//! ## Architecture
//!
//! Modules are listed leaf-first, in the order they depend on each other:
//!
//! - **crypto** — SHA-256 digests, canonical JSON, Ed25519 audit keys.
//! - **vault** — Receipt fingerprints, the reserve fund, payer wallets.
//! - **audit** — Audit blocks and the append-only chain with verification.
//! - **tax** — The immutable withholding law and its enforcer.
//! - **transaction** — Transaction records and the owned transaction table.
//! - **storage** — The persistence seam and its sled implementation.
//! - **ledger** — `TransactionLedger`, the service that composes the rest.
//! - **config** — Law values, retention, and policy switches.
//!
//! ## Ground Rules
//!
//! 1. Amounts are `u64` in the smallest currency unit. No floats, ever.
//! 2. Every mutation is staged, committed to storage, then applied. A failed
//!    commit leaves memory untouched.
//! 3. One mutex serializes every mutating operation. The audit chain has
//!    exactly one writer.
//! 4. If it touches money, it has tests. Plural.

pub mod audit;
pub mod config;
pub mod crypto;
pub mod ledger;
pub mod storage;
pub mod tax;
pub mod transaction;
pub mod vault;

pub use ledger::{
    BankTransfer, LedgerError, LedgerEvent, LedgerResult, Settlement, SubmissionOutcome,
    TransactionLedger,
};
