//! # Audit Module — BlackBox Chain
//!
//! ```text
//! block.rs — AuditBlock, EventType, AuditEvent payloads, hashing and sealing
//! chain.rs — AuditChain: append, verify, retention checkpoint
//! ```
//!
//! Every financial and security-relevant action the ledger takes is
//! mirrored into the chain. Verification recomputes each block hash,
//! checks each signature and follows the `previous_hash` links, so any
//! retroactive edit to a retained block is detected.

pub mod block;
pub mod chain;

pub use block::{compute_block_hash, AuditBlock, AuditEvent, EventType, SealFault};
pub use chain::{AuditChain, ChainCheckpoint, ChainError, ChainReport};
