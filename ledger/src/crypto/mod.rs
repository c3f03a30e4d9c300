//! # Cryptographic Primitives
//!
//! SHA-256 for every digest (receipt fingerprints and audit block hashes)
//! and Ed25519 for the audit chain's signature tokens. Thin wrappers around
//! audited crates; nothing here is hand-rolled.

pub mod hash;
pub mod keys;

pub use hash::{canonical_json, digest_hex, sha256, to_canonical_json};
pub use keys::{verify_hex, AuditKeypair, KeyError};
