//! # Audit Block Structure
//!
//! One record in the BlackBox chain.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  index          u64     (0 = genesis)        │
//! │  timestamp      i64     (unix millis)        │
//! │  event_type     SYSTEM_EVENT|FINANCIAL|SECURITY
//! │  payload        AuditEvent                   │
//! │  previous_hash  hex     ("0" for genesis)    │
//! │  hash           hex     SHA-256, see below   │
//! │  signer         hex     Ed25519 public key   │
//! │  signature      hex     signer's sig on hash │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Hash Computation
//!
//! `SHA-256(index | previous_hash | timestamp | event_type | canonical_json(payload))`.
//! The signature and signer are NOT part of the hash; the signature signs
//! the hash.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::GENESIS_PREVIOUS_HASH;
use crate::crypto::hash::{digest_hex, to_canonical_json};
use crate::crypto::keys::{verify_hex, AuditKeypair};
use crate::transaction::{ServiceCategory, TransactionId};

/// Message recorded in the genesis block.
pub const GENESIS_MESSAGE: &str = "BlackBox audit chain genesis";

// ---------------------------------------------------------------------------
// Event Types
// ---------------------------------------------------------------------------

/// Broad class of an audit record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SystemEvent,
    Financial,
    Security,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::SystemEvent => "SYSTEM_EVENT",
            EventType::Financial => "FINANCIAL",
            EventType::Security => "SECURITY",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened. Each variant belongs to exactly one [`EventType`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Genesis {
        message: String,
    },
    LedgerStarted {
        transactions: u64,
        pending: u64,
        reserve_balance: u64,
        chain_valid: bool,
    },
    TransferSubmitted {
        transaction_id: TransactionId,
        payer_id: String,
        amount: u64,
        receipt_hash: String,
        category: ServiceCategory,
    },
    TransferApproved {
        transaction_id: TransactionId,
        payer_id: String,
        declared_amount: u64,
        confirmed_amount: Option<u64>,
        settled_amount: u64,
        surplus: u64,
        shortfall: u64,
        tax_withheld: u64,
        net_amount: u64,
        tax_rate_bps: u32,
    },
    TransferRejected {
        transaction_id: TransactionId,
        payer_id: String,
        receipt_released: bool,
    },
    DuplicateReceipt {
        receipt_hash: String,
        payer_id: String,
        amount: u64,
    },
    LawOverrideRefused {
        law: String,
        current_bps: u32,
        requested_bps: u32,
        actor: String,
    },
}

impl AuditEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            AuditEvent::Genesis { .. } | AuditEvent::LedgerStarted { .. } => EventType::SystemEvent,
            AuditEvent::TransferSubmitted { .. }
            | AuditEvent::TransferApproved { .. }
            | AuditEvent::TransferRejected { .. } => EventType::Financial,
            AuditEvent::DuplicateReceipt { .. } | AuditEvent::LawOverrideRefused { .. } => {
                EventType::Security
            }
        }
    }
}

// ---------------------------------------------------------------------------
// AuditBlock
// ---------------------------------------------------------------------------

/// Why a single block failed its self-check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SealFault {
    /// The payload could not be serialized for hashing.
    Unhashable(String),
    HashMismatch { stored: String, computed: String },
    EventTypeMismatch,
    BadSignature,
}

impl fmt::Display for SealFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SealFault::Unhashable(e) => write!(f, "payload not hashable: {e}"),
            SealFault::HashMismatch { stored, computed } => {
                write!(f, "hash mismatch: stored={stored}, computed={computed}")
            }
            SealFault::EventTypeMismatch => f.write_str("event type does not match payload"),
            SealFault::BadSignature => f.write_str("signature does not verify"),
        }
    }
}

/// A sealed (hashed and signed) audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditBlock {
    pub index: u64,
    pub timestamp: i64,
    pub event_type: EventType,
    pub payload: AuditEvent,
    pub previous_hash: String,
    pub hash: String,
    pub signer: String,
    pub signature: String,
}

impl AuditBlock {
    /// Hash, sign and assemble a block.
    pub fn seal(
        index: u64,
        previous_hash: &str,
        at: DateTime<Utc>,
        payload: AuditEvent,
        keypair: &AuditKeypair,
    ) -> Result<Self, serde_json::Error> {
        let timestamp = at.timestamp_millis();
        let event_type = payload.event_type();
        let hash = compute_block_hash(index, previous_hash, timestamp, event_type, &payload)?;
        let signature = keypair.sign_hex(hash.as_bytes());

        Ok(Self {
            index,
            timestamp,
            event_type,
            payload,
            previous_hash: previous_hash.to_string(),
            hash,
            signer: keypair.public_key_hex(),
            signature,
        })
    }

    /// The genesis block: index 0, `previous_hash == "0"`.
    pub fn genesis(at: DateTime<Utc>, keypair: &AuditKeypair) -> Result<Self, serde_json::Error> {
        Self::seal(
            0,
            GENESIS_PREVIOUS_HASH,
            at,
            AuditEvent::Genesis {
                message: GENESIS_MESSAGE.to_string(),
            },
            keypair,
        )
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0 && self.previous_hash == GENESIS_PREVIOUS_HASH
    }

    /// Recompute the hash from the block's own fields.
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        compute_block_hash(
            self.index,
            &self.previous_hash,
            self.timestamp,
            self.event_type,
            &self.payload,
        )
    }

    /// Check the block in isolation: stored hash, event type, signature.
    /// Linkage to neighbours is the chain's job.
    pub fn check_seal(&self) -> Result<(), SealFault> {
        let computed = self
            .compute_hash()
            .map_err(|e| SealFault::Unhashable(e.to_string()))?;
        if computed != self.hash {
            return Err(SealFault::HashMismatch {
                stored: self.hash.clone(),
                computed,
            });
        }
        if self.payload.event_type() != self.event_type {
            return Err(SealFault::EventTypeMismatch);
        }
        if !verify_hex(&self.signer, self.hash.as_bytes(), &self.signature) {
            return Err(SealFault::BadSignature);
        }
        Ok(())
    }
}

/// The block hash function. Deterministic across processes: the payload
/// goes through canonical JSON before hashing.
pub fn compute_block_hash(
    index: u64,
    previous_hash: &str,
    timestamp: i64,
    event_type: EventType,
    payload: &AuditEvent,
) -> Result<String, serde_json::Error> {
    let canonical = to_canonical_json(payload)?;
    let preimage = format!("{index}|{previous_hash}|{timestamp}|{event_type}|{canonical}");
    Ok(digest_hex(preimage.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected_event() -> AuditEvent {
        AuditEvent::TransferRejected {
            transaction_id: TransactionId::from("txn-1"),
            payer_id: "payer".into(),
            receipt_released: false,
        }
    }

    #[test]
    fn genesis_block_shape() {
        let kp = AuditKeypair::generate();
        let g = AuditBlock::genesis(Utc::now(), &kp).unwrap();
        assert!(g.is_genesis());
        assert_eq!(g.event_type, EventType::SystemEvent);
        assert_eq!(g.hash.len(), 64);
        assert_eq!(g.check_seal(), Ok(()));
    }

    #[test]
    fn hash_is_deterministic() {
        let kp = AuditKeypair::from_seed(&[1u8; 32]);
        let at = Utc::now();
        let a = AuditBlock::seal(3, "abc", at, rejected_event(), &kp).unwrap();
        let b = AuditBlock::seal(3, "abc", at, rejected_event(), &kp).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn every_field_feeds_the_hash() {
        let kp = AuditKeypair::generate();
        let at = Utc::now();
        let base = AuditBlock::seal(1, "prev", at, rejected_event(), &kp).unwrap();

        let other_index = AuditBlock::seal(2, "prev", at, rejected_event(), &kp).unwrap();
        let other_prev = AuditBlock::seal(1, "prev2", at, rejected_event(), &kp).unwrap();
        let later = at + chrono::Duration::milliseconds(1);
        let other_time = AuditBlock::seal(1, "prev", later, rejected_event(), &kp).unwrap();
        for other in [other_index, other_prev, other_time] {
            assert_ne!(base.hash, other.hash);
        }
    }

    #[test]
    fn payload_edit_breaks_seal() {
        let kp = AuditKeypair::generate();
        let mut block = AuditBlock::seal(1, "prev", Utc::now(), rejected_event(), &kp).unwrap();
        block.payload = AuditEvent::TransferRejected {
            transaction_id: TransactionId::from("txn-2"),
            payer_id: "payer".into(),
            receipt_released: false,
        };
        assert!(matches!(
            block.check_seal(),
            Err(SealFault::HashMismatch { .. })
        ));
    }

    #[test]
    fn rehashed_edit_still_fails_signature() {
        let kp = AuditKeypair::generate();
        let mut block = AuditBlock::seal(1, "prev", Utc::now(), rejected_event(), &kp).unwrap();
        block.payload = AuditEvent::TransferRejected {
            transaction_id: TransactionId::from("txn-forged"),
            payer_id: "payer".into(),
            receipt_released: true,
        };
        block.hash = block.compute_hash().unwrap();
        assert_eq!(block.check_seal(), Err(SealFault::BadSignature));
    }

    #[test]
    fn relabelled_event_type_is_caught() {
        let kp = AuditKeypair::generate();
        let mut block = AuditBlock::seal(1, "prev", Utc::now(), rejected_event(), &kp).unwrap();
        block.event_type = EventType::Security;
        block.hash = block.compute_hash().unwrap();
        block.signature = kp.sign_hex(block.hash.as_bytes());
        assert_eq!(block.check_seal(), Err(SealFault::EventTypeMismatch));
    }

    #[test]
    fn event_types_map_to_categories() {
        assert_eq!(rejected_event().event_type(), EventType::Financial);
        let dup = AuditEvent::DuplicateReceipt {
            receipt_hash: "h".into(),
            payer_id: "p".into(),
            amount: 1,
        };
        assert_eq!(dup.event_type(), EventType::Security);
        assert_eq!(EventType::SystemEvent.to_string(), "SYSTEM_EVENT");
    }
}
