//! # AuditChain
//!
//! Append-only, hash-linked list of [`AuditBlock`]s with a single writer.
//!
//! ## Retention
//!
//! With a retention limit set, the oldest blocks are dropped once the chain
//! grows past it. The first retained block is then described by a
//! [`ChainCheckpoint`] and verification starts there: a [`ChainReport`]
//! always says which index range it actually proved.
//!
//! ```text
//!   dropped         │ retained
//!   [0] [1] [2] [3] │ [4] ──► [5] ──► [6]
//!                   │  ▲
//!                   │  checkpoint { index: 4, previous_hash: hash([3]) }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

use super::block::{AuditBlock, AuditEvent};
use crate::crypto::keys::AuditKeypair;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while extending the chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// The payload could not be serialized for hashing.
    #[error("failed to hash audit block: {0}")]
    Hash(String),

    #[error("chain has no blocks to extend")]
    Empty,

    #[error("block {got} does not follow index {expected}")]
    OutOfOrder { expected: u64, got: u64 },

    #[error("block {index} does not link to the previous hash")]
    BrokenLink { index: u64 },

    #[error("first block must be genesis or match the checkpoint")]
    BadAnchor,

    /// The chain was signed by another audit key than the one supplied.
    #[error("chain is signed by {expected}, not by audit key {found}")]
    ForeignKey { expected: String, found: String },
}

impl From<serde_json::Error> for ChainError {
    fn from(e: serde_json::Error) -> Self {
        ChainError::Hash(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Checkpoint & Report
// ---------------------------------------------------------------------------

/// Describes the oldest retained block after pruning.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCheckpoint {
    pub index: u64,
    pub previous_hash: String,
}

/// Outcome of a full verification walk.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub valid: bool,
    /// First index covered by this report.
    pub verified_from: u64,
    /// Last index covered; `None` for an empty chain.
    pub verified_to: Option<u64>,
    pub blocks_checked: usize,
    /// Index of the first block that failed, if any.
    pub first_invalid: Option<u64>,
    /// Human-readable reason for the first failure.
    pub reason: Option<String>,
}

impl ChainReport {
    fn failed(verified_from: u64, checked: usize, at: u64, reason: String) -> Self {
        Self {
            valid: false,
            verified_from,
            verified_to: at.checked_sub(1).filter(|_| checked > 0),
            blocks_checked: checked,
            first_invalid: Some(at),
            reason: Some(reason),
        }
    }
}

// ---------------------------------------------------------------------------
// AuditChain
// ---------------------------------------------------------------------------

/// The in-memory chain.
#[derive(Clone, Debug, Default)]
pub struct AuditChain {
    blocks: VecDeque<AuditBlock>,
    checkpoint: Option<ChainCheckpoint>,
    retention: Option<usize>,
}

impl AuditChain {
    /// A fresh chain holding only a genesis block.
    pub fn genesis(keypair: &AuditKeypair, retention: Option<usize>) -> Result<Self, ChainError> {
        let mut chain = Self::empty(retention);
        chain.push(AuditBlock::genesis(Utc::now(), keypair)?)?;
        Ok(chain)
    }

    /// A chain with no blocks. The first `push` must be a genesis block.
    pub fn empty(retention: Option<usize>) -> Self {
        Self {
            blocks: VecDeque::new(),
            checkpoint: None,
            retention,
        }
    }

    /// Reassemble a chain from storage. No validation happens here; call
    /// [`AuditChain::verify_report`] to find out what was loaded.
    pub fn from_parts(
        mut blocks: Vec<AuditBlock>,
        checkpoint: Option<ChainCheckpoint>,
        retention: Option<usize>,
    ) -> Self {
        blocks.sort_by_key(|b| b.index);
        Self {
            blocks: blocks.into(),
            checkpoint,
            retention,
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn last(&self) -> Option<&AuditBlock> {
        self.blocks.back()
    }

    pub fn checkpoint(&self) -> Option<&ChainCheckpoint> {
        self.checkpoint.as_ref()
    }

    /// Build (but do not push) the block that would come next.
    pub fn next_block(
        &self,
        keypair: &AuditKeypair,
        event: AuditEvent,
        at: DateTime<Utc>,
    ) -> Result<AuditBlock, ChainError> {
        let last = self.last().ok_or(ChainError::Empty)?;
        Ok(AuditBlock::seal(
            last.index + 1,
            &last.hash,
            at,
            event,
            keypair,
        )?)
    }

    /// Append a block built with [`AuditChain::next_block`] (or a genesis
    /// block on an empty chain). Linkage is checked; the seal is not.
    pub fn push(&mut self, block: AuditBlock) -> Result<(), ChainError> {
        match self.last() {
            None => {
                let anchored = match &self.checkpoint {
                    Some(cp) => block.index == cp.index && block.previous_hash == cp.previous_hash,
                    None => block.is_genesis(),
                };
                if !anchored {
                    return Err(ChainError::BadAnchor);
                }
            }
            Some(last) => {
                if block.index != last.index + 1 {
                    return Err(ChainError::OutOfOrder {
                        expected: last.index + 1,
                        got: block.index,
                    });
                }
                if block.previous_hash != last.hash {
                    return Err(ChainError::BrokenLink { index: block.index });
                }
            }
        }
        self.blocks.push_back(block);
        Ok(())
    }

    /// The checkpoint pruning would produce once `incoming` more blocks are
    /// pushed, or `None` if the chain stays within retention.
    pub fn checkpoint_after(&self, incoming: usize) -> Option<ChainCheckpoint> {
        let limit = self.retention?;
        let total = self.blocks.len() + incoming;
        if total <= limit {
            return None;
        }
        let drop = total - limit;
        let oldest = self.blocks.get(drop)?;
        Some(ChainCheckpoint {
            index: oldest.index,
            previous_hash: oldest.previous_hash.clone(),
        })
    }

    /// Indices of retained blocks older than `index`.
    pub fn indices_below(&self, index: u64) -> Vec<u64> {
        self.blocks
            .iter()
            .map(|b| b.index)
            .take_while(|i| *i < index)
            .collect()
    }

    /// Drop every block before `checkpoint.index` and remember the
    /// checkpoint.
    pub fn apply_checkpoint(&mut self, checkpoint: ChainCheckpoint) {
        while self
            .blocks
            .front()
            .is_some_and(|b| b.index < checkpoint.index)
        {
            self.blocks.pop_front();
        }
        self.checkpoint = Some(checkpoint);
    }

    /// Build, push and prune in one step. For callers that do not persist.
    pub fn append(
        &mut self,
        keypair: &AuditKeypair,
        event: AuditEvent,
    ) -> Result<AuditBlock, ChainError> {
        let block = self.next_block(keypair, event, Utc::now())?;
        let checkpoint = self.checkpoint_after(1);
        self.push(block.clone())?;
        if let Some(cp) = checkpoint {
            self.apply_checkpoint(cp);
        }
        Ok(block)
    }

    /// The last `n` blocks, oldest first.
    pub fn tail(&self, n: usize) -> Vec<AuditBlock> {
        let skip = self.blocks.len().saturating_sub(n);
        self.blocks.iter().skip(skip).cloned().collect()
    }

    pub fn blocks(&self) -> impl DoubleEndedIterator<Item = &AuditBlock> {
        self.blocks.iter()
    }

    pub fn verify(&self) -> bool {
        self.verify_report().valid
    }

    /// Walk every retained block: anchor, index continuity, hash linkage,
    /// recomputed hash, signature and signer. Every block must be signed by
    /// the key that signed the first retained block. Stops at the first
    /// failure.
    pub fn verify_report(&self) -> ChainReport {
        let verified_from = self.checkpoint.as_ref().map_or(0, |cp| cp.index);

        let Some(first) = self.blocks.front() else {
            return ChainReport {
                valid: false,
                verified_from,
                verified_to: None,
                blocks_checked: 0,
                first_invalid: None,
                reason: Some("chain is empty".to_string()),
            };
        };

        let anchored = match &self.checkpoint {
            Some(cp) => first.index == cp.index && first.previous_hash == cp.previous_hash,
            None => first.is_genesis(),
        };
        if !anchored {
            return ChainReport::failed(
                verified_from,
                0,
                first.index,
                "first block does not match genesis or checkpoint".to_string(),
            );
        }

        let mut previous: Option<&AuditBlock> = None;
        for (checked, block) in self.blocks.iter().enumerate() {
            if let Some(prev) = previous {
                if block.index != prev.index + 1 {
                    return ChainReport::failed(
                        verified_from,
                        checked,
                        block.index,
                        format!("index gap after {}", prev.index),
                    );
                }
                if block.previous_hash != prev.hash {
                    return ChainReport::failed(
                        verified_from,
                        checked,
                        block.index,
                        "previous_hash does not match".to_string(),
                    );
                }
            }
            if block.signer != first.signer {
                return ChainReport::failed(
                    verified_from,
                    checked,
                    block.index,
                    "signed by a different key".to_string(),
                );
            }
            if let Err(fault) = block.check_seal() {
                return ChainReport::failed(verified_from, checked, block.index, fault.to_string());
            }
            previous = Some(block);
        }

        ChainReport {
            valid: true,
            verified_from,
            verified_to: previous.map(|b| b.index),
            blocks_checked: self.blocks.len(),
            first_invalid: None,
            reason: None,
        }
    }
}
