//! # Ledger Configuration & Constants
//!
//! Every magic number in the financial core lives here. The tax rate in
//! particular is a *law*: it is fixed when the ledger is constructed and no
//! runtime path, administrator or otherwise, can move it afterwards.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Laws
// ---------------------------------------------------------------------------

/// Name of the withholding law as it appears in audit records and errors.
pub const TAX_LAW_NAME: &str = "reserve_tax_rate";

/// Default withholding rate in basis points. 1000 bps = 10%.
pub const DEFAULT_TAX_RATE_BPS: u32 = 1_000;

/// Basis-point denominator. 10_000 bps = 100%.
pub const BPS_DENOMINATOR: u64 = 10_000;

// ---------------------------------------------------------------------------
// Audit Chain
// ---------------------------------------------------------------------------

/// Default number of audit blocks kept in fast storage.
pub const DEFAULT_AUDIT_RETENTION: usize = 1_000;

/// Smallest retention we accept. With fewer than two blocks there is no
/// link left to verify.
pub const MIN_AUDIT_RETENTION: usize = 2;

/// `previous_hash` of the genesis block.
pub const GENESIS_PREVIOUS_HASH: &str = "0";

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Description attached to overpayment deposits credited at approval time.
pub const SMART_CHANGE_DESCRIPTION: &str = "smart change surplus";

/// Default payee for bank transfers that don't name one: the platform itself.
pub const PLATFORM_PAYEE_ID: &str = "platform";

/// Display name for [`PLATFORM_PAYEE_ID`].
pub const PLATFORM_PAYEE_NAME: &str = "Platform";

/// Capacity of the notification broadcast channel. Slow subscribers lag
/// and miss events; the ledger never blocks on them.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Largest receipt image we accept, in bytes.
pub const MAX_RECEIPT_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// LedgerConfig
// ---------------------------------------------------------------------------

/// What to do when an administrator confirms less than the payer declared.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShortfallPolicy {
    /// Settle at the confirmed amount and record the shortfall on the
    /// transaction and in the audit chain.
    #[default]
    AcceptFlagged,
    /// Refuse the approval; the transaction stays pending.
    Refuse,
}

/// Errors from [`LedgerConfig::validate`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("tax rate {0} bps exceeds 100%")]
    TaxRateOutOfRange(u32),

    #[error("audit retention {0} is below the minimum of {MIN_AUDIT_RETENTION}")]
    RetentionTooSmall(usize),
}

/// Runtime configuration for a [`crate::TransactionLedger`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// The withholding law value, in basis points. Read once at startup.
    pub tax_rate_bps: u32,
    /// Maximum audit blocks kept in fast storage. `None` keeps everything.
    pub audit_retention: Option<usize>,
    /// Whether rejecting a transaction frees its receipt for resubmission.
    pub release_rejected_receipts: bool,
    /// Handling of confirmed amounts below the declared amount.
    pub shortfall_policy: ShortfallPolicy,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            tax_rate_bps: DEFAULT_TAX_RATE_BPS,
            audit_retention: Some(DEFAULT_AUDIT_RETENTION),
            release_rejected_receipts: false,
            shortfall_policy: ShortfallPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Check the configuration for values the ledger cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if u64::from(self.tax_rate_bps) > BPS_DENOMINATOR {
            return Err(ConfigError::TaxRateOutOfRange(self.tax_rate_bps));
        }
        if let Some(retention) = self.audit_retention {
            if retention < MIN_AUDIT_RETENTION {
                return Err(ConfigError::RetentionTooSmall(retention));
            }
        }
        Ok(())
    }
}
