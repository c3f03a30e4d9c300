//! # Tax Enforcer
//!
//! Mandatory withholding on every settled amount, credited to the
//! [`ReserveFund`].
//!
//! The rate is a [`Law`]: fixed when the enforcer is constructed and never
//! writable afterwards. There is no setter. [`TaxEnforcer::override_rate`]
//! exists only so that override attempts have somewhere to land and be
//! refused, whatever credentials the caller presents.
//!
//! ```text
//! tax = floor(amount * rate_bps / 10_000)
//! net = amount - tax
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{BPS_DENOMINATOR, TAX_LAW_NAME};
use crate::vault::reserve::{ReserveEntry, ReserveError, ReserveFund};

/// Errors from the tax enforcer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxError {
    #[error("law '{law}' is immutable; override requested by '{actor}' refused")]
    ImmutableLawViolation { law: String, actor: String },

    #[error(transparent)]
    Reserve(#[from] ReserveError),
}

/// A named, immutable rule value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Law {
    pub name: String,
    pub rate_bps: u32,
    pub immutable: bool,
}

/// Result of assessing tax on one settled amount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Withholding {
    pub gross: u64,
    pub tax: u64,
    pub net: u64,
    /// The reserve deposit to apply once the settlement is persisted.
    pub entry: ReserveEntry,
}

/// Computes withholding and refuses every attempt to change the rate.
#[derive(Clone, Debug)]
pub struct TaxEnforcer {
    law: Law,
}

impl TaxEnforcer {
    /// Fix the withholding rate. Rates above 100% are clamped to 100%;
    /// [`crate::config::LedgerConfig::validate`] rejects them earlier.
    pub fn new(rate_bps: u32) -> Self {
        let capped = u64::from(rate_bps).min(BPS_DENOMINATOR) as u32;
        Self {
            law: Law {
                name: TAX_LAW_NAME.to_string(),
                rate_bps: capped,
                immutable: true,
            },
        }
    }

    pub fn law(&self) -> &Law {
        &self.law
    }

    pub fn rate_bps(&self) -> u32 {
        self.law.rate_bps
    }

    /// Tax owed on `amount`. Never exceeds `amount`.
    pub fn tax_on(&self, amount: u64) -> u64 {
        let tax = u128::from(amount) * u128::from(self.law.rate_bps) / u128::from(BPS_DENOMINATOR);
        // rate_bps <= 10_000, so tax <= amount
        tax as u64
    }

    /// Compute withholding on `amount` and prepare the reserve entry
    /// without touching the fund.
    pub fn assess(
        &self,
        amount: u64,
        source: &str,
        at: DateTime<Utc>,
        reserve: &ReserveFund,
    ) -> Result<Withholding, TaxError> {
        let tax = self.tax_on(amount);
        let entry = reserve.prepare(tax, source, at)?;
        Ok(Withholding {
            gross: amount,
            tax,
            net: amount - tax,
            entry,
        })
    }

    /// Assess and immediately deposit into `reserve`. Returns the net
    /// amount.
    pub fn withhold(
        &self,
        reserve: &mut ReserveFund,
        amount: u64,
        source: &str,
    ) -> Result<u64, TaxError> {
        let withholding = self.assess(amount, source, Utc::now(), reserve)?;
        reserve.deposit(withholding.entry)?;
        Ok(withholding.net)
    }

    /// Always refused. The law is immutable.
    pub fn override_rate(
        &self,
        law: &str,
        requested_bps: u32,
        actor: &str,
    ) -> Result<(), TaxError> {
        tracing::warn!(
            law = %law,
            current_bps = self.law.rate_bps,
            requested_bps,
            actor = %actor,
            "immutable law override refused"
        );
        Err(TaxError::ImmutableLawViolation {
            law: law.to_string(),
            actor: actor.to_string(),
        })
    }
}
