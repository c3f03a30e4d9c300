//! Error type for the ledger service.
//!
//! Every public [`crate::TransactionLedger`] operation returns a
//! [`LedgerError`]. Callers branch on the variant; only
//! [`LedgerError::HashComputationFailure`] is fatal.

use thiserror::Error;

use crate::audit::ChainError;
use crate::config::ConfigError;
use crate::storage::StoreError;
use crate::tax::TaxError;
use crate::transaction::{TransactionId, TransactionStatus};
use crate::vault::{ReserveError, WalletError};

#[derive(Debug, Error)]
pub enum LedgerError {
    /// The receipt's fingerprint is already known. No transaction was
    /// created.
    #[error("duplicate receipt: {hash} was already submitted")]
    DuplicateReceiptFraud { hash: String },

    #[error("transaction {0} not found")]
    NotFound(TransactionId),

    /// The transaction is already terminal.
    #[error("transaction {id} is {from} and can no longer change")]
    InvalidStateTransition {
        id: TransactionId,
        from: TransactionStatus,
    },

    #[error("law '{law}' is immutable; change requested by '{actor}' refused")]
    ImmutableLawViolation { law: String, actor: String },

    /// The change set was not persisted. In-memory state is untouched.
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    /// A block could not be hashed. The ledger cannot guarantee integrity
    /// past this point.
    #[error("hash computation failure: {0}")]
    HashComputationFailure(String),

    /// Confirmed amount below declared, under the refusing policy.
    #[error("transaction {id}: confirmed {confirmed} is below declared {declared}")]
    Underpayment {
        id: TransactionId,
        declared: u64,
        confirmed: u64,
    },

    #[error("invalid submission: {0}")]
    InvalidSubmission(String),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Reserve(#[from] ReserveError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("audit chain error: {0}")]
    Chain(ChainError),
}

impl LedgerError {
    /// `true` when the process should stop accepting work.
    pub fn is_fatal(&self) -> bool {
        matches!(self, LedgerError::HashComputationFailure(_))
    }

    /// Text suitable for showing to the person who triggered the error.
    pub fn user_message(&self) -> String {
        match self {
            LedgerError::DuplicateReceiptFraud { .. } => "this receipt was already used".into(),
            LedgerError::NotFound(_) | LedgerError::InvalidStateTransition { .. } => {
                "transaction not found or already finalized".into()
            }
            LedgerError::ImmutableLawViolation { .. } => "this rule cannot be changed".into(),
            LedgerError::PersistenceFailure(_) => {
                "the operation could not be saved, please try again".into()
            }
            LedgerError::HashComputationFailure(_) => "the ledger is unavailable".into(),
            LedgerError::Underpayment { .. } => {
                "confirmed amount is below the declared amount".into()
            }
            LedgerError::InvalidSubmission(reason) => reason.clone(),
            LedgerError::Wallet(_) | LedgerError::Reserve(_) => {
                "the amount cannot be processed".into()
            }
            LedgerError::Config(_) => "invalid ledger configuration".into(),
            LedgerError::Chain(_) => "the audit log rejected this operation".into(),
        }
    }
}

impl From<ChainError> for LedgerError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Hash(reason) => LedgerError::HashComputationFailure(reason),
            other => LedgerError::Chain(other),
        }
    }
}

impl From<TaxError> for LedgerError {
    fn from(e: TaxError) -> Self {
        match e {
            TaxError::ImmutableLawViolation { law, actor } => {
                LedgerError::ImmutableLawViolation { law, actor }
            }
            TaxError::Reserve(inner) => LedgerError::Reserve(inner),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
