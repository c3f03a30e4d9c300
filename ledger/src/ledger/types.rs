//! Request, result and notification types for the ledger service.

use serde::{Deserialize, Serialize};

use crate::transaction::{Party, ServiceCategory, Transaction, TransactionId};

/// A bank-transfer submission as it arrives from the payer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransfer {
    pub payer: Party,
    /// Who is being paid. `None` means the platform.
    pub payee: Option<Party>,
    pub service_title: String,
    pub category: ServiceCategory,
    /// Declared amount, smallest currency unit.
    pub amount: u64,
    /// Raw bytes of the uploaded receipt image.
    #[serde(with = "hex_bytes")]
    pub receipt: Vec<u8>,
}

impl BankTransfer {
    pub fn new(
        payer_id: &str,
        payer_name: &str,
        service_title: &str,
        amount: u64,
        receipt: impl Into<Vec<u8>>,
        category: ServiceCategory,
    ) -> Self {
        Self {
            payer: Party::new(payer_id, payer_name),
            payee: None,
            service_title: service_title.to_string(),
            category,
            amount,
            receipt: receipt.into(),
        }
    }

    /// Direct the payment to someone other than the platform.
    pub fn with_payee(mut self, payee: Party) -> Self {
        self.payee = Some(payee);
        self
    }
}

/// What an approval did, for the caller that triggered it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// The transaction in its final `completed` state.
    pub transaction: Transaction,
    /// Overpayment credited to the payer's wallet.
    pub surplus: u64,
    /// Underpayment accepted under [`crate::config::ShortfallPolicy::AcceptFlagged`].
    pub shortfall: u64,
    /// Amount moved into the reserve fund.
    pub tax_withheld: u64,
    /// Settled amount minus the withholding. Informational.
    pub net_amount: u64,
    /// Index of the audit block that recorded the approval.
    pub audit_index: u64,
}

/// Shape returned by [`crate::TransactionLedger::submit_bank_transfer`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fire-and-forget notifications for the payer-facing side of the platform.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    TransferApproved {
        transaction_id: TransactionId,
        payer_id: String,
        settled_amount: u64,
        surplus: u64,
    },
    TransferRejected {
        transaction_id: TransactionId,
        payer_id: String,
    },
}

impl LedgerEvent {
    /// The payer to notify.
    pub fn payer_id(&self) -> &str {
        match self {
            LedgerEvent::TransferApproved { payer_id, .. }
            | LedgerEvent::TransferRejected { payer_id, .. } => payer_id,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
