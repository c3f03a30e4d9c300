//! # REST API
//!
//! The axum router in front of the [`TransactionLedger`]. All handlers share
//! [`AppState`] through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                      | Description                          |
//! |--------|---------------------------|--------------------------------------|
//! | GET    | `/health`                 | Liveness probe                       |
//! | GET    | `/status`                 | Ledger summary                       |
//! | POST   | `/transfers`              | Submit a bank transfer (receipt hex) |
//! | GET    | `/transfers/pending`      | Transactions awaiting verification   |
//! | GET    | `/transfers/:id`          | Transaction by id                    |
//! | GET    | `/transfers/:id/receipt`  | Stored receipt image (hex)           |
//! | POST   | `/transfers/:id/approve`  | Approve, optional `confirmed_amount` |
//! | POST   | `/transfers/:id/reject`   | Reject                               |
//! | GET    | `/audit?limit=N`          | Newest audit blocks                  |
//! | GET    | `/audit/verify`           | Chain integrity report               |
//! | GET    | `/reserve`                | Reserve fund balance and entries     |
//! | GET    | `/wallets/:id`            | Wallet balance and entries           |
//! | POST   | `/laws/:name/override`    | Always 403: laws are immutable       |

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use blackbox_ledger::audit::{AuditBlock, ChainReport};
use blackbox_ledger::transaction::{Party, ServiceCategory, Transaction, TransactionId};
use blackbox_ledger::vault::{ReserveEntry, WalletEntry};
use blackbox_ledger::{BankTransfer, LedgerError, Settlement, SubmissionOutcome, TransactionLedger};

use crate::metrics::SharedMetrics;

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state. Cheap to clone: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub ledger: Arc<TransactionLedger>,
    pub metrics: SharedMetrics,
    /// Signalled when the ledger reports a fatal error; `main` shuts down.
    pub fatal: Arc<Notify>,
}

impl AppState {
    /// Bring the gauges in line with the ledger.
    pub fn refresh_gauges(&self) {
        self.metrics
            .audit_chain_length
            .set(self.ledger.audit_len() as i64);
        self.metrics
            .reserve_balance
            .set(i64::try_from(self.ledger.reserve_balance()).unwrap_or(i64::MAX));
        self.metrics
            .pending_transactions
            .set(self.ledger.pending_count() as i64);
    }

    /// Count the failure and escalate fatal ones.
    fn record_failure(&self, err: &LedgerError) {
        match err {
            LedgerError::DuplicateReceiptFraud { .. } => {
                self.metrics.duplicate_receipts_total.inc();
            }
            LedgerError::PersistenceFailure(_) => {
                self.metrics.persistence_failures_total.inc();
            }
            _ => {}
        }
        if err.is_fatal() {
            tracing::error!(error = %err, "fatal ledger error, shutting down");
            self.fatal.notify_one();
        }
    }
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/transfers", post(submit_handler))
        .route("/transfers/pending", get(pending_handler))
        .route("/transfers/:id", get(transaction_handler))
        .route("/transfers/:id/receipt", get(receipt_handler))
        .route("/transfers/:id/approve", post(approve_handler))
        .route("/transfers/:id/reject", post(reject_handler))
        .route("/audit", get(audit_handler))
        .route("/audit/verify", get(verify_handler))
        .route("/reserve", get(reserve_handler))
        .route("/wallets/:id", get(wallet_handler))
        .route("/laws/:name/override", post(override_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request & Response Types
// ---------------------------------------------------------------------------

/// Body of `POST /transfers`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub payer_id: String,
    pub payer_name: String,
    pub service_title: String,
    pub amount: u64,
    /// Receipt image bytes, hex-encoded.
    pub receipt_hex: String,
    #[serde(default)]
    pub category: ServiceCategory,
    /// Payee, when not the platform.
    #[serde(default)]
    pub payee: Option<Party>,
}

/// Body of `POST /transfers/:id/approve`. The body itself is optional.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveRequest {
    #[serde(alias = "confirmedAmount")]
    pub confirmed_amount: Option<u64>,
}

impl ApproveRequest {
    /// An empty body means "settle at the declared amount". Anything else
    /// must parse, or nothing is approved.
    pub fn from_body(body: &[u8]) -> Result<Self, serde_json::Error> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApproveResponse {
    pub approved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement: Option<Settlement>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RejectResponse {
    pub rejected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    pub transactions: usize,
    pub pending: usize,
    pub reserve_balance: u64,
    pub tax_rate_bps: u32,
    pub audit_chain_length: usize,
    pub audit_valid: bool,
    /// First audit index the integrity verdict covers.
    pub audit_verified_from: u64,
    pub audit_public_key: String,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    pub report: ChainReport,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReserveResponse {
    pub balance: u64,
    pub tax_rate_bps: u32,
    pub entries: Vec<ReserveEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub owner: String,
    pub balance: u64,
    pub entries: Vec<WalletEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReceiptResponse {
    pub transaction_id: TransactionId,
    pub receipt_hex: String,
}

/// Body of `POST /laws/:name/override`.
#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub requested_bps: u32,
    pub actor: String,
}

/// Generic error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// HTTP status for a ledger error.
fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::DuplicateReceiptFraud { .. } => StatusCode::CONFLICT,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        LedgerError::ImmutableLawViolation { .. } => StatusCode::FORBIDDEN,
        LedgerError::Underpayment { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::InvalidSubmission(_)
        | LedgerError::Wallet(_)
        | LedgerError::Reserve(_) => StatusCode::BAD_REQUEST,
        LedgerError::HashComputationFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::PersistenceFailure(_) | LedgerError::Config(_) | LedgerError::Chain(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health` — liveness only. Integrity lives in `/status`.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    let ledger = &state.ledger;
    let report = ledger.audit_report();
    Json(StatusResponse {
        version: state.version.clone(),
        transactions: ledger.transactions().len(),
        pending: ledger.pending_count(),
        reserve_balance: ledger.reserve_balance(),
        tax_rate_bps: ledger.tax_rate_bps(),
        audit_chain_length: ledger.audit_len(),
        audit_valid: report.valid,
        audit_verified_from: report.verified_from,
        audit_public_key: ledger.audit_public_key(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `POST /transfers` — `submitBankTransfer`.
///
/// Always answers with a [`SubmissionOutcome`]; the status code tells
/// duplicates (409) from bad input (400) and storage trouble (500).
async fn submit_handler(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let receipt = match hex::decode(req.receipt_hex.trim()) {
        Ok(bytes) => bytes,
        Err(_) => {
            let outcome = SubmissionOutcome {
                success: false,
                transaction_id: None,
                error: Some("receipt must be hex-encoded".into()),
            };
            return (StatusCode::BAD_REQUEST, Json(outcome));
        }
    };

    let mut transfer = BankTransfer::new(
        &req.payer_id,
        &req.payer_name,
        &req.service_title,
        req.amount,
        receipt,
        req.category,
    );
    if let Some(payee) = req.payee {
        transfer = transfer.with_payee(payee);
    }

    let result = state.ledger.submit(transfer);
    state.refresh_gauges();
    match result {
        Ok(id) => {
            state.metrics.submissions_total.inc();
            let outcome = SubmissionOutcome {
                success: true,
                transaction_id: Some(id),
                error: None,
            };
            (StatusCode::CREATED, Json(outcome))
        }
        Err(e) => {
            state.record_failure(&e);
            let outcome = SubmissionOutcome {
                success: false,
                transaction_id: None,
                error: Some(e.user_message()),
            };
            (status_for(&e), Json(outcome))
        }
    }
}

/// `GET /transfers/pending` — most recent first.
async fn pending_handler(State(state): State<AppState>) -> Json<Vec<Transaction>> {
    Json(state.ledger.pending_transactions())
}

/// `GET /transfers/:id`
async fn transaction_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Response {
    match state.ledger.transaction(&TransactionId::from(id.as_str())) {
        Some(tx) => (StatusCode::OK, Json(tx)).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("transaction not found: {id}")),
    }
}

/// `GET /transfers/:id/receipt`
async fn receipt_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    let id = TransactionId::from(id);
    match state.ledger.receipt(&id) {
        Ok(Some(bytes)) => Json(ReceiptResponse {
            transaction_id: id,
            receipt_hex: hex::encode(bytes),
        })
        .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("no receipt stored for {id}")),
        Err(e) => {
            state.record_failure(&e);
            error_response(status_for(&e), e.user_message())
        }
    }
}

/// `POST /transfers/:id/approve` — `approveTransaction`.
async fn approve_handler(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> impl IntoResponse {
    let request = match ApproveRequest::from_body(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(transaction = %id, error = %e, "unreadable approval body");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApproveResponse {
                    approved: false,
                    settlement: None,
                    error: Some(format!("invalid approval body: {e}")),
                }),
            );
        }
    };
    let result = state
        .ledger
        .approve(&TransactionId::from(id), request.confirmed_amount);
    state.refresh_gauges();
    match result {
        Ok(settlement) => {
            state.metrics.approvals_total.inc();
            (
                StatusCode::OK,
                Json(ApproveResponse {
                    approved: true,
                    settlement: Some(settlement),
                    error: None,
                }),
            )
        }
        Err(e) => {
            state.record_failure(&e);
            (
                status_for(&e),
                Json(ApproveResponse {
                    approved: false,
                    settlement: None,
                    error: Some(e.user_message()),
                }),
            )
        }
    }
}

/// `POST /transfers/:id/reject` — `rejectTransaction`.
async fn reject_handler(Path(id): Path<String>, State(state): State<AppState>) -> impl IntoResponse {
    let result = state.ledger.reject(&TransactionId::from(id));
    state.refresh_gauges();
    match result {
        Ok(_) => {
            state.metrics.rejections_total.inc();
            (
                StatusCode::OK,
                Json(RejectResponse {
                    rejected: true,
                    error: None,
                }),
            )
        }
        Err(e) => {
            state.record_failure(&e);
            (
                status_for(&e),
                Json(RejectResponse {
                    rejected: false,
                    error: Some(e.user_message()),
                }),
            )
        }
    }
}

/// `GET /audit?limit=N` — `getAuditChain`. Oldest first.
async fn audit_handler(
    Query(query): Query<AuditQuery>,
    State(state): State<AppState>,
) -> Json<Vec<AuditBlock>> {
    Json(state.ledger.audit_chain(query.limit))
}

/// `GET /audit/verify` — `verifyAuditIntegrity` plus the covered range.
async fn verify_handler(State(state): State<AppState>) -> Json<VerifyResponse> {
    let report = state.ledger.audit_report();
    Json(VerifyResponse {
        valid: report.valid,
        report,
    })
}

/// `GET /reserve` — `getReserveBalance`.
async fn reserve_handler(State(state): State<AppState>) -> Json<ReserveResponse> {
    let fund = state.ledger.reserve();
    Json(ReserveResponse {
        balance: fund.balance(),
        tax_rate_bps: state.ledger.tax_rate_bps(),
        entries: fund.entries().to_vec(),
    })
}

/// `GET /wallets/:id` — unknown owners have an empty wallet.
async fn wallet_handler(
    Path(owner): Path<String>,
    State(state): State<AppState>,
) -> Json<WalletResponse> {
    let resp = match state.ledger.wallet(&owner) {
        Some(wallet) => WalletResponse {
            owner: wallet.owner().to_string(),
            balance: wallet.balance(),
            entries: wallet.entries().to_vec(),
        },
        None => WalletResponse {
            owner,
            balance: 0,
            entries: Vec::new(),
        },
    };
    Json(resp)
}

/// `POST /laws/:name/override` — refused, whoever asks.
async fn override_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
    Json(req): Json<OverrideRequest>,
) -> Response {
    match state
        .ledger
        .override_law(&name, req.requested_bps, &req.actor)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            state.record_failure(&e);
            state.refresh_gauges();
            error_response(status_for(&e), e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
