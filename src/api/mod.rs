//! HTTP surface
//!
//! Gateway callbacks plus a small set of merchant-facing endpoints driving
//! the processor. Errors leave the service as
//! `{"error": {"code", "message", "details"}}`.

pub mod callback;
pub mod health;
pub mod payments;
pub mod payouts;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::payments::{PaymentError, PaymentProcessor};

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<PaymentProcessor>,
    pub environment: String,
}

impl AppState {
    pub fn new(processor: Arc<PaymentProcessor>, environment: impl Into<String>) -> Self {
        Self {
            processor,
            environment: environment.into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/payments", post(payments::create_payment))
        .route("/payments/:id", get(payments::get_payment))
        .route("/payments/:id/checkout", post(payments::checkout))
        .route("/payments/:id/refresh", post(payments::refresh))
        .route("/payments/:id/charge", post(payments::charge))
        .route("/payments/:id/refund", post(payments::refund))
        .route("/payments/:id/cancel", post(payments::cancel))
        // Gateways are configured with the trailing slash; accept both forms
        .route("/payments/callback/:id/", post(callback::payment_callback))
        .route("/payments/callback/:id", post(callback::payment_callback))
        .route("/payouts", post(payouts::create_payout))
        .route("/payouts/:id", get(payouts::get_payout))
        .route("/payouts/:id/execute", post(payouts::execute))
        .route("/payouts/callback/:id/", post(callback::payout_callback))
        .route("/payouts/callback/:id", post(callback::payout_callback))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{} with ID '{}' not found", what, id),
        )
    }
}

/// HTTP status for a processor error
pub fn status_for(err: &PaymentError) -> StatusCode {
    match err {
        PaymentError::NotFound { .. } => StatusCode::NOT_FOUND,
        PaymentError::InvalidRequest { .. }
        | PaymentError::UnknownBackend { .. }
        | PaymentError::Credentials { .. } => StatusCode::BAD_REQUEST,
        PaymentError::TransitionRejected { .. } => StatusCode::CONFLICT,
        PaymentError::LockFailure { .. }
        | PaymentError::RefundFailure { .. }
        | PaymentError::PayoutFailure { .. }
        | PaymentError::ChargeFailure { .. }
        | PaymentError::GetPaid { .. } => StatusCode::BAD_GATEWAY,
        PaymentError::Communication { .. } => StatusCode::SERVICE_UNAVAILABLE,
        PaymentError::Configuration { .. } | PaymentError::Storage { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<PaymentError> for ApiError {
    fn from(err: PaymentError) -> Self {
        let error = ApiError::new(status_for(&err), err.code(), err.to_string());
        match err.raw_response() {
            Some(raw) => error.with_details(raw.to_string()),
            None => error,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Path ids that are not UUIDs cannot name a record
pub(crate) fn parse_id(raw: &str, what: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::not_found(what, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&PaymentError::not_found("Payment", "x")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&PaymentError::transition_rejected("paid", "prepared")),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&PaymentError::lock_failure("rejected", None)),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&PaymentError::invalid_request("bad")),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_parse_id() {
        assert!(parse_id("not-a-uuid", "Payment").is_err());
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "Payment").unwrap(), id);
    }
}
