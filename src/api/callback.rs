//! Gateway callback endpoints
//!
//! The raw body is handed to the owning backend untouched so signatures can
//! be checked against the exact bytes the gateway sent.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::{error, info, warn};

use super::{parse_id, ApiError, AppState};
use crate::payments::types::{CallbackAck, CallbackRequest};
use crate::payments::PaymentError;

fn callback_error(err: PaymentError) -> ApiError {
    let status = match &err {
        PaymentError::InvalidRequest { .. } | PaymentError::Credentials { .. } => {
            StatusCode::BAD_REQUEST
        }
        PaymentError::NotFound { .. } | PaymentError::UnknownBackend { .. } => {
            StatusCode::NOT_FOUND
        }
        // Gateways redeliver on 5xx
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    ApiError::new(status, err.code(), err.to_string())
}

fn ack_response(ack: CallbackAck) -> Response {
    let status = StatusCode::from_u16(ack.status).unwrap_or(StatusCode::OK);
    (status, ack.body).into_response()
}

pub async fn payment_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "Payment")?;
    let request = CallbackRequest::new(headers, body.to_vec());

    match state.processor.handle_callback(id, &request).await {
        Ok(report) => {
            info!(
                "Payment callback processed: id={}, disposition={:?}",
                id, report.disposition
            );
            Ok(ack_response(report.ack))
        }
        Err(e) => {
            if e.is_retryable() {
                error!("Payment callback for {} failed: {}", id, e);
            } else {
                warn!("Payment callback for {} refused: {}", id, e);
            }
            Err(callback_error(e))
        }
    }
}

pub async fn payout_callback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "Payout")?;
    let request = CallbackRequest::new(headers, body.to_vec());

    match state.processor.handle_payout_callback(id, &request).await {
        Ok(report) => {
            info!(
                "Payout callback processed: id={}, disposition={:?}",
                id, report.disposition
            );
            Ok(ack_response(report.ack))
        }
        Err(e) => {
            warn!("Payout callback for {} refused: {}", id, e);
            Err(callback_error(e))
        }
    }
}
