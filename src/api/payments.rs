use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::{parse_id, ApiError, AppState};
use crate::payments::types::{CheckoutContext, CheckoutTarget, NewPayment, Payment};
use crate::payments::PaymentError;

/// Amount for partial charges and refunds; absent means "all of it"
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AmountRequest {
    #[serde(default)]
    pub amount: Option<Decimal>,
}

/// Parse a JSON body that may be omitted entirely
pub(crate) fn optional_json<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            format!("Malformed request body: {}", e),
        )
    })
}

pub async fn create_payment(
    State(state): State<AppState>,
    Json(input): Json<NewPayment>,
) -> Result<Response, ApiError> {
    let payment = state.processor.create_payment(input).await?;
    Ok((StatusCode::CREATED, Json(payment)).into_response())
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_id(&id, "Payment")?;
    Ok(Json(state.processor.get_payment(id).await?))
}

/// Start checkout and send the buyer to the paywall
pub async fn checkout(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = parse_id(&id, "Payment")?;
    let context: CheckoutContext = optional_json(&body)?;

    match state.processor.begin_checkout(id, context).await {
        Ok(CheckoutTarget::Redirect { url }) => Ok(Redirect::to(&url).into_response()),
        Ok(target @ CheckoutTarget::FormPost { .. }) => Ok(Json(target).into_response()),
        Err(e @ PaymentError::NotFound { .. }) | Err(e @ PaymentError::TransitionRejected { .. }) => {
            Err(e.into())
        }
        Err(e) => {
            // Gateway details stay in the logs
            error!("Checkout unavailable for payment {}: {}", id, e);
            Err(ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "PAYMENT_UNAVAILABLE",
                "Payment is temporarily unavailable",
            ))
        }
    }
}

pub async fn refresh(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_id(&id, "Payment")?;
    Ok(Json(state.processor.refresh_status(id).await?))
}

pub async fn charge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_id(&id, "Payment")?;
    let request: AmountRequest = optional_json(&body)?;
    Ok(Json(state.processor.charge(id, request.amount).await?))
}

pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_id(&id, "Payment")?;
    let request: AmountRequest = optional_json(&body)?;
    Ok(Json(state.processor.refund(id, request.amount).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id = parse_id(&id, "Payment")?;
    Ok(Json(state.processor.cancel(id).await?))
}
