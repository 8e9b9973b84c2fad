use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use super::{parse_id, ApiError, AppState};
use crate::payments::types::{NewPayout, Payout};

pub async fn create_payout(
    State(state): State<AppState>,
    Json(input): Json<NewPayout>,
) -> Result<Response, ApiError> {
    let payout = state.processor.create_payout(input).await?;
    Ok((StatusCode::CREATED, Json(payout)).into_response())
}

pub async fn get_payout(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Payout>, ApiError> {
    let id = parse_id(&id, "Payout")?;
    Ok(Json(state.processor.get_payout(id).await?))
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Payout>, ApiError> {
    let id = parse_id(&id, "Payout")?;
    Ok(Json(state.processor.execute_payout(id).await?))
}
