use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use super::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub backends: Vec<String>,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let backends = state
        .processor
        .registry()
        .slugs()
        .into_iter()
        .map(str::to_string)
        .collect();

    Json(HealthResponse {
        status: "healthy".to_string(),
        version,
        environment: state.environment.clone(),
        backends,
    })
}
