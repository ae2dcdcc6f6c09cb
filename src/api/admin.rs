use crate::api::{parse_account_id, AppState};
use crate::error::AppError;
use crate::orchestration::{EngineStats, RecomputeReport};
use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeRequest {
    pub account_id: Option<String>,
}

/// Full recompute, or a single account when `accountId` is given.
pub async fn post_recompute(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RecomputeReport>, AppError> {
    let request: RecomputeRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RecomputeRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?
    };
    let account = request
        .account_id
        .as_deref()
        .map(parse_account_id)
        .transpose()?;
    let report = state.engine.recompute(account.as_ref()).await?;
    Ok(Json(report))
}

pub async fn get_stats(State(state): State<AppState>) -> Json<EngineStats> {
    Json(state.engine.stats())
}
