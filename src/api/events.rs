use crate::api::{json_body, AppState};
use crate::domain::Event;
use crate::error::AppError;
use crate::orchestration::Rejected;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub status: &'static str,
    pub shard_key: String,
    pub seq: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<usize>,
}

/// Submit one event. Replayed sequence numbers are reported, not rejected.
pub async fn post_event(
    State(state): State<AppState>,
    body: Result<Json<Event>, JsonRejection>,
) -> Result<Json<SubmitResponse>, AppError> {
    let event = json_body(body)?;
    match state.engine.submit(event).await {
        Ok(accepted) => Ok(Json(SubmitResponse {
            status: "accepted",
            shard_key: accepted.shard_key,
            seq: accepted.seq,
            topics: Some(accepted.topics),
        })),
        Err(Rejected::Duplicate { shard_key, seq }) => Ok(Json(SubmitResponse {
            status: "duplicate",
            shard_key,
            seq,
            topics: None,
        })),
        Err(rejected) => Err(rejected.into()),
    }
}
