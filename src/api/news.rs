use crate::api::{json_body, AppState};
use crate::broadcast::NewsItem;
use crate::error::AppError;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

/// Publish a news item to live subscribers.
pub async fn post_news(
    State(state): State<AppState>,
    body: Result<Json<NewsItem>, JsonRejection>,
) -> Result<Json<Value>, AppError> {
    let news = json_body(body)?;
    let seq = state.engine.publish_news(news)?;
    Ok(Json(json!({ "status": "published", "seq": seq })))
}
