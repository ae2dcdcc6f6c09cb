pub mod accounts;
pub mod admin;
pub mod events;
pub mod health;
pub mod history;
pub mod leaderboard;
pub mod metrics;
pub mod news;
pub mod stream;
pub mod trends;

use crate::domain::AccountId;
use crate::error::AppError;
use crate::orchestration::Engine;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/accounts/:id", put(accounts::put_account))
        .route("/v1/accounts/:id/metrics", get(metrics::get_metrics))
        .route("/v1/accounts/:id/history", get(history::get_history))
        .route("/v1/events", post(events::post_event))
        .route("/v1/leaderboard", get(leaderboard::get_leaderboard))
        .route("/v1/trends", get(trends::get_trends))
        .route("/v1/admin/recompute", post(admin::post_recompute))
        .route("/v1/admin/stats", get(admin::get_stats))
        .route("/v1/news", post(news::post_news))
        .route("/v1/stream", get(stream::get_stream))
        .layer(cors)
        .with_state(state)
}

/// Parse an account id from a path segment.
pub(crate) fn parse_account_id(raw: &str) -> Result<AccountId, AppError> {
    AccountId::from_str(raw).map_err(|e| AppError::BadRequest(e.to_string()))
}

/// Unwrap a JSON body, reporting malformed input as a validation error.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Parse an optional enum-like query value, falling back to `default`.
pub(crate) fn parse_param<T: FromStr>(
    raw: Option<&str>,
    default: T,
    name: &str,
    allowed: &str,
) -> Result<T, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(default),
        Some(value) => T::from_str(value)
            .map_err(|_| AppError::BadRequest(format!("{} must be one of: {}", name, allowed))),
    }
}
