use crate::api::{parse_account_id, AppState};
use crate::domain::InfluenceMetrics;
use crate::error::AppError;
use axum::extract::{Path, State};
use axum::Json;

pub async fn get_metrics(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<InfluenceMetrics>, AppError> {
    let id = parse_account_id(&id)?;
    state
        .engine
        .metrics(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("account {}", id)))
}
