use crate::api::{parse_account_id, parse_param, AppState};
use crate::domain::{Granularity, Timeframe};
use crate::error::AppError;
use crate::orchestration::HistoryReport;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub timeframe: Option<String>,
    pub granularity: Option<String>,
}

/// Influence history for an account; unknown accounts get an empty series.
pub async fn get_history(
    Path(id): Path<String>,
    Query(params): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> Result<Json<HistoryReport>, AppError> {
    let id = parse_account_id(&id)?;
    let timeframe = parse_param(
        params.timeframe.as_deref(),
        Timeframe::Week,
        "timeframe",
        "hour, day, week, month",
    )?;
    let granularity = parse_param(
        params.granularity.as_deref(),
        Granularity::Hour,
        "granularity",
        "hour, day, week",
    )?;
    Ok(Json(state.engine.history(&id, timeframe, granularity)))
}
