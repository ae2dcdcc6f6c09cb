use crate::api::{parse_param, AppState};
use crate::domain::{Category, LeaderboardEntry, Timeframe};
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    pub timeframe: Option<String>,
    pub category: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

pub async fn get_leaderboard(
    Query(params): Query<LeaderboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<LeaderboardEntry>>, AppError> {
    let timeframe = parse_param(
        params.timeframe.as_deref(),
        Timeframe::Day,
        "timeframe",
        "hour, day, week, month",
    )?;
    let category = parse_param(
        params.category.as_deref(),
        Category::All,
        "category",
        "all, politician, influencer, journalist, activist, business, entertainer",
    )?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    let offset = params.offset.unwrap_or(0);

    Ok(Json(
        state.engine.leaderboard(timeframe, category, limit, offset),
    ))
}
