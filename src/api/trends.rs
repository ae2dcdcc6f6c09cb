use crate::api::{parse_param, AppState};
use crate::domain::{Timeframe, TopicCategory, Trend, TrendSort};
use crate::error::AppError;
use crate::orchestration::TrendQuery;
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::str::FromStr;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendsParams {
    pub region: Option<String>,
    pub category: Option<String>,
    pub timeframe: Option<String>,
    pub sort: Option<String>,
    pub limit: Option<usize>,
    pub include_inactive: Option<bool>,
}

pub async fn get_trends(
    Query(params): Query<TrendsParams>,
    State(state): State<AppState>,
) -> Result<Json<Vec<Trend>>, AppError> {
    let category = params
        .category
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|raw| {
            TopicCategory::from_str(raw).map_err(|_| {
                AppError::BadRequest(format!("unknown category '{}'", raw))
            })
        })
        .transpose()?;
    let timeframe = parse_param(
        params.timeframe.as_deref(),
        Timeframe::Hour,
        "timeframe",
        "hour, day",
    )?;
    let sort = parse_param(
        params.sort.as_deref(),
        TrendSort::Score,
        "sort",
        "score, volume, velocity",
    )?;
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }

    let query = TrendQuery {
        region: params.region,
        category,
        timeframe,
        sort,
        limit,
        include_inactive: params.include_inactive.unwrap_or(false),
    };
    Ok(Json(state.engine.trends(&query)?))
}
