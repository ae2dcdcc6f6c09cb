use crate::api::{json_body, parse_account_id, AppState};
use crate::domain::AccountProfile;
use crate::error::AppError;
use crate::orchestration::AccountRegistration;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;

/// Push a new identity/alignment version for an account.
pub async fn put_account(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Result<Json<AccountRegistration>, JsonRejection>,
) -> Result<Json<AccountProfile>, AppError> {
    let id = parse_account_id(&id)?;
    let registration = json_body(body)?;
    let profile = state.engine.register_account(id, registration).await?;
    Ok(Json(profile.as_ref().clone()))
}
