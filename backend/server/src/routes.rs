use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State, rejection::QueryRejection},
};
use chrono::Utc;
use tracing::{debug, error};

use crate::{
    error::AppError,
    state::AppState,
    user::{UserPatch, UserRecord},
    utils::{UserQuery, get_submission},
};

pub async fn user_handler(
    State(state): State<Arc<AppState>>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<UserRecord>, AppError> {
    let Query(query) = query.map_err(|e| AppError::MalformedPayload(e.body_text()))?;
    let telegram_id = query.telegram_id.ok_or(AppError::NotFound)?;

    let user = state
        .users
        .find_by_telegram_id(&telegram_id)
        .await
        .map_err(|e| {
            error!(%telegram_id, "Failed to fetch user: {e}");
            e
        })?
        .ok_or(AppError::NotFound)?;

    Ok(Json(user))
}

pub async fn clicks_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<UserRecord>, AppError> {
    let submission = get_submission(body)?;

    let patch = UserPatch::clicks(submission.name, submission.clicks, Utc::now());

    let user = state
        .users
        .create_or_update(&submission.telegram_id, patch)
        .await
        .map_err(|e| {
            error!(telegram_id = %submission.telegram_id, "Failed to record clicks: {e}");
            e
        })?;

    debug!(
        telegram_id = %user.telegram_id,
        clicks = submission.clicks,
        current_clicks = user.current_clicks,
        "Recorded clicks"
    );

    Ok(Json(user))
}
