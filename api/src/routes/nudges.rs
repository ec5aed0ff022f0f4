use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use mentora_core::error::ApiError;

use crate::auth::require_admin;
use crate::error::AppError;
use crate::nudge::PassSummary;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/nudges/run-pass", post(run_pass))
}

/// Run one detection pass now
///
/// Idempotent by construction: the atomic composite-key claim means
/// re-running over the same data cannot produce duplicate nudges, so this
/// is safe to invoke on any schedule or manually alongside the periodic
/// tick.
#[utoipa::path(
    post,
    path = "/v1/nudges/run-pass",
    responses(
        (status = 200, description = "Detection pass summary", body = PassSummary),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    params(
        ("x-admin-token" = Option<String>, Header, description = "Operator token (required when MENTORA_ADMIN_TOKEN is set)")
    ),
    tag = "nudges"
)]
pub async fn run_pass(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<PassSummary>, AppError> {
    require_admin(state.admin_token.as_deref(), &headers)?;

    let summary = state.detector.run_pass(Utc::now()).await;
    Ok(Json(summary))
}
