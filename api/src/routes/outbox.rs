use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mentora_core::error::ApiError;
use mentora_core::outbox::{OutboxEntry, OutboxStatus, PaginatedResponse};

use crate::auth::require_admin;
use crate::error::AppError;
use crate::nudge::OutboxStore;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/outbox", get(list_outbox))
        .route("/v1/outbox/{id}", get(get_entry))
        .route("/v1/outbox/{id}/retry", post(retry_entry))
}

/// Query parameters for listing outbox entries
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListOutboxParams {
    /// Filter by status ("pending", "sent", "failed")
    #[serde(default)]
    pub status: Option<String>,
    /// Maximum number of entries to return (default 50, max 200)
    #[serde(default)]
    pub limit: Option<i64>,
    /// Cursor for pagination (opaque string from previous response's next_cursor)
    #[serde(default)]
    pub cursor: Option<String>,
}

/// Result of a manual retry request
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RetryResponse {
    pub id: Uuid,
    /// Whether the entry was re-armed. False when the entry was not in the
    /// `failed` state (pending entries are already in flight; sent entries
    /// are never resent).
    pub retried: bool,
    /// Entry status after the request
    pub status: OutboxStatus,
}

/// List outbox entries with cursor-based pagination
///
/// Returns entries ordered by creation time descending (newest first).
/// Read-only observability surface for operators and admin tooling.
#[utoipa::path(
    get,
    path = "/v1/outbox",
    params(
        ListOutboxParams,
        ("x-admin-token" = Option<String>, Header, description = "Operator token (required when MENTORA_ADMIN_TOKEN is set)")
    ),
    responses(
        (status = 200, description = "Paginated list of outbox entries", body = PaginatedResponse<OutboxEntry>),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    tag = "outbox"
)]
pub async fn list_outbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListOutboxParams>,
) -> Result<Json<PaginatedResponse<OutboxEntry>>, AppError> {
    require_admin(state.admin_token.as_deref(), &headers)?;

    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(OutboxStatus::parse(raw).ok_or_else(|| AppError::Validation {
            message: format!("'{}' is not a valid outbox status", raw),
            field: Some("status".to_string()),
            received: Some(serde_json::Value::String(raw.to_string())),
            docs_hint: Some("Use one of: pending, sent, failed".to_string()),
        })?),
    };

    let limit = params.limit.unwrap_or(50).clamp(1, 200);
    let cursor = match params.cursor.as_deref() {
        Some(raw) => Some(decode_cursor(raw)?),
        None => None,
    };

    // Fetch one extra to determine has_more
    let mut entries = state.outbox.list(status, cursor, limit + 1).await?;
    let has_more = entries.len() as i64 > limit;
    entries.truncate(limit as usize);

    let next_cursor = if has_more {
        entries.last().map(|e| encode_cursor(&e.created_at, &e.id))
    } else {
        None
    };

    Ok(Json(PaginatedResponse {
        data: entries,
        next_cursor,
        has_more,
    }))
}

/// Fetch a single outbox entry
#[utoipa::path(
    get,
    path = "/v1/outbox/{id}",
    params(
        ("id" = Uuid, Path, description = "Outbox entry id"),
        ("x-admin-token" = Option<String>, Header, description = "Operator token (required when MENTORA_ADMIN_TOKEN is set)")
    ),
    responses(
        (status = 200, description = "Outbox entry", body = OutboxEntry),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Entry not found", body = ApiError)
    ),
    tag = "outbox"
)]
pub async fn get_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<OutboxEntry>, AppError> {
    require_admin(state.admin_token.as_deref(), &headers)?;

    match state.outbox.get(id).await? {
        Some(entry) => Ok(Json(entry)),
        None => Err(AppError::NotFound {
            resource: format!("outbox entry {}", id),
        }),
    }
}

/// Manually retry a failed outbox entry
///
/// Only valid on `failed` entries: the entry returns to `pending` with a
/// fresh attempt budget and is picked up by the next worker sweep. On
/// `pending` and `sent` entries this is a no-op (retried = false) — a
/// delivered message is never resent.
#[utoipa::path(
    post,
    path = "/v1/outbox/{id}/retry",
    params(
        ("id" = Uuid, Path, description = "Outbox entry id"),
        ("x-admin-token" = Option<String>, Header, description = "Operator token (required when MENTORA_ADMIN_TOKEN is set)")
    ),
    responses(
        (status = 200, description = "Retry outcome", body = RetryResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Entry not found", body = ApiError)
    ),
    tag = "outbox"
)]
pub async fn retry_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<RetryResponse>, AppError> {
    require_admin(state.admin_token.as_deref(), &headers)?;

    match state.outbox.manual_retry(id, Utc::now()).await? {
        Some((retried, status)) => Ok(Json(RetryResponse {
            id,
            retried,
            status,
        })),
        None => Err(AppError::NotFound {
            resource: format!("outbox entry {}", id),
        }),
    }
}

/// Cursor is base64("created_at\0id") — opaque to the client, stable for
/// pagination
fn encode_cursor(created_at: &DateTime<Utc>, id: &Uuid) -> String {
    use base64::Engine;
    let raw = format!("{}\0{}", created_at.to_rfc3339(), id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, Uuid), AppError> {
    use base64::Engine;

    let invalid = |message: &str| AppError::Validation {
        message: message.to_string(),
        field: Some("cursor".to_string()),
        received: Some(serde_json::Value::String(cursor.to_string())),
        docs_hint: Some("Use the next_cursor value from a previous response".to_string()),
    };

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("Invalid cursor format"))?;
    let s = String::from_utf8(bytes).map_err(|_| invalid("Invalid cursor encoding"))?;

    let parts: Vec<&str> = s.splitn(2, '\0').collect();
    if parts.len() != 2 {
        return Err(invalid("Invalid cursor structure"));
    }

    let created_at = DateTime::parse_from_rfc3339(parts[0])
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid("Invalid cursor timestamp"))?;
    let id = Uuid::parse_str(parts[1]).map_err(|_| invalid("Invalid cursor id"))?;

    Ok((created_at, id))
}
