//! Outbox entry model and the delivery state machine.
//!
//! An entry is the durable record of one intended notification. It is
//! created only after the idempotency claim for its composite key succeeded
//! (claim-then-enqueue), so at most one entry can ever exist per key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Delivery attempts budget. Reaching it parks the entry as `failed`;
/// only an explicit manual retry re-arms it.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 3;

/// Backoff delay in milliseconds before retry `n` (1-based): 1s, 2s, then
/// capped at 4s for every further retry.
pub fn retry_delay_ms(retry: u32) -> u64 {
    let exponent = retry.max(1) - 1;
    1000u64
        .checked_shl(exponent)
        .map_or(4000, |delay| delay.min(4000))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    /// Awaiting a delivery attempt (fresh, or rescheduled after a failure)
    Pending,
    /// Delivery confirmed. Terminal — no code path leaves this state.
    Sent,
    /// Attempts exhausted. Inert until an operator manually retries.
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Sent => "sent",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OutboxStatus::Pending),
            "sent" => Some(OutboxStatus::Sent),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }
}

/// One durable delivery record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OutboxEntry {
    pub id: Uuid,
    /// The idempotency key this entry was enqueued under
    pub composite_key: String,
    pub recipient_id: Uuid,
    pub rendered_message: String,
    pub status: OutboxStatus,
    /// Delivery attempts made so far
    pub attempts: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// When the next attempt becomes due (equals created_at for a fresh entry)
    pub next_attempt_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Pure state decision after one delivery attempt has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Delivery confirmed; the entry is terminally `sent`.
    Sent,
    /// Attempt failed with budget left; retry after the given delay.
    Retry { delay_ms: u64 },
    /// Attempt failed and the budget is exhausted; the entry parks as `failed`.
    Exhausted,
}

/// Decide the transition after attempt number `attempts_made` (the 1-based
/// count of attempts including the one that just finished).
pub fn attempt_outcome(attempts_made: i32, delivered: bool) -> AttemptOutcome {
    if delivered {
        return AttemptOutcome::Sent;
    }
    if attempts_made >= MAX_DELIVERY_ATTEMPTS {
        AttemptOutcome::Exhausted
    } else {
        AttemptOutcome::Retry {
            delay_ms: retry_delay_ms(attempts_made as u32),
        }
    }
}

/// Manual retry is only meaningful on `failed` entries. On `pending` the
/// entry is already in flight; on `sent` the message must never be resent.
pub fn manual_retry_allowed(status: OutboxStatus) -> bool {
    matches!(status, OutboxStatus::Failed)
}

/// Cursor-based pagination envelope shared by list endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct PaginatedResponse<T: Serialize> {
    pub data: Vec<T>,
    /// Cursor for the next page. None if this is the last page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    /// Whether there are more results after this page
    pub has_more: bool,
}
