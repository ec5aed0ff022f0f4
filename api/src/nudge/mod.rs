//! The nudge engine: entity-source seams, the detector and the outbox worker.
//!
//! Everything upstream of the engine (sessions, tasks, contact history,
//! preferences) and everything downstream (the notification transport) is an
//! abstract collaborator behind a trait. The engine itself only decides
//! whether a notification is due, whether it was already produced, and how a
//! failed delivery is retried.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use mentora_core::nudge::UserNudgePreferences;
use mentora_core::outbox::{OutboxEntry, OutboxStatus};

pub mod detector;
pub mod sender;
#[cfg(test)]
pub mod testing;
pub mod worker;

/// Errors crossing a store/source boundary. Implementations map their
/// backend errors into this; the engine logs and skips, it never crashes
/// a pass over one bad collaborator call.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A delivery attempt that did not go through. A value, not a panic —
/// failure feeds the retry state machine.
#[derive(Debug, thiserror::Error)]
#[error("delivery failed: {0}")]
pub struct SendError(pub String);

/// Scheduling status of a session, as reported by the session store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Confirmed,
    Declined,
}

impl SessionStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SessionStatus::Pending),
            "confirmed" => Some(SessionStatus::Confirmed),
            "declined" => Some(SessionStatus::Declined),
            _ => None,
        }
    }
}

/// A scheduled session as seen by the detector.
#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: Uuid,
    pub title: String,
    pub organizer_id: Uuid,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SessionStatus,
    /// IANA timezone the session was scheduled in, when known
    pub timezone: Option<String>,
    pub participants: Vec<ParticipantRow>,
}

#[derive(Debug, Clone)]
pub struct ParticipantRow {
    pub user_id: Uuid,
    pub display_name: Option<String>,
    /// Whether this participant has responded to the invitation
    pub responded: bool,
}

/// An open task with a due date.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: Uuid,
    pub assignee_id: Uuid,
    pub title: String,
    pub due_on: NaiveDate,
}

/// Last-session / last-message read model for one (user, contact) pair.
#[derive(Debug, Clone)]
pub struct ContactHistoryRow {
    pub user_id: Uuid,
    pub contact_id: Uuid,
    pub contact_name: Option<String>,
    pub last_session_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Sessions whose end instant falls inside `[from, to]`.
    async fn ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError>;

    /// Sessions whose start instant falls inside `[from, to]`.
    async fn starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError>;
}

#[async_trait]
pub trait TaskSource: Send + Sync {
    /// Open (not completed) tasks due on or before the given date.
    async fn open_due_on_or_before(&self, due_on: NaiveDate) -> Result<Vec<TaskRow>, StoreError>;
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Contact pairs whose last session predates `before`. The detector
    /// still applies the exact gap predicate to every row.
    async fn stale_contacts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContactHistoryRow>, StoreError>;
}

#[async_trait]
pub trait PreferenceSource: Send + Sync {
    /// Preferences for one user; users without a stored row get defaults.
    async fn nudge_preferences(&self, user_id: Uuid)
        -> Result<UserNudgePreferences, StoreError>;
}

/// The idempotency store. `claim` is the single correctness-critical
/// primitive of the engine: check-and-insert must be atomic under
/// concurrent callers, so two racing detection passes can never both win
/// the same key.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Atomic create-if-absent. `true` means the caller now exclusively
    /// owns producing this notification; `false` means another pass or
    /// worker already owns it (a normal, silent skip — not an error).
    async fn claim(&self, key: &str) -> Result<bool, StoreError>;

    /// Non-mutating existence check, usable for idempotent re-scans.
    async fn has_claimed(&self, key: &str) -> Result<bool, StoreError>;
}

/// Fields the detector supplies when persisting a fresh outbox entry.
#[derive(Debug, Clone)]
pub struct NewOutboxEntry {
    pub composite_key: String,
    pub recipient_id: Uuid,
    pub rendered_message: String,
}

#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a fresh `pending` entry, immediately due.
    async fn enqueue(&self, entry: NewOutboxEntry, now: DateTime<Utc>)
        -> Result<Uuid, StoreError>;

    /// Lease up to `limit` due pending entries until `lease_until`, so a
    /// horizontally scaled worker fleet cannot double-attempt an entry.
    async fn lease_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// `pending` -> `sent`. Returns false if the entry was not pending
    /// (e.g. already sent) — the caller must treat that as a no-op.
    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Record a failed attempt with budget left: bump the attempt count and
    /// reschedule the entry for `next_attempt_at`.
    async fn reschedule(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Record a final failed attempt: bump the attempt count and park the
    /// entry as `failed`.
    async fn park_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Operator-invoked `failed` -> `pending`, resetting the attempt budget
    /// and making the entry immediately due. Returns `None` when the id is
    /// unknown, otherwise `(retried, current_status)` — `retried` is false
    /// on `pending` and `sent` entries, which are left untouched.
    async fn manual_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(bool, OutboxStatus)>, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, StoreError>;

    /// Entries newest-first, optionally filtered by status, starting after
    /// the `(created_at, id)` cursor when given.
    async fn list(
        &self,
        status: Option<OutboxStatus>,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError>;
}

/// The notification transport. Opaque: the engine does not know or care
/// whether delivery is push, email or in-app.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, recipient_id: Uuid, message: &str) -> Result<(), SendError>;
}

/// Counters from one detection pass.
#[derive(Debug, Default, Clone, Serialize, ToSchema)]
pub struct PassSummary {
    /// Candidate entities examined across all sources
    pub scanned: u32,
    /// Candidates inside their detection window
    pub window_matches: u32,
    /// Window matches dropped by the recipient's preference gate
    pub suppressed_by_preference: u32,
    /// Window matches whose composite key was already claimed
    pub claim_losses: u32,
    /// Fresh outbox entries persisted this pass
    pub enqueued: u32,
    /// Candidates skipped because a collaborator call failed
    pub errors: u32,
}
