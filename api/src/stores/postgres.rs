//! Postgres-backed implementations of the engine's collaborator traits.
//!
//! The idempotency store leans on the `nudge_claims` primary key: the
//! database's unique-violation error (23505) is the lost-race signal, so
//! check-and-insert is atomic without any application-level locking. The
//! outbox lease uses a conditional UPDATE over `FOR UPDATE SKIP LOCKED` so
//! concurrent worker instances never double-attempt one entry.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mentora_core::nudge::UserNudgePreferences;
use mentora_core::outbox::{OutboxEntry, OutboxStatus};

use crate::nudge::{
    ClaimStore, ContactHistoryRow, HistorySource, NewOutboxEntry, OutboxStore, ParticipantRow,
    PreferenceSource, SessionRow, SessionSource, SessionStatus, StoreError, TaskRow, TaskSource,
};

/// Postgres unique-violation SQLSTATE.
const UNIQUE_VIOLATION: &str = "23505";

pub struct PgClaimStore {
    pool: PgPool,
}

impl PgClaimStore {
    pub fn new(pool: PgPool) -> Self {
        PgClaimStore { pool }
    }
}

#[async_trait]
impl ClaimStore for PgClaimStore {
    async fn claim(&self, key: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("INSERT INTO nudge_claims (key) VALUES ($1)")
            .bind(key)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) =>
            {
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn has_claimed(&self, key: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM nudge_claims WHERE key = $1)",
        )
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

/// Internal row type for sqlx mapping
#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: Uuid,
    composite_key: String,
    recipient_id: Uuid,
    rendered_message: String,
    status: String,
    attempts: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    next_attempt_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl OutboxRow {
    fn into_entry(self) -> OutboxEntry {
        OutboxEntry {
            id: self.id,
            composite_key: self.composite_key,
            recipient_id: self.recipient_id,
            rendered_message: self.rendered_message,
            // An unknown status string can only come from manual table
            // edits; treat the entry as inert rather than retryable.
            status: OutboxStatus::parse(&self.status).unwrap_or(OutboxStatus::Failed),
            attempts: self.attempts,
            last_attempt_at: self.last_attempt_at,
            next_attempt_at: self.next_attempt_at,
            created_at: self.created_at,
        }
    }
}

pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        PgOutboxStore { pool }
    }
}

const OUTBOX_COLUMNS: &str = "id, composite_key, recipient_id, rendered_message, status, \
     attempts, last_attempt_at, next_attempt_at, created_at";

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn enqueue(
        &self,
        entry: NewOutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO outbox_entries
                (id, composite_key, recipient_id, rendered_message, status, attempts, next_attempt_at, created_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $5)
            "#,
        )
        .bind(id)
        .bind(&entry.composite_key)
        .bind(entry.recipient_id)
        .bind(&entry.rendered_message)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn lease_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let rows = sqlx::query_as::<_, OutboxRow>(
            r#"
            UPDATE outbox_entries
            SET locked_until = $2
            WHERE id IN (
                SELECT id FROM outbox_entries
                WHERE status = 'pending'
                  AND next_attempt_at <= $1
                  AND (locked_until IS NULL OR locked_until <= $1)
                ORDER BY next_attempt_at
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, composite_key, recipient_id, rendered_message, status,
                      attempts, last_attempt_at, next_attempt_at, created_at
            "#,
        )
        .bind(now)
        .bind(lease_until)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.into_entry()).collect())
    }

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'sent', attempts = attempts + 1, last_attempt_at = $2, locked_until = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_entries
            SET attempts = attempts + 1, last_attempt_at = $2, next_attempt_at = $3, locked_until = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE outbox_entries
            SET status = 'failed', attempts = attempts + 1, last_attempt_at = $2, locked_until = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn manual_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(bool, OutboxStatus)>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let status = sqlx::query_scalar::<_, String>(
            "SELECT status FROM outbox_entries WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(status) = status else {
            return Ok(None);
        };

        if OutboxStatus::parse(&status) == Some(OutboxStatus::Failed) {
            sqlx::query(
                r#"
                UPDATE outbox_entries
                SET status = 'pending', attempts = 0, next_attempt_at = $2, locked_until = NULL
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok(Some((true, OutboxStatus::Pending)))
        } else {
            tx.commit().await?;
            let current = OutboxStatus::parse(&status).unwrap_or(OutboxStatus::Failed);
            Ok(Some((false, current)))
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, StoreError> {
        let row = sqlx::query_as::<_, OutboxRow>(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_entries WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| row.into_entry()))
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        // Ordered by (created_at DESC, id DESC) for stable cursor pagination
        let rows = match (status, cursor) {
            (Some(status), Some((created_at, id))) => {
                sqlx::query_as::<_, OutboxRow>(&format!(
                    r#"
                    SELECT {OUTBOX_COLUMNS} FROM outbox_entries
                    WHERE status = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#
                ))
                .bind(status.as_str())
                .bind(created_at)
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (Some(status), None) => {
                sqlx::query_as::<_, OutboxRow>(&format!(
                    r#"
                    SELECT {OUTBOX_COLUMNS} FROM outbox_entries
                    WHERE status = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#
                ))
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some((created_at, id))) => {
                sqlx::query_as::<_, OutboxRow>(&format!(
                    r#"
                    SELECT {OUTBOX_COLUMNS} FROM outbox_entries
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                ))
                .bind(created_at)
                .bind(id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query_as::<_, OutboxRow>(&format!(
                    r#"
                    SELECT {OUTBOX_COLUMNS} FROM outbox_entries
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#
                ))
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(|row| row.into_entry()).collect())
    }
}

#[derive(sqlx::FromRow)]
struct SessionDbRow {
    id: Uuid,
    title: String,
    organizer_id: Uuid,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    status: String,
    timezone: Option<String>,
}

#[derive(sqlx::FromRow)]
struct ParticipantDbRow {
    session_id: Uuid,
    user_id: Uuid,
    display_name: Option<String>,
    responded: bool,
}

pub struct PgSessionSource {
    pool: PgPool,
}

impl PgSessionSource {
    pub fn new(pool: PgPool) -> Self {
        PgSessionSource { pool }
    }

    async fn load(&self, rows: Vec<SessionDbRow>) -> Result<Vec<SessionRow>, StoreError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let participant_rows = sqlx::query_as::<_, ParticipantDbRow>(
            r#"
            SELECT session_id, user_id, display_name, responded
            FROM session_participants
            WHERE session_id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_session: HashMap<Uuid, Vec<ParticipantRow>> = HashMap::new();
        for row in participant_rows {
            by_session.entry(row.session_id).or_default().push(ParticipantRow {
                user_id: row.user_id,
                display_name: row.display_name,
                responded: row.responded,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let participants = by_session.remove(&row.id).unwrap_or_default();
                SessionRow {
                    id: row.id,
                    title: row.title,
                    organizer_id: row.organizer_id,
                    starts_at: row.starts_at,
                    ends_at: row.ends_at,
                    // Unknown status strings behave like declined: skipped.
                    status: SessionStatus::parse(&row.status)
                        .unwrap_or(SessionStatus::Declined),
                    timezone: row.timezone,
                    participants,
                }
            })
            .collect())
    }
}

const SESSION_COLUMNS: &str = "id, title, organizer_id, starts_at, ends_at, status, timezone";

#[async_trait]
impl SessionSource for PgSessionSource {
    async fn ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let rows = sqlx::query_as::<_, SessionDbRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE ends_at >= $1 AND ends_at <= $2"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        self.load(rows).await
    }

    async fn starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        let rows = sqlx::query_as::<_, SessionDbRow>(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE starts_at >= $1 AND starts_at <= $2"
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        self.load(rows).await
    }
}

#[derive(sqlx::FromRow)]
struct TaskDbRow {
    id: Uuid,
    assignee_id: Uuid,
    title: String,
    due_on: NaiveDate,
}

pub struct PgTaskSource {
    pool: PgPool,
}

impl PgTaskSource {
    pub fn new(pool: PgPool) -> Self {
        PgTaskSource { pool }
    }
}

#[async_trait]
impl TaskSource for PgTaskSource {
    async fn open_due_on_or_before(&self, due_on: NaiveDate) -> Result<Vec<TaskRow>, StoreError> {
        let rows = sqlx::query_as::<_, TaskDbRow>(
            r#"
            SELECT id, assignee_id, title, due_on
            FROM tasks
            WHERE NOT completed AND due_on <= $1
            "#,
        )
        .bind(due_on)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| TaskRow {
                id: row.id,
                assignee_id: row.assignee_id,
                title: row.title,
                due_on: row.due_on,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct ContactHistoryDbRow {
    user_id: Uuid,
    contact_id: Uuid,
    contact_name: Option<String>,
    last_session_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
}

pub struct PgHistorySource {
    pool: PgPool,
}

impl PgHistorySource {
    pub fn new(pool: PgPool) -> Self {
        PgHistorySource { pool }
    }
}

#[async_trait]
impl HistorySource for PgHistorySource {
    async fn stale_contacts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContactHistoryRow>, StoreError> {
        let rows = sqlx::query_as::<_, ContactHistoryDbRow>(
            r#"
            SELECT user_id, contact_id, contact_name, last_session_at, last_message_at
            FROM contact_history
            WHERE last_session_at <= $1
            "#,
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ContactHistoryRow {
                user_id: row.user_id,
                contact_id: row.contact_id,
                contact_name: row.contact_name,
                last_session_at: row.last_session_at,
                last_message_at: row.last_message_at,
            })
            .collect())
    }
}

#[derive(sqlx::FromRow)]
struct PreferencesDbRow {
    user_id: Uuid,
    enabled: bool,
    post_session_notes_enabled: bool,
    long_gap_alerts_enabled: bool,
    unconfirmed_events_enabled: bool,
}

pub struct PgPreferenceSource {
    pool: PgPool,
}

impl PgPreferenceSource {
    pub fn new(pool: PgPool) -> Self {
        PgPreferenceSource { pool }
    }
}

#[async_trait]
impl PreferenceSource for PgPreferenceSource {
    async fn nudge_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<UserNudgePreferences, StoreError> {
        let row = sqlx::query_as::<_, PreferencesDbRow>(
            r#"
            SELECT user_id, enabled, post_session_notes_enabled,
                   long_gap_alerts_enabled, unconfirmed_events_enabled
            FROM user_nudge_preferences
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => UserNudgePreferences {
                user_id: row.user_id,
                enabled: row.enabled,
                post_session_notes_enabled: row.post_session_notes_enabled,
                long_gap_alerts_enabled: row.long_gap_alerts_enabled,
                unconfirmed_events_enabled: row.unconfirmed_events_enabled,
            },
            // No stored row: everything enabled by default.
            None => UserNudgePreferences::defaults_for(user_id),
        })
    }
}
