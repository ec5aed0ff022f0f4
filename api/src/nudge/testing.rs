//! In-memory collaborators for engine tests. These mirror the Postgres
//! implementations' contracts (including lease and unique-key semantics)
//! without needing a database.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use mentora_core::nudge::UserNudgePreferences;
use mentora_core::outbox::{OutboxEntry, OutboxStatus};

use super::{
    ClaimStore, ContactHistoryRow, HistorySource, NewOutboxEntry, NotificationSender,
    OutboxStore, ParticipantRow, PreferenceSource, SendError, SessionRow, SessionSource,
    SessionStatus, StoreError, TaskRow, TaskSource,
};

/// A confirmed one-hour session ending at `ends_at`.
pub fn session_ending(
    title: &str,
    organizer: Uuid,
    ends_at: DateTime<Utc>,
    participants: Vec<ParticipantRow>,
) -> SessionRow {
    SessionRow {
        id: Uuid::now_v7(),
        title: title.to_string(),
        organizer_id: organizer,
        starts_at: ends_at - Duration::hours(1),
        ends_at,
        status: SessionStatus::Confirmed,
        timezone: None,
        participants,
    }
}

/// A pending one-hour session starting at `starts_at`.
pub fn session_starting(
    title: &str,
    organizer: Uuid,
    starts_at: DateTime<Utc>,
    participants: Vec<ParticipantRow>,
) -> SessionRow {
    SessionRow {
        id: Uuid::now_v7(),
        title: title.to_string(),
        organizer_id: organizer,
        starts_at,
        ends_at: starts_at + Duration::hours(1),
        status: SessionStatus::Pending,
        timezone: None,
        participants,
    }
}

#[derive(Default)]
pub struct MemSessions {
    rows: Mutex<Vec<SessionRow>>,
}

impl MemSessions {
    pub fn push(&self, row: SessionRow) {
        self.rows.lock().unwrap().push(row);
    }
}

#[async_trait]
impl SessionSource for MemSessions {
    async fn ended_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.ends_at >= from && s.ends_at <= to)
            .cloned()
            .collect())
    }

    async fn starting_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.starts_at >= from && s.starts_at <= to)
            .cloned()
            .collect())
    }
}

/// A session source whose backend is down.
pub struct FailingSessions;

#[async_trait]
impl SessionSource for FailingSessions {
    async fn ended_between(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }

    async fn starting_between(
        &self,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<SessionRow>, StoreError> {
        Err(StoreError::Backend("connection refused".to_string()))
    }
}

#[derive(Default)]
pub struct MemTasks {
    rows: Mutex<Vec<TaskRow>>,
}

impl MemTasks {
    pub fn push(&self, row: TaskRow) {
        self.rows.lock().unwrap().push(row);
    }
}

#[async_trait]
impl TaskSource for MemTasks {
    async fn open_due_on_or_before(&self, due_on: NaiveDate) -> Result<Vec<TaskRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.due_on <= due_on)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemHistory {
    rows: Mutex<Vec<ContactHistoryRow>>,
}

impl MemHistory {
    pub fn push(&self, row: ContactHistoryRow) {
        self.rows.lock().unwrap().push(row);
    }
}

#[async_trait]
impl HistorySource for MemHistory {
    async fn stale_contacts(
        &self,
        before: DateTime<Utc>,
    ) -> Result<Vec<ContactHistoryRow>, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.last_session_at <= before)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct MemPrefs {
    rows: Mutex<HashMap<Uuid, UserNudgePreferences>>,
}

impl MemPrefs {
    pub fn set(&self, prefs: UserNudgePreferences) {
        self.rows.lock().unwrap().insert(prefs.user_id, prefs);
    }
}

#[async_trait]
impl PreferenceSource for MemPrefs {
    async fn nudge_preferences(
        &self,
        user_id: Uuid,
    ) -> Result<UserNudgePreferences, StoreError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| UserNudgePreferences::defaults_for(user_id)))
    }
}

#[derive(Default)]
pub struct MemClaims {
    keys: Mutex<HashSet<String>>,
}

impl MemClaims {
    pub fn preclaim(&self, key: &str) {
        self.keys.lock().unwrap().insert(key.to_string());
    }

    pub fn snapshot(&self) -> HashSet<String> {
        self.keys.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClaimStore for MemClaims {
    async fn claim(&self, key: &str) -> Result<bool, StoreError> {
        // HashSet::insert is the check-and-insert under one lock, matching
        // the unique-constraint insert the Postgres store relies on.
        Ok(self.keys.lock().unwrap().insert(key.to_string()))
    }

    async fn has_claimed(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.keys.lock().unwrap().contains(key))
    }
}

struct MemOutboxEntry {
    entry: OutboxEntry,
    locked_until: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemOutbox {
    entries: Mutex<Vec<MemOutboxEntry>>,
}

impl MemOutbox {
    pub fn snapshot(&self) -> Vec<OutboxEntry> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.entry.clone())
            .collect()
    }
}

#[async_trait]
impl OutboxStore for MemOutbox {
    async fn enqueue(
        &self,
        entry: NewOutboxEntry,
        now: DateTime<Utc>,
    ) -> Result<Uuid, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if entries
            .iter()
            .any(|e| e.entry.composite_key == entry.composite_key)
        {
            return Err(StoreError::Backend(
                "duplicate composite_key".to_string(),
            ));
        }
        let id = Uuid::now_v7();
        entries.push(MemOutboxEntry {
            entry: OutboxEntry {
                id,
                composite_key: entry.composite_key,
                recipient_id: entry.recipient_id,
                rendered_message: entry.rendered_message,
                status: OutboxStatus::Pending,
                attempts: 0,
                last_attempt_at: None,
                next_attempt_at: now,
                created_at: now,
            },
            locked_until: None,
        });
        Ok(id)
    }

    async fn lease_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let mut leased = Vec::new();
        for stored in entries.iter_mut() {
            if leased.len() as i64 >= limit {
                break;
            }
            let lock_free = stored.locked_until.is_none_or(|until| until <= now);
            if stored.entry.status == OutboxStatus::Pending
                && stored.entry.next_attempt_at <= now
                && lock_free
            {
                stored.locked_until = Some(lease_until);
                leased.push(stored.entry.clone());
            }
        }
        Ok(leased)
    }

    async fn mark_sent(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.entry.id == id) {
            Some(stored) if stored.entry.status == OutboxStatus::Pending => {
                stored.entry.status = OutboxStatus::Sent;
                stored.entry.attempts += 1;
                stored.entry.last_attempt_at = Some(now);
                stored.locked_until = None;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Ok(false),
        }
    }

    async fn reschedule(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(stored) = entries
            .iter_mut()
            .find(|e| e.entry.id == id && e.entry.status == OutboxStatus::Pending)
        {
            stored.entry.attempts += 1;
            stored.entry.last_attempt_at = Some(now);
            stored.entry.next_attempt_at = next_attempt_at;
            stored.locked_until = None;
        }
        Ok(())
    }

    async fn park_failed(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap();
        if let Some(stored) = entries
            .iter_mut()
            .find(|e| e.entry.id == id && e.entry.status == OutboxStatus::Pending)
        {
            stored.entry.attempts += 1;
            stored.entry.last_attempt_at = Some(now);
            stored.entry.status = OutboxStatus::Failed;
            stored.locked_until = None;
        }
        Ok(())
    }

    async fn manual_retry(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<(bool, OutboxStatus)>, StoreError> {
        let mut entries = self.entries.lock().unwrap();
        let Some(stored) = entries.iter_mut().find(|e| e.entry.id == id) else {
            return Ok(None);
        };
        if stored.entry.status == OutboxStatus::Failed {
            stored.entry.status = OutboxStatus::Pending;
            stored.entry.attempts = 0;
            stored.entry.next_attempt_at = now;
            stored.locked_until = None;
            Ok(Some((true, OutboxStatus::Pending)))
        } else {
            Ok(Some((false, stored.entry.status)))
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, StoreError> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.entry.id == id)
            .map(|e| e.entry.clone()))
    }

    async fn list(
        &self,
        status: Option<OutboxStatus>,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        limit: i64,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let mut rows: Vec<OutboxEntry> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.entry.clone())
            .filter(|e| status.is_none_or(|s| e.status == s))
            .filter(|e| {
                cursor.is_none_or(|(created_at, id)| {
                    (e.created_at, e.id) < (created_at, id)
                })
            })
            .collect();
        rows.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        rows.truncate(limit as usize);
        Ok(rows)
    }
}

/// Fails the first `failures` sends, then succeeds, recording deliveries.
pub struct ScriptedSender {
    failures_remaining: Mutex<u32>,
    sent: Mutex<Vec<(Uuid, String)>>,
}

impl ScriptedSender {
    pub fn new(failures: u32) -> Self {
        ScriptedSender {
            failures_remaining: Mutex::new(failures),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<(Uuid, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for ScriptedSender {
    async fn send(&self, recipient_id: Uuid, message: &str) -> Result<(), SendError> {
        let mut remaining = self.failures_remaining.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(SendError("simulated transport failure".to_string()));
        }
        drop(remaining);
        self.sent
            .lock()
            .unwrap()
            .push((recipient_id, message.to_string()));
        Ok(())
    }
}

mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn claim_returns_true_then_false_for_the_same_key() {
        let claims = MemClaims::default();
        assert!(claims.claim("event_evt123_user456_24h_before").await.unwrap());
        assert!(!claims.claim("event_evt123_user456_24h_before").await.unwrap());

        assert!(claims.has_claimed("event_evt123_user456_24h_before").await.unwrap());
        assert!(!claims.has_claimed("event_evt999_user456_24h_before").await.unwrap());
    }

    #[tokio::test]
    async fn claims_for_distinct_keys_are_independent() {
        let claims = MemClaims::default();
        // Differing entity, recipient or kind each yield an independent key.
        assert!(claims.claim("event_e1_u1_24h_before").await.unwrap());
        assert!(claims.claim("event_e1_u2_24h_before").await.unwrap());
        assert!(claims.claim("event_e2_u1_24h_before").await.unwrap());
        assert!(claims.claim("event_e1_u1_2h_before").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_claims_on_one_key_produce_exactly_one_winner() {
        let claims = Arc::new(MemClaims::default());
        let mut racers = tokio::task::JoinSet::new();
        for _ in 0..16 {
            let claims = claims.clone();
            racers.spawn(async move { claims.claim("event_e1_u1_2h_before").await.unwrap() });
        }

        let mut winners = 0;
        while let Some(won) = racers.join_next().await {
            if won.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
