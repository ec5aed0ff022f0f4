//! The detection pass: scan entity sources, apply window predicates, gate on
//! recipient preferences, claim the composite key, render and enqueue.
//!
//! The order is the core invariant: claim-then-enqueue, never the reverse.
//! Because the claim is atomic and the key deterministic, a pass is safely
//! re-runnable on any schedule — overlapping ticks race on the claim, and
//! exactly one of them enqueues.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use uuid::Uuid;

use mentora_core::content::{self, NudgeContext};
use mentora_core::nudge::{EntityType, NudgeKind, ReminderCandidate};
use mentora_core::windows;

use super::{
    ClaimStore, HistorySource, NewOutboxEntry, OutboxStore, PassSummary, PreferenceSource,
    SessionRow, SessionSource, SessionStatus, TaskSource,
};

/// How far ahead the upcoming-session scan reaches. Matches the outer edge
/// of the 24h detection window.
const UPCOMING_HORIZON_HOURS: i64 = 28;

pub struct Detector {
    sessions: Arc<dyn SessionSource>,
    tasks: Arc<dyn TaskSource>,
    history: Arc<dyn HistorySource>,
    prefs: Arc<dyn PreferenceSource>,
    claims: Arc<dyn ClaimStore>,
    outbox: Arc<dyn OutboxStore>,
}

impl Detector {
    pub fn new(
        sessions: Arc<dyn SessionSource>,
        tasks: Arc<dyn TaskSource>,
        history: Arc<dyn HistorySource>,
        prefs: Arc<dyn PreferenceSource>,
        claims: Arc<dyn ClaimStore>,
        outbox: Arc<dyn OutboxStore>,
    ) -> Self {
        Detector {
            sessions,
            tasks,
            history,
            prefs,
            claims,
            outbox,
        }
    }

    /// Run one detection pass at `now`. Never fails as a whole: a bad
    /// candidate or an unreachable source is logged and skipped, and the
    /// affected candidates are re-evaluated on the next tick since no claim
    /// was taken for them.
    pub async fn run_pass(&self, now: DateTime<Utc>) -> PassSummary {
        let mut summary = PassSummary::default();

        self.scan_recent_endings(now, &mut summary).await;
        self.scan_upcoming_sessions(now, &mut summary).await;
        self.scan_tasks(now, &mut summary).await;
        self.scan_contact_gaps(now, &mut summary).await;

        tracing::info!(
            scanned = summary.scanned,
            window_matches = summary.window_matches,
            suppressed = summary.suppressed_by_preference,
            claim_losses = summary.claim_losses,
            enqueued = summary.enqueued,
            errors = summary.errors,
            "detection pass complete"
        );
        summary
    }

    /// Post-session note prompts for sessions that ended within the last 2h.
    async fn scan_recent_endings(&self, now: DateTime<Utc>, summary: &mut PassSummary) {
        let rows = match self
            .sessions
            .ended_between(now - Duration::hours(2), now)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "session source unreachable; skipping ended-session scan");
                summary.errors += 1;
                return;
            }
        };

        for session in rows {
            summary.scanned += 1;
            if session.status == SessionStatus::Declined {
                continue;
            }
            if !windows::is_recent_session_end(session.ends_at, now) {
                continue;
            }
            let candidate = ReminderCandidate {
                entity_type: EntityType::Event,
                entity_id: session.id.to_string(),
                recipient_id: session.organizer_id,
                kind: NudgeKind::PostSessionNote,
                occurs_at: session.ends_at,
                context: session_context(&session, session.ends_at, session.organizer_id),
            };
            self.emit(candidate, now, summary).await;
        }
    }

    /// 24h / 2h reminders and unconfirmed-session nudges.
    async fn scan_upcoming_sessions(&self, now: DateTime<Utc>, summary: &mut PassSummary) {
        let rows = match self
            .sessions
            .starting_between(now, now + Duration::hours(UPCOMING_HORIZON_HOURS))
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "session source unreachable; skipping upcoming-session scan");
                summary.errors += 1;
                return;
            }
        };

        for session in rows {
            summary.scanned += 1;
            if session.status == SessionStatus::Declined {
                continue;
            }

            if windows::is_within_24h_window(session.starts_at, now) {
                for recipient in session_recipients(&session) {
                    let candidate = ReminderCandidate {
                        entity_type: EntityType::Event,
                        entity_id: session.id.to_string(),
                        recipient_id: recipient,
                        kind: NudgeKind::Before24h,
                        occurs_at: session.starts_at,
                        context: session_context(&session, session.starts_at, recipient),
                    };
                    self.emit(candidate, now, summary).await;
                }

                // Unconfirmed nudge goes to the organizer only, and only
                // while someone still has not responded.
                if session.participants.iter().any(|p| !p.responded) {
                    let candidate = ReminderCandidate {
                        entity_type: EntityType::Event,
                        entity_id: session.id.to_string(),
                        recipient_id: session.organizer_id,
                        kind: NudgeKind::Unconfirmed24h,
                        occurs_at: session.starts_at,
                        context: session_context(&session, session.starts_at, session.organizer_id),
                    };
                    self.emit(candidate, now, summary).await;
                }
            }

            if windows::is_within_2h_window(session.starts_at, now) {
                for recipient in session_recipients(&session) {
                    let candidate = ReminderCandidate {
                        entity_type: EntityType::Event,
                        entity_id: session.id.to_string(),
                        recipient_id: recipient,
                        kind: NudgeKind::Before2h,
                        occurs_at: session.starts_at,
                        context: session_context(&session, session.starts_at, recipient),
                    };
                    self.emit(candidate, now, summary).await;
                }
            }
        }
    }

    /// Due-today and overdue nudges for open tasks.
    async fn scan_tasks(&self, now: DateTime<Utc>, summary: &mut PassSummary) {
        let rows = match self.tasks.open_due_on_or_before(now.date_naive()).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "task source unreachable; skipping task scan");
                summary.errors += 1;
                return;
            }
        };

        for task in rows {
            summary.scanned += 1;
            let kind = if windows::is_due_today(task.due_on, now) {
                NudgeKind::TaskDueToday
            } else if windows::is_overdue(task.due_on, now) {
                NudgeKind::TaskOverdue
            } else {
                continue;
            };

            let occurs_at = task
                .due_on
                .and_hms_opt(0, 0, 0)
                .map(|naive| naive.and_utc())
                .unwrap_or(now);
            let candidate = ReminderCandidate {
                entity_type: EntityType::Task,
                entity_id: task.id.to_string(),
                recipient_id: task.assignee_id,
                kind,
                occurs_at,
                context: NudgeContext {
                    task_title: Some(task.title.clone()),
                    due_on: Some(task.due_on),
                    ..NudgeContext::default()
                },
            };
            self.emit(candidate, now, summary).await;
        }
    }

    /// Long-gap alerts for contact pairs without a recent session. A pair
    /// that is actively chatting is left alone even when the session gap is
    /// long.
    async fn scan_contact_gaps(&self, now: DateTime<Utc>, summary: &mut PassSummary) {
        let rows = match self
            .history
            .stale_contacts(now - Duration::days(14))
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                tracing::warn!(error = %err, "contact history unreachable; skipping gap scan");
                summary.errors += 1;
                return;
            }
        };

        for contact in rows {
            summary.scanned += 1;
            if !windows::is_long_gap(contact.last_session_at, now) {
                continue;
            }
            if let Some(last_message_at) = contact.last_message_at {
                if !windows::is_inactive_conversation(last_message_at, now) {
                    continue;
                }
            }

            let days_since = (now - contact.last_session_at).num_days();
            let candidate = ReminderCandidate {
                entity_type: EntityType::Contact,
                entity_id: contact.contact_id.to_string(),
                recipient_id: contact.user_id,
                kind: NudgeKind::LongGapAlert,
                occurs_at: contact.last_session_at,
                context: NudgeContext {
                    contact_name: contact.contact_name.clone(),
                    days_since: Some(days_since),
                    ..NudgeContext::default()
                },
            };
            self.emit(candidate, now, summary).await;
        }
    }

    /// Preference gate -> atomic claim -> render -> enqueue, in that order.
    async fn emit(
        &self,
        candidate: ReminderCandidate,
        now: DateTime<Utc>,
        summary: &mut PassSummary,
    ) {
        summary.window_matches += 1;

        let prefs = match self.prefs.nudge_preferences(candidate.recipient_id).await {
            Ok(prefs) => prefs,
            Err(err) => {
                tracing::warn!(
                    recipient = %candidate.recipient_id,
                    kind = candidate.kind.as_str(),
                    error = %err,
                    "preference lookup failed; skipping candidate for this pass"
                );
                summary.errors += 1;
                return;
            }
        };
        if !prefs.allows(candidate.kind) {
            summary.suppressed_by_preference += 1;
            return;
        }

        let key = candidate.composite_key();
        match self.claims.claim(&key).await {
            // Claim won: this pass now exclusively owns the notification.
            Ok(true) => {}
            // Lost the race or a prior pass already produced it. Normal.
            Ok(false) => {
                summary.claim_losses += 1;
                return;
            }
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "claim failed; candidate will be re-evaluated next tick");
                summary.errors += 1;
                return;
            }
        }

        let message = content::render(candidate.kind, &candidate.context);
        let entry = NewOutboxEntry {
            composite_key: key.clone(),
            recipient_id: candidate.recipient_id,
            rendered_message: message,
        };
        match self.outbox.enqueue(entry, now).await {
            Ok(_) => summary.enqueued += 1,
            Err(err) => {
                // The claim is already taken and is deliberately not rolled
                // back: a missed nudge beats a duplicate send.
                tracing::error!(key = %key, error = %err, "claim taken but outbox enqueue failed; nudge will not be delivered");
                summary.errors += 1;
            }
        }
    }
}

/// Organizer plus every participant, deduplicated.
fn session_recipients(session: &SessionRow) -> Vec<Uuid> {
    let mut seen = BTreeSet::new();
    let mut recipients = Vec::new();
    for user_id in std::iter::once(session.organizer_id)
        .chain(session.participants.iter().map(|p| p.user_id))
    {
        if seen.insert(user_id) {
            recipients.push(user_id);
        }
    }
    recipients
}

/// Template context for a session-anchored nudge. The contact name is the
/// first named participant other than the recipient — nobody is reminded
/// of a session "with" themselves.
fn session_context(session: &SessionRow, event_at: DateTime<Utc>, recipient: Uuid) -> NudgeContext {
    let contact_name = session
        .participants
        .iter()
        .filter(|p| p.user_id != recipient)
        .find_map(|p| p.display_name.clone());
    let timezone = session
        .timezone
        .as_deref()
        .and_then(|tz| tz.parse::<Tz>().ok());

    NudgeContext {
        session_title: Some(session.title.clone()),
        contact_name,
        event_at: Some(event_at),
        timezone,
        ..NudgeContext::default()
    }
}
