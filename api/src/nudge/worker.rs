//! The outbox worker: lease due entries, attempt delivery, record the
//! resulting transition.
//!
//! Retry scheduling is durable — a failed attempt bumps the attempt count
//! and moves `next_attempt_at` forward — so a crashed worker resumes from
//! persisted state instead of in-memory intent. Entries are processed
//! independently and concurrently; the per-entry lease keeps a horizontally
//! scaled fleet from double-attempting one entry.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinSet;

use mentora_core::outbox::{AttemptOutcome, OutboxEntry, attempt_outcome};

use super::{NotificationSender, OutboxStore};

/// How long a leased entry stays invisible to other workers. Generous
/// compared to a delivery attempt; an expired lease simply re-surfaces the
/// entry on a later sweep.
pub const LEASE_SECONDS: i64 = 60;

/// Entries leased per sweep.
const SWEEP_BATCH: i64 = 32;

/// Counters from one outbox sweep.
#[derive(Debug, Default, Clone)]
pub struct SweepSummary {
    pub attempted: u32,
    pub sent: u32,
    pub rescheduled: u32,
    pub exhausted: u32,
    pub errors: u32,
}

enum AttemptResult {
    Sent,
    Rescheduled,
    Exhausted,
    Error,
}

pub struct OutboxWorker {
    outbox: Arc<dyn OutboxStore>,
    sender: Arc<dyn NotificationSender>,
}

impl OutboxWorker {
    pub fn new(outbox: Arc<dyn OutboxStore>, sender: Arc<dyn NotificationSender>) -> Self {
        OutboxWorker { outbox, sender }
    }

    /// Attempt delivery for every due pending entry.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepSummary {
        let lease_until = now + Duration::seconds(LEASE_SECONDS);
        let due = match self.outbox.lease_due(now, lease_until, SWEEP_BATCH).await {
            Ok(due) => due,
            Err(err) => {
                tracing::warn!(error = %err, "outbox lease failed; skipping sweep");
                return SweepSummary {
                    errors: 1,
                    ..SweepSummary::default()
                };
            }
        };

        let mut summary = SweepSummary {
            attempted: due.len() as u32,
            ..SweepSummary::default()
        };

        let mut attempts = JoinSet::new();
        for entry in due {
            let outbox = self.outbox.clone();
            let sender = self.sender.clone();
            attempts.spawn(async move { attempt_delivery(outbox, sender, entry, now).await });
        }

        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(AttemptResult::Sent) => summary.sent += 1,
                Ok(AttemptResult::Rescheduled) => summary.rescheduled += 1,
                Ok(AttemptResult::Exhausted) => summary.exhausted += 1,
                Ok(AttemptResult::Error) => summary.errors += 1,
                Err(err) => {
                    tracing::warn!(error = %err, "delivery task panicked");
                    summary.errors += 1;
                }
            }
        }

        if summary.attempted > 0 {
            tracing::debug!(
                attempted = summary.attempted,
                sent = summary.sent,
                rescheduled = summary.rescheduled,
                exhausted = summary.exhausted,
                errors = summary.errors,
                "outbox sweep complete"
            );
        }
        summary
    }
}

async fn attempt_delivery(
    outbox: Arc<dyn OutboxStore>,
    sender: Arc<dyn NotificationSender>,
    entry: OutboxEntry,
    now: DateTime<Utc>,
) -> AttemptResult {
    let attempt_number = entry.attempts + 1;
    let delivered = match sender.send(entry.recipient_id, &entry.rendered_message).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(
                id = %entry.id,
                attempt = attempt_number,
                error = %err,
                "delivery attempt failed"
            );
            false
        }
    };

    match attempt_outcome(attempt_number, delivered) {
        AttemptOutcome::Sent => match outbox.mark_sent(entry.id, now).await {
            Ok(true) => AttemptResult::Sent,
            Ok(false) => {
                // The entry left `pending` under our feet. `sent` is
                // immutable, so the only safe move is to leave it alone.
                tracing::warn!(id = %entry.id, "delivered but entry was no longer pending");
                AttemptResult::Error
            }
            Err(err) => {
                tracing::warn!(id = %entry.id, error = %err, "failed to record delivery");
                AttemptResult::Error
            }
        },
        AttemptOutcome::Retry { delay_ms } => {
            let next_attempt_at = now + Duration::milliseconds(delay_ms as i64);
            match outbox.reschedule(entry.id, now, next_attempt_at).await {
                Ok(()) => AttemptResult::Rescheduled,
                Err(err) => {
                    tracing::warn!(id = %entry.id, error = %err, "failed to reschedule entry");
                    AttemptResult::Error
                }
            }
        }
        AttemptOutcome::Exhausted => match outbox.park_failed(entry.id, now).await {
            Ok(()) => {
                tracing::warn!(
                    id = %entry.id,
                    attempts = attempt_number,
                    "delivery attempts exhausted; entry parked as failed"
                );
                AttemptResult::Exhausted
            }
            Err(err) => {
                tracing::warn!(id = %entry.id, error = %err, "failed to park exhausted entry");
                AttemptResult::Error
            }
        },
    }
}
