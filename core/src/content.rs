//! Deterministic nudge copy.
//!
//! Rendering is template-only: a fixed template per kind with named
//! placeholders, no model calls and no clock reads. Identical inputs always
//! produce identical strings, which keeps content reproducible and auditable
//! and keeps the detection hot path free of external latency. Optional
//! placeholders drop their whole clause when absent — a missing name must
//! never render as a blank.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::nudge::NudgeKind;

/// Inputs for template rendering. A kind only reads the fields it uses.
#[derive(Debug, Clone, Default)]
pub struct NudgeContext {
    pub session_title: Option<String>,
    /// Display name of the other party (student/contact), when known
    pub contact_name: Option<String>,
    /// Session start (or end, for post-session prompts)
    pub event_at: Option<DateTime<Utc>>,
    /// Recipient-facing IANA timezone for formatting `event_at`
    pub timezone: Option<Tz>,
    /// Whole days since the last session, for gap alerts
    pub days_since: Option<i64>,
    pub task_title: Option<String>,
    pub due_on: Option<NaiveDate>,
}

/// Render the message for one nudge kind.
pub fn render(kind: NudgeKind, ctx: &NudgeContext) -> String {
    match kind {
        NudgeKind::PostSessionNote => post_session_note(ctx),
        NudgeKind::Before24h => before_24h(ctx),
        NudgeKind::Before2h => before_2h(ctx),
        NudgeKind::TaskDueToday => task_due_today(ctx),
        NudgeKind::TaskOverdue => task_overdue(ctx),
        NudgeKind::Unconfirmed24h => unconfirmed_24h(ctx),
        NudgeKind::LongGapAlert => long_gap_alert(ctx),
    }
}

/// Format an instant in the recipient's timezone, e.g. "Tue 14:30".
/// Falls back to UTC when no timezone is known.
fn format_local(at: DateTime<Utc>, tz: Option<Tz>) -> String {
    match tz {
        Some(tz) => at.with_timezone(&tz).format("%a %H:%M").to_string(),
        None => at.format("%a %H:%M UTC").to_string(),
    }
}

fn post_session_note(ctx: &NudgeContext) -> String {
    match (&ctx.session_title, &ctx.contact_name) {
        (Some(title), Some(name)) => format!(
            "How did your {title} session go? Add a quick note about your session with {name}."
        ),
        (Some(title), None) => {
            format!("How did your {title} session go? Add a quick note while it's fresh.")
        }
        (None, Some(name)) => format!(
            "How did your session go? Add a quick note about your session with {name}."
        ),
        (None, None) => "How did your session go? Add a quick note while it's fresh.".to_string(),
    }
}

fn before_24h(ctx: &NudgeContext) -> String {
    let when = ctx
        .event_at
        .map(|at| format_local(at, ctx.timezone))
        .unwrap_or_else(|| "tomorrow".to_string());
    match (&ctx.session_title, &ctx.contact_name) {
        (Some(title), Some(name)) => format!("Reminder: {title} with {name} tomorrow at {when}."),
        (Some(title), None) => format!("Reminder: {title} tomorrow at {when}."),
        (None, Some(name)) => format!("Reminder: session with {name} tomorrow at {when}."),
        (None, None) => format!("Reminder: you have a session tomorrow at {when}."),
    }
}

fn before_2h(ctx: &NudgeContext) -> String {
    let when = ctx
        .event_at
        .map(|at| format_local(at, ctx.timezone))
        .unwrap_or_else(|| "soon".to_string());
    match (&ctx.session_title, &ctx.contact_name) {
        (Some(title), Some(name)) => format!("Starting soon: {title} with {name} at {when}."),
        (Some(title), None) => format!("Starting soon: {title} at {when}."),
        (None, Some(name)) => format!("Starting soon: session with {name} at {when}."),
        (None, None) => format!("Starting soon: your session at {when}."),
    }
}

fn task_due_today(ctx: &NudgeContext) -> String {
    match &ctx.task_title {
        Some(title) => format!("Task due today: {title}."),
        None => "You have a task due today.".to_string(),
    }
}

fn task_overdue(ctx: &NudgeContext) -> String {
    match (&ctx.task_title, ctx.due_on) {
        (Some(title), Some(due)) => format!("Task overdue: {title} (due {}).", due.format("%Y-%m-%d")),
        (Some(title), None) => format!("Task overdue: {title}."),
        (None, Some(due)) => format!("You have an overdue task (due {}).", due.format("%Y-%m-%d")),
        (None, None) => "You have an overdue task.".to_string(),
    }
}

fn unconfirmed_24h(ctx: &NudgeContext) -> String {
    let when = ctx
        .event_at
        .map(|at| format_local(at, ctx.timezone))
        .unwrap_or_else(|| "tomorrow".to_string());
    match &ctx.session_title {
        Some(title) => {
            format!("{title} tomorrow at {when} is still unconfirmed. Confirm or reschedule?")
        }
        None => format!(
            "Your session tomorrow at {when} is still unconfirmed. Confirm or reschedule?"
        ),
    }
}

fn long_gap_alert(ctx: &NudgeContext) -> String {
    match (ctx.days_since, &ctx.contact_name) {
        (Some(days), Some(name)) => {
            format!("It has been {days} days since your last session with {name}. Time to check in?")
        }
        (Some(days), None) => {
            format!("It has been {days} days since your last session. Time to check in?")
        }
        (None, Some(name)) => {
            format!("It has been a while since your last session with {name}. Time to check in?")
        }
        (None, None) => "It has been a while since your last session. Time to check in?".to_string(),
    }
}
