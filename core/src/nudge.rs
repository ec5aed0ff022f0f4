use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::content::NudgeContext;

/// Which upstream entity a nudge is anchored to. The wire strings are part
/// of the composite-key contract and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// A scheduled session between a mentor and one or more participants
    Event,
    /// A task with a due date, assigned to a user
    Task,
    /// A mentor/contact relationship (used by long-gap alerts)
    Contact,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Event => "event",
            EntityType::Task => "task",
            EntityType::Contact => "contact",
        }
    }
}

/// Every nudge kind the detector can produce. The serialized strings are an
/// external contract: they are embedded in composite keys that collaborators
/// may persist or display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum NudgeKind {
    /// Session ended recently — prompt the mentor for a session note
    #[serde(rename = "post_session_note")]
    PostSessionNote,
    /// Session starts in roughly 24 hours
    #[serde(rename = "24h_before")]
    Before24h,
    /// Session starts in roughly 2 hours
    #[serde(rename = "2h_before")]
    Before2h,
    /// Task due today, not completed
    #[serde(rename = "task_due_today")]
    TaskDueToday,
    /// Task past its due date, not completed
    #[serde(rename = "task_overdue")]
    TaskOverdue,
    /// Session in the ~24h window with participants who have not responded
    #[serde(rename = "unconfirmed_24h")]
    Unconfirmed24h,
    /// More than 14 days since the last session with a contact
    #[serde(rename = "long_gap_alert")]
    LongGapAlert,
}

impl NudgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NudgeKind::PostSessionNote => "post_session_note",
            NudgeKind::Before24h => "24h_before",
            NudgeKind::Before2h => "2h_before",
            NudgeKind::TaskDueToday => "task_due_today",
            NudgeKind::TaskOverdue => "task_overdue",
            NudgeKind::Unconfirmed24h => "unconfirmed_24h",
            NudgeKind::LongGapAlert => "long_gap_alert",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post_session_note" => Some(NudgeKind::PostSessionNote),
            "24h_before" => Some(NudgeKind::Before24h),
            "2h_before" => Some(NudgeKind::Before2h),
            "task_due_today" => Some(NudgeKind::TaskDueToday),
            "task_overdue" => Some(NudgeKind::TaskOverdue),
            "unconfirmed_24h" => Some(NudgeKind::Unconfirmed24h),
            "long_gap_alert" => Some(NudgeKind::LongGapAlert),
            _ => None,
        }
    }
}

/// Deterministic identity of one (entity, recipient, kind) notification
/// instance. The underscore-joined format is an external contract —
/// collaborators persist and display these keys verbatim.
pub fn composite_key(
    entity_type: EntityType,
    entity_id: &str,
    recipient_id: &str,
    kind: NudgeKind,
) -> String {
    format!(
        "{}_{}_{}_{}",
        entity_type.as_str(),
        entity_id,
        recipient_id,
        kind.as_str()
    )
}

/// A detection hit: one notification that should exist for one recipient.
/// Produced fresh on every detection pass, never persisted, never mutated.
#[derive(Debug, Clone)]
pub struct ReminderCandidate {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub recipient_id: Uuid,
    pub kind: NudgeKind,
    /// The instant the nudge is anchored to (session start/end, due date...)
    pub occurs_at: DateTime<Utc>,
    pub context: NudgeContext,
}

impl ReminderCandidate {
    pub fn composite_key(&self) -> String {
        composite_key(
            self.entity_type,
            &self.entity_id,
            &self.recipient_id.to_string(),
            self.kind,
        )
    }
}

/// Per-recipient nudge configuration. Owned by the user profile — the nudge
/// engine only reads it. A user with no stored row behaves as the default
/// (everything enabled).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserNudgePreferences {
    pub user_id: Uuid,
    /// Global kill switch: false disables every nudge kind for this user
    pub enabled: bool,
    pub post_session_notes_enabled: bool,
    pub long_gap_alerts_enabled: bool,
    pub unconfirmed_events_enabled: bool,
}

impl UserNudgePreferences {
    pub fn defaults_for(user_id: Uuid) -> Self {
        UserNudgePreferences {
            user_id,
            enabled: true,
            post_session_notes_enabled: true,
            long_gap_alerts_enabled: true,
            unconfirmed_events_enabled: true,
        }
    }

    /// Whether this recipient accepts the given nudge kind at all.
    /// Kinds without a dedicated switch are governed by the global one.
    pub fn allows(&self, kind: NudgeKind) -> bool {
        if !self.enabled {
            return false;
        }
        match kind {
            NudgeKind::PostSessionNote => self.post_session_notes_enabled,
            NudgeKind::LongGapAlert => self.long_gap_alerts_enabled,
            NudgeKind::Unconfirmed24h => self.unconfirmed_events_enabled,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_matches_external_contract() {
        let key = composite_key(EntityType::Event, "evt123", "user456", NudgeKind::Before24h);
        assert_eq!(key, "event_evt123_user456_24h_before");
    }

    #[test]
    fn composite_key_is_deterministic_and_injective_per_input() {
        let a = composite_key(EntityType::Task, "t1", "u1", NudgeKind::TaskDueToday);
        let b = composite_key(EntityType::Task, "t1", "u1", NudgeKind::TaskDueToday);
        assert_eq!(a, b);

        // Changing any single input must change the key
        assert_ne!(
            a,
            composite_key(EntityType::Task, "t2", "u1", NudgeKind::TaskDueToday)
        );
        assert_ne!(
            a,
            composite_key(EntityType::Task, "t1", "u2", NudgeKind::TaskDueToday)
        );
        assert_ne!(
            a,
            composite_key(EntityType::Task, "t1", "u1", NudgeKind::TaskOverdue)
        );
    }

    #[test]
    fn kind_strings_round_trip() {
        for kind in [
            NudgeKind::PostSessionNote,
            NudgeKind::Before24h,
            NudgeKind::Before2h,
            NudgeKind::TaskDueToday,
            NudgeKind::TaskOverdue,
            NudgeKind::Unconfirmed24h,
            NudgeKind::LongGapAlert,
        ] {
            assert_eq!(NudgeKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(NudgeKind::parse("no_such_kind"), None);
    }

    #[test]
    fn preferences_default_to_everything_enabled() {
        let prefs = UserNudgePreferences::defaults_for(Uuid::now_v7());
        assert!(prefs.allows(NudgeKind::PostSessionNote));
        assert!(prefs.allows(NudgeKind::Before24h));
        assert!(prefs.allows(NudgeKind::LongGapAlert));
        assert!(prefs.allows(NudgeKind::Unconfirmed24h));
    }

    #[test]
    fn global_switch_overrides_per_kind_switches() {
        let mut prefs = UserNudgePreferences::defaults_for(Uuid::now_v7());
        prefs.enabled = false;
        assert!(!prefs.allows(NudgeKind::Before24h));
        assert!(!prefs.allows(NudgeKind::PostSessionNote));
    }

    #[test]
    fn per_kind_switches_only_affect_their_kind() {
        let mut prefs = UserNudgePreferences::defaults_for(Uuid::now_v7());
        prefs.post_session_notes_enabled = false;
        assert!(!prefs.allows(NudgeKind::PostSessionNote));
        assert!(prefs.allows(NudgeKind::Before24h));
        assert!(prefs.allows(NudgeKind::TaskOverdue));
    }
}
