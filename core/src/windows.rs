//! Pure detection-window predicates.
//!
//! Every window operates on absolute instants and fixed-duration arithmetic
//! (an hour is 3600s, a day is 86400s) — never calendar days — so DST
//! transitions cannot shift a window boundary. All bounds are inclusive
//! unless a predicate says otherwise.

use chrono::{DateTime, Duration, NaiveDate, Utc};

/// True iff `event_at` falls in `[now+20h, now+28h]` — the "session in
/// roughly 24 hours" detection window.
pub fn is_within_24h_window(event_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    event_at >= now + Duration::hours(20) && event_at <= now + Duration::hours(28)
}

/// True iff `event_at` falls in `[now+1h, now+3h]` — the "session starting
/// soon" window, the 24h window's tolerance scaled to the shorter horizon.
pub fn is_within_2h_window(event_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    event_at >= now + Duration::hours(1) && event_at <= now + Duration::hours(3)
}

/// True iff `end_at` falls in `[now-2h, now]` — a session that just ended,
/// eligible for a post-session note prompt.
pub fn is_recent_session_end(end_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    end_at >= now - Duration::hours(2) && end_at <= now
}

/// True iff strictly more than 14 days have passed since the last session.
/// Exactly 14 days is NOT a long gap.
pub fn is_long_gap(last_session_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_session_at > Duration::days(14)
}

/// True iff strictly more than 7 days have passed since the last message.
pub fn is_inactive_conversation(last_message_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - last_message_at > Duration::days(7)
}

/// True iff the task's due date is the UTC calendar date of `now`.
pub fn is_due_today(due_on: NaiveDate, now: DateTime<Utc>) -> bool {
    due_on == now.date_naive()
}

/// True iff the task's due date is strictly before the UTC calendar date
/// of `now`.
pub fn is_overdue(due_on: NaiveDate, now: DateTime<Utc>) -> bool {
    due_on < now.date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn event_exactly_24h_out_is_in_window() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(is_within_24h_window(now + Duration::hours(24), now));
    }

    #[test]
    fn window_24h_boundaries_are_inclusive() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(is_within_24h_window(now + Duration::hours(20), now));
        assert!(is_within_24h_window(now + Duration::hours(28), now));
        assert!(!is_within_24h_window(now + Duration::hours(20) - Duration::seconds(1), now));
        assert!(!is_within_24h_window(now + Duration::hours(28) + Duration::seconds(1), now));
    }

    #[test]
    fn events_outside_24h_window_are_rejected() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(!is_within_24h_window(now + Duration::hours(15), now));
        assert!(!is_within_24h_window(now + Duration::hours(48), now));
    }

    #[test]
    fn window_2h_covers_one_to_three_hours_out() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(is_within_2h_window(now + Duration::hours(2), now));
        assert!(is_within_2h_window(now + Duration::hours(1), now));
        assert!(is_within_2h_window(now + Duration::hours(3), now));
        assert!(!is_within_2h_window(now + Duration::minutes(30), now));
        assert!(!is_within_2h_window(now + Duration::hours(4), now));
    }

    #[test]
    fn recent_session_end_spans_the_last_two_hours() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(is_recent_session_end(now - Duration::minutes(90), now));
        assert!(is_recent_session_end(now - Duration::hours(2), now));
        assert!(is_recent_session_end(now, now));
        assert!(!is_recent_session_end(now - Duration::hours(2) - Duration::seconds(1), now));
        // Sessions that have not ended yet are never "recently ended"
        assert!(!is_recent_session_end(now + Duration::minutes(5), now));
    }

    #[test]
    fn long_gap_is_strictly_greater_than_fourteen_days() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(!is_long_gap(now - Duration::days(14), now));
        assert!(is_long_gap(now - Duration::days(14) - Duration::seconds(1), now));
        assert!(is_long_gap(now - Duration::days(20), now));
        assert!(!is_long_gap(now - Duration::days(7), now));
    }

    #[test]
    fn inactive_conversation_is_strictly_greater_than_seven_days() {
        let now = at("2025-03-10T12:00:00Z");
        assert!(!is_inactive_conversation(now - Duration::days(7), now));
        assert!(is_inactive_conversation(now - Duration::days(7) - Duration::seconds(1), now));
        assert!(is_inactive_conversation(now - Duration::days(10), now));
    }

    #[test]
    fn dst_transition_does_not_shift_the_24h_window() {
        // US DST spring-forward happened 2025-03-09; windows are pure
        // duration arithmetic, so the boundary stays at exactly +20h/+28h.
        let now = at("2025-03-08T12:00:00Z");
        assert!(is_within_24h_window(at("2025-03-09T08:00:00Z"), now));
        assert!(!is_within_24h_window(at("2025-03-09T07:59:59Z"), now));
    }

    #[test]
    fn task_due_checks_use_the_utc_date() {
        let now = at("2025-03-10T23:30:00Z");
        let today = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2025, 3, 11).unwrap();

        assert!(is_due_today(today, now));
        assert!(!is_due_today(yesterday, now));
        assert!(!is_due_today(tomorrow, now));

        assert!(is_overdue(yesterday, now));
        assert!(!is_overdue(today, now));
        assert!(!is_overdue(tomorrow, now));
    }
}
