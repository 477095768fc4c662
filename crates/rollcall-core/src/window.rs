//! Interval math over a session's start/end
//!
//! Every eligibility question the engine asks ("may this student check in
//! now?", "is the leave deadline past?") is answered here from the session's
//! timetable and a caller-supplied `now`.

use rollcall_api::{
    AttendanceRecord, AttendanceStatus, CourseSession, CourseStatus, LeaveDeadlineRule,
    VerificationWindow,
};
use rollcall_util::{minutes, Interval, Timestamp};

/// `[start - pre, start + post]`, both ends inclusive
pub fn checkin_window(session: &CourseSession) -> Interval {
    let offsets = &session.offsets;
    Interval::new(
        session.start_time - minutes(offsets.checkin_pre_minutes),
        session.start_time + minutes(offsets.checkin_post_minutes),
    )
}

/// Leave is accepted strictly before this instant
pub fn leave_deadline(session: &CourseSession) -> Timestamp {
    match session.offsets.leave_deadline {
        LeaveDeadlineRule::AtStart => session.start_time,
        LeaveDeadlineRule::BeforeStart { minutes: m } => session.start_time - minutes(m),
    }
}

/// Withdrawal is accepted strictly before this instant
pub fn withdraw_deadline(session: &CourseSession) -> Timestamp {
    session.start_time
}

/// Teacher makeup check-in: after the check-in window closed, before the
/// session ends (both exclusive)
pub fn makeup_open(session: &CourseSession, now: Timestamp) -> bool {
    now > checkin_window(session).end && now < session.end_time
}

pub fn course_status(session: &CourseSession, now: Timestamp) -> CourseStatus {
    if now < session.start_time {
        CourseStatus::NotStarted
    } else if now < session.end_time {
        CourseStatus::InProgress
    } else {
        CourseStatus::Final
    }
}

/// Outcome of the verification-window guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationGuard {
    Eligible,
    /// `now` is before `start + min_delay`
    TooEarly { opens_at: Timestamp },
    /// `now` is after the session ended
    SessionOver { ended_at: Timestamp },
    /// The previous window has not expired yet
    WindowActive { until: Timestamp },
}

pub fn verification_guard(
    session: &CourseSession,
    now: Timestamp,
    last_window: Option<&VerificationWindow>,
    min_delay_minutes: u32,
) -> VerificationGuard {
    let opens_at = session.start_time + minutes(min_delay_minutes);
    if now < opens_at {
        return VerificationGuard::TooEarly { opens_at };
    }
    if now > session.end_time {
        return VerificationGuard::SessionOver {
            ended_at: session.end_time,
        };
    }
    match last_window {
        Some(last) if now < last.expires_at() => VerificationGuard::WindowActive {
            until: last.expires_at(),
        },
        _ => VerificationGuard::Eligible,
    }
}

pub fn verification_eligible(
    session: &CourseSession,
    now: Timestamp,
    last_window: Option<&VerificationWindow>,
    min_delay_minutes: u32,
) -> bool {
    verification_guard(session, now, last_window, min_delay_minutes) == VerificationGuard::Eligible
}

/// Stored status with the lazy rollup applied.
///
/// Only `unstarted` records are rewritten: they read as `truant` once the
/// whole check-in window has elapsed, and as `absent` from
/// `start + auto_absent_after` onwards when that offset is configured.
/// Nothing is persisted.
pub fn effective_status(
    record: &AttendanceRecord,
    session: &CourseSession,
    now: Timestamp,
) -> AttendanceStatus {
    if record.status != AttendanceStatus::Unstarted || !session.needs_checkin {
        return record.status;
    }

    if checkin_window(session).has_elapsed(now) {
        return AttendanceStatus::Truant;
    }

    match session.offsets.auto_absent_after_minutes {
        Some(after) if now >= session.start_time + minutes(after) => AttendanceStatus::Absent,
        _ => AttendanceStatus::Unstarted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rollcall_api::SessionOffsets;
    use rollcall_util::{CourseCode, RoomId, SessionId, StudentId, TeacherId, WindowId};

    fn at(h: u32, m: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    fn session() -> CourseSession {
        CourseSession {
            id: SessionId::new("cs101-w1"),
            course_code: CourseCode::new("CS101"),
            teacher_id: TeacherId::new("t-wang"),
            start_time: at(9, 0),
            end_time: at(10, 40),
            room_id: RoomId::new("A-201"),
            offsets: SessionOffsets::default(),
            needs_checkin: true,
        }
    }

    fn window(opened_at: Timestamp, duration_minutes: u32) -> VerificationWindow {
        VerificationWindow {
            id: WindowId::new(),
            session_id: SessionId::new("cs101-w1"),
            opened_by: TeacherId::new("t-wang"),
            opened_at,
            duration_minutes,
            token: "000000".into(),
        }
    }

    #[test]
    fn checkin_window_spans_offsets() {
        let w = checkin_window(&session());
        assert_eq!(w.start, at(8, 50));
        assert_eq!(w.end, at(9, 10));
        assert!(!w.contains(at(8, 49)));
        assert!(w.contains(at(8, 50)));
        assert!(w.contains(at(9, 10)));
    }

    #[test]
    fn leave_deadline_rules() {
        let mut s = session();
        assert_eq!(leave_deadline(&s), at(9, 0));

        s.offsets.leave_deadline = LeaveDeadlineRule::BeforeStart { minutes: 30 };
        assert_eq!(leave_deadline(&s), at(8, 30));
        assert_eq!(withdraw_deadline(&s), at(9, 0));
    }

    #[test]
    fn course_status_boundaries() {
        let s = session();
        assert_eq!(course_status(&s, at(8, 59)), CourseStatus::NotStarted);
        assert_eq!(course_status(&s, at(9, 0)), CourseStatus::InProgress);
        assert_eq!(course_status(&s, at(10, 39)), CourseStatus::InProgress);
        assert_eq!(course_status(&s, at(10, 40)), CourseStatus::Final);
    }

    #[test]
    fn makeup_only_between_window_close_and_end() {
        let s = session();
        assert!(!makeup_open(&s, at(9, 10)));
        assert!(makeup_open(&s, at(9, 11)));
        assert!(!makeup_open(&s, at(10, 40)));
    }

    #[test]
    fn verification_guard_reports_which_half_failed() {
        let s = session();

        assert_eq!(
            verification_guard(&s, at(9, 5), None, 10),
            VerificationGuard::TooEarly { opens_at: at(9, 10) }
        );
        assert!(verification_eligible(&s, at(9, 10), None, 10));
        assert!(verification_eligible(&s, at(10, 40), None, 10));
        assert!(matches!(
            verification_guard(&s, at(10, 41), None, 10),
            VerificationGuard::SessionOver { .. }
        ));

        let last = window(at(9, 15), 2);
        assert_eq!(
            verification_guard(&s, at(9, 16), Some(&last), 10),
            VerificationGuard::WindowActive { until: at(9, 17) }
        );
        assert!(verification_eligible(&s, at(9, 17), Some(&last), 10));
    }

    #[test]
    fn lazy_rollup_only_touches_unstarted() {
        let mut s = session();
        let mut record =
            AttendanceRecord::unstarted(s.id.clone(), StudentId::new("s-li"), at(8, 0));

        assert_eq!(effective_status(&record, &s, at(9, 5)), AttendanceStatus::Unstarted);
        assert_eq!(effective_status(&record, &s, at(9, 10)), AttendanceStatus::Unstarted);
        assert_eq!(effective_status(&record, &s, at(9, 11)), AttendanceStatus::Truant);

        s.offsets.auto_absent_after_minutes = Some(5);
        assert_eq!(effective_status(&record, &s, at(9, 4)), AttendanceStatus::Unstarted);
        assert_eq!(effective_status(&record, &s, at(9, 5)), AttendanceStatus::Absent);
        assert_eq!(effective_status(&record, &s, at(9, 11)), AttendanceStatus::Truant);

        record.status = AttendanceStatus::LeaveRejected;
        assert_eq!(
            effective_status(&record, &s, at(10, 0)),
            AttendanceStatus::LeaveRejected
        );
    }

    #[test]
    fn lazy_rollup_skips_sessions_without_checkin() {
        let mut s = session();
        s.needs_checkin = false;
        let record = AttendanceRecord::unstarted(s.id.clone(), StudentId::new("s-li"), at(8, 0));
        assert_eq!(effective_status(&record, &s, at(10, 0)), AttendanceStatus::Unstarted);
    }
}
