//! Attendance record state machine
//!
//! Each transition takes the record as read and returns the record to write,
//! with `version` bumped and `updated_at` set. Time-window and collaborator
//! guards live in the engine; this module only knows which stored status
//! may move where.

use rollcall_api::{
    AttendanceRecord, AttendanceStatus, CheckInMethod, Decision, GeoPoint,
};
use rollcall_util::{ApplicationId, AttendanceError, Result, TeacherId, Timestamp, WindowId};
use std::fmt;

/// What is being done to a record, for error messages and the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAction {
    CheckIn,
    ReviewPhoto,
    ManualCheckIn,
    MarkAbsent,
    SubmitLeave,
    DecideLeave,
    WithdrawLeave,
    Verify,
}

impl RecordAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordAction::CheckIn => "check_in",
            RecordAction::ReviewPhoto => "review_photo",
            RecordAction::ManualCheckIn => "manual_check_in",
            RecordAction::MarkAbsent => "mark_absent",
            RecordAction::SubmitLeave => "submit_leave",
            RecordAction::DecideLeave => "decide_leave",
            RecordAction::WithdrawLeave => "withdraw_leave",
            RecordAction::Verify => "verify",
        }
    }

    /// Stored statuses this action may start from
    pub fn sources(&self) -> &'static [AttendanceStatus] {
        use AttendanceStatus::*;
        match self {
            RecordAction::CheckIn => &[Unstarted, LeaveRejected],
            RecordAction::ReviewPhoto => &[PendingApproval],
            RecordAction::ManualCheckIn => &[Unstarted, Absent, Truant, LeaveRejected],
            RecordAction::MarkAbsent => &[Unstarted, Truant, Present, PendingApproval],
            RecordAction::SubmitLeave => &[Unstarted, LeaveRejected, Absent],
            RecordAction::DecideLeave => &[LeavePending, Leave, LeaveRejected],
            RecordAction::WithdrawLeave => &[LeavePending, Leave, LeaveRejected],
            RecordAction::Verify => &[Present],
        }
    }
}

impl fmt::Display for RecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fail with `InvalidTransition` unless `action` may start from the
/// record's stored status
pub fn ensure_transition(record: &AttendanceRecord, action: RecordAction) -> Result<()> {
    if action.sources().contains(&record.status) {
        Ok(())
    } else {
        Err(invalid_transition(record.status, action))
    }
}

pub fn invalid_transition(status: AttendanceStatus, action: RecordAction) -> AttendanceError {
    AttendanceError::invalid_transition(format!("cannot {} while {}", action, status))
}

fn advance(record: &AttendanceRecord, status: AttendanceStatus, now: Timestamp) -> AttendanceRecord {
    let mut next = record.clone();
    next.status = status;
    next.version = record.version + 1;
    next.updated_at = now;
    next
}

/// Student self check-in: location goes straight to `present`, photo waits
/// for review in `pending_approval`. Checking in over a rejected leave drops
/// the link to that application.
pub fn check_in(
    record: &AttendanceRecord,
    method: &CheckInMethod,
    location: Option<GeoPoint>,
    now: Timestamp,
) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::CheckIn)?;

    let target = match method {
        CheckInMethod::Location => AttendanceStatus::Present,
        CheckInMethod::Photo { .. } => AttendanceStatus::PendingApproval,
    };

    let mut next = advance(record, target, now);
    next.checkin_time = Some(now);
    next.checkin_location = location;
    next.leave_application_id = None;
    if let CheckInMethod::Photo { photo_ref } = method {
        next.metadata.photo_ref = Some(photo_ref.clone());
    }
    Ok(next)
}

pub fn review_photo(
    record: &AttendanceRecord,
    teacher_id: &TeacherId,
    approve: bool,
    now: Timestamp,
) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::ReviewPhoto)?;

    let target = if approve {
        AttendanceStatus::Present
    } else {
        AttendanceStatus::Absent
    };
    let mut next = advance(record, target, now);
    next.metadata.reviewed_by = Some(teacher_id.clone());
    Ok(next)
}

/// Teacher makeup check-in, no location involved. Overriding a rejected
/// leave drops the link to that application.
pub fn manual_check_in(
    record: &AttendanceRecord,
    teacher_id: &TeacherId,
    reason: &str,
    now: Timestamp,
) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::ManualCheckIn)?;

    let mut next = advance(record, AttendanceStatus::Present, now);
    next.checkin_time = Some(now);
    next.leave_application_id = None;
    next.metadata.manual_override = true;
    next.metadata.override_reason = Some(reason.to_string());
    next.metadata.reviewed_by = Some(teacher_id.clone());
    Ok(next)
}

pub fn mark_absent(
    record: &AttendanceRecord,
    teacher_id: &TeacherId,
    reason: Option<&str>,
    now: Timestamp,
) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::MarkAbsent)?;

    let mut next = advance(record, AttendanceStatus::Absent, now);
    next.metadata.manual_override = true;
    next.metadata.override_reason = reason.map(str::to_string);
    next.metadata.reviewed_by = Some(teacher_id.clone());
    Ok(next)
}

pub fn leave_submitted(
    record: &AttendanceRecord,
    application_id: ApplicationId,
    now: Timestamp,
) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::SubmitLeave)?;

    let mut next = advance(record, AttendanceStatus::LeavePending, now);
    next.leave_application_id = Some(application_id);
    Ok(next)
}

pub fn leave_decided(
    record: &AttendanceRecord,
    decision: Decision,
    now: Timestamp,
) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::DecideLeave)?;
    Ok(advance(record, decision.record_status(), now))
}

pub fn leave_withdrawn(record: &AttendanceRecord, now: Timestamp) -> Result<AttendanceRecord> {
    ensure_transition(record, RecordAction::WithdrawLeave)?;

    let mut next = advance(record, AttendanceStatus::Unstarted, now);
    next.leave_application_id = None;
    Ok(next)
}

/// Returns `None` when the student already confirmed this window
pub fn presence_verified(
    record: &AttendanceRecord,
    window_id: WindowId,
    now: Timestamp,
) -> Result<Option<AttendanceRecord>> {
    ensure_transition(record, RecordAction::Verify)?;

    if record.metadata.verified_windows.contains(&window_id) {
        return Ok(None);
    }
    let mut next = advance(record, AttendanceStatus::Present, now);
    next.metadata.verified_windows.push(window_id);
    Ok(Some(next))
}
