//! Store trait definitions

use rollcall_api::{
    AttendanceRecord, CourseSession, LeaveApplication, Page, RecordSort, VerificationWindow,
};
use rollcall_util::{ApplicationId, CourseCode, RecordId, SessionId, StudentId, TeacherId};

use crate::{AuditEvent, StoreResult};

/// A record joined with the session it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub record: AttendanceRecord,
    pub session: CourseSession,
}

/// A record write guarded by the version the caller read.
///
/// `record.version` is the version to store; the row is only written if it
/// currently holds `expected_version`.
#[derive(Debug, Clone, Copy)]
pub struct RecordUpdate<'a> {
    pub record: &'a AttendanceRecord,
    pub expected_version: u64,
}

/// Main store trait
pub trait Store: Send + Sync {
    // Sessions

    fn insert_session(&self, session: &CourseSession) -> StoreResult<()>;

    fn get_session(&self, id: &SessionId) -> StoreResult<Option<CourseSession>>;

    /// Overwrite a session's mutable fields
    fn update_session(&self, session: &CourseSession) -> StoreResult<()>;

    // Attendance records

    /// Fails with `Constraint` if the (session, student) pair already has one
    fn insert_record(&self, record: &AttendanceRecord) -> StoreResult<()>;

    /// Insert the records whose (session, student) pair is free; returns how
    /// many were created
    fn insert_missing_records(&self, records: &[AttendanceRecord]) -> StoreResult<usize>;

    fn get_record(&self, id: &RecordId) -> StoreResult<Option<AttendanceRecord>>;

    fn find_record(
        &self,
        session_id: &SessionId,
        student_id: &StudentId,
    ) -> StoreResult<Option<AttendanceRecord>>;

    /// Compare-and-set write of a record
    fn update_record(&self, update: RecordUpdate<'_>) -> StoreResult<()>;

    /// One student's records in a course, ordered by session start
    fn student_records(
        &self,
        student_id: &StudentId,
        course_code: &CourseCode,
        sort: RecordSort,
        page: Option<Page>,
    ) -> StoreResult<Vec<SessionRecord>>;

    /// Every record in a course
    fn course_records(&self, course_code: &CourseCode) -> StoreResult<Vec<SessionRecord>>;

    // Leave applications

    /// Store a new application and move its record in one transaction
    fn insert_leave(
        &self,
        application: &LeaveApplication,
        record: RecordUpdate<'_>,
    ) -> StoreResult<()>;

    fn get_leave(&self, id: &ApplicationId) -> StoreResult<Option<LeaveApplication>>;

    /// The pending or approved application for a record, if any
    fn active_leave_for_record(&self, record_id: &RecordId)
    -> StoreResult<Option<LeaveApplication>>;

    /// Compare-and-set write of an application (new approvals are appended),
    /// optionally moving its record in the same transaction
    fn update_leave(
        &self,
        application: &LeaveApplication,
        expected_version: u64,
        record: Option<RecordUpdate<'_>>,
    ) -> StoreResult<()>;

    /// Pending applications for sessions taught by `teacher_id`, oldest first
    fn pending_leaves(&self, teacher_id: &TeacherId, page: Page)
    -> StoreResult<Vec<LeaveApplication>>;

    /// A student's applications, newest first
    fn leave_history(&self, student_id: &StudentId, page: Page)
    -> StoreResult<Vec<LeaveApplication>>;

    // Verification windows

    /// Insert `window` unless the session has a window that has not expired
    /// at `window.opened_at`; fails with `WindowActive` otherwise
    fn insert_window(&self, window: &VerificationWindow) -> StoreResult<()>;

    fn latest_window(&self, session_id: &SessionId) -> StoreResult<Option<VerificationWindow>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events, newest first
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}
