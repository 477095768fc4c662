//! Core events emitted by the engine

use rollcall_api::{ApprovalResult, AttendanceRecord, AttendanceStatus};
use rollcall_util::{ApplicationId, RecordId, SessionId, StudentId, TeacherId, Timestamp, WindowId};

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// A record's stored status changed
    RecordChanged {
        record_id: RecordId,
        session_id: SessionId,
        student_id: StudentId,
        from: AttendanceStatus,
        to: AttendanceStatus,
    },

    LeaveSubmitted {
        application_id: ApplicationId,
        session_id: SessionId,
        student_id: StudentId,
    },

    /// Approved, rejected, or (with no approver) withdrawn
    LeaveDecided {
        application_id: ApplicationId,
        result: ApprovalResult,
        approver_id: Option<TeacherId>,
    },

    VerificationWindowOpened {
        session_id: SessionId,
        window_id: WindowId,
        expires_at: Timestamp,
    },

    SessionCreated {
        session_id: SessionId,
    },

    RosterSynced {
        session_id: SessionId,
        created: usize,
    },

    PolicyReloaded,
}

impl CoreEvent {
    pub fn record_changed(before: &AttendanceRecord, after: &AttendanceRecord) -> Self {
        CoreEvent::RecordChanged {
            record_id: after.id,
            session_id: after.session_id.clone(),
            student_id: after.student_id.clone(),
            from: before.status,
            to: after.status,
        }
    }
}

/// Result of a mutating operation plus what it changed
#[derive(Debug, Clone)]
pub struct Outcome<T> {
    pub value: T,
    pub events: Vec<CoreEvent>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, events: Vec<CoreEvent>) -> Self {
        Self { value, events }
    }

    /// Nothing changed
    pub fn unchanged(value: T) -> Self {
        Self::new(value, Vec::new())
    }
}
