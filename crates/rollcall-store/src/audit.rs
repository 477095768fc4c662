//! Audit event types

use rollcall_api::{AttendanceStatus, Decision};
use rollcall_util::{
    ApplicationId, CourseCode, RecordId, SessionId, StudentId, TeacherId, Timestamp, WindowId,
};
use serde::{Deserialize, Serialize};

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    ServiceStarted,

    ServiceStopped,

    /// Config reload requested
    ConfigReloaded { success: bool },

    SessionCreated {
        session_id: SessionId,
        course_code: CourseCode,
    },

    NeedsCheckinChanged {
        session_id: SessionId,
        needs_checkin: bool,
    },

    RosterSynced {
        session_id: SessionId,
        created: usize,
    },

    /// A record's stored status changed outside the leave workflow
    StatusChanged {
        record_id: RecordId,
        session_id: SessionId,
        student_id: StudentId,
        from: AttendanceStatus,
        to: AttendanceStatus,
        action: String,
        /// Teacher who acted, when it was not the student
        actor: Option<TeacherId>,
        reason: Option<String>,
    },

    LeaveSubmitted {
        application_id: ApplicationId,
        record_id: RecordId,
        student_id: StudentId,
    },

    LeaveDecided {
        application_id: ApplicationId,
        approver_id: TeacherId,
        decision: Decision,
    },

    LeaveWithdrawn {
        application_id: ApplicationId,
        student_id: StudentId,
        /// Whether the linked record was reset to unstarted
        record_reset: bool,
    },

    VerificationWindowOpened {
        window_id: WindowId,
        session_id: SessionId,
        teacher_id: TeacherId,
        expires_at: Timestamp,
    },

    PresenceVerified {
        window_id: WindowId,
        record_id: RecordId,
        student_id: StudentId,
    },

    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    pub timestamp: Timestamp,

    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType, timestamp: Timestamp) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp,
            event,
        }
    }
}
