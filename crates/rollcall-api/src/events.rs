//! Event types for rollcalld -> client streaming

use rollcall_util::{
    ApplicationId, RecordId, SessionId, StudentId, TeacherId, Timestamp, WindowId,
};
use serde::{Deserialize, Serialize};

use crate::{ApprovalResult, AttendanceStatus, API_VERSION};

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload, timestamp: Timestamp) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp,
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A stored attendance status changed
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

    LeaveDecided {
        application_id: ApplicationId,
        result: ApprovalResult,
        approver_id: Option<TeacherId>,
    },

    /// The token is deliberately absent; only the opening teacher receives it
    VerificationWindowOpened {
        session_id: SessionId,
        window_id: WindowId,
        expires_at: Timestamp,
    },

    SessionCreated { session_id: SessionId },

    RosterSynced {
        session_id: SessionId,
        created: usize,
    },

    ConfigReloaded,

    /// Service is shutting down
    Shutdown,
}
