//! Command types for the rollcall protocol

use rollcall_util::{
    ApplicationId, AttachmentRef, AttendanceError, ClientId, CourseCode, ErrorKind, RecordId,
    SessionId, StudentId, TeacherId,
};
use serde::{Deserialize, Serialize};

use crate::{
    AbsenceStat, CheckInMethod, ClientRole, CourseSession, GeoPoint, HealthStatus,
    LeaveApplication, LeavePage, LeaveType, NewSession, Page, RecordPage, RecordSort, RecordView,
    VerificationWindow, WindowStatus, API_VERSION,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<&AttendanceError> for ErrorInfo {
    fn from(err: &AttendanceError) -> Self {
        Self::new(ErrorCode::from(err.kind()), err.detail())
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // Engine outcomes
    NotEligible,
    InvalidTransition,
    Conflict,
    DeadlinePassed,
    DuplicateApplication,
    WindowAlreadyActive,
    ValidationFailed,
    NotFound,
    AlreadyCheckedIn,

    // Service outcomes
    InvalidRequest,
    PermissionDenied,
    RateLimited,
    ConfigError,
    StoreError,
    CapabilityError,
    InternalError,
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotEligible => ErrorCode::NotEligible,
            ErrorKind::InvalidTransition => ErrorCode::InvalidTransition,
            ErrorKind::Conflict => ErrorCode::Conflict,
            ErrorKind::DeadlinePassed => ErrorCode::DeadlinePassed,
            ErrorKind::DuplicateApplication => ErrorCode::DuplicateApplication,
            ErrorKind::WindowAlreadyActive => ErrorCode::WindowAlreadyActive,
            ErrorKind::ValidationFailed => ErrorCode::ValidationFailed,
            ErrorKind::NotFound => ErrorCode::NotFound,
            ErrorKind::AlreadyCheckedIn => ErrorCode::AlreadyCheckedIn,
            ErrorKind::Store => ErrorCode::StoreError,
            ErrorKind::Capability => ErrorCode::CapabilityError,
        }
    }
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // Student self-service
    CheckIn {
        session_id: SessionId,
        student_id: StudentId,
        location: Option<GeoPoint>,
        method: CheckInMethod,
    },

    /// Confirm presence during an open verification window
    Verify {
        session_id: SessionId,
        student_id: StudentId,
        token: String,
    },

    SubmitLeave {
        record_id: RecordId,
        reason: String,
        leave_type: LeaveType,
        #[serde(default)]
        attachments: Vec<AttachmentRef>,
    },

    WithdrawLeave { application_id: ApplicationId },

    // Teacher actions
    ApproveLeave {
        application_id: ApplicationId,
        approver_id: TeacherId,
        #[serde(default)]
        comment: Option<String>,
    },

    RejectLeave {
        application_id: ApplicationId,
        approver_id: TeacherId,
        comment: String,
    },

    ManualCheckIn {
        session_id: SessionId,
        student_id: StudentId,
        teacher_id: TeacherId,
        reason: String,
    },

    MarkAbsent {
        session_id: SessionId,
        student_id: StudentId,
        teacher_id: TeacherId,
        #[serde(default)]
        reason: Option<String>,
    },

    ReviewPhoto {
        record_id: RecordId,
        teacher_id: TeacherId,
        approve: bool,
    },

    OpenVerificationWindow {
        session_id: SessionId,
        teacher_id: TeacherId,
        #[serde(default)]
        duration_minutes: Option<u32>,
    },

    // Queries
    VerificationStatus { session_id: SessionId },

    GetRecord {
        session_id: SessionId,
        student_id: StudentId,
    },

    ListRecords {
        student_id: StudentId,
        course_code: CourseCode,
        #[serde(default)]
        sort: RecordSort,
        #[serde(default)]
        page: Page,
    },

    AbsenceStats {
        student_id: StudentId,
        course_code: CourseCode,
    },

    RosterStats { course_code: CourseCode },

    PendingLeaves {
        teacher_id: TeacherId,
        #[serde(default)]
        page: Page,
    },

    LeaveHistory {
        student_id: StudentId,
        #[serde(default)]
        page: Page,
    },

    // Attachments (opaque pass-through to the attachment store)
    PutAttachment { data: Vec<u8> },

    GetAttachment { attachment: AttachmentRef },

    // Admin commands
    CreateSession { session: NewSession },

    SetNeedsCheckin {
        session_id: SessionId,
        needs_checkin: bool,
    },

    SyncRoster {
        session_id: SessionId,
        student_ids: Vec<StudentId>,
    },

    ReloadConfig,

    // Connection management
    SubscribeEvents,

    UnsubscribeEvents,

    GetHealth,

    Ping,
}

impl Command {
    /// Commands that change sessions or service configuration
    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::CreateSession { .. }
                | Command::SetNeedsCheckin { .. }
                | Command::SyncRoster { .. }
                | Command::ReloadConfig
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    Record(RecordView),
    Records(RecordPage),
    Leave(LeaveApplication),
    Leaves(LeavePage),
    Window(VerificationWindow),
    WindowStatus(WindowStatus),
    Stats(AbsenceStat),
    RosterStats(Vec<AbsenceStat>),
    Session(CourseSession),
    RosterSynced { created: usize },
    Attachment { attachment: AttachmentRef },
    AttachmentData { data: Vec<u8> },
    ConfigReloaded,
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Health(HealthStatus),
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
