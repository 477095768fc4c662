//! Shared domain types for the rollcall API

use serde::{Deserialize, Serialize};
use rollcall_util::{
    minutes, ApplicationId, AttachmentRef, CourseCode, RecordId, RoomId, SessionId, StudentId,
    TeacherId, Timestamp, WindowId,
};
use std::fmt;
use std::str::FromStr;

/// Per-student attendance status for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// Roster synced, nothing has happened yet
    Unstarted,
    Present,
    /// Explicit teacher action, rejected photo, or the auto-absent rollup
    Absent,
    /// Check-in window fully elapsed with no action and no excuse
    Truant,
    /// Approved leave
    Leave,
    LeavePending,
    LeaveRejected,
    /// Photo check-in awaiting teacher review
    PendingApproval,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 8] = [
        AttendanceStatus::Unstarted,
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Truant,
        AttendanceStatus::Leave,
        AttendanceStatus::LeavePending,
        AttendanceStatus::LeaveRejected,
        AttendanceStatus::PendingApproval,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Unstarted => "unstarted",
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Truant => "truant",
            AttendanceStatus::Leave => "leave",
            AttendanceStatus::LeavePending => "leave_pending",
            AttendanceStatus::LeaveRejected => "leave_rejected",
            AttendanceStatus::PendingApproval => "pending_approval",
        }
    }

    /// States owned by the leave workflow
    pub fn is_leave_state(&self) -> bool {
        matches!(
            self,
            AttendanceStatus::Leave | AttendanceStatus::LeavePending | AttendanceStatus::LeaveRejected
        )
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AttendanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown attendance status: {}", s))
    }
}

/// Where a session stands relative to `[start_time, end_time]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CourseStatus {
    NotStarted,
    InProgress,
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveType {
    Sick,
    Personal,
    Emergency,
    Other,
}

impl LeaveType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaveType::Sick => "sick",
            LeaveType::Personal => "personal",
            LeaveType::Emergency => "emergency",
            LeaveType::Other => "other",
        }
    }
}

impl FromStr for LeaveType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sick" => Ok(LeaveType::Sick),
            "personal" => Ok(LeaveType::Personal),
            "emergency" => Ok(LeaveType::Emergency),
            "other" => Ok(LeaveType::Other),
            other => Err(format!("unknown leave type: {}", other)),
        }
    }
}

/// Current state of a leave application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalResult {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl ApprovalResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalResult::Pending => "pending",
            ApprovalResult::Approved => "approved",
            ApprovalResult::Rejected => "rejected",
            ApprovalResult::Cancelled => "cancelled",
        }
    }

    /// Pending and approved applications block a new submission
    pub fn is_active(&self) -> bool {
        matches!(self, ApprovalResult::Pending | ApprovalResult::Approved)
    }
}

impl fmt::Display for ApprovalResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApprovalResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalResult::Pending),
            "approved" => Ok(ApprovalResult::Approved),
            "rejected" => Ok(ApprovalResult::Rejected),
            "cancelled" => Ok(ApprovalResult::Cancelled),
            other => Err(format!("unknown approval result: {}", other)),
        }
    }
}

/// A single approver's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }

    pub fn result(&self) -> ApprovalResult {
        match self {
            Decision::Approved => ApprovalResult::Approved,
            Decision::Rejected => ApprovalResult::Rejected,
        }
    }

    /// Record status a decision moves the linked record into
    pub fn record_status(&self) -> AttendanceStatus {
        match self {
            Decision::Approved => AttendanceStatus::Leave,
            Decision::Rejected => AttendanceStatus::LeaveRejected,
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            other => Err(format!("unknown decision: {}", other)),
        }
    }
}

/// When leave stops being accepted for a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum LeaveDeadlineRule {
    #[default]
    AtStart,
    BeforeStart { minutes: u32 },
}

/// Configured offsets that turn a session's start/end into eligibility intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOffsets {
    /// Minutes before start the check-in window opens
    #[serde(default = "default_checkin_offset")]
    pub checkin_pre_minutes: u32,
    /// Minutes after start the check-in window closes
    #[serde(default = "default_checkin_offset")]
    pub checkin_post_minutes: u32,
    #[serde(default)]
    pub leave_deadline: LeaveDeadlineRule,
    /// Untouched records read as `absent` this many minutes after start
    #[serde(default)]
    pub auto_absent_after_minutes: Option<u32>,
}

fn default_checkin_offset() -> u32 {
    10
}

impl Default for SessionOffsets {
    fn default() -> Self {
        Self {
            checkin_pre_minutes: default_checkin_offset(),
            checkin_post_minutes: default_checkin_offset(),
            leave_deadline: LeaveDeadlineRule::AtStart,
            auto_absent_after_minutes: None,
        }
    }
}

/// A rule broken by a set of session offsets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetViolation {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for OffsetViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl SessionOffsets {
    /// Checks shared by the configured defaults and per-session overrides
    pub fn validate(&self) -> Vec<OffsetViolation> {
        let mut violations = Vec::new();

        if self.checkin_pre_minutes == 0 && self.checkin_post_minutes == 0 {
            violations.push(OffsetViolation {
                field: "checkin_post_minutes",
                message: "check-in window cannot be empty (pre and post are both 0)".into(),
            });
        }

        // Lazy absence must kick in while the window is still open, otherwise
        // the record reads as truant first and the setting does nothing.
        if let Some(after) = self.auto_absent_after_minutes
            && after >= self.checkin_post_minutes
        {
            violations.push(OffsetViolation {
                field: "auto_absent_after_minutes",
                message: format!(
                    "{} must be less than checkin_post_minutes ({})",
                    after, self.checkin_post_minutes
                ),
            });
        }

        violations
    }
}

/// One scheduled class meeting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseSession {
    pub id: SessionId,
    pub course_code: CourseCode,
    pub teacher_id: TeacherId,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub room_id: RoomId,
    #[serde(default)]
    pub offsets: SessionOffsets,
    #[serde(default = "default_needs_checkin")]
    pub needs_checkin: bool,
}

fn default_needs_checkin() -> bool {
    true
}

/// Session definition as submitted by an administrator; missing offsets are
/// filled from the configured defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub id: SessionId,
    pub course_code: CourseCode,
    pub teacher_id: TeacherId,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
    pub room_id: RoomId,
    #[serde(default)]
    pub offsets: Option<SessionOffsets>,
    #[serde(default = "default_needs_checkin")]
    pub needs_checkin: bool,
}

impl NewSession {
    pub fn into_session(self, default_offsets: SessionOffsets) -> CourseSession {
        CourseSession {
            id: self.id,
            course_code: self.course_code,
            teacher_id: self.teacher_id,
            start_time: self.start_time,
            end_time: self.end_time,
            room_id: self.room_id,
            offsets: self.offsets.unwrap_or(default_offsets),
            needs_checkin: self.needs_checkin,
        }
    }
}

/// A position reported by the client device
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub accuracy_m: Option<f64>,
}

/// How a student is checking in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CheckInMethod {
    /// Geofenced self check-in
    Location,
    /// Photo evidence, reviewed by the teacher before counting
    Photo { photo_ref: AttachmentRef },
}

/// Extra facts recorded alongside a status
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    #[serde(default)]
    pub photo_ref: Option<AttachmentRef>,
    /// Set when a teacher wrote the status directly
    #[serde(default)]
    pub manual_override: bool,
    #[serde(default)]
    pub override_reason: Option<String>,
    #[serde(default)]
    pub reviewed_by: Option<TeacherId>,
    /// Verification windows this student confirmed presence in
    #[serde(default)]
    pub verified_windows: Vec<WindowId>,
}

/// One per (session, student)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub status: AttendanceStatus,
    pub checkin_time: Option<Timestamp>,
    pub checkin_location: Option<GeoPoint>,
    pub leave_application_id: Option<ApplicationId>,
    pub metadata: RecordMetadata,
    /// Bumped by every successful write; compare-and-set key
    pub version: u64,
    pub updated_at: Timestamp,
}

impl AttendanceRecord {
    /// Fresh roster entry
    pub fn unstarted(session_id: SessionId, student_id: StudentId, now: Timestamp) -> Self {
        Self {
            id: RecordId::new(),
            session_id,
            student_id,
            status: AttendanceStatus::Unstarted,
            checkin_time: None,
            checkin_location: None,
            leave_application_id: None,
            metadata: RecordMetadata::default(),
            version: 0,
            updated_at: now,
        }
    }
}

/// One entry in an application's decision history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approver_id: TeacherId,
    pub result: Decision,
    pub comment: String,
    pub decided_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveApplication {
    pub id: ApplicationId,
    pub record_id: RecordId,
    pub session_id: SessionId,
    pub student_id: StudentId,
    pub reason: String,
    pub leave_type: LeaveType,
    pub attachments: Vec<AttachmentRef>,
    pub submitted_at: Timestamp,
    /// Withdrawal is accepted strictly before this instant (session start)
    pub withdraw_deadline: Timestamp,
    pub status: ApprovalResult,
    /// Oldest first; the last entry decides `status` unless cancelled
    pub approvals: Vec<Approval>,
    pub version: u64,
}

impl LeaveApplication {
    pub fn latest_approval(&self) -> Option<&Approval> {
        self.approvals.last()
    }
}

/// Short teacher-issued anti-proxy challenge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationWindow {
    pub id: WindowId,
    pub session_id: SessionId,
    pub opened_by: TeacherId,
    pub opened_at: Timestamp,
    pub duration_minutes: u32,
    pub token: String,
}

impl VerificationWindow {
    pub fn expires_at(&self) -> Timestamp {
        self.opened_at + minutes(self.duration_minutes)
    }

    /// Active on `[opened_at, expires_at)`
    pub fn is_active(&self, now: Timestamp) -> bool {
        now >= self.opened_at && now < self.expires_at()
    }
}

/// Read-time view of a session's latest verification window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WindowStatus {
    None,
    Active {
        window: VerificationWindow,
        remaining_seconds: u64,
    },
    Expired {
        window: VerificationWindow,
    },
}

/// Derived per-student, per-course rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsenceStat {
    pub student_id: StudentId,
    pub course_code: CourseCode,
    pub present: u32,
    pub absent: u32,
    pub truant: u32,
    pub leave: u32,
    /// Leave or photo check-in awaiting a decision
    pub pending: u32,
    pub unstarted: u32,
    pub total_sessions: u32,
    pub completed_sessions: u32,
    /// Present share of completed sessions; None until one completes
    pub attendance_rate: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordSort {
    #[default]
    StartAscending,
    StartDescending,
}

/// Offset pagination for read projections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 200;

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Limit clamped to `1..=MAX_PAGE_LIMIT`
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_LIMIT)
    }

    /// Offset of the page after this one, given how many rows came back
    pub fn next_offset(&self, returned: usize) -> Option<usize> {
        (returned == self.effective_limit()).then(|| self.offset + returned)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(0, DEFAULT_PAGE_LIMIT)
    }
}

/// A record as seen at read time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordView {
    pub record: AttendanceRecord,
    /// Stored status with the lazy absent/truant rollup applied
    pub effective_status: AttendanceStatus,
    pub course_code: CourseCode,
    pub start_time: Timestamp,
    pub end_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub items: Vec<RecordView>,
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeavePage {
    pub items: Vec<LeaveApplication>,
    pub next_offset: Option<usize>,
}

/// Client role, derived from socket peer credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Front-end gateway acting for students and teachers
    Gateway,
    /// Root, the service's own UID, or a configured admin UID: may manage
    /// sessions and reload config
    Admin,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_healthy: bool,
}
