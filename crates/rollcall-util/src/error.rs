//! Error types for rollcall

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for attendance engine operations.
///
/// Every variant carries the violated guard in human-readable form so a
/// client can render an actionable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttendanceError {
    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deadline passed: {0}")]
    DeadlinePassed(String),

    #[error("Duplicate application: {0}")]
    DuplicateApplication(String),

    #[error("Verification window already active: {0}")]
    WindowAlreadyActive(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already checked in: {0}")]
    AlreadyCheckedIn(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Capability error: {0}")]
    Capability(String),
}

/// Discriminant of [`AttendanceError`], for branching without matching on
/// payloads or messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotEligible,
    InvalidTransition,
    Conflict,
    DeadlinePassed,
    DuplicateApplication,
    WindowAlreadyActive,
    ValidationFailed,
    NotFound,
    AlreadyCheckedIn,
    Store,
    Capability,
}

impl AttendanceError {
    pub fn not_eligible(msg: impl Into<String>) -> Self {
        Self::NotEligible(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn deadline_passed(msg: impl Into<String>) -> Self {
        Self::DeadlinePassed(msg.into())
    }

    pub fn duplicate_application(msg: impl Into<String>) -> Self {
        Self::DuplicateApplication(msg.into())
    }

    pub fn window_already_active(msg: impl Into<String>) -> Self {
        Self::WindowAlreadyActive(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn already_checked_in(msg: impl Into<String>) -> Self {
        Self::AlreadyCheckedIn(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotEligible(_) => ErrorKind::NotEligible,
            Self::InvalidTransition(_) => ErrorKind::InvalidTransition,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DeadlinePassed(_) => ErrorKind::DeadlinePassed,
            Self::DuplicateApplication(_) => ErrorKind::DuplicateApplication,
            Self::WindowAlreadyActive(_) => ErrorKind::WindowAlreadyActive,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyCheckedIn(_) => ErrorKind::AlreadyCheckedIn,
            Self::Store(_) => ErrorKind::Store,
            Self::Capability(_) => ErrorKind::Capability,
        }
    }

    /// The guard description without the kind prefix
    pub fn detail(&self) -> &str {
        match self {
            Self::NotEligible(m)
            | Self::InvalidTransition(m)
            | Self::Conflict(m)
            | Self::DeadlinePassed(m)
            | Self::DuplicateApplication(m)
            | Self::WindowAlreadyActive(m)
            | Self::ValidationFailed(m)
            | Self::NotFound(m)
            | Self::AlreadyCheckedIn(m)
            | Self::Store(m)
            | Self::Capability(m) => m,
        }
    }
}

pub type Result<T> = std::result::Result<T, AttendanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = AttendanceError::not_eligible("check-in window closed at 09:10");
        assert_eq!(err.kind(), ErrorKind::NotEligible);
        assert_eq!(err.detail(), "check-in window closed at 09:10");
        assert_eq!(
            err.to_string(),
            "Not eligible: check-in window closed at 09:10"
        );
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::WindowAlreadyActive).unwrap();
        assert_eq!(json, "\"window_already_active\"");
    }
}
