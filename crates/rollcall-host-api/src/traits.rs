//! Capability traits

use rollcall_api::GeoPoint;
use rollcall_util::{AttachmentRef, AttendanceError, RoomId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from collaborator capabilities
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Capability unavailable: {0}")]
    Unavailable(String),

    #[error("Attachment not found: {0}")]
    AttachmentNotFound(AttachmentRef),

    #[error("Unknown room: {0}")]
    UnknownRoom(RoomId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CapabilityResult<T> = Result<T, CapabilityError>;

impl From<CapabilityError> for AttendanceError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::AttachmentNotFound(attachment) => {
                AttendanceError::not_found(format!("attachment {}", attachment))
            }
            other => AttendanceError::capability(other.to_string()),
        }
    }
}

/// Outcome of a location check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationVerdict {
    pub valid: bool,
    /// Distance from the room in meters, when the validator measured one
    pub distance_m: Option<f64>,
    pub matched_room: Option<RoomId>,
}

impl LocationVerdict {
    pub fn accepted(room: &RoomId, distance_m: Option<f64>) -> Self {
        Self {
            valid: true,
            distance_m,
            matched_room: Some(room.clone()),
        }
    }

    pub fn rejected(distance_m: Option<f64>) -> Self {
        Self {
            valid: false,
            distance_m,
            matched_room: None,
        }
    }
}

/// Decides whether a reported position counts as "in the room"
pub trait LocationValidator: Send + Sync {
    fn validate(
        &self,
        location: &GeoPoint,
        room: &RoomId,
        max_distance_m: f64,
    ) -> CapabilityResult<LocationVerdict>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Opaque blob storage for leave attachments
pub trait AttachmentStore: Send + Sync {
    fn put(&self, data: &[u8]) -> CapabilityResult<AttachmentRef>;

    fn get(&self, attachment: &AttachmentRef) -> CapabilityResult<Vec<u8>>;

    fn is_healthy(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_util::ErrorKind;

    #[test]
    fn missing_attachment_maps_to_not_found() {
        let err: AttendanceError =
            CapabilityError::AttachmentNotFound(AttachmentRef::new("doc-1")).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn other_failures_map_to_capability() {
        let err: AttendanceError = CapabilityError::Unavailable("gps backend down".into()).into();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert!(err.detail().contains("gps backend down"));
    }
}
