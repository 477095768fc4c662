//! Local capability implementations used by the service binary

use rollcall_api::GeoPoint;
use rollcall_util::{AttachmentRef, RoomId};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{AttachmentStore, CapabilityError, CapabilityResult, LocationValidator, LocationVerdict};

/// Accepts every position.
///
/// Used when no geofencing backend is wired in; every check-in with a
/// location is treated as in the room.
#[derive(Debug, Default)]
pub struct PermissiveLocationValidator;

impl PermissiveLocationValidator {
    pub fn new() -> Self {
        warn!("No geofencing backend configured; all check-in locations will be accepted");
        Self
    }
}

impl LocationValidator for PermissiveLocationValidator {
    fn validate(
        &self,
        location: &GeoPoint,
        room: &RoomId,
        _max_distance_m: f64,
    ) -> CapabilityResult<LocationVerdict> {
        debug!(
            room = %room,
            latitude = location.latitude,
            longitude = location.longitude,
            "Accepting location without distance check"
        );
        Ok(LocationVerdict::accepted(room, None))
    }
}

/// Stores attachments as files named by a fresh UUID in one directory
#[derive(Debug)]
pub struct DirectoryAttachmentStore {
    root: PathBuf,
}

impl DirectoryAttachmentStore {
    pub fn open(root: impl AsRef<Path>) -> CapabilityResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Only refs we minted resolve; anything else could escape the directory
    fn path_for(&self, attachment: &AttachmentRef) -> CapabilityResult<PathBuf> {
        let id = Uuid::parse_str(attachment.as_str())
            .map_err(|_| CapabilityError::AttachmentNotFound(attachment.clone()))?;
        Ok(self.root.join(id.simple().to_string()))
    }
}

impl AttachmentStore for DirectoryAttachmentStore {
    fn put(&self, data: &[u8]) -> CapabilityResult<AttachmentRef> {
        let id = Uuid::new_v4();
        let path = self.root.join(id.simple().to_string());
        fs::write(&path, data)?;

        debug!(attachment = %id, bytes = data.len(), "Stored attachment");
        Ok(AttachmentRef::new(id.to_string()))
    }

    fn get(&self, attachment: &AttachmentRef) -> CapabilityResult<Vec<u8>> {
        let path = self.path_for(attachment)?;
        match fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(CapabilityError::AttachmentNotFound(attachment.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn is_healthy(&self) -> bool {
        self.root.is_dir()
    }
}
