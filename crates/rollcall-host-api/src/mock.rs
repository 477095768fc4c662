//! Test doubles for the capability traits

use rollcall_api::GeoPoint;
use rollcall_util::{AttachmentRef, RoomId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{AttachmentStore, CapabilityError, CapabilityResult, LocationValidator, LocationVerdict};

/// A recorded location check
#[derive(Debug, Clone)]
pub struct LocationCall {
    pub location: GeoPoint,
    pub room: RoomId,
    pub max_distance_m: f64,
}

/// Location validator whose verdicts are set by the test
pub struct MockLocationValidator {
    /// Distance reported for every check
    pub distance_m: Arc<Mutex<f64>>,

    /// Configure validate to fail outright
    pub fail: Arc<Mutex<bool>>,

    calls: Arc<Mutex<Vec<LocationCall>>>,
}

impl MockLocationValidator {
    /// Every position is reported as being at the room
    pub fn new() -> Self {
        Self {
            distance_m: Arc::new(Mutex::new(0.0)),
            fail: Arc::new(Mutex::new(false)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every position is reported this far from the room
    pub fn at_distance(distance_m: f64) -> Self {
        let mock = Self::new();
        *mock.distance_m.lock().unwrap() = distance_m;
        mock
    }

    pub fn set_distance(&self, distance_m: f64) {
        *self.distance_m.lock().unwrap() = distance_m;
    }

    pub fn calls(&self) -> Vec<LocationCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockLocationValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationValidator for MockLocationValidator {
    fn validate(
        &self,
        location: &GeoPoint,
        room: &RoomId,
        max_distance_m: f64,
    ) -> CapabilityResult<LocationVerdict> {
        self.calls.lock().unwrap().push(LocationCall {
            location: *location,
            room: room.clone(),
            max_distance_m,
        });

        if *self.fail.lock().unwrap() {
            return Err(CapabilityError::Unavailable("mock location failure".into()));
        }

        let distance = *self.distance_m.lock().unwrap();
        if distance <= max_distance_m {
            Ok(LocationVerdict::accepted(room, Some(distance)))
        } else {
            Ok(LocationVerdict::rejected(Some(distance)))
        }
    }
}

/// Attachment store backed by a map
pub struct InMemoryAttachmentStore {
    next_id: AtomicU64,
    blobs: Mutex<HashMap<AttachmentRef, Vec<u8>>>,
}

impl InMemoryAttachmentStore {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryAttachmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn put(&self, data: &[u8]) -> CapabilityResult<AttachmentRef> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let attachment = AttachmentRef::new(format!("mem-{}", id));
        self.blobs
            .lock()
            .unwrap()
            .insert(attachment.clone(), data.to_vec());
        Ok(attachment)
    }

    fn get(&self, attachment: &AttachmentRef) -> CapabilityResult<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap()
            .get(attachment)
            .cloned()
            .ok_or_else(|| CapabilityError::AttachmentNotFound(attachment.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> GeoPoint {
        GeoPoint {
            latitude: 31.23,
            longitude: 121.47,
            accuracy_m: Some(5.0),
        }
    }

    #[test]
    fn mock_validator_compares_distance() {
        let validator = MockLocationValidator::at_distance(120.0);
        let room = RoomId::new("A-101");

        assert!(!validator.validate(&point(), &room, 100.0).unwrap().valid);

        validator.set_distance(40.0);
        let verdict = validator.validate(&point(), &room, 100.0).unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.distance_m, Some(40.0));

        assert_eq!(validator.calls().len(), 2);
    }

    #[test]
    fn mock_validator_failure() {
        let validator = MockLocationValidator::new();
        *validator.fail.lock().unwrap() = true;

        let result = validator.validate(&point(), &RoomId::new("A-101"), 100.0);
        assert!(matches!(result, Err(CapabilityError::Unavailable(_))));
    }

    #[test]
    fn in_memory_store() {
        let store = InMemoryAttachmentStore::new();
        assert!(store.is_empty());

        let a = store.put(b"scan").unwrap();
        let b = store.put(b"scan").unwrap();
        assert_ne!(a, b);
        assert_eq!(store.get(&a).unwrap(), b"scan");
        assert!(store.get(&AttachmentRef::new("nope")).is_err());
    }
}
