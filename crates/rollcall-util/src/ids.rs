//! Strongly-typed identifiers for rollcall

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifiers assigned by an external system (timetable, roster, rooms)
macro_rules! external_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

/// Surrogate keys minted by rollcall itself
macro_rules! surrogate_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse the hyphenated form written by `Display`
            pub fn parse_str(s: &str) -> Option<Self> {
                Uuid::parse_str(s).ok().map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

external_id!(
    /// One scheduled class meeting
    SessionId
);
external_id!(
    /// Course the session belongs to
    CourseCode
);
external_id!(StudentId);
external_id!(TeacherId);
external_id!(
    /// Location identifier handed to the location validator
    RoomId
);
external_id!(
    /// Opaque reference returned by the attachment store
    AttachmentRef
);

surrogate_id!(
    /// One attendance record per (session, student)
    RecordId
);
surrogate_id!(ApplicationId);
surrogate_id!(WindowId);
surrogate_id!(
    /// Unique identifier for a connected IPC client
    ClientId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_equality() {
        let id1 = SessionId::new("cs101-2025-03-01");
        let id2 = SessionId::new("cs101-2025-03-01");
        let id3 = SessionId::new("cs101-2025-03-08");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn record_id_uniqueness() {
        let r1 = RecordId::new();
        let r2 = RecordId::new();
        assert_ne!(r1, r2);
    }

    #[test]
    fn surrogate_id_parses_display_form() {
        let id = ApplicationId::new();
        let parsed = ApplicationId::parse_str(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
        assert!(ApplicationId::parse_str("not-a-uuid").is_none());
    }

    #[test]
    fn ids_serialize_deserialize() {
        let student = StudentId::new("s-2025-0042");
        let json = serde_json::to_string(&student).unwrap();
        assert_eq!(json, "\"s-2025-0042\"");
        let parsed: StudentId = serde_json::from_str(&json).unwrap();
        assert_eq!(student, parsed);

        let window = WindowId::new();
        let json = serde_json::to_string(&window).unwrap();
        let parsed: WindowId = serde_json::from_str(&json).unwrap();
        assert_eq!(window, parsed);
    }
}
