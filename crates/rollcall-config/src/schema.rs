//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Attendance rules applied to every session
    #[serde(default)]
    pub attendance: RawAttendanceConfig,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/rollcalld/rollcalld.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the database and attachments
    pub data_dir: Option<PathBuf>,

    /// Peer UIDs allowed to run administrative commands, in addition to
    /// root and the service's own user
    #[serde(default)]
    pub admin_uids: Vec<u32>,
}

/// Attendance rule defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawAttendanceConfig {
    /// Minutes before start the check-in window opens
    pub checkin_pre_minutes: Option<u32>,

    /// Minutes after start the check-in window closes
    pub checkin_post_minutes: Option<u32>,

    /// Untouched records read as absent this many minutes after start
    pub auto_absent_after_minutes: Option<u32>,

    /// Leave must be requested this many minutes before start (0 or unset:
    /// at start)
    pub leave_deadline_minutes_before_start: Option<u32>,

    /// Earliest a verification window may open, in minutes after start
    pub verification_min_delay_minutes: Option<u32>,

    /// Window length when the teacher does not pick one
    pub verification_default_duration_minutes: Option<u32>,

    /// Longest window a teacher may open
    pub verification_max_duration_minutes: Option<u32>,

    /// Accepted distance between a check-in and the room, in meters
    pub max_location_distance_m: Option<f64>,
}
