//! Validated policy structures

use crate::schema::{RawAttendanceConfig, RawConfig, RawServiceConfig};
use rollcall_api::{LeaveDeadlineRule, SessionOffsets};
use rollcall_util::{data_dir_without_env, socket_path_without_env};
use std::path::PathBuf;

pub const DEFAULT_CHECKIN_OFFSET_MINUTES: u32 = 10;
pub const DEFAULT_VERIFICATION_MIN_DELAY_MINUTES: u32 = 10;
pub const DEFAULT_VERIFICATION_MINUTES: u32 = 2;
pub const DEFAULT_MAX_VERIFICATION_MINUTES: u32 = 30;
pub const DEFAULT_MAX_LOCATION_DISTANCE_M: f64 = 100.0;

/// Validated configuration
#[derive(Debug, Clone, Default)]
pub struct Policy {
    pub service: ServiceConfig,
    pub engine: EnginePolicy,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        Self {
            service: ServiceConfig::from_raw(raw.service),
            engine: EnginePolicy::from_raw(raw.attendance),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    pub admin_uids: Vec<u32>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        Self {
            socket_path: raw.socket_path.unwrap_or_else(socket_path_without_env),
            data_dir: raw.data_dir.unwrap_or_else(data_dir_without_env),
            admin_uids: raw.admin_uids,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_raw(RawServiceConfig::default())
    }
}

/// Rules the attendance engine applies
#[derive(Debug, Clone, PartialEq)]
pub struct EnginePolicy {
    /// Offsets given to sessions created without their own
    pub default_offsets: SessionOffsets,
    pub verification_min_delay_minutes: u32,
    pub verification_default_minutes: u32,
    pub verification_max_minutes: u32,
    pub max_location_distance_m: f64,
}

impl EnginePolicy {
    pub(crate) fn from_raw(raw: RawAttendanceConfig) -> Self {
        let leave_deadline = match raw.leave_deadline_minutes_before_start {
            None | Some(0) => LeaveDeadlineRule::AtStart,
            Some(minutes) => LeaveDeadlineRule::BeforeStart { minutes },
        };

        Self {
            default_offsets: SessionOffsets {
                checkin_pre_minutes: raw
                    .checkin_pre_minutes
                    .unwrap_or(DEFAULT_CHECKIN_OFFSET_MINUTES),
                checkin_post_minutes: raw
                    .checkin_post_minutes
                    .unwrap_or(DEFAULT_CHECKIN_OFFSET_MINUTES),
                leave_deadline,
                auto_absent_after_minutes: raw.auto_absent_after_minutes,
            },
            verification_min_delay_minutes: raw
                .verification_min_delay_minutes
                .unwrap_or(DEFAULT_VERIFICATION_MIN_DELAY_MINUTES),
            verification_default_minutes: raw
                .verification_default_duration_minutes
                .unwrap_or(DEFAULT_VERIFICATION_MINUTES),
            verification_max_minutes: raw
                .verification_max_duration_minutes
                .unwrap_or(DEFAULT_MAX_VERIFICATION_MINUTES),
            max_location_distance_m: raw
                .max_location_distance_m
                .unwrap_or(DEFAULT_MAX_LOCATION_DISTANCE_M),
        }
    }
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self::from_raw(RawAttendanceConfig::default())
    }
}
