//! Configuration validation

use crate::policy::{
    EnginePolicy, DEFAULT_MAX_VERIFICATION_MINUTES, DEFAULT_VERIFICATION_MINUTES,
};
use crate::schema::{RawAttendanceConfig, RawConfig, RawServiceConfig};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error("[attendance] {field}: {message}")]
    AttendanceError { field: &'static str, message: String },

    #[error("[service] {field}: {message}")]
    ServiceError { field: &'static str, message: String },

    #[error("Duplicate admin UID: {0}")]
    DuplicateAdminUid(u32),
}

fn attendance(field: &'static str, message: impl Into<String>) -> ValidationError {
    ValidationError::AttendanceError {
        field,
        message: message.into(),
    }
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_service(&config.service);
    errors.extend(validate_attendance(&config.attendance));
    errors
}

fn validate_service(service: &RawServiceConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    for (field, path) in [
        ("socket_path", &service.socket_path),
        ("data_dir", &service.data_dir),
    ] {
        if let Some(path) = path
            && path.as_os_str().is_empty()
        {
            errors.push(ValidationError::ServiceError {
                field,
                message: "path cannot be empty".into(),
            });
        }
    }

    let mut seen = HashSet::new();
    for uid in &service.admin_uids {
        if !seen.insert(uid) {
            errors.push(ValidationError::DuplicateAdminUid(*uid));
        }
    }

    errors
}

fn validate_attendance(raw: &RawAttendanceConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let offsets = EnginePolicy::from_raw(raw.clone()).default_offsets;
    errors.extend(
        offsets
            .validate()
            .into_iter()
            .map(|v| attendance(v.field, v.message)),
    );

    let default_duration = raw
        .verification_default_duration_minutes
        .unwrap_or(DEFAULT_VERIFICATION_MINUTES);
    let max_duration = raw
        .verification_max_duration_minutes
        .unwrap_or(DEFAULT_MAX_VERIFICATION_MINUTES);
    if default_duration == 0 {
        errors.push(attendance(
            "verification_default_duration_minutes",
            "must be greater than 0",
        ));
    }
    if max_duration == 0 {
        errors.push(attendance(
            "verification_max_duration_minutes",
            "must be greater than 0",
        ));
    }
    if default_duration > max_duration {
        errors.push(attendance(
            "verification_default_duration_minutes",
            format!(
                "{} exceeds verification_max_duration_minutes ({})",
                default_duration, max_duration
            ),
        ));
    }

    if let Some(distance) = raw.max_location_distance_m
        && !(distance.is_finite() && distance > 0.0)
    {
        errors.push(attendance(
            "max_location_distance_m",
            format!("{} is not a positive distance", distance),
        ));
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(attendance: RawAttendanceConfig) -> RawConfig {
        RawConfig {
            config_version: 1,
            service: Default::default(),
            attendance,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&config_with(Default::default())).is_empty());
    }

    #[test]
    fn auto_absent_must_precede_window_close() {
        let config = config_with(RawAttendanceConfig {
            checkin_post_minutes: Some(10),
            auto_absent_after_minutes: Some(10),
            ..Default::default()
        });

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("auto_absent_after_minutes"));
    }

    #[test]
    fn verification_durations_checked() {
        let config = config_with(RawAttendanceConfig {
            verification_default_duration_minutes: Some(20),
            verification_max_duration_minutes: Some(5),
            ..Default::default()
        });
        assert_eq!(validate_config(&config).len(), 1);

        let config = config_with(RawAttendanceConfig {
            verification_default_duration_minutes: Some(0),
            ..Default::default()
        });
        assert_eq!(validate_config(&config).len(), 1);
    }

    #[test]
    fn bad_distance_and_empty_window() {
        let config = config_with(RawAttendanceConfig {
            checkin_pre_minutes: Some(0),
            checkin_post_minutes: Some(0),
            max_location_distance_m: Some(-5.0),
            ..Default::default()
        });
        assert_eq!(validate_config(&config).len(), 2);
    }

    #[test]
    fn duplicate_admin_uid_detection() {
        let mut config = config_with(Default::default());
        config.service.admin_uids = vec![1000, 1000];

        let errors = validate_config(&config);
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::DuplicateAdminUid(1000)))
        );
    }
}
