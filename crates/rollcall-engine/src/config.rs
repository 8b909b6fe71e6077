//! Engine configuration and open-session option resolution.

use std::ops::RangeInclusive;
use std::time::Duration;

use rollcall_protocol::{GeoFence, OpenSessionRequest};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::AttendanceError;

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Values used when an open request leaves an option out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenDefaults {
    pub duration_mins: u32,
    pub late_threshold_mins: u32,
    pub rotation_secs: u32,
}

impl Default for OpenDefaults {
    fn default() -> Self {
        Self {
            duration_mins: 15,
            late_threshold_mins: 10,
            rotation_secs: 15,
        }
    }
}

/// Configuration for an [`AttendanceEngine`](crate::AttendanceEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub open_defaults: OpenDefaults,

    /// How long a token entry outlives its logical expiry in the store.
    pub token_grace: Duration,

    /// How often the auto-close sweep looks for sessions past deadline.
    pub sweep_interval: Duration,

    /// Upper bound on any single call to the classroom roster or the
    /// downstream event sink.
    pub collaborator_timeout: Duration,

    /// Maximum concurrently active devices per student.
    pub max_active_devices: usize,

    /// Prefix of the URL encoded into QR codes.
    pub checkin_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            open_defaults: OpenDefaults::default(),
            token_grace: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(60),
            collaborator_timeout: Duration::from_secs(3),
            max_active_devices: 2,
            checkin_base_url: "http://localhost:3003".into(),
        }
    }
}

impl EngineConfig {
    /// Accepted session length, in minutes.
    pub const DURATION_MINS: RangeInclusive<u32> = 1..=120;
    /// Accepted late threshold, in minutes.
    pub const LATE_THRESHOLD_MINS: RangeInclusive<u32> = 1..=60;
    /// Accepted token rotation period, in seconds.
    pub const ROTATION_SECS: RangeInclusive<u32> = 5..=60;

    /// Clamp out-of-range values so the config is safe to use.
    pub fn validated(mut self) -> Self {
        let d = &mut self.open_defaults;
        d.duration_mins = clamp_logged("duration_mins", d.duration_mins, &Self::DURATION_MINS);
        d.late_threshold_mins = clamp_logged(
            "late_threshold_mins",
            d.late_threshold_mins,
            &Self::LATE_THRESHOLD_MINS,
        );
        d.rotation_secs = clamp_logged("rotation_secs", d.rotation_secs, &Self::ROTATION_SECS);

        if self.sweep_interval < Duration::from_secs(1) {
            warn!("sweep_interval below 1s, clamping");
            self.sweep_interval = Duration::from_secs(1);
        }
        if self.collaborator_timeout.is_zero() {
            warn!("collaborator_timeout is zero, using 1s");
            self.collaborator_timeout = Duration::from_secs(1);
        }
        if self.max_active_devices == 0 {
            warn!("max_active_devices is zero, using 1");
            self.max_active_devices = 1;
        }
        self.checkin_base_url = self.checkin_base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Applies defaults to `req` and checks every option against its
    /// accepted range.
    ///
    /// # Errors
    /// [`AttendanceError::InvalidOptions`] naming the first bad option.
    pub fn resolve(&self, req: &OpenSessionRequest) -> Result<SessionOptions, AttendanceError> {
        let d = &self.open_defaults;
        let duration_mins = check(
            "duration_minutes",
            req.duration_minutes.unwrap_or(d.duration_mins),
            &Self::DURATION_MINS,
        )?;
        let late_threshold_mins = check(
            "late_threshold_minutes",
            req.late_threshold_minutes.unwrap_or(d.late_threshold_mins),
            &Self::LATE_THRESHOLD_MINS,
        )?;
        let rotation_secs = check(
            "rotation_seconds",
            req.rotation_seconds.unwrap_or(d.rotation_secs),
            &Self::ROTATION_SECS,
        )?;
        if let Some(fence) = &req.geofence {
            check_geofence(fence)?;
        }

        Ok(SessionOptions {
            duration_mins,
            late_threshold_mins,
            rotation_secs,
            geofence: req.geofence,
        })
    }
}

/// Fully-resolved options for one new session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub duration_mins: u32,
    pub late_threshold_mins: u32,
    pub rotation_secs: u32,
    pub geofence: Option<GeoFence>,
}

fn check(name: &str, value: u32, range: &RangeInclusive<u32>) -> Result<u32, AttendanceError> {
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(AttendanceError::InvalidOptions(format!(
            "{name} must be between {} and {}, got {value}",
            range.start(),
            range.end()
        )))
    }
}

fn check_geofence(fence: &GeoFence) -> Result<(), AttendanceError> {
    if !fence.center.is_valid() {
        return Err(AttendanceError::InvalidOptions(
            "geofence center is not a valid coordinate".into(),
        ));
    }
    if !(fence.radius_m.is_finite() && fence.radius_m > 0.0) {
        return Err(AttendanceError::InvalidOptions(
            "geofence radius must be positive".into(),
        ));
    }
    Ok(())
}

fn clamp_logged(name: &str, value: u32, range: &RangeInclusive<u32>) -> u32 {
    let clamped = value.clamp(*range.start(), *range.end());
    if clamped != value {
        warn!(option = name, value, clamped, "default out of range, clamping");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_protocol::{AttendanceMethod, Coordinates};

    fn request() -> OpenSessionRequest {
        OpenSessionRequest::new("cs-1", AttendanceMethod::Qr)
    }

    #[test]
    fn test_engine_config_default() {
        let config = EngineConfig::default();
        assert_eq!(config.open_defaults.duration_mins, 15);
        assert_eq!(config.open_defaults.late_threshold_mins, 10);
        assert_eq!(config.open_defaults.rotation_secs, 15);
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_active_devices, 2);
        assert_eq!(config.checkin_base_url, "http://localhost:3003");
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let opts = EngineConfig::default().resolve(&request()).unwrap();
        assert_eq!(
            opts,
            SessionOptions {
                duration_mins: 15,
                late_threshold_mins: 10,
                rotation_secs: 15,
                geofence: None,
            }
        );
    }

    #[test]
    fn test_resolve_rejects_out_of_range_rotation() {
        let req = OpenSessionRequest {
            rotation_seconds: Some(2),
            ..request()
        };
        let err = EngineConfig::default().resolve(&req).unwrap_err();
        assert!(matches!(err, AttendanceError::InvalidOptions(ref m) if m.contains("rotation_seconds")));
    }

    #[test]
    fn test_resolve_accepts_range_bounds() {
        let req = OpenSessionRequest {
            duration_minutes: Some(120),
            late_threshold_minutes: Some(1),
            rotation_seconds: Some(60),
            ..request()
        };
        assert!(EngineConfig::default().resolve(&req).is_ok());

        let req = OpenSessionRequest {
            duration_minutes: Some(0),
            ..request()
        };
        assert!(EngineConfig::default().resolve(&req).is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_geofence() {
        let req = OpenSessionRequest {
            geofence: Some(GeoFence {
                center: Coordinates { latitude: 10.0, longitude: 106.0 },
                radius_m: 0.0,
            }),
            ..request()
        };
        assert!(EngineConfig::default().resolve(&req).is_err());
    }

    #[test]
    fn test_validated_clamps_defaults_and_trims_url() {
        let config = EngineConfig {
            open_defaults: OpenDefaults {
                duration_mins: 500,
                late_threshold_mins: 0,
                rotation_secs: 1,
            },
            checkin_base_url: "https://rollcall.example/".into(),
            ..Default::default()
        }
        .validated();
        assert_eq!(config.open_defaults.duration_mins, 120);
        assert_eq!(config.open_defaults.late_threshold_mins, 1);
        assert_eq!(config.open_defaults.rotation_secs, 5);
        assert_eq!(config.checkin_base_url, "https://rollcall.example");
    }
}
