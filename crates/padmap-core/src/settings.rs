// Padmap Engine Settings
// Timing, speed and per-pad options resolved from the [general] and [[pad]] tables

use std::time::Duration;

use crate::axis::StickShape;
use crate::device::MAX_USERS;

/// Global engine tuning
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Number of virtual pads, 1..=MAX_USERS
    pub users: usize,
    /// Delay before a held key starts repeating
    pub key_repeat_delay: Duration,
    /// Period of key repeat once started
    pub key_repeat_interval: Duration,
    /// Period of motion and `Add` accumulation ticks
    pub motion_interval: Duration,
    /// Period of rotator ticks
    pub rotate_interval: Duration,
    /// Pointer pixels per motion tick at strength 1.0
    pub mouse_speed: f64,
    /// Wheel notches per motion tick at strength 1.0
    pub wheel_speed: f64,
    /// Rate in seconds used when a mapping gives none
    pub default_rate: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            users: 4,
            key_repeat_delay: Duration::from_millis(500),
            key_repeat_interval: Duration::from_millis(33),
            motion_interval: Duration::from_millis(10),
            rotate_interval: Duration::from_millis(10),
            mouse_speed: 8.0,
            wheel_speed: 1.0,
            default_rate: 1.0,
        }
    }
}

/// Longest accepted rate in seconds
pub const MAX_RATE: f64 = 3600.0;

/// Errors that can occur when validating settings
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("users must be between 1 and {max}, got {0}", max = MAX_USERS)]
    UserCount(usize),

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("{name} must be a positive number, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must be at most {max}, got {value}")]
    TooLarge { name: &'static str, value: f64, max: f64 },
}

impl EngineSettings {
    /// Replace unusable values with defaults, returning one error per fix
    ///
    /// The user count is clamped into 1..=MAX_USERS rather than reset.
    pub fn sanitize(&mut self) -> Vec<SettingsError> {
        let defaults = Self::default();
        let mut errors = Vec::new();

        if self.users == 0 || self.users > MAX_USERS {
            errors.push(SettingsError::UserCount(self.users));
            self.users = self.users.clamp(1, MAX_USERS);
        }
        for (name, interval, default) in [
            ("key_repeat_interval_ms", &mut self.key_repeat_interval, defaults.key_repeat_interval),
            ("motion_interval_ms", &mut self.motion_interval, defaults.motion_interval),
            ("rotate_interval_ms", &mut self.rotate_interval, defaults.rotate_interval),
        ] {
            if interval.is_zero() {
                errors.push(SettingsError::ZeroInterval(name));
                *interval = default;
            }
        }
        for (name, value, default) in [
            ("mouse_speed", &mut self.mouse_speed, defaults.mouse_speed),
            ("wheel_speed", &mut self.wheel_speed, defaults.wheel_speed),
            ("default_rate", &mut self.default_rate, defaults.default_rate),
        ] {
            if !(value.is_finite() && *value > 0.0) {
                errors.push(SettingsError::NotPositive { name, value: *value });
                *value = default;
            }
        }
        if self.default_rate > MAX_RATE {
            errors.push(SettingsError::TooLarge {
                name: "default_rate",
                value: self.default_rate,
                max: MAX_RATE,
            });
            self.default_rate = defaults.default_rate;
        }
        errors
    }
}

/// Per-pad options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PadSettings {
    pub stick_shape: StickShape,
    pub connected: bool,
}

impl Default for PadSettings {
    fn default() -> Self {
        Self {
            stick_shape: StickShape::Square,
            connected: true,
        }
    }
}
