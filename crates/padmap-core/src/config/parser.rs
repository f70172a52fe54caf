// Padmap Config Parser - TOML with Serde
// Parses configuration from TOML files

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::axis::StickShape;
use crate::settings::{EngineSettings, PadSettings, SettingsError};

/// Configuration parser errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(String),
}

/// Main configuration structure (root TOML table)
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    /// Engine-wide settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Per-pad overrides in user order
    #[serde(default)]
    pub pad: Vec<PadConfig>,

    /// Custom controls registered before mappings are compiled
    #[serde(default)]
    pub custom: CustomConfig,

    /// Mappings in declaration order
    #[serde(default)]
    pub mapping: Vec<MappingToml>,
}

/// General settings
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    pub users: Option<usize>,
    pub key_repeat_delay_ms: Option<u64>,
    pub key_repeat_interval_ms: Option<u64>,
    pub motion_interval_ms: Option<u64>,
    pub rotate_interval_ms: Option<u64>,
    pub mouse_speed: Option<f64>,
    pub wheel_speed: Option<f64>,
    pub default_rate: Option<f64>,
}

/// Per-pad options
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PadConfig {
    pub stick_shape: Option<StickShape>,
    pub connected: Option<bool>,
}

/// Custom control declarations
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomConfig {
    /// User-less boolean variables
    #[serde(default)]
    pub vars: Vec<String>,

    /// Extension outputs forwarded to the host
    #[serde(default)]
    pub keys: Vec<String>,
}

/// One `[[mapping]]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingToml {
    /// Source control, optionally suffixed with `@user`
    pub source: String,

    /// Destination control, optionally suffixed with `@user`
    pub target: String,

    pub strength: Option<f64>,

    /// Seconds
    pub rate: Option<f64>,

    #[serde(default)]
    pub options: Vec<String>,

    /// Condition expression
    pub when: Option<String>,

    /// Configuration name for `LoadConfig`
    pub payload: Option<String>,
}

impl ConfigToml {
    /// Parse a TOML configuration file
    pub fn from_toml_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))
    }

    /// Resolve [general] over the defaults
    ///
    /// Unusable values are replaced and returned as errors.
    pub fn engine_settings(&self) -> (EngineSettings, Vec<SettingsError>) {
        let defaults = EngineSettings::default();
        let g = &self.general;
        let ms = |value: Option<u64>, default: Duration| value.map(Duration::from_millis).unwrap_or(default);
        let mut settings = EngineSettings {
            users: g.users.unwrap_or(defaults.users),
            key_repeat_delay: ms(g.key_repeat_delay_ms, defaults.key_repeat_delay),
            key_repeat_interval: ms(g.key_repeat_interval_ms, defaults.key_repeat_interval),
            motion_interval: ms(g.motion_interval_ms, defaults.motion_interval),
            rotate_interval: ms(g.rotate_interval_ms, defaults.rotate_interval),
            mouse_speed: g.mouse_speed.unwrap_or(defaults.mouse_speed),
            wheel_speed: g.wheel_speed.unwrap_or(defaults.wheel_speed),
            default_rate: g.default_rate.unwrap_or(defaults.default_rate),
        };
        let errors = settings.sanitize();
        (settings, errors)
    }

    /// Per-pad options for every configured user; tables past `users` are ignored
    pub fn pad_settings(&self, users: usize) -> Vec<PadSettings> {
        let mut pads = vec![PadSettings::default(); users];
        for (settings, config) in pads.iter_mut().zip(&self.pad) {
            if let Some(shape) = config.stick_shape {
                settings.stick_shape = shape;
            }
            if let Some(connected) = config.connected {
                settings.connected = connected;
            }
        }
        pads
    }
}
