//! Application settings using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (default `config/psu_array.toml`, optional)
//! 2. environment variables prefixed with `PSU_ARRAY_` (`__` separates nested keys)
//!
//! Every field has a default, so an empty or missing file yields a working configuration.
//! The supply array itself is described by a separate document, see [`crate::array_config`].
//!
//! # Example
//! ```no_run
//! use psu_array::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Safety floor: {} A", settings.provisioning.safety_floor_amps);
//! # Ok::<(), psu_array::error::PsuError>(())
//! ```

use crate::channel::DEFAULT_SAFETY_FLOOR_AMPS;
use crate::error::{AppResult, PsuError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default location of the settings file.
pub const DEFAULT_SETTINGS_PATH: &str = "config/psu_array.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub provisioning: ProvisioningSettings,
    #[serde(default)]
    pub sequencing: SequencingSettings,
    #[serde(default)]
    pub trace: TraceSettings,
}

/// Application-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Network transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// TCP port of the raw SCPI socket, used when an address carries no port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Timeout for connecting and for each exchange
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Appended to every command
    #[serde(default = "default_termination")]
    pub write_termination: String,
    /// Ends every response
    #[serde(default = "default_termination")]
    pub read_termination: String,
}

/// Provisioning constants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningSettings {
    /// Current limit written to disabled channels, in amperes
    #[serde(default = "default_safety_floor")]
    pub safety_floor_amps: f64,
}

/// Power sequencing delays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencingSettings {
    /// Wait between enabling outputs and taking a status report
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub settle_delay: Duration,
    /// On-time of each channel during a power cycle
    #[serde(default = "default_delay", with = "humantime_serde")]
    pub cycle_pause: Duration,
}

/// Trace acquisition settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSettings {
    /// Buffer over-provisioning factor applied to `duration / period`
    #[serde(default = "default_buffer_margin")]
    pub buffer_margin: f64,
    /// Name of the instrument-side reading buffer
    #[serde(default = "default_buffer_name")]
    pub buffer_name: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_port() -> u16 {
    5025
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_termination() -> String {
    "\n".to_string()
}

fn default_safety_floor() -> f64 {
    DEFAULT_SAFETY_FLOOR_AMPS
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_buffer_margin() -> f64 {
    crate::trace::DEFAULT_BUFFER_MARGIN
}

fn default_buffer_name() -> String {
    "psuTrace".to_string()
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            port: default_port(),
            timeout: default_timeout(),
            write_termination: default_termination(),
            read_termination: default_termination(),
        }
    }
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            safety_floor_amps: default_safety_floor(),
        }
    }
}

impl Default for SequencingSettings {
    fn default() -> Self {
        Self {
            settle_delay: default_delay(),
            cycle_pause: default_delay(),
        }
    }
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self {
            buffer_margin: default_buffer_margin(),
            buffer_name: default_buffer_name(),
        }
    }
}

impl Settings {
    /// Load settings from the default path and environment variables
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from a specific file path
    ///
    /// A missing file is not an error; defaults and the environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Settings = Self::figment(path.as_ref()).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// The provider chain used by [`Settings::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("PSU_ARRAY_").split("__"))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(PsuError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(PsuError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.transport.port == 0 {
            return Err(PsuError::Configuration(
                "transport.port must be greater than 0".into(),
            ));
        }
        if self.transport.timeout.is_zero() {
            return Err(PsuError::Configuration(
                "transport.timeout must be greater than 0".into(),
            ));
        }
        if self.transport.read_termination.chars().count() != 1 {
            return Err(PsuError::Configuration(
                "transport.read_termination must be a single character".into(),
            ));
        }

        let floor = self.provisioning.safety_floor_amps;
        if !(floor.is_finite() && floor > 0.0) {
            return Err(PsuError::Configuration(format!(
                "provisioning.safety_floor_amps must be positive, got {floor}"
            )));
        }

        let margin = self.trace.buffer_margin;
        if !(margin.is_finite() && margin >= 1.0) {
            return Err(PsuError::Configuration(format!(
                "trace.buffer_margin must be at least 1.0, got {margin}"
            )));
        }
        if self.trace.buffer_name.trim().is_empty() || self.trace.buffer_name.contains('"') {
            return Err(PsuError::Configuration(
                "trace.buffer_name must be non-empty and must not contain quotes".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.transport.port, 5025);
        assert_eq!(settings.provisioning.safety_floor_amps, 0.001);
        assert_eq!(settings.trace.buffer_margin, 2.0);
        assert_eq!(settings.sequencing.settle_delay, Duration::from_secs(1));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[transport]
port = 5030
timeout = "750ms"

[provisioning]
safety_floor_amps = 0.002

[sequencing]
settle_delay = "250ms"

[trace]
buffer_name = "bench"
"#
        )
        .unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.transport.port, 5030);
        assert_eq!(settings.transport.timeout, Duration::from_millis(750));
        assert_eq!(settings.provisioning.safety_floor_amps, 0.002);
        assert_eq!(settings.sequencing.settle_delay, Duration::from_millis(250));
        assert_eq!(settings.sequencing.cycle_pause, Duration::from_secs(1));
        assert_eq!(settings.trace.buffer_name, "bench");
        assert_eq!(settings.trace.buffer_margin, 2.0);
    }

    #[test]
    fn rejects_non_positive_safety_floor() {
        let mut settings = Settings::default();
        settings.provisioning.safety_floor_amps = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_small_buffer_margin() {
        let mut settings = Settings::default();
        settings.trace.buffer_margin = 0.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_unknown_log_level() {
        let mut settings = Settings::default();
        settings.application.log_level = "loud".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_quoted_buffer_name() {
        let mut settings = Settings::default();
        settings.trace.buffer_name = "a\"b".into();
        assert!(settings.validate().is_err());
    }
}
