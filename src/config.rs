use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::debug;

use crate::error::ConfigError;
use crate::handlers::{DEFAULT_VANE_FAN_BYTE, PinCode};
use crate::protocol::TRANSPORT_CHUNK_SIZE;

const CONFIG_FILE_NAME: &str = "config.json";

/// Per-device controller settings.
///
/// Loaded from JSON; every field is optional in the file and falls back to
/// the builder default. Durations are written in milliseconds.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Four-digit pairing PIN shown in the controller's settings menu.
    #[builder(default)]
    pub pin: u16,
    /// Delay before the first update cycle.
    #[serde(rename = "initial_delay_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = Duration::from_millis(250))]
    pub initial_delay: Duration,
    #[serde(rename = "update_interval_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = Duration::from_secs(10))]
    pub update_interval: Duration,
    /// Bounded wait for each command's reply.
    #[serde(rename = "reply_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[builder(default = Duration::from_secs(5))]
    pub reply_timeout: Duration,
    #[builder(default = TRANSPORT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Run an update cycle as soon as a host setter changes a field.
    #[builder(default)]
    pub update_on_change: bool,
    /// Vane/fan byte for control commands sent before the first status
    /// reply; afterwards it is rebuilt from the reply's fan and vane bytes.
    #[builder(default = DEFAULT_VANE_FAN_BYTE)]
    pub vane_fan_byte: u8,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl ControllerConfig {
    /// Reads a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`] when the file
    /// cannot be used, and a validation error for out-of-range values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded controller config");
        Ok(config)
    }

    /// Loads `path` when given, otherwise the default location if it exists,
    /// otherwise the built-in defaults.
    ///
    /// # Errors
    ///
    /// Propagates [`ControllerConfig::load`] failures.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Checks values that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pin`] for a PIN above 9999 and
    /// [`ConfigError::ZeroChunkSize`] for a zero chunk size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pin_code()?;
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }
        Ok(())
    }

    /// Returns the validated PIN.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Pin`] when the PIN has more than four digits.
    pub fn pin_code(&self) -> Result<PinCode, ConfigError> {
        Ok(PinCode::new(self.pin)?)
    }
}

/// `<config dir>/matouch/config.json`, when the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "matouch")
        .map(|project_dirs| project_dirs.config_dir().join(CONFIG_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::handlers::PinCodeError;

    fn unique_temp_path(file_name: &str) -> PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time should be after unix epoch")
            .as_nanos();
        std::env::temp_dir().join(format!("matouch-{file_name}-{suffix}.json"))
    }

    #[test]
    fn defaults_follow_reference_schedule() {
        let config = ControllerConfig::default();

        assert_eq!(0, config.pin);
        assert_eq!(Duration::from_millis(250), config.initial_delay);
        assert_eq!(Duration::from_secs(10), config.update_interval);
        assert_eq!(Duration::from_secs(5), config.reply_timeout);
        assert_eq!(20, config.chunk_size);
        assert!(!config.update_on_change);
        assert_eq!(0x64, config.vane_fan_byte);
    }

    #[test]
    fn load_merges_partial_file_with_defaults() {
        let path = unique_temp_path("partial");
        fs::write(&path, r#"{ "pin": 1234, "update_interval_ms": 30000 }"#)
            .expect("fixture should write");

        let config = ControllerConfig::load(&path).expect("partial config should load");
        fs::remove_file(&path).expect("fixture should be removable");

        assert_eq!(
            ControllerConfig::builder()
                .pin(1234)
                .update_interval(Duration::from_secs(30))
                .build(),
            config
        );
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let path = unique_temp_path("unknown");
        fs::write(&path, r#"{ "pin_code": 1 }"#).expect("fixture should write");

        let loaded = ControllerConfig::load(&path);
        fs::remove_file(&path).expect("fixture should be removable");

        assert_matches!(loaded, Err(ConfigError::Parse { .. }));
    }

    #[test]
    fn load_reports_missing_file() {
        let path = unique_temp_path("missing");
        assert_matches!(ControllerConfig::load(&path), Err(ConfigError::Read { .. }));
    }

    #[test]
    fn validate_rejects_long_pin_and_zero_chunk() {
        assert_matches!(
            ControllerConfig::builder().pin(10_000).build().validate(),
            Err(ConfigError::Pin(PinCodeError::OutOfRange { .. }))
        );
        assert_matches!(
            ControllerConfig::builder().chunk_size(0).build().validate(),
            Err(ConfigError::ZeroChunkSize)
        );
    }
}
