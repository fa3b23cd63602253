//! Engine settings for Courier.
//!
//! Settings live in a small JSON document written to the standard
//! configuration directory (`~/.config/courier/settings.json` on most
//! platforms). A handful of values can also be overridden from the process
//! environment, which is how CI runs usually configure the engine.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use courier_types::VariablePrecedence;
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::expand_tilde;

/// Environment variable allowing callers to override the settings file path.
pub const SETTINGS_PATH_ENV: &str = "COURIER_SETTINGS_PATH";
/// Overrides [`EngineSettings::request_timeout_secs`].
pub const REQUEST_TIMEOUT_ENV: &str = "COURIER_REQUEST_TIMEOUT_SECS";
/// Overrides [`EngineSettings::script_interpreter`]; split on whitespace.
pub const SCRIPT_INTERPRETER_ENV: &str = "COURIER_SCRIPT_INTERPRETER";

/// Default filename for the JSON payload.
pub const SETTINGS_FILE_NAME: &str = "settings.json";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 10;

/// Error surfaced when reading or writing settings fails.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid value for {name}: {value}")]
    InvalidOverride { name: &'static str, value: String },
}

/// Persisted engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Which variable layer wins on key collisions.
    pub variable_precedence: VariablePrecedence,
    /// Upper bound for a single HTTP dispatch.
    pub request_timeout_secs: u64,
    /// Argv of the external script interpreter. Scripts are skipped when unset.
    pub script_interpreter: Option<Vec<String>>,
    /// Upper bound for a single script hook invocation.
    pub script_timeout_secs: u64,
    /// User-Agent sent by the HTTP agent when the request does not set one.
    pub user_agent: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            variable_precedence: VariablePrecedence::default(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            script_interpreter: None,
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
            user_agent: format!("courier/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS),
        }
    }
}

impl EngineSettings {
    /// Load settings from the default location and apply environment overrides.
    pub fn load() -> Result<Self, SettingsError> {
        let path = default_settings_path();
        let mut settings = Self::load_from(&path)?;
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    /// Load settings from an explicit file. A missing file yields defaults; an
    /// unparsable one is logged and replaced by defaults.
    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(settings) => {
                    debug!(path = %path.display(), "loaded engine settings");
                    Ok(Self::with_valid_timeouts(settings, path))
                }
                Err(error) => {
                    warn!(
                        path = %path.display(),
                        error = %error,
                        "Failed to parse settings file; using defaults"
                    );
                    Ok(Self::default())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(SettingsError::Io(error)),
        }
    }

    /// A zero timeout would expire every call at once; such values fall back
    /// to their defaults.
    fn with_valid_timeouts(mut settings: Self, path: &Path) -> Self {
        if settings.request_timeout_secs == 0 {
            warn!(path = %path.display(), "request_timeout_secs must be positive; using default");
            settings.request_timeout_secs = DEFAULT_REQUEST_TIMEOUT_SECS;
        }
        if settings.script_timeout_secs == 0 {
            warn!(path = %path.display(), "script_timeout_secs must be positive; using default");
            settings.script_timeout_secs = DEFAULT_SCRIPT_TIMEOUT_SECS;
        }
        settings
    }

    /// Persist settings as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Apply `COURIER_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) -> Result<(), SettingsError> {
        if let Ok(raw) = env::var(REQUEST_TIMEOUT_ENV) {
            self.request_timeout_secs = raw
                .trim()
                .parse()
                .ok()
                .filter(|secs: &u64| *secs > 0)
                .ok_or_else(|| SettingsError::InvalidOverride {
                    name: REQUEST_TIMEOUT_ENV,
                    value: raw.clone(),
                })?;
        }
        if let Ok(raw) = env::var(SCRIPT_INTERPRETER_ENV) {
            let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
            self.script_interpreter = if argv.is_empty() { None } else { Some(argv) };
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        positive_secs(self.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS)
    }

    pub fn script_timeout(&self) -> Duration {
        positive_secs(self.script_timeout_secs, DEFAULT_SCRIPT_TIMEOUT_SECS)
    }
}

fn positive_secs(secs: u64, default: u64) -> Duration {
    Duration::from_secs(if secs == 0 { default } else { secs })
}

/// Resolve the settings file path, honoring [`SETTINGS_PATH_ENV`].
pub fn default_settings_path() -> PathBuf {
    if let Ok(path) = env::var(SETTINGS_PATH_ENV) {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return expand_tilde(trimmed);
        }
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("courier")
        .join(SETTINGS_FILE_NAME)
}
