use std::path::Path;

use error_stack::{Report, ResultExt};
use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}

fn default_data_dir() -> String {
    "./data".into()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Accepted values: `"text"` | `"json"`
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// The alert store file lives at `<data_dir>/alerts.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            data_dir: default_data_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitor cycles when `--interval` is not given.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Bounded wait for a single quote fetch within a cycle.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NotificationConfig {
    /// Whether to attempt desktop notifications at all.
    #[serde(default = "default_true")]
    pub desktop: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            desktop: default_true(),
        }
    }
}

/// Load an `AppConfig`.
///
/// With an explicit `path` the file must exist. With `None`, the default
/// path is tried and a missing file yields the built-in defaults, so the
/// tool works without any configuration.
pub fn load_or_default(path: Option<&Path>) -> Result<AppConfig, Report<ConfigError>> {
    let (path, required) = match path {
        Some(p) => (p, true),
        None => (Path::new(DEFAULT_CONFIG_PATH), false),
    };

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
            return Ok(AppConfig::default());
        }
        Err(e) => {
            return Err(e)
                .change_context(ConfigError::ReadFile)
                .attach_with(|| format!("path: {}", path.display()));
        }
    };

    let config: AppConfig = toml::from_str(&content).change_context(ConfigError::Parse {
        reason: "invalid TOML syntax or schema mismatch".into(),
    })?;

    validate(&config)?;

    Ok(config)
}

fn validate(config: &AppConfig) -> Result<(), Report<ConfigError>> {
    if !matches!(config.general.log_format.as_str(), "text" | "json") {
        return Err(Report::new(ConfigError::Validation {
            field: format!(
                "general.log_format must be \"text\" or \"json\", got \"{}\"",
                config.general.log_format
            ),
        }));
    }

    if config.monitor.interval_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "monitor.interval_secs must be at least 1".into(),
        }));
    }

    if config.monitor.fetch_timeout_secs == 0 {
        return Err(Report::new(ConfigError::Validation {
            field: "monitor.fetch_timeout_secs must be at least 1".into(),
        }));
    }

    Ok(())
}
