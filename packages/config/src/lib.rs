#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Dashboard configuration.
//!
//! The default configuration is baked into the binary at compile time via
//! [`include_str!`]. A different file can be supplied through
//! `EVICTION_MAP_CONFIG`, and the backend endpoint and key can be
//! overridden individually through `BACKEND_URL` and `BACKEND_API_KEY`.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use eviction_map_backend_models::BackendConfig;
use eviction_map_geography_models::{DisplayMode, Geography, GeographyProfile};
use eviction_map_time_models::{Period, PeriodError, PeriodRange};
use serde::{Deserialize, Serialize};

/// Configuration embedded at compile time.
pub const DEFAULT_CONFIG: &str = include_str!("../config/dashboard.toml");

/// Environment variable naming an override configuration file.
pub const CONFIG_PATH_ENV: &str = "EVICTION_MAP_CONFIG";
/// Environment variable overriding the backend URL.
pub const BACKEND_URL_ENV: &str = "BACKEND_URL";
/// Environment variable overriding the backend API key.
pub const BACKEND_API_KEY_ENV: &str = "BACKEND_API_KEY";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The override file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TOML is malformed or missing required fields.
    #[error("Failed to parse config: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },

    /// The period bounds are invalid.
    #[error("Invalid period bounds: {0}")]
    Period(#[from] PeriodError),

    /// The configuration parsed but is inconsistent.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Configured period bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodBounds {
    /// Earliest period shown on the slider.
    pub start: Period,
    /// Latest period shown on the slider.
    pub end: Period,
    /// Initial slider position, if present in the index.
    #[serde(default)]
    pub preferred: Option<Period>,
}

impl PeriodBounds {
    /// The bounds as a range; also the synthesized fallback index.
    ///
    /// # Errors
    ///
    /// Returns [`PeriodError::InvertedRange`] if `start > end`.
    pub fn range(&self) -> Result<PeriodRange, PeriodError> {
        PeriodRange::new(self.start, self.end)
    }
}

/// UI timing, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timing {
    /// Quiescence window for slider-driven cursor changes.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// How long an operation must run before the loading flag is raised.
    #[serde(default = "default_loading_delay_ms")]
    pub loading_delay_ms: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            loading_delay_ms: default_loading_delay_ms(),
        }
    }
}

impl Timing {
    /// Debounce window.
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Loading indicator delay.
    #[must_use]
    pub const fn loading_delay(&self) -> Duration {
        Duration::from_millis(self.loading_delay_ms)
    }
}

const fn default_debounce_ms() -> u64 {
    250
}

const fn default_loading_delay_ms() -> u64 {
    300
}

/// Complete dashboard configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Geography selected on startup.
    pub default_geography: Geography,
    /// Display mode selected on startup.
    #[serde(default)]
    pub default_mode: DisplayMode,
    /// Choropleth colors, lightest first.
    pub palette: Vec<String>,
    /// Hosted backend connection.
    pub backend: BackendConfig,
    /// Slider bounds and fallback range.
    pub periods: PeriodBounds,
    /// Debounce and loading-indicator timing.
    #[serde(default)]
    pub timing: Timing,
    /// One profile per geography.
    #[serde(rename = "geography")]
    pub geographies: Vec<GeographyProfile>,
}

impl DashboardConfig {
    /// The embedded default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the embedded TOML is invalid.
    pub fn embedded() -> Result<Self, ConfigError> {
        parse_config(DEFAULT_CONFIG)
    }

    /// Reads and validates the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        parse_config(&text)
    }

    /// Profile for `geography`.
    #[must_use]
    pub fn profile(&self, geography: Geography) -> Option<&GeographyProfile> {
        self.geographies.iter().find(|p| p.geography == geography)
    }

    /// Applies backend overrides from `lookup` (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(BACKEND_URL_ENV).filter(|v| !v.trim().is_empty()) {
            log::info!("Backend URL overridden by {BACKEND_URL_ENV}");
            self.backend.url = url.trim().to_string();
        }
        if let Some(key) = lookup(BACKEND_API_KEY_ENV) {
            self.backend.api_key = key.trim().to_string();
        }
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend.url.trim().is_empty() {
            return Err(invalid("backend.url is empty"));
        }

        let bounds = self.periods.range()?;
        if let Some(preferred) = self.periods.preferred
            && !bounds.contains(preferred)
        {
            log::warn!(
                "Preferred period {preferred} is outside {}; the latest period will be used",
                bounds.label()
            );
        }

        let mut seen = BTreeSet::new();
        for profile in &self.geographies {
            if !seen.insert(profile.geography) {
                return Err(invalid(&format!(
                    "geography '{}' is configured more than once",
                    profile.geography
                )));
            }
            if profile.id_property.is_empty() || profile.id_column.is_empty() {
                return Err(invalid(&format!(
                    "geography '{}' needs both id_property and id_column",
                    profile.geography
                )));
            }
            for mode in [DisplayMode::Count, DisplayMode::Rate] {
                let breakpoints = profile.breakpoints(mode);
                if breakpoints.is_empty() || breakpoints.windows(2).any(|w| w[0] >= w[1]) {
                    return Err(invalid(&format!(
                        "geography '{}' {mode} breakpoints must be non-empty and strictly increasing",
                        profile.geography
                    )));
                }
                if self.palette.len() < breakpoints.len() + 1 {
                    return Err(invalid(&format!(
                        "geography '{}' {mode} breakpoints need {} palette colors, found {}",
                        profile.geography,
                        breakpoints.len() + 1,
                        self.palette.len()
                    )));
                }
            }
        }

        for geography in Geography::all() {
            if !seen.contains(geography) {
                return Err(invalid(&format!("geography '{geography}' has no profile")));
            }
        }

        Ok(())
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Invalid {
        message: message.to_string(),
    }
}

/// Parses and validates a TOML configuration.
///
/// # Errors
///
/// Returns [`ConfigError`] if the TOML is malformed or inconsistent.
pub fn parse_config(toml_str: &str) -> Result<DashboardConfig, ConfigError> {
    let config: DashboardConfig = toml::de::from_str(toml_str).map_err(|e| ConfigError::Parse {
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Loads the configuration the way the server does: the file named by
/// `EVICTION_MAP_CONFIG` or the embedded default, then environment
/// overrides.
///
/// # Errors
///
/// Returns [`ConfigError`] if the configuration cannot be read or is
/// invalid.
pub fn load_from_env() -> Result<DashboardConfig, ConfigError> {
    let mut config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => {
            log::info!("Loading config from {path}");
            DashboardConfig::from_file(Path::new(path.trim()))?
        }
        _ => DashboardConfig::embedded()?,
    };
    config.apply_overrides(|key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}
