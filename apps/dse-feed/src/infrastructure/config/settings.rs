//! Engine Configuration Settings
//!
//! Configuration for the feed engine, loaded from a YAML file with
//! `${VAR}` / `${VAR:-default}` environment interpolation. Every key is
//! optional; numeric values outside their supported range are clamped.
//!
//! ```yaml
//! general:
//!   history_years: 3
//!   poll_interval_ms: 5000
//!   market_open: "10:00"
//!   market_close: "14:30"
//!   closed_days: [fri, sat]
//! endpoints:
//!   latest_price: https://www.dsebd.org/latest_share_price_scroll_l.php
//! data_source:
//!   prefer_web_data: true
//!   seed_dir: ${DSE_SEED_DIR:-./seed}
//! export:
//!   dir: ./export
//!   interval_secs: 300
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{NaiveTime, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::market_hours::MarketHours;
use crate::domain::series::SourcePrecedence;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "DSE_FEED_CONFIG";

/// Config file read when no path is given and [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "dse-feed.yaml";

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("config validation failed: {0}")]
    ValidationError(String),
}

// =============================================================================
// Sections
// =============================================================================

/// `[general]` polling, history and session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Years of history fetched for a symbol with no cache (1..=30).
    pub history_years: u32,
    /// Live page poll interval in milliseconds (1000..=300000).
    pub poll_interval_ms: u64,
    /// Session open, `HH:MM` local time.
    pub market_open: String,
    /// Session close, `HH:MM` local time.
    pub market_close: String,
    /// Weekdays without a session (`fri`, `saturday`, ...).
    pub closed_days: Vec<String>,
    /// Consecutive failed polls before the feed enters error (0..=100, 0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// HTTP timeout in seconds (5..=120).
    pub http_timeout_secs: u64,
    /// User agent sent with every request.
    pub user_agent: String,
    /// Re-check interval while the market is closed, in seconds.
    pub idle_interval_secs: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            history_years: 3,
            poll_interval_ms: 5_000,
            market_open: "10:00".to_string(),
            market_close: "14:30".to_string(),
            closed_days: vec!["fri".to_string(), "sat".to_string()],
            max_reconnect_attempts: 10,
            http_timeout_secs: 30,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36"
                .to_string(),
            idle_interval_secs: 60,
        }
    }
}

/// `[endpoints]` exchange page URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointSettings {
    /// Latest share price table.
    pub latest_price: String,
    /// Day-end archive page.
    pub day_end_archive: String,
    /// Alternate latest price page, tried when the primary fails. Empty disables.
    pub alt_latest_price: String,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            latest_price: "https://www.dsebd.org/latest_share_price_scroll_l.php".to_string(),
            day_end_archive: "https://www.dsebd.org/day_end_archive.php".to_string(),
            alt_latest_price: "https://www.dsebd.org/latest_share_price_all_,ajax.php".to_string(),
        }
    }
}

/// `[data_source]` seed location and precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceSettings {
    /// Scraped bars overwrite seed bars when true.
    pub prefer_web_data: bool,
    /// Directory of `{SYMBOL}.csv` seed files. Unset disables the seed.
    pub seed_dir: Option<PathBuf>,
}

impl Default for DataSourceSettings {
    fn default() -> Self {
        Self {
            prefer_web_data: true,
            seed_dir: None,
        }
    }
}

/// `[export]` periodic CSV export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    /// Output directory. Unset disables export.
    pub dir: Option<PathBuf>,
    /// Seconds between exports. Zero disables the periodic task.
    pub interval_secs: u64,
}

/// `[backoff]` reconnect delays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    /// First retry delay in milliseconds.
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds.
    pub max_delay_ms: u64,
    /// Growth factor per consecutive failure.
    pub multiplier: f64,
    /// Jitter fraction (0.1 = ±10%). Zero keeps delays monotonic.
    pub jitter_factor: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 5_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }
}

/// `[server]` status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: parse_env_u16("DSE_FEED_HEALTH_PORT", 8082),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Polling, history and session settings.
    pub general: GeneralSettings,
    /// Exchange page URLs.
    pub endpoints: EndpointSettings,
    /// Seed location and precedence.
    pub data_source: DataSourceSettings,
    /// Periodic export.
    pub export: ExportSettings,
    /// Reconnect delays.
    pub backoff: BackoffSettings,
    /// Status endpoint.
    pub server: ServerSettings,
}

impl EngineConfig {
    /// Clamp numeric settings into their supported ranges.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        let g = &mut self.general;
        g.history_years = g.history_years.clamp(1, 30);
        g.poll_interval_ms = g.poll_interval_ms.clamp(1_000, 300_000);
        g.http_timeout_secs = g.http_timeout_secs.clamp(5, 120);
        g.max_reconnect_attempts = g.max_reconnect_attempts.min(100);
        g.idle_interval_secs = g.idle_interval_secs.max(1);

        let b = &mut self.backoff;
        b.base_delay_ms = b.base_delay_ms.max(1);
        b.max_delay_ms = b.max_delay_ms.max(b.base_delay_ms);
        if !b.multiplier.is_finite() || b.multiplier < 1.0 {
            b.multiplier = 1.0;
        }
        if !b.jitter_factor.is_finite() {
            b.jitter_factor = 0.0;
        }
        b.jitter_factor = b.jitter_factor.clamp(0.0, 1.0);

        self
    }

    /// Live page poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.general.poll_interval_ms)
    }

    /// Market-closed re-check interval.
    #[must_use]
    pub const fn idle_interval(&self) -> Duration {
        Duration::from_secs(self.general.idle_interval_secs)
    }

    /// HTTP timeout.
    #[must_use]
    pub const fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.general.http_timeout_secs)
    }

    /// Periodic export interval, if export is enabled.
    #[must_use]
    pub fn export_interval(&self) -> Option<Duration> {
        (self.export.dir.is_some() && self.export.interval_secs > 0)
            .then(|| Duration::from_secs(self.export.interval_secs))
    }

    /// Seed/web precedence.
    #[must_use]
    pub const fn precedence(&self) -> SourcePrecedence {
        SourcePrecedence::from_prefer_web(self.data_source.prefer_web_data)
    }

    /// Trading session window.
    ///
    /// Unparseable times and weekday names fall back to the DSE defaults.
    #[must_use]
    pub fn market_hours(&self) -> MarketHours {
        let defaults = MarketHours::default();
        let open = parse_time(&self.general.market_open).unwrap_or(defaults.open);
        let close = parse_time(&self.general.market_close).unwrap_or(defaults.close);

        let closed_days = self
            .general
            .closed_days
            .iter()
            .filter_map(|d| match Weekday::from_str(d.trim()) {
                Ok(day) => Some(day),
                Err(_) => {
                    tracing::warn!(value = %d, "ignoring unknown weekday in closed_days");
                    None
                }
            })
            .collect();

        MarketHours::new(open, close, closed_days)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.latest_price.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoints.latest_price must not be empty".to_string(),
            ));
        }
        if self.endpoints.day_end_archive.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "endpoints.day_end_archive must not be empty".to_string(),
            ));
        }

        for (key, value) in [
            ("general.market_open", &self.general.market_open),
            ("general.market_close", &self.general.market_close),
        ] {
            if parse_time(value).is_none() {
                return Err(ConfigError::ValidationError(format!(
                    "{key} must be HH:MM, got '{value}'"
                )));
            }
        }

        let hours = self.market_hours();
        if hours.open >= hours.close {
            return Err(ConfigError::ValidationError(format!(
                "market_open ({}) must be before market_close ({})",
                hours.open, hours.close
            )));
        }

        Ok(())
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Resolve which config file to read.
///
/// An explicit path wins, then [`CONFIG_PATH_ENV`], then
/// [`DEFAULT_CONFIG_PATH`] if it exists.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = std::env::var(CONFIG_PATH_ENV).ok().filter(|p| !p.is_empty()) {
        return Some(PathBuf::from(path));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    default.exists().then_some(default)
}

/// Load configuration from a YAML file.
///
/// With no file to read, defaults are used.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, ConfigError> {
    let Some(path) = resolve_config_path(path) else {
        tracing::info!("no config file found, using defaults");
        return Ok(EngineConfig::default().clamped());
    };

    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;

    let config = load_config_from_string(&contents)?;
    tracing::info!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<EngineConfig, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: EngineConfig = if interpolated.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml_bw::from_str(&interpolated)?
    };
    let config = config.clamped();
    config.validate()?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables without a default become empty.
fn interpolate_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: OnceLock<Option<Regex>> = OnceLock::new();

    let Some(re) = ENV_VAR_REGEX
        .get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").ok())
    else {
        return input.to_string();
    };

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

fn parse_time(value: &str) -> Option<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .ok()
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
