//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `WALKPS_GEOCODER_URL`, `WALKPS_LANGUAGE`,
//!    `WALKPS_MODEM_DEVICE`, `WALKPS_TRACK_FILE`
//! 2. **Config file** — path via `--config <path>`, or `walkps.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [tracker]
//! max_results = 1
//!
//! [geocoder]
//! base_url = "https://nominatim.openstreetmap.org"
//! user_agent = "walkps/0.1"
//! language = "zh-TW"
//! timeout_secs = 15
//!
//! [provider]
//! kind = "modem"                 # "modem" or "replay"
//!
//! [provider.modem]
//! device = "/dev/ttyUSB2"
//! poll_interval_secs = 10
//! auto_enable = true
//!
//! [provider.replay]
//! path = "track.csv"
//! interval_ms = 5000
//!
//! [messages]
//! distance_label = "Distance from first location"
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub messages: Messages,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Resolution behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Candidate addresses requested per lookup (default 1; only the first is shown).
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Reverse geocoding service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GeocoderConfig {
    /// Nominatim-compatible base URL. Override with `WALKPS_GEOCODER_URL`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// `User-Agent` sent with every request (Nominatim's usage policy requires one).
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// `Accept-Language` for address text. Override with `WALKPS_LANGUAGE`.
    #[serde(default)]
    pub language: Option<String>,
    /// TCP connect timeout in seconds (default 10).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout in seconds (default 15).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Which fix source feeds the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Quectel GNSS modem over a serial port.
    Modem,
    /// Recorded track file.
    Replay,
}

/// Fix provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_kind")]
    pub kind: ProviderKind,
    #[serde(default)]
    pub modem: ModemConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
}

/// GNSS modem settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ModemConfig {
    /// Serial AT port. Override with `WALKPS_MODEM_DEVICE`.
    #[serde(default = "default_modem_device")]
    pub device: String,
    /// Seconds between `AT+QGPSLOC=2` polls (default 10).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Send `AT+QGPS=1` on subscribe (default true).
    #[serde(default = "default_auto_enable")]
    pub auto_enable: bool,
}

/// Track replay settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
    /// Track file, one `lat,lon` per line. Override with `WALKPS_TRACK_FILE`.
    #[serde(default = "default_track_path")]
    pub path: String,
    /// Milliseconds between replayed fixes (default 5000).
    #[serde(default = "default_replay_interval")]
    pub interval_ms: u64,
}

/// User-visible strings.
#[derive(Debug, Clone, Deserialize)]
pub struct Messages {
    #[serde(default = "default_distance_label")]
    pub distance_label: String,
    #[serde(default = "default_service_not_available")]
    pub service_not_available: String,
    #[serde(default = "default_invalid_lat_long")]
    pub invalid_lat_long_used: String,
    #[serde(default = "default_no_address_found")]
    pub no_address_found: String,
    #[serde(default = "default_loading")]
    pub loading: String,
    #[serde(default = "default_idle_hint")]
    pub idle_hint: String,
    #[serde(default = "default_location_available")]
    pub location_available: String,
    #[serde(default = "default_location_unavailable")]
    pub location_unavailable: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_results() -> usize {
    1
}
fn default_base_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}
fn default_user_agent() -> String {
    format!("walkps/{}", env!("CARGO_PKG_VERSION"))
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_timeout() -> u64 {
    15
}
fn default_provider_kind() -> ProviderKind {
    ProviderKind::Modem
}
fn default_modem_device() -> String {
    "/dev/ttyUSB2".to_string()
}
fn default_poll_interval() -> u64 {
    10
}
fn default_auto_enable() -> bool {
    true
}
fn default_track_path() -> String {
    "track.csv".to_string()
}
fn default_replay_interval() -> u64 {
    5000
}
fn default_distance_label() -> String {
    "Distance from first location".to_string()
}
fn default_service_not_available() -> String {
    "Sorry, the service is not available".to_string()
}
fn default_invalid_lat_long() -> String {
    "Invalid latitude or longitude used".to_string()
}
fn default_no_address_found() -> String {
    "Sorry, no address found".to_string()
}
fn default_loading() -> String {
    "Loading...".to_string()
}
fn default_idle_hint() -> String {
    "Press Enter to start tracking your location".to_string()
}
fn default_location_available() -> String {
    "Location available".to_string()
}
fn default_location_unavailable() -> String {
    "Location unavailable".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
        }
    }
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            language: None,
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: default_provider_kind(),
            modem: ModemConfig::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            device: default_modem_device(),
            poll_interval_secs: default_poll_interval(),
            auto_enable: default_auto_enable(),
        }
    }
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            path: default_track_path(),
            interval_ms: default_replay_interval(),
        }
    }
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            distance_label: default_distance_label(),
            service_not_available: default_service_not_available(),
            invalid_lat_long_used: default_invalid_lat_long(),
            no_address_found: default_no_address_found(),
            loading: default_loading(),
            idle_hint: default_idle_hint(),
            location_available: default_location_available(),
            location_unavailable: default_location_unavailable(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist and parse. Otherwise looks for
    /// `walkps.toml` in the current directory, falling back to compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, String> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else if Path::new("walkps.toml").exists() {
            Self::from_file("walkps.toml")?
        } else {
            Config::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("invalid config: {e}"))
    }

    fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {path}: {e}"))?;
        Self::from_toml(&content).map_err(|e| format!("{path}: {e}"))
    }

    /// Env var overrides, looked up through `var` so tests need not touch the
    /// process environment.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(url) = var("WALKPS_GEOCODER_URL") {
            self.geocoder.base_url = url;
        }
        if let Some(lang) = var("WALKPS_LANGUAGE") {
            self.geocoder.language = Some(lang);
        }
        if let Some(device) = var("WALKPS_MODEM_DEVICE") {
            self.provider.modem.device = device;
        }
        if let Some(track) = var("WALKPS_TRACK_FILE") {
            self.provider.replay.path = track;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tracker.max_results, 1);
        assert_eq!(config.provider.kind, ProviderKind::Modem);
        assert_eq!(config.provider.modem.poll_interval_secs, 10);
        assert_eq!(config.messages.distance_label, "Distance from first location");
        assert_eq!(config.logging.level, "info");
        assert!(config.geocoder.language.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [provider]
            kind = "replay"

            [provider.replay]
            path = "walk.csv"

            [messages]
            distance_label = "與第一個地點距離"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.kind, ProviderKind::Replay);
        assert_eq!(config.provider.replay.path, "walk.csv");
        assert_eq!(config.provider.replay.interval_ms, 5000);
        assert_eq!(config.messages.distance_label, "與第一個地點距離");
        assert_eq!(config.messages.no_address_found, "Sorry, no address found");
        assert_eq!(config.geocoder.timeout_secs, 15);
    }

    #[test]
    fn test_unknown_provider_kind_rejected() {
        let err = Config::from_toml("[provider]\nkind = \"carrier-pigeon\"\n").unwrap_err();
        assert!(err.contains("invalid config"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(|key| match key {
            "WALKPS_GEOCODER_URL" => Some("http://localhost:8080".to_string()),
            "WALKPS_LANGUAGE" => Some("zh-TW".to_string()),
            "WALKPS_MODEM_DEVICE" => Some("/dev/ttyUSB3".to_string()),
            _ => None,
        });
        assert_eq!(config.geocoder.base_url, "http://localhost:8080");
        assert_eq!(config.geocoder.language.as_deref(), Some("zh-TW"));
        assert_eq!(config.provider.modem.device, "/dev/ttyUSB3");
        assert_eq!(config.provider.replay.path, "track.csv");
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = Config::load(Some("/nonexistent/walkps.toml")).unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
