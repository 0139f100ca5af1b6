// =============================================================================
// Runtime Configuration: feed, aggregation and API settings with atomic save
// =============================================================================
//
// Non-secret settings live in a JSON file. All fields carry a serde default so
// that a partial (or missing) file still yields a usable configuration.
//
// Credentials are never written to the file: they come from the environment
// (optionally via `.env`) and their absence is fatal at startup.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;

pub const ACCESS_TOKEN_VAR: &str = "DHAN_ACCESS_TOKEN";
pub const CLIENT_ID_VAR: &str = "DHAN_CLIENT_ID";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_endpoint() -> String {
    "wss://api-feed.dhan.co".to_string()
}

fn default_protocol_version() -> u8 {
    2
}

fn default_auth_type() -> u8 {
    2
}

fn default_exchange_segment() -> String {
    "NSE_EQ".to_string()
}

fn default_security_id() -> String {
    "1333".to_string()
}

fn default_timeframe_secs() -> u32 {
    60
}

fn default_timezone() -> String {
    "Asia/Kolkata".to_string()
}

fn default_max_candles() -> usize {
    1000
}

fn default_read_limit() -> usize {
    50
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_heartbeat_timeout_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    60_000
}

fn default_bind_addr() -> String {
    "0.0.0.0:5000".to_string()
}

// =============================================================================
// Credentials
// =============================================================================

/// Feed credentials. `Debug` never prints the token.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_token: String,
    pub client_id: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve credentials through `lookup`; blank values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let fetch = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingCredential(name))
        };
        Ok(Self {
            access_token: fetch(ACCESS_TOKEN_VAR)?,
            client_id: fetch(CLIENT_ID_VAR)?,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("client_id", &self.client_id)
            .finish()
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstream feed -------------------------------------------------------

    /// WebSocket endpoint; credentials are appended as query parameters.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_protocol_version")]
    pub protocol_version: u8,

    #[serde(default = "default_auth_type")]
    pub auth_type: u8,

    /// Exchange segment named in the subscription request (e.g. `NSE_EQ`,
    /// `MCX_COMM`).
    #[serde(default = "default_exchange_segment")]
    pub exchange_segment: String,

    #[serde(default = "default_security_id")]
    pub security_id: String,

    // --- Aggregation ---------------------------------------------------------

    #[serde(default = "default_timeframe_secs")]
    pub timeframe_secs: u32,

    /// IANA timezone used for bucket boundaries.
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Completed candles retained in memory.
    #[serde(default = "default_max_candles")]
    pub max_candles: usize,

    /// Candles returned by the query endpoint when no limit is given.
    #[serde(default = "default_read_limit")]
    pub default_read_limit: usize,

    // --- Connection lifecycle ------------------------------------------------

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    // --- API -----------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            protocol_version: default_protocol_version(),
            auth_type: default_auth_type(),
            exchange_segment: default_exchange_segment(),
            security_id: default_security_id(),
            timeframe_secs: default_timeframe_secs(),
            timezone: default_timezone(),
            max_candles: default_max_candles(),
            default_read_limit: default_read_limit(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// A missing file is an error here; see [`load_or_default`](Self::load_or_default).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            segment = %config.exchange_segment,
            security_id = %config.security_id,
            timeframe_secs = config.timeframe_secs,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Load `path`, or fall back to defaults when the file does not exist.
    ///
    /// A file that exists but cannot be read or parsed is an error: running
    /// with defaults would stream the wrong instrument. The defaults are
    /// written out as a template for the operator to edit.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        warn!(path = %path.display(), "config file not found, using defaults");
        let defaults = Self::default();
        if let Err(e) = defaults.save(path) {
            warn!(error = %e, "failed to write default config");
        }
        Ok(defaults)
    }

    /// Persist the configuration to `path` using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `CANDLE_FEED_*` overrides from the environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_blank = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        if let Some(v) = non_blank("CANDLE_FEED_SECURITY_ID") {
            self.security_id = v;
        }
        if let Some(v) = non_blank("CANDLE_FEED_SEGMENT") {
            self.exchange_segment = v.to_uppercase();
        }
        if let Some(v) = non_blank("CANDLE_FEED_BIND_ADDR") {
            self.bind_addr = v;
        }
    }

    /// Check the settings that would make aggregation or reconnects
    /// meaningless, returning the parsed timezone.
    pub fn validate(&self) -> Result<Tz, ConfigError> {
        if self.timeframe_secs == 0 {
            return Err(ConfigError::InvalidTimeframe);
        }
        if self.max_candles == 0 {
            return Err(ConfigError::InvalidCapacity);
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("connect_timeout_secs"));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("heartbeat_interval_secs"));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("heartbeat_timeout_secs"));
        }
        if self.reconnect_initial_ms > self.reconnect_max_ms {
            return Err(ConfigError::InvalidBackoff {
                initial: self.reconnect_initial_ms,
                max: self.reconnect_max_ms,
            });
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn reconnect_initial(&self) -> Duration {
        Duration::from_millis(self.reconnect_initial_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.endpoint, "wss://api-feed.dhan.co");
        assert_eq!(cfg.exchange_segment, "NSE_EQ");
        assert_eq!(cfg.security_id, "1333");
        assert_eq!(cfg.timeframe_secs, 60);
        assert_eq!(cfg.timezone, "Asia/Kolkata");
        assert_eq!(cfg.default_read_limit, 50);
        assert_eq!(cfg.heartbeat_interval(), Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.reconnect_initial(), Duration::from_secs(1));
        assert_eq!(cfg.reconnect_max(), Duration::from_secs(60));
        assert_eq!(cfg.validate(), Ok(chrono_tz::Asia::Kolkata));
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "exchange_segment": "MCX_COMM", "timeframe_secs": 300 }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.exchange_segment, "MCX_COMM");
        assert_eq!(cfg.timeframe_secs, 300);
        assert_eq!(cfg.security_id, "1333");
        assert_eq!(cfg.max_candles, 1000);
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("candle-feed-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("candle_feed.json");

        let mut cfg = RuntimeConfig::default();
        cfg.security_id = "2885".into();
        cfg.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded, cfg);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    fn scratch_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("candle-feed-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_falls_back_to_defaults_and_writes_template() {
        let dir = scratch_dir("missing");
        let path = dir.join("candle_feed.json");
        let _ = std::fs::remove_file(&path);

        let cfg = RuntimeConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
        assert_eq!(RuntimeConfig::load(&path).unwrap(), cfg);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn unparsable_file_is_fatal() {
        let dir = scratch_dir("broken");
        let path = dir.join("candle_feed.json");
        std::fs::write(&path, r#"{ "security_id": "2885", "#).unwrap();

        let err = RuntimeConfig::load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse runtime config"));
        // The broken file is left for the operator to fix.
        assert!(std::fs::read_to_string(&path).unwrap().contains("2885"));
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn wrongly_typed_field_is_fatal() {
        let dir = scratch_dir("typed");
        let path = dir.join("candle_feed.json");
        std::fs::write(&path, r#"{ "timeframe_secs": "one minute" }"#).unwrap();

        assert!(RuntimeConfig::load_or_default(&path).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_missing_file_is_an_error() {
        assert!(RuntimeConfig::load("/definitely/not/here.json").is_err());
    }

    #[test]
    fn validation_failures() {
        let mut cfg = RuntimeConfig::default();
        cfg.timeframe_secs = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidTimeframe));

        let mut cfg = RuntimeConfig::default();
        cfg.timezone = "Mars/Olympus".into();
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::UnknownTimezone("Mars/Olympus".into()))
        );

        let mut cfg = RuntimeConfig::default();
        cfg.max_candles = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidCapacity));

        let mut cfg = RuntimeConfig::default();
        cfg.connect_timeout_secs = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("connect_timeout_secs"))
        );

        let mut cfg = RuntimeConfig::default();
        cfg.heartbeat_timeout_secs = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("heartbeat_timeout_secs"))
        );

        let mut cfg = RuntimeConfig::default();
        cfg.heartbeat_interval_secs = 0;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::ZeroDuration("heartbeat_interval_secs"))
        );

        let mut cfg = RuntimeConfig::default();
        cfg.reconnect_initial_ms = 120_000;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::InvalidBackoff { initial: 120_000, max: 60_000 })
        );
    }

    #[test]
    fn env_overrides_apply_non_blank_values() {
        let vars: HashMap<&str, &str> = [
            ("CANDLE_FEED_SECURITY_ID", "11536"),
            ("CANDLE_FEED_SEGMENT", "mcx_comm"),
            ("CANDLE_FEED_BIND_ADDR", "  "),
        ]
        .into_iter()
        .collect();
        let mut cfg = RuntimeConfig::default();
        cfg.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(cfg.security_id, "11536");
        assert_eq!(cfg.exchange_segment, "MCX_COMM");
        assert_eq!(cfg.bind_addr, "0.0.0.0:5000");
    }

    #[test]
    fn missing_or_blank_credentials_are_fatal() {
        let err = Credentials::from_lookup(|_| None).unwrap_err();
        assert_eq!(err, ConfigError::MissingCredential(ACCESS_TOKEN_VAR));

        let err = Credentials::from_lookup(|name| {
            (name == ACCESS_TOKEN_VAR).then(|| "tok".to_string())
        })
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingCredential(CLIENT_ID_VAR));

        let err = Credentials::from_lookup(|_| Some("   ".to_string())).unwrap_err();
        assert_eq!(err, ConfigError::MissingCredential(ACCESS_TOKEN_VAR));
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = Credentials::from_lookup(|name| Some(format!("{name}-value"))).unwrap();
        let shown = format!("{creds:?}");
        assert!(!shown.contains("DHAN_ACCESS_TOKEN-value"));
        assert!(shown.contains("DHAN_CLIENT_ID-value"));
    }
}
