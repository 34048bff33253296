//! Application configuration
//!
//! Loaded from a TOML file, by default `~/.config/ocpp-router/config.toml`.
//! Every section and field has a default, so an empty file is a valid
//! single-endpoint OCPP 2.0.1 deployment.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "pretty"
//!
//! [router]
//! max_call_length_seconds = 5
//! max_caching_seconds = 10
//!
//! [[websocket]]
//! id = "ocpp201"
//! port = 8081
//! protocol = "ocpp2.0.1"
//! security_profile = 1
//!
//! [[stations]]
//! tenant_id = 1
//! station_id = "CS-001"
//! password_hash = "$2b$12$..."
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::{CircuitBreakerConfig, RouterConfig};
use crate::domain::OcppVersion;
use crate::infrastructure::http::WebhookSubscription;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub logging: LoggingConfig,
    pub router: RouterSection,
    pub websocket: Vec<WebsocketServerConfig>,
    pub metrics: MetricsConfig,
    pub webhooks: Vec<WebhookSubscription>,
    pub stations: Vec<StationSeed>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSection {
    /// Upper bound on the cleanup phase after a shutdown signal.
    pub shutdown_timeout_secs: u64,
    /// Timeout of webhook and callback POSTs.
    pub http_timeout_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 30,
            http_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RouterSection {
    pub max_call_length_seconds: u64,
    pub max_caching_seconds: u64,
    /// Circuit breaker backoff ceiling and probe period, in seconds.
    pub max_reconnect_delay: u64,
    /// Interval handed out in BootNotification answers, at most 65535.
    pub heartbeat_interval: u32,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            max_call_length_seconds: 5,
            max_caching_seconds: 10,
            max_reconnect_delay: 30,
            heartbeat_interval: 60,
        }
    }
}

/// One station-facing gateway endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebsocketServerConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub protocol: OcppVersion,
    /// 0: no auth, 1: Basic Auth over ws, 2: Basic Auth behind TLS.
    pub security_profile: u8,
    /// Seconds between keepalive pings; 0 disables keepalive.
    pub ping_interval: u64,
    pub tenant_id: i32,
    pub allow_unknown_stations: bool,
}

impl WebsocketServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for WebsocketServerConfig {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8081,
            protocol: OcppVersion::V201,
            security_profile: 0,
            ping_interval: 60,
            tenant_id: 1,
            allow_unknown_stations: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Address of the Prometheus scrape endpoint.
    pub listen: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: "0.0.0.0:9091".to_string(),
        }
    }
}

/// A station known to the in-memory repository at startup.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StationSeed {
    #[serde(default = "default_tenant")]
    pub tenant_id: i32,
    pub station_id: String,
    /// bcrypt hash of the station's Basic-Auth password.
    #[serde(default)]
    pub password_hash: Option<String>,
}

fn default_tenant() -> i32 {
    1
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let mut config: AppConfig = toml::from_str(raw)?;
        if config.websocket.is_empty() {
            config.websocket.push(WebsocketServerConfig::default());
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut ports = HashSet::new();
        let mut ids = HashSet::new();
        for ws in &self.websocket {
            if ws.port != 0 && !ports.insert((ws.host.as_str(), ws.port)) {
                return Err(ConfigError::Invalid(format!(
                    "websocket port {} is configured twice",
                    ws.port
                )));
            }
            if !ids.insert(ws.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "websocket id '{}' is configured twice",
                    ws.id
                )));
            }
            if ws.security_profile > 2 {
                return Err(ConfigError::Invalid(format!(
                    "websocket '{}': security profile {} is not supported (0, 1 or 2)",
                    ws.id, ws.security_profile
                )));
            }
        }
        if self.router.max_call_length_seconds == 0 {
            return Err(ConfigError::Invalid(
                "router.max_call_length_seconds must be positive".into(),
            ));
        }
        if self.router.max_reconnect_delay == 0 {
            return Err(ConfigError::Invalid(
                "router.max_reconnect_delay must be positive".into(),
            ));
        }
        if u32::try_from(self.router.max_reconnect_delay).is_err() {
            return Err(ConfigError::Invalid(format!(
                "router.max_reconnect_delay must not exceed {}",
                u32::MAX
            )));
        }
        // The narrowest wire type is the 2.0.1 BootNotification interval.
        if u16::try_from(self.router.heartbeat_interval).is_err() {
            return Err(ConfigError::Invalid(format!(
                "router.heartbeat_interval must not exceed {}",
                u16::MAX
            )));
        }
        Ok(())
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            max_call_length: Duration::from_secs(self.router.max_call_length_seconds),
            max_caching: Duration::from_secs(self.router.max_caching_seconds),
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            max_reconnect_delay: self.router.max_reconnect_delay,
            ..Default::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.server.http_timeout_secs)
    }
}

pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ocpp-router")
        .join("config.toml")
}
