use std::env;
use std::time::Duration;

use crate::media::RegistryPolicy;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base signaling address; the credential is appended as `?token=`.
    pub ws_url: String,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub connect_timeout: Duration,
    /// How many inbound events a slow consumer may fall behind by.
    pub event_buffer: usize,
    pub registry_policy: RegistryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "ws://localhost:8080/ws".to_string(),
            reconnect_attempts: 10,
            reconnect_interval: Duration::from_millis(3000),
            heartbeat_interval: Duration::from_secs(25),
            heartbeat_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
            event_buffer: 256,
            registry_policy: RegistryPolicy::KeepLastKnown,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let config = Config {
            ws_url: env::var("WS_URL").map_err(|_| ConfigError::MissingWsUrl)?,
            reconnect_attempts: env::var("RECONNECT_ATTEMPTS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("RECONNECT_ATTEMPTS"))?,
            reconnect_interval: env::var("RECONNECT_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_interval),
            heartbeat_interval: env::var("HEARTBEAT_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            heartbeat_timeout: env::var("HEARTBEAT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_timeout),
            connect_timeout: env::var("CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            event_buffer: env::var("EVENT_BUFFER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.event_buffer),
            registry_policy: match env::var("DEVICE_REGISTRY_POLICY") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::InvalidRegistryPolicy(raw))?,
                Err(_) => defaults.registry_policy,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the connection task cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("RECONNECT_INTERVAL_MS", self.reconnect_interval),
            ("HEARTBEAT_INTERVAL_SECS", self.heartbeat_interval),
            ("HEARTBEAT_TIMEOUT_SECS", self.heartbeat_timeout),
            ("CONNECT_TIMEOUT_SECS", self.connect_timeout),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroValue(*name));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ZeroValue("EVENT_BUFFER"));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("WS_URL environment variable is required")]
    MissingWsUrl,
    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("Unknown device registry policy: {0}")]
    InvalidRegistryPolicy(String),
}
