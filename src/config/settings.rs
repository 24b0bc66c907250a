use std::time::Duration;

use serde::Deserialize;

use crate::broker::HubConfig;
use crate::client::ClientConfig;

/// Top-level configuration settings for the application.
///
/// Covers the HTTP server, the broadcast hub, the reconnecting client and logging.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server: ServerSettings,
    pub hub: HubSettings,
    pub client: ClientSettings,
    pub log: LogSettings,
}

/// Where the server binds, who may call it and how it keeps idle streams alive.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Seconds between keep-alive comments. `0` disables them.
    pub heartbeat_secs: u64,
    /// Browser origins allowed by CORS. Empty disables CORS, `*` allows any.
    pub allowed_origins: Vec<String>,
}

/// Broadcast hub tunables.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct HubSettings {
    pub client_buffer: usize,
    pub history_size: usize,
    pub max_subscribers: usize,
    /// Channels clients may ask for. Empty allows any.
    pub allowed_channels: Vec<String>,
}

/// Reconnection engine tunables, all durations in milliseconds.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub endpoint: String,
    pub retry_interval_ms: u64,
    pub max_retry_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub connect_timeout_ms: u64,
    /// `0` disables the read timeout.
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Any value left out is filled from the defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub hub: Option<PartialHubSettings>,
    pub client: Option<PartialClientSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub heartbeat_secs: Option<u64>,
    pub allowed_origins: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialHubSettings {
    pub client_buffer: Option<usize>,
    pub history_size: Option<usize>,
    pub max_subscribers: Option<usize>,
    pub allowed_channels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialClientSettings {
    pub endpoint: Option<String>,
    pub retry_interval_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
                heartbeat_secs: 15,
                allowed_origins: Vec::new(),
            },
            hub: HubSettings {
                client_buffer: 64,
                history_size: 256,
                max_subscribers: 1000,
                allowed_channels: Vec::new(),
            },
            client: ClientSettings {
                endpoint: "http://127.0.0.1:8080/events".to_string(),
                retry_interval_ms: 1000,
                max_retry_delay_ms: 30_000,
                max_reconnect_attempts: 0,
                connect_timeout_ms: 10_000,
                read_timeout_ms: 0,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fills every missing value from `default`.
    pub fn merge(self, default: Settings) -> Settings {
        let server = self.server.unwrap_or_default();
        let hub = self.hub.unwrap_or_default();
        let client = self.client.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
                heartbeat_secs: server.heartbeat_secs.unwrap_or(default.server.heartbeat_secs),
                allowed_origins: server
                    .allowed_origins
                    .unwrap_or(default.server.allowed_origins),
            },
            hub: HubSettings {
                client_buffer: hub.client_buffer.unwrap_or(default.hub.client_buffer),
                history_size: hub.history_size.unwrap_or(default.hub.history_size),
                max_subscribers: hub.max_subscribers.unwrap_or(default.hub.max_subscribers),
                allowed_channels: hub
                    .allowed_channels
                    .unwrap_or(default.hub.allowed_channels),
            },
            client: ClientSettings {
                endpoint: client.endpoint.unwrap_or(default.client.endpoint),
                retry_interval_ms: client
                    .retry_interval_ms
                    .unwrap_or(default.client.retry_interval_ms),
                max_retry_delay_ms: client
                    .max_retry_delay_ms
                    .unwrap_or(default.client.max_retry_delay_ms),
                max_reconnect_attempts: client
                    .max_reconnect_attempts
                    .unwrap_or(default.client.max_reconnect_attempts),
                connect_timeout_ms: client
                    .connect_timeout_ms
                    .unwrap_or(default.client.connect_timeout_ms),
                read_timeout_ms: client
                    .read_timeout_ms
                    .unwrap_or(default.client.read_timeout_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(default.log.level),
            },
        }
    }
}

impl Settings {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Checks values the loaders cannot reject on type alone.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.host.trim().is_empty() {
            return Err("server.host cannot be empty".to_string());
        }
        if self.server.allowed_origins.iter().any(|o| o.trim().is_empty()) {
            return Err("server.allowed_origins cannot contain empty entries".to_string());
        }
        if self.hub.client_buffer == 0 {
            return Err("hub.client_buffer must be > 0".to_string());
        }
        if self.hub.allowed_channels.iter().any(|c| c.trim().is_empty()) {
            return Err("hub.allowed_channels cannot contain empty names".to_string());
        }
        self.client.to_client_config().validate().map_err(|e| format!("client: {e}"))
    }
}

impl ServerSettings {
    pub fn heartbeat(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }
}

impl HubSettings {
    pub fn to_hub_config(&self) -> HubConfig {
        HubConfig {
            client_buffer: self.client_buffer,
            history_size: self.history_size,
            max_subscribers: self.max_subscribers,
        }
    }
}

impl ClientSettings {
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(self.endpoint.clone())
            .retry_interval(Duration::from_millis(self.retry_interval_ms))
            .max_retry_delay(Duration::from_millis(self.max_retry_delay_ms))
            .max_reconnect_attempts(self.max_reconnect_attempts)
            .connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .read_timeout(
                (self.read_timeout_ms > 0).then(|| Duration::from_millis(self.read_timeout_ms)),
            )
    }
}
