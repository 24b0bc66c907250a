//! Reconnection engine configuration.

use std::time::Duration;

use crate::client::backoff::Backoff;

/// Configuration for a [`Session`](crate::client::Session).
///
/// Built with chainable setters on top of sensible defaults.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Event-stream endpoint URL, including any channel query parameters.
    pub endpoint: String,
    /// Base wait before the first retry.
    pub retry_interval: Duration,
    /// Upper bound for the doubling retry wait.
    pub max_retry_delay: Duration,
    /// Consecutive failed attempts before giving up. `0` retries forever.
    pub max_reconnect_attempts: u32,
    /// Time allowed for the stream to open.
    pub connect_timeout: Duration,
    /// Longest silence tolerated on an open stream. `None` waits forever.
    pub read_timeout: Option<Duration>,
    /// Watermark to resume from on the first connection.
    pub last_event_id: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            retry_interval: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            max_reconnect_attempts: 0,
            connect_timeout: Duration::from_secs(10),
            read_timeout: None,
            last_event_id: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    #[must_use]
    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }

    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Resume after `id` instead of starting fresh.
    #[must_use]
    pub fn last_event_id(mut self, id: u64) -> Self {
        self.last_event_id = Some(id);
        self
    }

    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.retry_interval, self.max_retry_delay)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.trim().is_empty() {
            return Err("endpoint cannot be empty".to_string());
        }
        if self.retry_interval.is_zero() {
            return Err("retry interval must be > 0".to_string());
        }
        if self.max_retry_delay < self.retry_interval {
            return Err("max retry delay must be >= retry interval".to_string());
        }
        if self.connect_timeout.is_zero() {
            return Err("connect timeout must be > 0".to_string());
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err("read timeout must be > 0 when set".to_string());
        }
        Ok(())
    }
}
