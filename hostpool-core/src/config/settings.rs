use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Slots are preallocated per pool, so the connection count is bounded.
pub const MAX_CONNECTIONS_LIMIT: usize = 65_536;

/// Largest request budget a pool accepts; the budget is a semaphore.
pub const MAX_OPEN_REQUESTS_LIMIT: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Upper bound for `read_buffer_size` and `max_response_body_size`.
pub const MAX_BUFFER_SIZE: usize = 1 << 30;

/// Connection-level settings.
///
/// The pool never interprets these beyond the connect timeout; they are handed
/// to the [`Transport`](crate::transport::Transport) on every connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ConnectionSettings {
    /// How long a single connection attempt may take before it counts as failed.
    #[serde(default = "conn_default_connect_timeout_milliseconds")]
    pub connect_timeout_milliseconds: u64,

    /// Read chunk size used by the HTTP/1.1 codec.
    #[serde(default = "conn_default_read_buffer_size")]
    pub read_buffer_size: usize,

    /// Largest response body the codec will buffer. Anything bigger fails the
    /// response as truncated.
    #[serde(default = "conn_default_max_response_body_size")]
    pub max_response_body_size: usize,
}

fn conn_default_connect_timeout_milliseconds() -> u64 {
    10_000
}
fn conn_default_read_buffer_size() -> usize {
    8 * 1024
}
fn conn_default_max_response_body_size() -> usize {
    64 * 1024 * 1024
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout_milliseconds: conn_default_connect_timeout_milliseconds(),
            read_buffer_size: conn_default_read_buffer_size(),
            max_response_body_size: conn_default_max_response_body_size(),
        }
    }
}

impl ConnectionSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_milliseconds)
    }
}

/// Immutable settings of one pool.
///
/// Two pools to the same destination with different settings are different pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PoolSettings {
    /// Upper bound on open (or opening) connections.
    #[serde(default = "pool_default_max_connections")]
    pub max_connections: usize,

    /// Connections kept open even while the pool is idle.
    #[serde(default)]
    pub min_connections: usize,

    /// Retries allowed after the first attempt of a request.
    #[serde(default = "pool_default_max_retries")]
    pub max_retries: u32,

    /// Upper bound on in-flight plus queued requests. Further submissions wait.
    #[serde(default = "pool_default_max_open_requests")]
    pub max_open_requests: usize,

    /// Requests that may be outstanding on a single connection.
    #[serde(default = "pool_default_pipelining_limit")]
    pub pipelining_limit: usize,

    /// How long the pool may sit without work before shrinking or shutting down.
    /// `None` means never.
    #[serde(default = "pool_default_idle_timeout_milliseconds")]
    pub idle_timeout_milliseconds: Option<u64>,

    /// Delay before reconnecting after the first failed connection attempt.
    /// Doubles with every consecutive failure.
    #[serde(default = "pool_default_base_connection_backoff_milliseconds")]
    pub base_connection_backoff_milliseconds: u64,

    /// Cap for the reconnect delay.
    #[serde(default = "pool_default_max_connection_backoff_milliseconds")]
    pub max_connection_backoff_milliseconds: u64,

    #[serde(default)]
    pub connection: ConnectionSettings,
}

fn pool_default_max_connections() -> usize {
    4
}
fn pool_default_max_retries() -> u32 {
    5
}
fn pool_default_max_open_requests() -> usize {
    32
}
fn pool_default_pipelining_limit() -> usize {
    1
}
fn pool_default_idle_timeout_milliseconds() -> Option<u64> {
    Some(30_000)
}
fn pool_default_base_connection_backoff_milliseconds() -> u64 {
    100
}
fn pool_default_max_connection_backoff_milliseconds() -> u64 {
    120_000
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: pool_default_max_connections(),
            min_connections: 0,
            max_retries: pool_default_max_retries(),
            max_open_requests: pool_default_max_open_requests(),
            pipelining_limit: pool_default_pipelining_limit(),
            idle_timeout_milliseconds: pool_default_idle_timeout_milliseconds(),
            base_connection_backoff_milliseconds: pool_default_base_connection_backoff_milliseconds(),
            max_connection_backoff_milliseconds: pool_default_max_connection_backoff_milliseconds(),
            connection: ConnectionSettings::default(),
        }
    }
}

impl PoolSettings {
    /// Validate every bound the pool relies on.
    ///
    /// Fail-fast: the first violated bound is reported.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::ZeroMaxConnections);
        }

        if self.max_connections > MAX_CONNECTIONS_LIMIT {
            return Err(ConfigError::TooLarge {
                field: "max_connections",
                value: self.max_connections,
                limit: MAX_CONNECTIONS_LIMIT,
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::MinConnectionsExceedMax {
                min: self.min_connections,
                max: self.max_connections,
            });
        }

        if self.max_open_requests == 0 {
            return Err(ConfigError::ZeroMaxOpenRequests);
        }

        if self.max_open_requests > MAX_OPEN_REQUESTS_LIMIT {
            return Err(ConfigError::TooLarge {
                field: "max_open_requests",
                value: self.max_open_requests,
                limit: MAX_OPEN_REQUESTS_LIMIT,
            });
        }

        if self.pipelining_limit == 0 {
            return Err(ConfigError::ZeroPipeliningLimit);
        }

        if self.idle_timeout_milliseconds == Some(0) {
            return Err(ConfigError::ZeroIdleTimeout);
        }

        if self.base_connection_backoff_milliseconds > self.max_connection_backoff_milliseconds {
            return Err(ConfigError::InvalidBackoff {
                base: self.base_connection_backoff_milliseconds,
                max: self.max_connection_backoff_milliseconds,
            });
        }

        if self.connection.connect_timeout_milliseconds == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }

        if self.connection.read_buffer_size == 0 {
            return Err(ConfigError::ZeroReadBufferSize);
        }

        if self.connection.read_buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::TooLarge {
                field: "read_buffer_size",
                value: self.connection.read_buffer_size,
                limit: MAX_BUFFER_SIZE,
            });
        }

        if self.connection.max_response_body_size == 0 {
            return Err(ConfigError::ZeroMaxResponseBodySize);
        }

        if self.connection.max_response_body_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::TooLarge {
                field: "max_response_body_size",
                value: self.connection.max_response_body_size,
                limit: MAX_BUFFER_SIZE,
            });
        }

        Ok(())
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_milliseconds.map(Duration::from_millis)
    }

    pub fn base_connection_backoff(&self) -> Duration {
        Duration::from_millis(self.base_connection_backoff_milliseconds)
    }

    pub fn max_connection_backoff(&self) -> Duration {
        Duration::from_millis(self.max_connection_backoff_milliseconds)
    }
}
