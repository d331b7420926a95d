use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    // IO
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Parsing
    #[error("failed to parse HCL in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: hcl::Error,
    },

    // Validation
    #[error("max_connections must be at least 1")]
    ZeroMaxConnections,

    #[error("min_connections ({min}) must not exceed max_connections ({max})")]
    MinConnectionsExceedMax { min: usize, max: usize },

    #[error("max_open_requests must be at least 1")]
    ZeroMaxOpenRequests,

    #[error("pipelining_limit must be at least 1")]
    ZeroPipeliningLimit,

    #[error("idle_timeout_milliseconds must be positive (use null to never time out)")]
    ZeroIdleTimeout,

    #[error(
        "base_connection_backoff_milliseconds ({base}) exceeds max_connection_backoff_milliseconds ({max})"
    )]
    InvalidBackoff { base: u64, max: u64 },

    #[error("connect_timeout_milliseconds must be positive")]
    ZeroConnectTimeout,

    #[error("read_buffer_size must be positive")]
    ZeroReadBufferSize,

    #[error("max_response_body_size must be positive")]
    ZeroMaxResponseBodySize,

    #[error("{field} ({value}) exceeds the limit of {limit}")]
    TooLarge {
        field: &'static str,
        value: usize,
        limit: usize,
    },
}

impl ConfigError {
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: hcl::Error) -> Self {
        Self::Parse {
            path: path.into(),
            source,
        }
    }
}
