use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a transport or its codec.
///
/// Cloneable so a single broken connection can be reported to every request
/// it was carrying.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(Arc<io::Error>),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("connection reset: {0}")]
    Reset(Arc<io::Error>),

    #[error("connection closed by peer")]
    Closed,

    #[error("protocol error: {0}")]
    Protocol(String),

    /// The response head was decoded but its body could not be completed.
    #[error("response truncated: {0}")]
    Truncated(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl TransportError {
    pub fn connect(source: io::Error) -> Self {
        Self::Connect(Arc::new(source))
    }

    pub fn reset(source: io::Error) -> Self {
        Self::Reset(Arc::new(source))
    }

    /// Whether the failure happened after a response had started to arrive.
    pub fn is_mid_response(&self) -> bool {
        matches!(self, Self::Truncated(_))
    }
}
