use crate::pool::Destination;
use crate::transport::TransportError;
use thiserror::Error;

/// Terminal failure of one submitted request, delivered alongside its token.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    #[error("request to {destination} failed after {attempts} attempt(s)")]
    Connection {
        destination: Destination,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("response from {destination} broke off mid-stream")]
    ResponseStream {
        destination: Destination,
        #[source]
        source: TransportError,
    },

    #[error("pool for {destination} terminated with the request outstanding")]
    PoolTerminated { destination: Destination },
}

impl PoolError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest {
            reason: reason.into(),
        }
    }
}
