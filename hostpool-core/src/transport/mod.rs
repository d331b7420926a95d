//! The seam between the pool and the network.
//!
//! The pool only ever talks to a [`Transport`]: it opens a [`Connection`], writes
//! requests through its [`RequestWriter`] and reads responses, in send order,
//! from its [`ResponseReader`]. A connection is never reused after it fails.

mod error;
mod http1;
mod tcp;

#[cfg(test)]
mod tests;

pub use error::TransportError;
pub use http1::{Http1Reader, Http1Writer, http1_connection};
pub use tcp::TcpTransport;

use crate::config::ConnectionSettings;
use crate::pool::Destination;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(
        &self,
        destination: &Destination,
        settings: &ConnectionSettings,
    ) -> Result<Connection, TransportError>;
}

#[async_trait]
pub trait RequestWriter: Send {
    async fn send(&mut self, request: &Request<Bytes>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait ResponseReader: Send {
    /// Next response in send order, or `Ok(None)` once the peer has cleanly
    /// closed the stream.
    async fn next_response(&mut self) -> Result<Option<Response<Bytes>>, TransportError>;
}

/// One open connection, split into its write and read halves.
pub struct Connection {
    pub writer: Box<dyn RequestWriter>,
    pub reader: Box<dyn ResponseReader>,
}

impl Connection {
    pub fn new(
        writer: impl RequestWriter + 'static,
        reader: impl ResponseReader + 'static,
    ) -> Self {
        Self {
            writer: Box::new(writer),
            reader: Box::new(reader),
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}
