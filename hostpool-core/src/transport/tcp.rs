use crate::config::ConnectionSettings;
use crate::pool::Destination;
use crate::transport::{Connection, Transport, TransportError, http1_connection};
use async_trait::async_trait;
use tokio::net::TcpStream;

/// Plain TCP transport speaking HTTP/1.1.
///
/// TLS destinations are refused; plug in a TLS-capable [`Transport`] for those.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn open(
        &self,
        destination: &Destination,
        settings: &ConnectionSettings,
    ) -> Result<Connection, TransportError> {
        if destination.tls {
            return Err(TransportError::Unsupported(format!(
                "TLS to {destination} requires a TLS-capable transport"
            )));
        }

        let stream = TcpStream::connect((destination.host.as_str(), destination.port))
            .await
            .map_err(TransportError::connect)?;

        stream.set_nodelay(true).map_err(TransportError::connect)?;

        tracing::trace!(%destination, "tcp connection established");

        Ok(http1_connection(stream, destination, settings))
    }
}
