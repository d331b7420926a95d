//! HTTP client connection pooling.
//!
//! Requests are submitted together with an opaque token and answered with
//! `(result, token)`. A [`Gateway`] pools connections to one destination; a
//! [`SuperPool`] routes by request URI to one pool per destination.

pub mod config;
pub mod logging;
pub mod pool;
pub mod transport;

pub use config::{ConfigError, ConnectionSettings, PoolSettings, load_settings};
pub use pool::{
    Destination, Gateway, Outcome, PoolError, PoolState, PoolStatus, SuperPool, create_pool,
    create_super_pool,
};
pub use transport::{TcpTransport, Transport, TransportError};
