//! The pool engine.
//!
//! A [`Gateway`] hands requests to a supervisor task, which keeps at most one
//! pool interface task alive per [`DestinationKey`]. The interface spreads
//! requests over connection slots, queues what does not fit, retries what a
//! broken connection lost, and shuts itself down when idle.

mod error;
mod gateway;
mod interface;
mod request;
mod retry;
mod router;
mod slot;
mod supervisor;
mod types;

#[cfg(test)]
mod tests;

pub use error::PoolError;
pub use gateway::Gateway;
pub use request::Outcome;
pub use retry::{FailureKind, RetryCoordinator, RetryDecision};
pub use router::SuperPool;
pub use slot::SlotState;
pub use types::{Destination, DestinationKey, PoolState, PoolStatus, SlotId};

pub(crate) use request::PooledRequest;

use crate::config::{ConfigError, PoolSettings};
use crate::transport::Transport;
use std::sync::Arc;
use supervisor::SupervisorHandle;

/// Create a pool for one destination.
///
/// Settings are validated up front. No connection is opened until the first
/// request (or until `min_connections` asks for one). Must be called from
/// within a Tokio runtime.
pub fn create_pool<T: Send + 'static>(
    destination: Destination,
    settings: PoolSettings,
    transport: Arc<dyn Transport>,
) -> Result<Gateway<T>, ConfigError> {
    settings.validate()?;

    let key = DestinationKey::new(destination, Arc::new(settings));
    Ok(Gateway::new(key, SupervisorHandle::spawn(transport)))
}

/// Create a router that pools connections per destination found in request URIs.
///
/// Every destination gets its own pool with the same settings.
pub fn create_super_pool<T: Send + 'static>(
    settings: PoolSettings,
    transport: Arc<dyn Transport>,
) -> Result<SuperPool<T>, ConfigError> {
    settings.validate()?;

    Ok(SuperPool::new(
        Arc::new(settings),
        SupervisorHandle::spawn(transport),
    ))
}
