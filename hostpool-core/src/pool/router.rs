use crate::config::PoolSettings;
use crate::pool::supervisor::SupervisorHandle;
use crate::pool::{Destination, DestinationKey, Gateway, Outcome, PoolStatus};
use ahash::RandomState;
use bytes::Bytes;
use dashmap::DashMap;
use http::Request;
use std::sync::Arc;

/// Pool of pools: routes each request by the scheme and authority of its URI.
///
/// Gateways are created on first use and share one supervisor. The router
/// remembers every destination it has routed to until [`SuperPool::prune`]
/// forgets the ones whose pool has shut down.
pub struct SuperPool<T> {
    settings: Arc<PoolSettings>,
    supervisor: SupervisorHandle<T>,
    gateways: Arc<DashMap<DestinationKey, Gateway<T>, RandomState>>,
}

impl<T> Clone for SuperPool<T> {
    fn clone(&self) -> Self {
        Self {
            settings: Arc::clone(&self.settings),
            supervisor: self.supervisor.clone(),
            gateways: Arc::clone(&self.gateways),
        }
    }
}

impl<T: Send + 'static> SuperPool<T> {
    pub(crate) fn new(settings: Arc<PoolSettings>, supervisor: SupervisorHandle<T>) -> Self {
        Self {
            settings,
            supervisor,
            gateways: Arc::new(DashMap::with_hasher(RandomState::new())),
        }
    }

    /// Send a request with an absolute `http`/`https` URI.
    ///
    /// Anything else fails with `MalformedRequest` before any pool is touched.
    pub async fn submit(&self, request: Request<Bytes>, token: T) -> Outcome<T> {
        let destination = match Destination::from_uri(request.uri()) {
            Ok(destination) => destination,
            Err(e) => {
                tracing::debug!(uri = %request.uri(), error = %e, "request rejected by router");
                return (Err(e), token);
            }
        };

        let gateway = self.gateway(destination);
        gateway.submit(request, token).await
    }

    /// Get (or lazily create) the gateway for a destination.
    pub fn gateway(&self, destination: Destination) -> Gateway<T> {
        let key = DestinationKey::new(destination, Arc::clone(&self.settings));
        self.gateways
            .entry(key.clone())
            .or_insert_with(|| Gateway::new(key, self.supervisor.clone()))
            .clone()
    }

    pub async fn status(&self, destination: &Destination) -> Option<PoolStatus> {
        let key = DestinationKey::new(destination.clone(), Arc::clone(&self.settings));
        let gateway = self.gateways.get(&key).map(|entry| entry.value().clone())?;
        gateway.status().await
    }

    /// Destinations with a gateway, live or not.
    pub fn destinations(&self) -> Vec<Destination> {
        self.gateways
            .iter()
            .map(|entry| entry.key().destination.clone())
            .collect()
    }

    /// Forget gateways whose pool is absent and that have no open request.
    ///
    /// Returns how many were removed. A later request to a forgotten
    /// destination creates its gateway again.
    pub async fn prune(&self) -> usize {
        let gateways: Vec<(DestinationKey, Gateway<T>)> = self
            .gateways
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut removed = 0;
        for (key, gateway) in gateways {
            if gateway.status().await.is_some() {
                continue;
            }

            if self
                .gateways
                .remove_if(&key, |_, gateway| gateway.is_unused())
                .is_some()
            {
                tracing::debug!(destination = %key, "gateway pruned");
                removed += 1;
            }
        }

        removed
    }

    /// Shut down every pool this router has created.
    pub async fn shutdown(&self) {
        let gateways: Vec<Gateway<T>> = self
            .gateways
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        for gateway in gateways {
            gateway.shutdown().await;
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }
}
