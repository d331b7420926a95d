use crate::config::PoolSettings;
use crate::pool::supervisor::SupervisorHandle;
use crate::pool::{Destination, DestinationKey, Outcome, PoolError, PoolStatus, PooledRequest};
use bytes::Bytes;
use http::Request;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Caller-facing handle to the pool of one destination.
///
/// A gateway outlives the pool incarnations behind it: when the pool shuts
/// itself down after being idle, the next submission brings up a fresh one.
/// Clones share the same pool and the same `max_open_requests` budget.
pub struct Gateway<T> {
    key: DestinationKey,
    supervisor: SupervisorHandle<T>,
    permits: Arc<Semaphore>,
}

impl<T> Clone for Gateway<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            supervisor: self.supervisor.clone(),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl<T: Send + 'static> Gateway<T> {
    pub(crate) fn new(key: DestinationKey, supervisor: SupervisorHandle<T>) -> Self {
        let permits = Arc::new(Semaphore::new(key.settings.max_open_requests));
        Self {
            key,
            supervisor,
            permits,
        }
    }

    /// No request of this gateway is open.
    pub(crate) fn is_unused(&self) -> bool {
        self.permits.available_permits() == self.key.settings.max_open_requests
    }

    /// Send `request` through the pool and wait for its outcome.
    ///
    /// Waits for capacity first when `max_open_requests` requests are already
    /// open. The token is handed back untouched whatever the result.
    pub async fn submit(&self, request: Request<Bytes>, token: T) -> Outcome<T> {
        if let Err(e) = self.check(&request) {
            return (Err(e), token);
        }

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => unreachable!("gateway semaphore is never closed"),
        };

        let (pooled, rx) =
            PooledRequest::new(request, token, self.key.destination.clone(), permit);
        self.supervisor.dispatch(self.key.clone(), pooled);

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => unreachable!("pooled request dropped without an outcome"),
        }
    }

    /// Status of the live pool incarnation, `None` when there is none.
    pub async fn status(&self) -> Option<PoolStatus> {
        self.supervisor.status(self.key.clone()).await
    }

    /// Let in-flight requests finish, then stop the pool.
    ///
    /// Returns once the incarnation is gone. The gateway stays usable.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown(self.key.clone()).await
    }

    pub fn destination(&self) -> &Destination {
        &self.key.destination
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.key.settings
    }

    /// Absolute URIs must point at this gateway's destination.
    fn check(&self, request: &Request<Bytes>) -> Result<(), PoolError> {
        if request.uri().scheme().is_none() {
            return Ok(());
        }

        let target = Destination::from_uri(request.uri())?;
        if !target.host.eq_ignore_ascii_case(&self.key.destination.host)
            || target.port != self.key.destination.port
            || target.tls != self.key.destination.tls
        {
            return Err(PoolError::malformed(format!(
                "request for {target} submitted to the pool of {}",
                self.key.destination
            )));
        }

        Ok(())
    }
}
