use crate::pool::{Destination, PoolError};
use bytes::Bytes;
use http::{Request, Response};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, oneshot};

/// What a caller gets back: the result paired with its own token.
pub type Outcome<T> = (Result<Response<Bytes>, PoolError>, T);

/// A request travelling through the pool.
///
/// Invariants:
/// - The caller receives exactly one outcome, either via `complete` or from Drop
/// - The backpressure permit is held until the outcome is delivered
pub struct PooledRequest<T> {
    pub(crate) request: Arc<Request<Bytes>>,
    /// Failed attempts so far.
    pub(crate) attempts: u32,
    token: Option<T>,
    respond_to: Option<oneshot::Sender<Outcome<T>>>,
    destination: Destination,
    _permit: OwnedSemaphorePermit,
}

impl<T> PooledRequest<T> {
    pub(crate) fn new(
        request: Request<Bytes>,
        token: T,
        destination: Destination,
        permit: OwnedSemaphorePermit,
    ) -> (Self, oneshot::Receiver<Outcome<T>>) {
        let (tx, rx) = oneshot::channel();
        let pooled = Self {
            request: Arc::new(request),
            attempts: 0,
            token: Some(token),
            respond_to: Some(tx),
            destination,
            _permit: permit,
        };
        (pooled, rx)
    }

    /// Deliver the terminal result. Consumes the request, releasing its permit.
    pub(crate) fn complete(mut self, result: Result<Response<Bytes>, PoolError>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: Result<Response<Bytes>, PoolError>) {
        if let (Some(tx), Some(token)) = (self.respond_to.take(), self.token.take()) {
            // The caller may have stopped waiting.
            let _ = tx.send((result, token));
        }
    }
}

impl<T> Drop for PooledRequest<T> {
    fn drop(&mut self) {
        if self.respond_to.is_none() {
            return;
        }

        tracing::warn!(
            event = "request_abandoned",
            destination = %self.destination,
            attempts = self.attempts,
            "request dropped without a result"
        );

        let destination = self.destination.clone();
        self.deliver(Err(PoolError::PoolTerminated { destination }));
    }
}

impl<T> std::fmt::Debug for PooledRequest<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledRequest")
            .field("method", self.request.method())
            .field("uri", self.request.uri())
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}
