use crate::config::ConnectionSettings;
use crate::pool::{Destination, PooledRequest, SlotId};
use crate::transport::{Connection, Transport, TransportError};
use bytes::Bytes;
use http::header::CONNECTION;
use http::{Request, Response, Version};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SlotState {
    Unconnected,
    Connecting,
    Idle,
    Busy(usize),
    /// The peer asked to close; finishing what is in flight.
    Closing,
    Failed,
    Closed,
}

impl SlotState {
    /// Whether one more request may be sent on this slot right now.
    pub fn accepts(&self, pipelining_limit: usize) -> bool {
        match self {
            SlotState::Idle => true,
            SlotState::Busy(n) => *n < pipelining_limit,
            _ => false,
        }
    }

    /// Connecting or connected. Counts against `max_connections` together with `Closing`.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            SlotState::Connecting | SlotState::Idle | SlotState::Busy(_)
        )
    }
}

/// Everything a slot's I/O task needs to open and drive its connection.
#[derive(Clone)]
pub(crate) struct SlotContext {
    pub transport: Arc<dyn Transport>,
    pub destination: Destination,
    pub settings: ConnectionSettings,
    pub events: mpsc::UnboundedSender<SlotEvent>,
}

#[derive(Debug)]
pub(crate) struct SlotEvent {
    pub slot: SlotId,
    pub generation: u64,
    pub kind: SlotEventKind,
}

#[derive(Debug)]
pub(crate) enum SlotEventKind {
    Connected,
    ConnectFailed(TransportError),
    Response(Response<Bytes>),
    Failed(TransportError),
    /// Clean end of stream from the peer.
    PeerClosed,
}

impl SlotEventKind {
    /// Whether the task ends after sending this.
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed(_) | Self::Failed(_) | Self::PeerClosed
        )
    }
}

/// One physical connection as seen by the pool interface that owns it.
///
/// The connection itself lives in a spawned I/O task; the slot keeps the state
/// machine, the FIFO of requests sent on it, and the channel feeding the task.
/// Dropping the slot aborts the task and with it the connection.
pub(crate) struct ConnectionSlot<T> {
    pub id: SlotId,
    pub generation: u64,
    state: SlotState,
    in_flight: VecDeque<PooledRequest<T>>,
    commands: Option<mpsc::UnboundedSender<Arc<Request<Bytes>>>>,
    task: Option<JoinHandle<()>>,
    last_activity: Instant,
}

impl<T> ConnectionSlot<T> {
    pub fn new(id: SlotId, generation: u64) -> Self {
        Self {
            id,
            generation,
            state: SlotState::Unconnected,
            in_flight: VecDeque::new(),
            commands: None,
            task: None,
            last_activity: Instant::now(),
        }
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn accepts(&self, pipelining_limit: usize) -> bool {
        self.state.accepts(pipelining_limit)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Spawn the I/O task. The connect attempt starts after `backoff`.
    pub fn open(&mut self, context: SlotContext, backoff: Duration) {
        if self.state != SlotState::Unconnected {
            unreachable!("slot {} opened twice (state {:?})", self.id, self.state);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = SlotReporter {
            slot: self.id,
            generation: self.generation,
            events: context.events.clone(),
            settled: AtomicBool::new(false),
        };

        self.commands = Some(tx);
        self.task = Some(tokio::spawn(run_connection(context, backoff, rx, reporter)));
        self.state = SlotState::Connecting;
        self.last_activity = Instant::now();

        tracing::debug!(slot = %self.id, generation = self.generation, ?backoff, "slot connecting");
    }

    pub fn on_connected(&mut self) {
        if self.state != SlotState::Connecting {
            return;
        }
        self.state = self.loaded_state();
        tracing::debug!(slot = %self.id, state = ?self.state, "slot connected");
    }

    /// Hand a request to the I/O task. A connecting slot holds it until the
    /// connection is up.
    pub fn dispatch(&mut self, request: PooledRequest<T>) {
        if let Some(commands) = &self.commands {
            // A send error means the task is gone; its final event fails the slot.
            let _ = commands.send(Arc::clone(&request.request));
        }

        self.in_flight.push_back(request);
        self.last_activity = Instant::now();

        if self.state != SlotState::Connecting {
            self.state = self.loaded_state();
        }
    }

    /// Match a response to the oldest in-flight request.
    ///
    /// Returns `None` for a response nobody asked for.
    pub fn on_response(&mut self, response: &Response<Bytes>) -> Option<PooledRequest<T>> {
        let request = self.in_flight.pop_front()?;
        self.last_activity = Instant::now();

        if self.state == SlotState::Closing || wants_close(response) {
            self.state = SlotState::Closing;
        } else {
            self.state = self.loaded_state();
        }

        Some(request)
    }

    /// A closing slot with nothing left in flight.
    pub fn is_drained_closing(&self) -> bool {
        self.state == SlotState::Closing && self.in_flight.is_empty()
    }

    /// Mark the slot failed and give back every request it held, oldest first.
    pub fn fail(&mut self) -> Vec<PooledRequest<T>> {
        self.state = SlotState::Failed;
        let lost = self.in_flight.drain(..).collect();
        self.close();
        lost
    }

    /// Release the connection. Any request still held is dropped with it.
    pub fn close(&mut self) {
        self.commands = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.state = SlotState::Closed;
    }

    fn loaded_state(&self) -> SlotState {
        match self.in_flight.len() {
            0 => SlotState::Idle,
            n => SlotState::Busy(n),
        }
    }
}

impl<T> Drop for ConnectionSlot<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The accepting slot with the fewest requests in flight, lowest id on ties.
pub(crate) fn least_loaded<T>(
    slots: &[Option<ConnectionSlot<T>>],
    pipelining_limit: usize,
) -> Option<SlotId> {
    slots
        .iter()
        .flatten()
        .filter(|slot| slot.accepts(pipelining_limit))
        .min_by_key(|slot| (slot.in_flight(), slot.id))
        .map(|slot| slot.id)
}

fn wants_close(response: &Response<Bytes>) -> bool {
    let connection = response
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();

    if connection.iter().any(|token| token == "close") {
        return true;
    }

    response.version() == Version::HTTP_10 && !connection.iter().any(|t| t == "keep-alive")
}

/// Sends the slot task's events to the interface.
///
/// Exactly one terminal event leaves every task: if the task ends without
/// reporting one (a panic in a transport, or an abort), dropping the reporter
/// reports a failure. After an abort the slot is already gone and the
/// interface drops the event as stale.
struct SlotReporter {
    slot: SlotId,
    generation: u64,
    events: mpsc::UnboundedSender<SlotEvent>,
    settled: AtomicBool,
}

impl SlotReporter {
    fn report(&self, kind: SlotEventKind) {
        if kind.is_terminal() && self.settled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.send(kind);
    }

    fn send(&self, kind: SlotEventKind) {
        // The interface is gone; nobody is left to tell.
        let _ = self.events.send(SlotEvent {
            slot: self.slot,
            generation: self.generation,
            kind,
        });
    }
}

impl Drop for SlotReporter {
    fn drop(&mut self) {
        if !*self.settled.get_mut() {
            self.send(SlotEventKind::Failed(TransportError::Protocol(
                "connection task ended unexpectedly".into(),
            )));
        }
    }
}

async fn run_connection(
    context: SlotContext,
    backoff: Duration,
    requests: mpsc::UnboundedReceiver<Arc<Request<Bytes>>>,
    reporter: SlotReporter,
) {
    if !backoff.is_zero() {
        tokio::time::sleep(backoff).await;
    }

    let connect_timeout = context.settings.connect_timeout();
    let opened = tokio::time::timeout(
        connect_timeout,
        context
            .transport
            .open(&context.destination, &context.settings),
    )
    .await;

    let connection = match opened {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => {
            reporter.report(SlotEventKind::ConnectFailed(e));
            return;
        }
        Err(_) => {
            reporter.report(SlotEventKind::ConnectFailed(TransportError::ConnectTimeout(
                connect_timeout,
            )));
            return;
        }
    };

    reporter.report(SlotEventKind::Connected);
    drive(connection, requests, &reporter).await;
}

/// Pump requests out and responses back until the connection ends.
async fn drive(
    connection: Connection,
    mut requests: mpsc::UnboundedReceiver<Arc<Request<Bytes>>>,
    reporter: &SlotReporter,
) {
    let Connection {
        mut writer,
        mut reader,
    } = connection;

    let write_loop = async {
        while let Some(request) = requests.recv().await {
            writer.send(&request).await?;
        }
        // No more requests will come; keep reading until the slot is released.
        std::future::pending::<Result<(), TransportError>>().await
    };

    let read_loop = async {
        loop {
            match reader.next_response().await {
                Ok(Some(response)) => reporter.report(SlotEventKind::Response(response)),
                Ok(None) => {
                    reporter.report(SlotEventKind::PeerClosed);
                    return;
                }
                Err(e) => {
                    reporter.report(SlotEventKind::Failed(e));
                    return;
                }
            }
        }
    };

    tokio::select! {
        result = write_loop => {
            if let Err(e) = result {
                reporter.report(SlotEventKind::Failed(e));
            }
        }
        _ = read_loop => {}
    }
}
