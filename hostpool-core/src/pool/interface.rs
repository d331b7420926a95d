use crate::pool::retry::{FailureKind, RetryCoordinator, RetryDecision};
use crate::pool::slot::{
    ConnectionSlot, SlotContext, SlotEvent, SlotEventKind, SlotState, least_loaded,
};
use crate::pool::supervisor::SupervisorCommand;
use crate::pool::{DestinationKey, PoolError, PoolState, PoolStatus, PooledRequest, SlotId};
use crate::transport::{Transport, TransportError};
use rand::{Rng, rng};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub(crate) enum InterfaceCommand<T> {
    Submit(PooledRequest<T>),
    Status(oneshot::Sender<Option<PoolStatus>>),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Lifecycle {
    Running,
    /// Finishing accepted requests; new ones go back to the supervisor.
    Draining,
    Terminating,
}

/// One incarnation of the pool for a single destination key.
///
/// Runs as its own task and owns every slot, the pending queue and the idle
/// deadline. Nothing here is shared; the outside world talks to it through
/// its mailbox.
pub(crate) struct PoolInterface<T> {
    key: DestinationKey,
    incarnation: u64,
    transport: Arc<dyn Transport>,
    retry: RetryCoordinator,

    slots: Vec<Option<ConnectionSlot<T>>>,
    pending: VecDeque<PooledRequest<T>>,
    next_generation: u64,
    /// Consecutive failed connection attempts across all slots.
    connect_failures: u32,

    idle_deadline: Option<Instant>,
    lifecycle: Lifecycle,
    shutdown_acks: Vec<oneshot::Sender<()>>,

    commands: mpsc::UnboundedReceiver<InterfaceCommand<T>>,
    commands_closed: bool,
    events_tx: mpsc::UnboundedSender<SlotEvent>,
    events_rx: mpsc::UnboundedReceiver<SlotEvent>,
    supervisor: mpsc::WeakUnboundedSender<SupervisorCommand<T>>,
}

impl<T: Send + 'static> PoolInterface<T> {
    pub fn new(
        key: DestinationKey,
        incarnation: u64,
        transport: Arc<dyn Transport>,
        commands: mpsc::UnboundedReceiver<InterfaceCommand<T>>,
        supervisor: mpsc::WeakUnboundedSender<SupervisorCommand<T>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            retry: RetryCoordinator::new(key.settings.max_retries),
            slots: Vec::new(),
            pending: VecDeque::new(),
            next_generation: 0,
            connect_failures: 0,
            idle_deadline: None,
            lifecycle: Lifecycle::Running,
            shutdown_acks: Vec::new(),
            commands,
            commands_closed: false,
            events_tx,
            events_rx,
            supervisor,
            key,
            incarnation,
            transport,
        }
    }

    pub async fn run(mut self) {
        info!(
            event = "pool_started",
            destination = %self.key,
            incarnation = self.incarnation,
            max_connections = self.key.settings.max_connections,
            min_connections = self.key.settings.min_connections,
        );

        self.report(SupervisorCommand::Started {
            key: self.key.clone(),
            incarnation: self.incarnation,
        });
        self.after_change();

        while self.lifecycle != Lifecycle::Terminating {
            tokio::select! {
                Some(event) = self.events_rx.recv() => {
                    self.on_slot_event(event);
                    self.after_change();
                }
                command = self.commands.recv(), if !self.commands_closed => {
                    match command {
                        Some(command) => self.on_command(command),
                        None => {
                            // Every handle is gone: finish what was accepted, then stop.
                            self.commands_closed = true;
                            self.begin_shutdown();
                        }
                    }
                    self.after_change();
                }
                _ = idle_expired(self.idle_deadline) => self.on_idle_timeout(),
            }
        }

        self.finish();
    }

    fn on_command(&mut self, command: InterfaceCommand<T>) {
        match command {
            InterfaceCommand::Submit(request) => match self.lifecycle {
                Lifecycle::Running => self.submit(request),
                Lifecycle::Draining | Lifecycle::Terminating => self.redirect(request),
            },
            InterfaceCommand::Status(reply) => {
                let _ = reply.send(Some(self.status()));
            }
            InterfaceCommand::Shutdown(ack) => {
                self.shutdown_acks.push(ack);
                self.begin_shutdown();
            }
        }
    }

    fn submit(&mut self, request: PooledRequest<T>) {
        // Queued requests are older; stay behind them.
        if self.pending.is_empty() {
            if let Err(request) = self.place(request) {
                self.pending.push_back(request);
            }
        } else {
            self.pending.push_back(request);
        }
    }

    /// Put a request on a slot: the least loaded accepting one, else a new one.
    /// Hands the request back when the pool is at capacity.
    fn place(&mut self, request: PooledRequest<T>) -> Result<(), PooledRequest<T>> {
        let limit = self.key.settings.pipelining_limit;

        if let Some(id) = least_loaded(&self.slots, limit) {
            if let Some(slot) = self.slots[id.0].as_mut() {
                slot.dispatch(request);
                return Ok(());
            }
            unreachable!("least_loaded returned empty {id}");
        }

        match self.free_index() {
            Some(index) => {
                self.open_slot(index, Some(request));
                Ok(())
            }
            None => Err(request),
        }
    }

    fn dispatch_pending(&mut self) {
        while let Some(request) = self.pending.pop_front() {
            if let Err(request) = self.place(request) {
                self.pending.push_front(request);
                break;
            }
        }
    }

    /// A vacant slot index, growing the table up to `max_connections`.
    fn free_index(&mut self) -> Option<usize> {
        if let Some(index) = self.slots.iter().position(Option::is_none) {
            return Some(index);
        }

        if self.slots.len() < self.key.settings.max_connections {
            self.slots.push(None);
            return Some(self.slots.len() - 1);
        }

        None
    }

    fn open_slot(&mut self, index: usize, first: Option<PooledRequest<T>>) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let context = SlotContext {
            transport: Arc::clone(&self.transport),
            destination: self.key.destination.clone(),
            settings: self.key.settings.connection.clone(),
            events: self.events_tx.clone(),
        };

        let mut slot = ConnectionSlot::new(SlotId(index), generation);
        slot.open(context, self.connection_backoff());
        if let Some(request) = first {
            slot.dispatch(request);
        }

        self.slots[index] = Some(slot);
    }

    fn on_slot_event(&mut self, event: SlotEvent) {
        let index = event.slot.0;
        let current = self.slots[index]
            .as_ref()
            .is_some_and(|slot| slot.generation == event.generation);

        if !current {
            debug!(slot = %event.slot, generation = event.generation, "stale slot event dropped");
            return;
        }

        match event.kind {
            SlotEventKind::Connected => {
                self.connect_failures = 0;
                if let Some(slot) = self.slots[index].as_mut() {
                    slot.on_connected();
                }
            }
            SlotEventKind::ConnectFailed(e) => {
                self.connect_failures = self.connect_failures.saturating_add(1);
                self.fail_slot(event.slot, e);
            }
            SlotEventKind::Response(response) => {
                let Some(slot) = self.slots[index].as_mut() else {
                    return;
                };

                match slot.on_response(&response) {
                    Some(request) => request.complete(Ok(response)),
                    None => {
                        self.fail_slot(
                            event.slot,
                            TransportError::Protocol("unsolicited response".into()),
                        );
                        return;
                    }
                }

                if slot.is_drained_closing() {
                    self.close_slot(event.slot, "peer requested close");
                }
            }
            SlotEventKind::Failed(e) => self.fail_slot(event.slot, e),
            SlotEventKind::PeerClosed => {
                let busy = self.slots[index]
                    .as_ref()
                    .is_some_and(|slot| slot.in_flight() > 0);

                if busy {
                    self.fail_slot(event.slot, TransportError::Closed);
                } else {
                    self.close_slot(event.slot, "peer closed");
                }
            }
        }
    }

    /// Close a failed slot and route each request it held through the retry policy.
    fn fail_slot(&mut self, id: SlotId, error: TransportError) {
        let Some(mut slot) = self.slots[id.0].take() else {
            return;
        };

        let lost = slot.fail();
        warn!(
            event = "connection_failed",
            destination = %self.key,
            slot = %id,
            error = %error,
            lost = lost.len(),
        );

        let mut retries = Vec::new();
        for (position, mut request) in lost.into_iter().enumerate() {
            let kind = if position == 0 && error.is_mid_response() {
                FailureKind::ResponseStream
            } else {
                FailureKind::Connection
            };

            request.attempts = request.attempts.saturating_add(1);

            match self.retry.decide(kind, request.attempts) {
                RetryDecision::Retry => retries.push(request),
                RetryDecision::GiveUp => self.give_up(request, kind, error.clone()),
            }
        }

        // Retries go ahead of fresh work, in their original order.
        for request in retries.into_iter().rev() {
            self.pending.push_front(request);
        }
    }

    fn give_up(&self, request: PooledRequest<T>, kind: FailureKind, source: TransportError) {
        let destination = self.key.destination.clone();

        warn!(
            event = "request_failed",
            destination = %destination,
            attempts = request.attempts,
            kind = ?kind,
            error = %source,
        );

        let error = match kind {
            FailureKind::Connection => PoolError::Connection {
                destination,
                attempts: request.attempts,
                source,
            },
            FailureKind::ResponseStream => PoolError::ResponseStream {
                destination,
                source,
            },
        };

        request.complete(Err(error));
    }

    fn close_slot(&mut self, id: SlotId, reason: &'static str) {
        if let Some(mut slot) = self.slots[id.0].take() {
            debug!(slot = %id, idle_for = ?slot.idle_for(), reason, "slot closed");
            slot.close();
        }
    }

    /// Slots that count towards the floor: connecting or connected, not closing.
    fn live_slots(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|slot| slot.state().is_open())
            .count()
    }

    fn ensure_min_connections(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            return;
        }

        while self.live_slots() < self.key.settings.min_connections {
            let Some(index) = self.free_index() else {
                break;
            };
            self.open_slot(index, None);
        }
    }

    fn in_flight(&self) -> usize {
        self.slots.iter().flatten().map(ConnectionSlot::in_flight).sum()
    }

    fn has_work(&self) -> bool {
        !self.pending.is_empty() || self.in_flight() > 0
    }

    /// Housekeeping after anything that may have freed capacity or changed load.
    fn after_change(&mut self) {
        self.dispatch_pending();
        self.ensure_min_connections();
        self.check_drained();
        self.refresh_idle_timer();
    }

    fn refresh_idle_timer(&mut self) {
        let Some(timeout) = self.key.settings.idle_timeout() else {
            return;
        };

        if self.lifecycle != Lifecycle::Running || self.has_work() {
            self.idle_deadline = None;
        } else if self.idle_deadline.is_none() {
            self.idle_deadline = Some(Instant::now() + timeout);
        }
    }

    fn on_idle_timeout(&mut self) {
        self.idle_deadline = None;
        if self.lifecycle != Lifecycle::Running || self.has_work() {
            return;
        }

        let min_connections = self.key.settings.min_connections;

        if min_connections == 0 {
            info!(
                event = "pool_idle",
                destination = %self.key,
                incarnation = self.incarnation,
                "pool idle, terminating"
            );
            self.lifecycle = Lifecycle::Terminating;
            self.report_terminating();
            return;
        }

        // Shrink to the floor, newest slots first.
        let mut live = self.live_slots();
        let idle: Vec<SlotId> = self
            .slots
            .iter()
            .flatten()
            .rev()
            .filter(|slot| slot.state() == SlotState::Idle)
            .map(|slot| slot.id)
            .collect();

        for id in idle {
            if live <= min_connections {
                break;
            }
            self.close_slot(id, "idle");
            live -= 1;
        }

        debug!(destination = %self.key, open_slots = live, "pool shrunk to floor");
    }

    fn begin_shutdown(&mut self) {
        if self.lifecycle != Lifecycle::Running {
            return;
        }

        info!(
            event = "pool_draining",
            destination = %self.key,
            incarnation = self.incarnation,
            in_flight = self.in_flight(),
            queued = self.pending.len(),
        );

        self.lifecycle = Lifecycle::Draining;
        self.idle_deadline = None;
        self.report_terminating();

        // Idle slots have nothing left to do.
        let idle: Vec<SlotId> = self
            .slots
            .iter()
            .flatten()
            .filter(|slot| slot.in_flight() == 0)
            .map(|slot| slot.id)
            .collect();
        for id in idle {
            self.close_slot(id, "draining");
        }
    }

    fn check_drained(&mut self) {
        if self.lifecycle == Lifecycle::Draining && !self.has_work() {
            self.lifecycle = Lifecycle::Terminating;
        }
    }

    /// Tear the incarnation down and hand anything left back to the supervisor.
    fn finish(mut self) {
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                InterfaceCommand::Submit(request) => self.redirect(request),
                InterfaceCommand::Status(reply) => {
                    let _ = reply.send(Some(self.status()));
                }
                InterfaceCommand::Shutdown(ack) => self.shutdown_acks.push(ack),
            }
        }

        while let Some(request) = self.pending.pop_front() {
            self.redirect(request);
        }

        for slot in self.slots.iter_mut().flatten() {
            slot.close();
        }
        self.slots.clear();

        info!(
            event = "pool_terminated",
            destination = %self.key,
            incarnation = self.incarnation,
        );

        let acks = std::mem::take(&mut self.shutdown_acks);
        self.report(SupervisorCommand::Terminated {
            key: self.key.clone(),
            incarnation: self.incarnation,
            acks,
        });
    }

    fn status(&self) -> PoolStatus {
        let state = match self.lifecycle {
            Lifecycle::Running => PoolState::Running,
            Lifecycle::Draining => PoolState::Draining,
            Lifecycle::Terminating => PoolState::Terminating,
        };

        PoolStatus {
            state,
            open_slots: self.slots.iter().flatten().count(),
            in_flight: self.in_flight(),
            queued: self.pending.len(),
        }
    }

    /// Send a request back to the supervisor for the next incarnation.
    fn redirect(&self, request: PooledRequest<T>) {
        self.report(SupervisorCommand::Dispatch {
            key: self.key.clone(),
            request,
        });
    }

    fn report_terminating(&self) {
        self.report(SupervisorCommand::Terminating {
            key: self.key.clone(),
            incarnation: self.incarnation,
        });
    }

    fn report(&self, command: SupervisorCommand<T>) {
        // With the supervisor gone, dropped requests answer for themselves.
        if let Some(supervisor) = self.supervisor.upgrade() {
            let _ = supervisor.send(command);
        }
    }

    fn connection_backoff(&self) -> Duration {
        let settings = &self.key.settings;
        let delay = backoff_delay(
            self.connect_failures,
            settings.base_connection_backoff(),
            settings.max_connection_backoff(),
        );

        let jitter_ceiling = u64::try_from(delay.as_millis() / 10).unwrap_or(u64::MAX);
        if jitter_ceiling == 0 {
            return delay;
        }

        delay + Duration::from_millis(rng().random_range(0..=jitter_ceiling))
    }
}

/// Delay before the next connection attempt after `failures` consecutive
/// failures: zero, then `base`, doubling up to `max`.
pub(crate) fn backoff_delay(failures: u32, base: Duration, max: Duration) -> Duration {
    if failures == 0 {
        return Duration::ZERO;
    }

    let exponent = (failures - 1).min(31);
    base.saturating_mul(1u32 << exponent).min(max)
}

async fn idle_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
