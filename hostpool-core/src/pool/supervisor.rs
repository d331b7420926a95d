use crate::pool::interface::{InterfaceCommand, PoolInterface};
use crate::pool::{DestinationKey, PoolState, PoolStatus, PooledRequest};
use crate::transport::Transport;
use ahash::RandomState;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

pub(crate) enum SupervisorCommand<T> {
    Dispatch {
        key: DestinationKey,
        request: PooledRequest<T>,
    },
    Status {
        key: DestinationKey,
        reply: oneshot::Sender<Option<PoolStatus>>,
    },
    Shutdown {
        key: DestinationKey,
        ack: oneshot::Sender<()>,
    },

    // Reports from interfaces.
    Started {
        key: DestinationKey,
        incarnation: u64,
    },
    Terminating {
        key: DestinationKey,
        incarnation: u64,
    },
    Terminated {
        key: DestinationKey,
        incarnation: u64,
        acks: Vec<oneshot::Sender<()>>,
    },
}

/// Registry entry for a key with a live (or just-dying) incarnation.
/// A key without an entry is absent.
enum PoolEntry<T> {
    Starting {
        incarnation: u64,
        commands: mpsc::UnboundedSender<InterfaceCommand<T>>,
    },
    Running {
        incarnation: u64,
        commands: mpsc::UnboundedSender<InterfaceCommand<T>>,
    },
    /// The interface is on its way out. Requests wait here for the next one.
    Terminating {
        incarnation: u64,
        commands: mpsc::UnboundedSender<InterfaceCommand<T>>,
        waiting: Vec<PooledRequest<T>>,
        acks: Vec<oneshot::Sender<()>>,
    },
}

impl<T> PoolEntry<T> {
    fn incarnation(&self) -> u64 {
        match self {
            PoolEntry::Starting { incarnation, .. }
            | PoolEntry::Running { incarnation, .. }
            | PoolEntry::Terminating { incarnation, .. } => *incarnation,
        }
    }
}

/// Cheap handle to a running supervisor task.
pub(crate) struct SupervisorHandle<T> {
    commands: mpsc::UnboundedSender<SupervisorCommand<T>>,
}

impl<T> Clone for SupervisorHandle<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
        }
    }
}

impl<T: Send + 'static> SupervisorHandle<T> {
    /// Start a supervisor task. It stops once every handle is dropped.
    pub fn spawn(transport: Arc<dyn Transport>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let supervisor = PoolSupervisor {
            pools: HashMap::with_hasher(RandomState::new()),
            transport,
            commands: rx,
            myself: tx.downgrade(),
            next_incarnation: 0,
        };
        tokio::spawn(supervisor.run());

        Self { commands: tx }
    }

    pub fn dispatch(&self, key: DestinationKey, request: PooledRequest<T>) {
        // If the supervisor died the request is dropped and answers PoolTerminated.
        let _ = self
            .commands
            .send(SupervisorCommand::Dispatch { key, request });
    }

    pub async fn status(&self, key: DestinationKey) -> Option<PoolStatus> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SupervisorCommand::Status { key, reply })
            .ok()?;
        rx.await.ok().flatten()
    }

    pub async fn shutdown(&self, key: DestinationKey) {
        let (ack, rx) = oneshot::channel();
        if self
            .commands
            .send(SupervisorCommand::Shutdown { key, ack })
            .is_ok()
        {
            let _ = rx.await;
        }
    }
}

/// Owns the `DestinationKey -> incarnation` registry and runs each pool's
/// lifecycle: start on demand, buffer while terminating, restart afterwards.
struct PoolSupervisor<T> {
    pools: HashMap<DestinationKey, PoolEntry<T>, RandomState>,
    transport: Arc<dyn Transport>,
    commands: mpsc::UnboundedReceiver<SupervisorCommand<T>>,
    /// Handed to interfaces so they cannot keep the supervisor alive.
    myself: mpsc::WeakUnboundedSender<SupervisorCommand<T>>,
    next_incarnation: u64,
}

impl<T: Send + 'static> PoolSupervisor<T> {
    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }

        debug!(pools = self.pools.len(), "pool supervisor stopped");
    }

    fn handle(&mut self, command: SupervisorCommand<T>) {
        match command {
            SupervisorCommand::Dispatch { key, request } => self.dispatch(key, request),
            SupervisorCommand::Status { key, reply } => self.status(key, reply),
            SupervisorCommand::Shutdown { key, ack } => self.shutdown(key, ack),
            SupervisorCommand::Started { key, incarnation } => self.started(key, incarnation),
            SupervisorCommand::Terminating { key, incarnation } => {
                self.terminating(key, incarnation)
            }
            SupervisorCommand::Terminated {
                key,
                incarnation,
                acks,
            } => self.terminated(key, incarnation, acks),
        }
    }

    fn dispatch(&mut self, key: DestinationKey, request: PooledRequest<T>) {
        let rejected = match self.pools.get_mut(&key) {
            None => Some(request),
            Some(PoolEntry::Starting { commands, .. } | PoolEntry::Running { commands, .. }) => {
                match commands.send(InterfaceCommand::Submit(request)) {
                    Ok(()) => return,
                    Err(mpsc::error::SendError(InterfaceCommand::Submit(request))) => {
                        warn!(
                            event = "pool_restart",
                            destination = %key,
                            "pool interface is gone, starting a new one"
                        );
                        self.pools.remove(&key);
                        Some(request)
                    }
                    Err(_) => unreachable!("submit command came back as something else"),
                }
            }
            Some(PoolEntry::Terminating { waiting, .. }) => {
                waiting.push(request);
                None
            }
        };

        if let Some(request) = rejected {
            self.start(key, vec![request]);
        }
    }

    fn status(&mut self, key: DestinationKey, reply: oneshot::Sender<Option<PoolStatus>>) {
        let Some(entry) = self.pools.get(&key) else {
            let _ = reply.send(None);
            return;
        };

        match entry {
            PoolEntry::Starting { .. } => {
                let _ = reply.send(Some(PoolStatus::starting()));
            }
            PoolEntry::Running { commands, .. } => {
                if let Err(mpsc::error::SendError(InterfaceCommand::Status(reply))) =
                    commands.send(InterfaceCommand::Status(reply))
                {
                    self.pools.remove(&key);
                    let _ = reply.send(None);
                }
            }
            PoolEntry::Terminating {
                commands, waiting, ..
            } => {
                let queued = waiting.len();
                if let Err(mpsc::error::SendError(InterfaceCommand::Status(reply))) =
                    commands.send(InterfaceCommand::Status(reply))
                {
                    let _ = reply.send(Some(PoolStatus {
                        state: PoolState::Terminating,
                        open_slots: 0,
                        in_flight: 0,
                        queued,
                    }));
                }
            }
        }
    }

    fn shutdown(&mut self, key: DestinationKey, ack: oneshot::Sender<()>) {
        match self.pools.get_mut(&key) {
            None => {
                let _ = ack.send(());
            }
            Some(PoolEntry::Starting { commands, .. } | PoolEntry::Running { commands, .. }) => {
                if let Err(mpsc::error::SendError(InterfaceCommand::Shutdown(ack))) =
                    commands.send(InterfaceCommand::Shutdown(ack))
                {
                    self.pools.remove(&key);
                    let _ = ack.send(());
                }
            }
            Some(PoolEntry::Terminating { acks, .. }) => acks.push(ack),
        }
    }

    fn started(&mut self, key: DestinationKey, incarnation: u64) {
        let Some(entry) = self.pools.get_mut(&key) else {
            return;
        };

        if let PoolEntry::Starting {
            incarnation: current,
            commands,
        } = entry
        {
            if *current == incarnation {
                *entry = PoolEntry::Running {
                    incarnation,
                    commands: commands.clone(),
                };
            }
        }
    }

    fn terminating(&mut self, key: DestinationKey, incarnation: u64) {
        let Some(entry) = self.pools.get_mut(&key) else {
            return;
        };

        if entry.incarnation() != incarnation {
            debug!(destination = %key, incarnation, "stale terminating report ignored");
            return;
        }

        match entry {
            PoolEntry::Starting { commands, .. } | PoolEntry::Running { commands, .. } => {
                info!(event = "pool_terminating", destination = %key, incarnation);
                *entry = PoolEntry::Terminating {
                    incarnation,
                    commands: commands.clone(),
                    waiting: Vec::new(),
                    acks: Vec::new(),
                };
            }
            PoolEntry::Terminating { .. } => {}
        }
    }

    fn terminated(&mut self, key: DestinationKey, incarnation: u64, acks: Vec<oneshot::Sender<()>>) {
        let current = self
            .pools
            .get(&key)
            .is_some_and(|entry| entry.incarnation() == incarnation);

        let mut waiting = Vec::new();
        let mut acks = acks;

        if current {
            if let Some(PoolEntry::Terminating {
                waiting: buffered,
                acks: pending_acks,
                ..
            }) = self.pools.remove(&key)
            {
                waiting = buffered;
                acks.extend(pending_acks);
            }
        }

        for ack in acks {
            let _ = ack.send(());
        }

        if !waiting.is_empty() {
            debug!(destination = %key, waiting = waiting.len(), "restarting pool for buffered requests");
            self.start(key, waiting);
        }
    }

    fn start(&mut self, key: DestinationKey, requests: Vec<PooledRequest<T>>) {
        let incarnation = self.next_incarnation;
        self.next_incarnation += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let interface = PoolInterface::new(
            key.clone(),
            incarnation,
            Arc::clone(&self.transport),
            rx,
            self.myself.clone(),
        );
        tokio::spawn(interface.run());

        for request in requests {
            let _ = tx.send(InterfaceCommand::Submit(request));
        }

        self.pools.insert(
            key,
            PoolEntry::Starting {
                incarnation,
                commands: tx,
            },
        );
    }
}
