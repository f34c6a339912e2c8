//! Event multiplexer
//!
//! One selector task owns the readiness futures of every registered
//! handler. When a future completes, the selector checks the registration
//! is still active, then runs the handler inline or hands it to the worker
//! pool. A registration is re-armed only after its handler finishes, so a
//! channel never has two readers.
//!
//! ```text
//! register ──► selector ──ready──► state Active? ──inline──► handle_event ──► re-arm
//!                 ▲                        │
//!                 │                        └─worker──► handle_event ──Rearm cmd──┐
//!                 └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Cancelling moves a registration `Active -> Cancelling -> Cancelled`.
//! `Registration::cancel` returns once the selector has dropped the readiness
//! future, after which no event for that registration is dispatched.

use crate::error::{Result, TransportError};
use crate::worker_pool::WorkerPool;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

tokio::task_local! {
    /// Set while a handler runs inline on a selector task
    static CURRENT_SELECTOR: usize;
}

static NEXT_MULTIPLEXER_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Acceptable,
}

/// What the selector does with a registration after its handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    Rearm,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Active,
    Cancelling,
    Cancelled,
}

pub trait EventHandler: Send + Sync + 'static {
    fn name(&self) -> String;

    fn interest(&self) -> Interest;

    /// Completes when the channel has work. Must be cancel-safe.
    fn ready(self: Arc<Self>) -> BoxFuture<'static, ()>;

    fn handle_event(self: Arc<Self>, registration: Registration) -> BoxFuture<'static, HandlerOutcome>;

    fn should_use_worker_thread_for_event(&self) -> bool;
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    const ACTIVE: u8 = 0;
    const CANCELLING: u8 = 1;
    const CANCELLED: u8 = 2;

    fn new() -> Self {
        Self(AtomicU8::new(Self::ACTIVE))
    }

    fn load(&self) -> RegistrationState {
        match self.0.load(Ordering::Acquire) {
            Self::ACTIVE => RegistrationState::Active,
            Self::CANCELLING => RegistrationState::Cancelling,
            _ => RegistrationState::Cancelled,
        }
    }

    fn begin_cancel(&self) {
        let _ = self.0.compare_exchange(
            Self::ACTIVE,
            Self::CANCELLING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    fn set_cancelled(&self) {
        self.0.store(Self::CANCELLED, Ordering::Release);
    }
}

enum Command {
    Register {
        id: u64,
        handler: Arc<dyn EventHandler>,
        state: Arc<StateCell>,
    },
    Rearm(u64),
    Deregister(u64),
    Cancel {
        id: u64,
        ack: Option<oneshot::Sender<()>>,
    },
    Shutdown,
}

/// Handle to one handler's registration
#[derive(Clone)]
pub struct Registration {
    id: u64,
    selector: usize,
    state: Arc<StateCell>,
    commands: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> RegistrationState {
        self.state.load()
    }

    pub fn is_active(&self) -> bool {
        self.state() == RegistrationState::Active
    }

    /// Deregister and wait until the selector has let go of the channel.
    ///
    /// From inside a handler running inline on the same selector this
    /// returns at once; the selector finishes the cancel after the handler.
    pub async fn cancel(&self) {
        if self.state() == RegistrationState::Cancelled {
            return;
        }
        self.state.begin_cancel();

        let inline = CURRENT_SELECTOR
            .try_with(|id| *id == self.selector)
            .unwrap_or(false);
        if inline {
            let _ = self.commands.send(Command::Cancel { id: self.id, ack: None });
            return;
        }

        let (tx, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Cancel {
                id: self.id,
                ack: Some(tx),
            })
            .is_err()
        {
            self.state.set_cancelled();
            return;
        }
        // A dropped ack means the selector shut down, which also deregisters
        let _ = rx.await;
        self.state.set_cancelled();
    }

    /// Start cancelling without waiting for the selector
    pub fn cancel_nowait(&self) {
        if self.state() == RegistrationState::Cancelled {
            return;
        }
        self.state.begin_cancel();
        if self
            .commands
            .send(Command::Cancel { id: self.id, ack: None })
            .is_err()
        {
            self.state.set_cancelled();
        }
    }
}

#[derive(Debug, Default)]
pub struct MultiplexerStats {
    pub registered: AtomicU64,
    pub dispatched_inline: AtomicU64,
    pub dispatched_to_workers: AtomicU64,
    pub suppressed: AtomicU64,
}

pub struct EventMultiplexer {
    id: usize,
    commands: mpsc::UnboundedSender<Command>,
    next_registration: AtomicU64,
    stats: Arc<MultiplexerStats>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventMultiplexer {
    /// Start a selector task on the current runtime
    pub fn new(worker_pool: Arc<WorkerPool>) -> Arc<Self> {
        let id = NEXT_MULTIPLEXER_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(MultiplexerStats::default());
        let selector = Selector {
            id,
            commands: rx,
            loopback: tx.clone(),
            worker_pool,
            entries: HashMap::new(),
            pending_cancels: HashMap::new(),
            stats: stats.clone(),
        };
        let task = tokio::spawn(selector.run());
        Arc::new(Self {
            id,
            commands: tx,
            next_registration: AtomicU64::new(1),
            stats,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stats(&self) -> &Arc<MultiplexerStats> {
        &self.stats
    }

    pub fn register(&self, handler: Arc<dyn EventHandler>) -> Result<Registration> {
        let id = self.next_registration.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(StateCell::new());
        trace!(
            "multiplexer {} registering {} ({:?}) as {}",
            self.id,
            handler.name(),
            handler.interest(),
            id
        );
        self.commands
            .send(Command::Register {
                id,
                handler,
                state: state.clone(),
            })
            .map_err(|_| TransportError::MultiplexerShutdown)?;
        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        Ok(Registration {
            id,
            selector: self.id,
            state,
            commands: self.commands.clone(),
        })
    }

    /// Stop the selector; every registration ends up cancelled
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for EventMultiplexer {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
    }
}

struct Entry {
    handler: Arc<dyn EventHandler>,
    state: Arc<StateCell>,
    armed: Option<AbortHandle>,
}

/// (registration id, whether readiness fired rather than being aborted)
type ReadyFuture = BoxFuture<'static, (u64, bool)>;

struct Selector {
    id: usize,
    commands: mpsc::UnboundedReceiver<Command>,
    loopback: mpsc::UnboundedSender<Command>,
    worker_pool: Arc<WorkerPool>,
    entries: HashMap<u64, Entry>,
    pending_cancels: HashMap<u64, (Arc<StateCell>, Vec<oneshot::Sender<()>>)>,
    stats: Arc<MultiplexerStats>,
}

impl Selector {
    async fn run(mut self) {
        let mut ready: FuturesUnordered<ReadyFuture> = FuturesUnordered::new();
        debug!("multiplexer {} started", self.id);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.apply(command, &mut ready),
                },
                Some((id, fired)) = ready.next(), if !ready.is_empty() => {
                    self.on_ready(id, fired, &mut ready).await;
                }
            }
        }

        for (_, entry) in self.entries.drain() {
            if let Some(handle) = entry.armed {
                handle.abort();
            }
            entry.state.set_cancelled();
        }
        for (_, (state, acks)) in self.pending_cancels.drain() {
            state.set_cancelled();
            for ack in acks {
                let _ = ack.send(());
            }
        }
        debug!("multiplexer {} stopped", self.id);
    }

    fn apply(&mut self, command: Command, ready: &mut FuturesUnordered<ReadyFuture>) {
        match command {
            Command::Register { id, handler, state } => {
                self.entries.insert(
                    id,
                    Entry {
                        handler,
                        state,
                        armed: None,
                    },
                );
                self.arm(id, ready);
            }
            Command::Rearm(id) => self.arm(id, ready),
            Command::Deregister(id) => {
                if let Some(entry) = self.entries.remove(&id) {
                    if let Some(handle) = entry.armed {
                        handle.abort();
                    }
                    entry.state.set_cancelled();
                }
            }
            Command::Cancel { id, ack } => match self.entries.remove(&id) {
                Some(entry) => match entry.armed {
                    Some(handle) => {
                        // Acknowledge once the aborted future has been dropped
                        handle.abort();
                        let pending = self
                            .pending_cancels
                            .entry(id)
                            .or_insert_with(|| (entry.state.clone(), Vec::new()));
                        pending.1.extend(ack);
                    }
                    None => {
                        entry.state.set_cancelled();
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                    }
                },
                None => match self.pending_cancels.get_mut(&id) {
                    Some(pending) => pending.1.extend(ack),
                    None => {
                        if let Some(ack) = ack {
                            let _ = ack.send(());
                        }
                    }
                },
            },
            Command::Shutdown => {}
        }
    }

    fn arm(&mut self, id: u64, ready: &mut FuturesUnordered<ReadyFuture>) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        if entry.armed.is_some() || entry.state.load() != RegistrationState::Active {
            return;
        }
        let (handle, abort_reg) = AbortHandle::new_pair();
        let readiness = Abortable::new(entry.handler.clone().ready(), abort_reg);
        entry.armed = Some(handle);
        ready.push(readiness.map(move |r| (id, r.is_ok())).boxed());
    }

    async fn on_ready(&mut self, id: u64, fired: bool, ready: &mut FuturesUnordered<ReadyFuture>) {
        if let Some((state, acks)) = self.pending_cancels.remove(&id) {
            state.set_cancelled();
            for ack in acks {
                let _ = ack.send(());
            }
            return;
        }

        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        entry.armed = None;
        if !fired {
            return;
        }
        if entry.state.load() != RegistrationState::Active {
            self.stats.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let handler = entry.handler.clone();
        let registration = Registration {
            id,
            selector: self.id,
            state: entry.state.clone(),
            commands: self.loopback.clone(),
        };

        if handler.should_use_worker_thread_for_event() {
            self.stats.dispatched_to_workers.fetch_add(1, Ordering::Relaxed);
            let loopback = self.loopback.clone();
            self.worker_pool.spawn(async move {
                let outcome = handler.handle_event(registration).await;
                let next = match outcome {
                    HandlerOutcome::Rearm => Command::Rearm(id),
                    HandlerOutcome::Done => Command::Deregister(id),
                };
                let _ = loopback.send(next);
            });
        } else {
            self.stats.dispatched_inline.fetch_add(1, Ordering::Relaxed);
            let outcome = CURRENT_SELECTOR
                .scope(self.id, handler.handle_event(registration))
                .await;
            match outcome {
                HandlerOutcome::Rearm => self.arm(id, ready),
                HandlerOutcome::Done => {
                    if let Some(entry) = self.entries.remove(&id) {
                        entry.state.set_cancelled();
                    }
                }
            }
        }
    }
}
