use crate::error::TransportError;
use crate::events::EventBus;
use crate::state::ConnectionState;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use streamui_core::ReconnectPolicy;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A live connection. Resolves when the connection ends: `Ok` when the peer
/// closed it, `Err` when it failed.
pub(crate) type Session = BoxFuture<'static, Result<(), TransportError>>;

/// The binding-specific half of a transport.
#[async_trait]
pub(crate) trait Link: Send + Sync + 'static {
    async fn connect(&self) -> Result<Session, TransportError>;

    fn opened(&self) {}

    fn dropped(&self) {}
}

/// Shared connection lifecycle: the state machine, reconnect backoff and the
/// single background task that owns the connection and its reconnect timer.
pub(crate) struct Supervisor {
    bus: Arc<EventBus>,
    policy: ReconnectPolicy,
    state: RwLock<ConnectionState>,
    generation: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub(crate) fn new(bus: Arc<EventBus>, policy: ReconnectPolicy) -> Arc<Self> {
        Arc::new(Self {
            bus,
            policy,
            state: RwLock::new(ConnectionState::Idle),
            generation: AtomicU64::new(0),
            task: Mutex::new(None),
        })
    }

    pub(crate) fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Starts connecting and waits for the first attempt. A failed first
    /// attempt is returned, while reconnects continue in the background as
    /// long as the policy allows.
    pub(crate) async fn open(self: &Arc<Self>, link: Arc<dyn Link>) -> Result<(), TransportError> {
        let generation = {
            let mut state = self.state.write();
            if !state.can_open() {
                tracing::debug!("open() ignored in state {}", *state);
                return Ok(());
            }
            *state = ConnectionState::Connecting;
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };
        self.bus.emit_state(ConnectionState::Connecting);

        let (first_tx, first_rx) = oneshot::channel();
        let supervisor = self.clone();
        let handle = tokio::spawn(async move {
            supervisor.run(generation, link, first_tx).await;
        });
        if let Some(previous) = self.task.lock().replace(handle) {
            previous.abort();
        }

        first_rx.await.unwrap_or(Err(TransportError::Closed))
    }

    /// Cancels the connection and any pending reconnect. Idempotent.
    pub(crate) fn close(&self, link: &dyn Link) {
        let was_open = {
            let mut state = self.state.write();
            if *state == ConnectionState::Closed {
                return;
            }
            let was_open = *state == ConnectionState::Open;
            *state = ConnectionState::Closed;
            self.generation.fetch_add(1, Ordering::SeqCst);
            was_open
        };
        self.abort_task();
        link.dropped();

        tracing::info!("Transport closed");
        if was_open {
            self.bus.emit_state(ConnectionState::Closing);
        }
        self.bus.emit_state(ConnectionState::Closed);
    }

    /// Stops the background task without reporting a state change.
    pub(crate) fn abandon(&self, link: &dyn Link) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.abort_task();
        link.dropped();
        *self.state.write() = ConnectionState::Closed;
    }

    fn abort_task(&self) {
        if let Some(handle) = self.task.lock().take() {
            handle.abort();
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    fn transition(&self, generation: u64, next: ConnectionState) -> bool {
        {
            let mut state = self.state.write();
            if !self.is_current(generation) {
                return false;
            }
            *state = next;
        }
        tracing::debug!("Transport state -> {}", next);
        self.bus.emit_state(next);
        true
    }

    async fn run(
        self: Arc<Self>,
        generation: u64,
        link: Arc<dyn Link>,
        first_tx: oneshot::Sender<Result<(), TransportError>>,
    ) {
        let mut first = Some(first_tx);
        let mut attempt: u32 = 0;

        loop {
            match link.connect().await {
                Ok(session) => {
                    link.opened();
                    if !self.transition(generation, ConnectionState::Open) {
                        link.dropped();
                        return;
                    }
                    tracing::info!("Transport open");
                    attempt = 0;
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }

                    let ended = session.await;
                    link.dropped();
                    if !self.is_current(generation) {
                        return;
                    }
                    match ended {
                        Ok(()) => tracing::warn!("Connection closed by peer"),
                        Err(e) => {
                            tracing::warn!("Connection interrupted: {}", e);
                            self.bus.emit_error(&e);
                        }
                    }
                }
                Err(e) => {
                    if !self.is_current(generation) {
                        return;
                    }
                    tracing::warn!("Connect attempt failed: {}", e);
                    self.bus.emit_error(&e);
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Err(e));
                    }
                }
            }

            if !self.transition(generation, ConnectionState::Interrupted) {
                return;
            }

            if attempt >= self.policy.max_attempts {
                let exhausted = TransportError::ReconnectExhausted { attempts: attempt };
                tracing::error!("{}", exhausted);
                if self.transition(generation, ConnectionState::Closed) {
                    self.bus.emit_error(&exhausted);
                }
                return;
            }

            let delay = self.policy.delay_for(attempt, rand::random::<f64>());
            if !self.transition(generation, ConnectionState::Reconnecting) {
                return;
            }
            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                attempt + 1,
                self.policy.max_attempts
            );
            tokio::time::sleep(delay).await;
            attempt += 1;

            if !self.transition(generation, ConnectionState::Connecting) {
                return;
            }
        }
    }
}
