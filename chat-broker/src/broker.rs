use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    time::Duration,
};

use futures::future::join_all;
use tokio::{
    select,
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    config::BrokerConfig,
    error::BrokerError,
    message::{DeliverySender, Message, UserId, WeakDeliverySender},
    registry::UserRegistry,
    shutdown::Shutdown,
    stats::{BrokerStats, BrokerStatsSnapshot, DeliveryOutcome},
};

/// Lifecycle of a broker. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerState {
    Created,
    Running,
    Stopped,
}

impl BrokerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => BrokerState::Created,
            1 => BrokerState::Running,
            _ => BrokerState::Stopped,
        }
    }
}

/// Routes messages from producers to registered users.
///
/// Producers call [`Broker::send`]; a single event loop started by
/// [`Broker::run`] drains the inbound queue in FIFO order and delivers each
/// message to one recipient or, for broadcasts, to every registered user.
pub struct Broker {
    config: BrokerConfig,
    registry: Arc<UserRegistry>,
    shutdown: Shutdown,
    // `None` once the queue has been closed.
    inbound: Mutex<Option<mpsc::Sender<Message>>>,
    // Taken by the first `run` call.
    queue: Mutex<Option<mpsc::Receiver<Message>>>,
    state: AtomicU8,
    stats: BrokerStats,
}

impl Broker {
    pub fn new(shutdown: Shutdown) -> Arc<Self> {
        Self::with_config(shutdown, BrokerConfig::default())
    }

    pub fn with_config(shutdown: Shutdown, config: BrokerConfig) -> Arc<Self> {
        let (inbound, queue) = mpsc::channel(config.queue_capacity.max(1));
        let registry = Arc::new(UserRegistry::with_policy(config.registration_policy));

        Arc::new(Self {
            config,
            registry,
            shutdown,
            inbound: Mutex::new(Some(inbound)),
            queue: Mutex::new(Some(queue)),
            state: AtomicU8::new(BrokerState::Created as u8),
            stats: BrokerStats::new(),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<UserRegistry> {
        &self.registry
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Current lifecycle state.
    ///
    /// Stays `Created` until [`Broker::run`] is called, even if the shutdown
    /// signal fired or the queue was closed first. The loop a later `run`
    /// starts then exits at once and the broker moves to `Stopped`.
    pub fn state(&self) -> BrokerState {
        BrokerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn stats(&self) -> BrokerStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn register_user(
        &self,
        user_id: impl Into<UserId>,
        sender: DeliverySender,
    ) -> Option<DeliverySender> {
        self.registry.register(user_id, sender).await
    }

    pub async fn unregister_user(&self, user_id: &str) -> bool {
        self.registry.unregister(user_id).await
    }

    /// Enqueue `message`, waiting for room when the queue is full.
    ///
    /// Fails with [`BrokerError::ShutDown`] once the shutdown signal has fired
    /// and with [`BrokerError::Closed`] after [`Broker::close`].
    ///
    /// The shutdown check and the enqueue are not atomic: a send racing a
    /// concurrent trigger can still land in the queue, where the stopping
    /// event loop leaves it undelivered.
    pub async fn send(&self, message: Message) -> Result<(), BrokerError> {
        let inbound = self.accepting_sender()?;

        if inbound.send(message).await.is_err() {
            return Err(self.reject());
        }

        self.stats.record_enqueued();
        Ok(())
    }

    /// Enqueue `message` without waiting, failing with
    /// [`BrokerError::QueueFull`] when there is no room.
    pub fn try_send(&self, message: Message) -> Result<(), BrokerError> {
        let inbound = self.accepting_sender()?;

        match inbound.try_send(message) {
            Ok(()) => {
                self.stats.record_enqueued();
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(BrokerError::QueueFull),
            Err(TrySendError::Closed(_)) => Err(self.reject()),
        }
    }

    /// Stop accepting messages. Already queued messages are still dispatched,
    /// after which the event loop exits. Called before [`Broker::run`] it
    /// leaves the state at `Created`.
    pub fn close(&self) {
        if lock(&self.inbound).take().is_some() {
            info!("broker queue closed");
        }
    }

    /// Start the event loop on the current Tokio runtime.
    ///
    /// Only the first call starts a loop; later calls fail with
    /// [`BrokerError::AlreadyRunning`].
    pub fn run(self: &Arc<Self>) -> Result<JoinHandle<()>, BrokerError> {
        let queue = lock(&self.queue).take().ok_or(BrokerError::AlreadyRunning)?;
        self.set_state(BrokerState::Running);

        let broker = Arc::clone(self);
        Ok(tokio::spawn(async move {
            broker.event_loop(queue).await;
        }))
    }

    fn accepting_sender(&self) -> Result<mpsc::Sender<Message>, BrokerError> {
        if self.shutdown.is_triggered() {
            return Err(self.reject());
        }

        match lock(&self.inbound).as_ref() {
            Some(inbound) => Ok(inbound.clone()),
            None => Err(self.reject()),
        }
    }

    fn reject(&self) -> BrokerError {
        self.stats.record_rejected();
        if self.shutdown.is_triggered() {
            BrokerError::ShutDown
        } else {
            BrokerError::Closed
        }
    }

    fn set_state(&self, state: BrokerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    async fn event_loop(&self, mut queue: mpsc::Receiver<Message>) {
        info!(
            capacity = self.config.queue_capacity,
            delivery_timeout = ?self.config.delivery_timeout,
            "broker event loop started"
        );

        loop {
            select! {
                biased;
                _ = self.shutdown.triggered() => {
                    info!(pending = queue.len(), "broker shutting down");
                    break;
                }
                next = queue.recv() => {
                    let Some(message) = next else {
                        info!("broker queue drained");
                        break;
                    };
                    select! {
                        biased;
                        _ = self.shutdown.triggered() => {
                            info!(pending = queue.len(), "broker shutting down mid-dispatch");
                            break;
                        }
                        _ = self.dispatch(message) => {}
                    }
                }
            }
        }

        // Wake producers blocked on a full queue; their sends now fail.
        queue.close();
        self.set_state(BrokerState::Stopped);
        info!("broker event loop stopped");
    }

    async fn dispatch(&self, message: Message) {
        self.stats.record_dispatched();

        if message.broadcast {
            self.deliver_to_all(message).await;
        } else {
            self.deliver_to_recipient(message).await;
        }
    }

    async fn deliver_to_recipient(&self, message: Message) {
        let Some(sender) = self.registry.lookup(&message.recipient).await else {
            debug!(
                sender = %message.sender,
                recipient = %message.recipient,
                "recipient not registered, message dropped"
            );
            self.stats.record_unknown_recipient();
            return;
        };

        let recipient = message.recipient.clone();
        let outcome = deliver(&sender, message, self.config.delivery_timeout).await;
        self.record(&recipient, outcome);
    }

    async fn deliver_to_all(&self, message: Message) {
        let recipients = self.registry.all().await;
        let limit = self.config.delivery_timeout;

        // Each delivery waits on its own inbox only, so one stalled consumer
        // holds the pass for at most `limit`.
        let deliveries = recipients.into_iter().map(|(user_id, sender)| {
            let message = message.clone();
            async move {
                let outcome = deliver(&sender, message, limit).await;
                (user_id, outcome)
            }
        });

        for (user_id, outcome) in join_all(deliveries).await {
            self.record(&user_id, outcome);
        }
    }

    fn record(&self, user_id: &str, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => {}
            DeliveryOutcome::TimedOut => {
                warn!(user = %user_id, "delivery timed out, inbox full");
            }
            DeliveryOutcome::Closed => {
                warn!(user = %user_id, "delivery failed, inbox closed");
            }
        }
        self.stats.record_outcome(outcome);
    }
}

async fn deliver(
    sender: &WeakDeliverySender,
    message: Message,
    limit: Duration,
) -> DeliveryOutcome {
    // The strong handle lives only for this send, so an unregister that lands
    // meanwhile closes the inbox as soon as the send settles.
    let Some(sender) = sender.upgrade() else {
        return DeliveryOutcome::Closed;
    };
    match timeout(limit, sender.send(message)).await {
        Ok(Ok(())) => DeliveryOutcome::Delivered,
        Ok(Err(_)) => DeliveryOutcome::Closed,
        Err(_) => DeliveryOutcome::TimedOut,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // The guarded values are plain handles; a panicking holder cannot leave them half-updated.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
