//! Broker bridge
//!
//! Connects the gateway to its broker backend:
//! - waits (bounded) for the publisher and subscriber connections at startup
//!   and falls back to degraded mode when the broker isn't ready
//! - executes subscribe/unsubscribe commands from the topic registry, in
//!   the order they were dispatched, on a single worker task
//! - reconnects the publisher and the subscriber while degraded, on one
//!   retry timer, and re-subscribes every channel it was asked to hold
//! - forwards inbound broker messages to the gateway's fan-out task
//!
//! Broker failures are logged and absorbed here; nothing in this module
//! rolls back registry state or ends the process.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{BrokerBackend, BrokerCommand, BrokerMessage, Publisher, Subscriber, SubscriberConnection};
use crate::config::BrokerSettings;
use crate::utils::{GatewayError, Result};

/// Registry-side handle for enqueuing broker commands.
///
/// `dispatch` never blocks and never fails the caller.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: UnboundedSender<BrokerCommand>,
}

impl CommandSender {
    pub fn channel() -> (Self, UnboundedReceiver<BrokerCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn dispatch(&self, command: BrokerCommand) {
        if let Err(e) = self.tx.send(command) {
            warn!(command = ?e.0, "broker worker is gone; command dropped");
        }
    }
}

/// Publisher connection shared by `publish` and the reconnecting worker.
type PublisherSlot = Arc<tokio::sync::Mutex<Option<Arc<dyn Publisher>>>>;

pub struct BrokerBridge {
    backend: Arc<dyn BrokerBackend>,
    settings: BrokerSettings,
    publisher: PublisherSlot,
    publisher_ready: Arc<AtomicBool>,
    subscriber_ready: Arc<AtomicBool>,
    commands: CommandSender,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerBridge {
    /// Open both broker connections, waiting at most
    /// `settings.ready_timeout` for each. Returns the bridge and the stream
    /// of inbound broker messages.
    ///
    /// Never fails: a broker that isn't ready in time leaves the bridge in
    /// degraded mode, and the worker keeps trying in the background.
    pub async fn connect(
        backend: Arc<dyn BrokerBackend>,
        settings: BrokerSettings,
    ) -> (Self, UnboundedReceiver<BrokerMessage>) {
        let ready_timeout = settings.ready_timeout();

        let publisher = match timeout(ready_timeout, backend.connect_publisher()).await {
            Ok(Ok(publisher)) => Some(publisher),
            Ok(Err(e)) => {
                warn!(backend = backend.name(), error = %e, "broker publisher not ready");
                None
            }
            Err(_) => {
                warn!(backend = backend.name(), ?ready_timeout, "timed out waiting for broker publisher");
                None
            }
        };

        let subscriber = match timeout(ready_timeout, backend.connect_subscriber()).await {
            Ok(Ok(subscriber)) => Some(subscriber),
            Ok(Err(e)) => {
                warn!(backend = backend.name(), error = %e, "broker subscriber not ready");
                None
            }
            Err(_) => {
                warn!(backend = backend.name(), ?ready_timeout, "timed out waiting for broker subscriber");
                None
            }
        };

        let publisher_ready = Arc::new(AtomicBool::new(publisher.is_some()));
        let subscriber_ready = Arc::new(AtomicBool::new(subscriber.is_some()));
        if publisher.is_some() && subscriber.is_some() {
            info!(backend = backend.name(), "broker ready");
        } else {
            warn!(
                backend = backend.name(),
                "broker not ready; running in degraded mode (no fan-out until it recovers)"
            );
        }

        let (commands, command_rx) = CommandSender::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let publisher: PublisherSlot = Arc::new(tokio::sync::Mutex::new(publisher));

        let worker = SubscriptionWorker {
            backend: backend.clone(),
            commands: command_rx,
            inbound: inbound_tx,
            held: HashSet::new(),
            publisher: publisher.clone(),
            publisher_ready: publisher_ready.clone(),
            ready: subscriber_ready.clone(),
            ready_timeout,
            reconnect_interval: settings.reconnect_interval(),
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(worker.run(subscriber));

        let bridge = Self {
            backend,
            settings,
            publisher,
            publisher_ready,
            subscriber_ready,
            commands,
            shutdown,
            worker: Mutex::new(Some(handle)),
        };
        (bridge, inbound_rx)
    }

    /// Handle for the topic registry.
    pub fn commands(&self) -> CommandSender {
        self.commands.clone()
    }

    pub fn is_degraded(&self) -> bool {
        !(self.publisher_ready.load(Ordering::Acquire)
            && self.subscriber_ready.load(Ordering::Acquire))
    }

    /// Publish on `channel`. Reconnects the publisher if the previous one
    /// failed; returns `BrokerUnavailable` if that isn't possible.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let mut slot = self.publisher.lock().await;

        let publisher = match slot.as_ref() {
            Some(publisher) => publisher.clone(),
            None => {
                let publisher = self.connect_publisher().await?;
                info!(backend = self.backend.name(), "broker publisher reconnected");
                *slot = Some(publisher.clone());
                self.publisher_ready.store(true, Ordering::Release);
                publisher
            }
        };

        match publisher.publish(channel, payload).await {
            Ok(receivers) => Ok(receivers),
            Err(e) => {
                warn!(channel, error = %e, "broker publish failed");
                *slot = None;
                self.publisher_ready.store(false, Ordering::Release);
                Err(GatewayError::BrokerUnavailable(e.to_string()))
            }
        }
    }

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>> {
        connect_publisher(self.backend.as_ref(), self.settings.ready_timeout()).await
    }

    /// Disconnect both broker connections. Each failure is logged on its
    /// own and does not stop the other disconnect.
    pub async fn shutdown(&self) {
        // the worker goes first so it can't reinstall a publisher behind us
        self.shutdown.cancel();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "broker worker ended abnormally");
            }
        }

        if let Some(publisher) = self.publisher.lock().await.take() {
            match publisher.disconnect().await {
                Ok(()) => info!("broker publisher disconnected"),
                Err(e) => warn!(error = %e, "failed to disconnect broker publisher"),
            }
        }
        self.publisher_ready.store(false, Ordering::Release);
    }
}

async fn connect_publisher(
    backend: &dyn BrokerBackend,
    ready_timeout: Duration,
) -> Result<Arc<dyn Publisher>> {
    match timeout(ready_timeout, backend.connect_publisher()).await {
        Ok(Ok(publisher)) => Ok(publisher),
        Ok(Err(e)) => Err(GatewayError::BrokerUnavailable(e.to_string())),
        Err(_) => Err(GatewayError::BrokerUnavailable(
            "timed out connecting publisher".into(),
        )),
    }
}

async fn next_message(active: &mut Option<SubscriberConnection>) -> Option<BrokerMessage> {
    match active {
        Some(conn) => conn.messages.next().await,
        None => std::future::pending().await,
    }
}

/// Owns the subscriber connection. Applies registry commands in order and
/// remembers which channels should be held so they can be restored after
/// a reconnect. While either connection is down it retries both on a
/// single timer that command traffic does not reset.
struct SubscriptionWorker {
    backend: Arc<dyn BrokerBackend>,
    commands: UnboundedReceiver<BrokerCommand>,
    inbound: UnboundedSender<BrokerMessage>,
    held: HashSet<String>,
    publisher: PublisherSlot,
    publisher_ready: Arc<AtomicBool>,
    ready: Arc<AtomicBool>,
    ready_timeout: Duration,
    reconnect_interval: Duration,
    shutdown: CancellationToken,
}

impl SubscriptionWorker {
    async fn run(mut self, initial: Option<SubscriberConnection>) {
        let mut active = initial;
        let mut retry = interval_at(Instant::now() + self.reconnect_interval, self.reconnect_interval);
        retry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => match active.as_mut() {
                        Some(conn) => self.apply(conn.subscriber.as_mut(), cmd).await,
                        None => self.record(cmd),
                    },
                    None => break,
                },
                msg = next_message(&mut active) => match msg {
                    Some(msg) => {
                        if self.inbound.send(msg).is_err() {
                            debug!("fan-out receiver dropped; stopping broker worker");
                            break;
                        }
                    }
                    None => {
                        warn!(
                            backend = self.backend.name(),
                            "broker subscriber connection lost; running in degraded mode"
                        );
                        self.ready.store(false, Ordering::Release);
                        active = None;
                        retry.reset();
                    }
                },
                // a failed publish can clear the publisher flag at any time
                _ = retry.tick() => {
                    if active.is_none() {
                        active = self.reconnect().await;
                    }
                    self.restore_publisher().await;
                }
            }
        }

        if let Some(mut conn) = active {
            match conn.subscriber.disconnect().await {
                Ok(()) => info!("broker subscriber disconnected"),
                Err(e) => warn!(error = %e, "failed to disconnect broker subscriber"),
            }
        }
        self.ready.store(false, Ordering::Release);
    }

    async fn apply(&mut self, subscriber: &mut dyn Subscriber, cmd: BrokerCommand) {
        self.record(cmd.clone());
        match cmd {
            BrokerCommand::Subscribe(channel) => match subscriber.subscribe(&channel).await {
                Ok(()) => debug!(channel, "broker subscribe"),
                Err(e) => warn!(channel, error = %e, "broker subscribe failed"),
            },
            BrokerCommand::Unsubscribe(channel) => match subscriber.unsubscribe(&channel).await {
                Ok(()) => debug!(channel, "broker unsubscribe"),
                Err(e) => warn!(channel, error = %e, "broker unsubscribe failed"),
            },
        }
    }

    fn record(&mut self, cmd: BrokerCommand) {
        match cmd {
            BrokerCommand::Subscribe(channel) => {
                if !self.ready.load(Ordering::Acquire) {
                    debug!(channel = %channel, "degraded; broker subscribe deferred");
                }
                self.held.insert(channel);
            }
            BrokerCommand::Unsubscribe(channel) => {
                self.held.remove(&channel);
            }
        }
    }

    async fn reconnect(&self) -> Option<SubscriberConnection> {
        let mut conn = match timeout(self.ready_timeout, self.backend.connect_subscriber()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                debug!(error = %e, "broker subscriber still unavailable");
                return None;
            }
            Err(_) => {
                debug!("timed out reconnecting broker subscriber");
                return None;
            }
        };

        for channel in &self.held {
            if let Err(e) = conn.subscriber.subscribe(channel).await {
                warn!(channel, error = %e, "broker re-subscribe failed");
            }
        }
        self.ready.store(true, Ordering::Release);
        info!(
            backend = self.backend.name(),
            channels = self.held.len(),
            "broker subscriber reconnected"
        );
        Some(conn)
    }

    async fn restore_publisher(&self) {
        if self.publisher_ready.load(Ordering::Acquire) {
            return;
        }
        let mut slot = self.publisher.lock().await;
        if slot.is_none() {
            match connect_publisher(self.backend.as_ref(), self.ready_timeout).await {
                Ok(publisher) => {
                    info!(backend = self.backend.name(), "broker publisher reconnected");
                    *slot = Some(publisher);
                }
                Err(e) => {
                    debug!(error = %e, "broker publisher still unavailable");
                    return;
                }
            }
        }
        self.publisher_ready.store(true, Ordering::Release);
    }
}
