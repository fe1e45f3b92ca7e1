//! In-process broker.
//!
//! Keeps channels and subscriber connections in memory behind one lock.
//! Useful for local development (`broker.url = "memory://"`) and for tests,
//! which can also take it offline to exercise degraded mode.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, warn};

use super::{BrokerBackend, BrokerMessage, Publisher, Subscriber, SubscriberConnection};
use crate::utils::{GatewayError, Result};

type SubscriberId = u64;

#[derive(Debug, Default)]
struct MemoryState {
    online: bool,
    channels: HashMap<String, HashSet<SubscriberId>>,
    subscribers: HashMap<SubscriberId, UnboundedSender<BrokerMessage>>,
    subscribe_calls: HashMap<String, usize>,
    unsubscribe_calls: HashMap<String, usize>,
}

impl MemoryState {
    fn ensure_online(&self) -> Result<()> {
        if self.online {
            Ok(())
        } else {
            Err(GatewayError::BrokerUnavailable("memory broker offline".into()))
        }
    }

    fn remove_subscriber(&mut self, id: SubscriberId) {
        self.subscribers.remove(&id);
        for members in self.channels.values_mut() {
            members.remove(&id);
        }
        self.channels.retain(|_, members| !members.is_empty());
    }
}

#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    next_id: Arc<AtomicU64>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                online: true,
                ..MemoryState::default()
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the broker offline or bring it back. Going offline drops every
    /// subscriber connection, ending their message streams.
    pub fn set_online(&self, online: bool) {
        let mut state = self.state();
        state.online = online;
        if !online {
            state.subscribers.clear();
            state.channels.clear();
        }
    }

    /// Number of subscriber connections currently holding `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state().channels.get(channel).map_or(0, HashSet::len)
    }

    pub fn subscribe_calls(&self, channel: &str) -> usize {
        self.state().subscribe_calls.get(channel).copied().unwrap_or(0)
    }

    pub fn unsubscribe_calls(&self, channel: &str) -> usize {
        self.state()
            .unsubscribe_calls
            .get(channel)
            .copied()
            .unwrap_or(0)
    }

    /// Deliver `payload` to every subscriber holding `channel`.
    pub fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let mut state = self.state();
        state.ensure_online()?;

        let Some(members) = state.channels.get(channel).cloned() else {
            debug!(channel, "no broker subscribers");
            return Ok(0);
        };

        let mut receivers = 0;
        for id in members {
            let delivered = state.subscribers.get(&id).is_some_and(|tx| {
                tx.send(BrokerMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                })
                .is_ok()
            });
            if delivered {
                receivers += 1;
            } else {
                warn!(subscriber = id, "dropping closed memory subscriber");
                state.remove_subscriber(id);
            }
        }
        Ok(receivers)
    }
}

#[async_trait]
impl BrokerBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>> {
        self.state().ensure_online()?;
        Ok(Arc::new(MemoryPublisher {
            backend: self.clone(),
        }))
    }

    async fn connect_subscriber(&self) -> Result<SubscriberConnection> {
        let mut state = self.state();
        state.ensure_online()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = mpsc::unbounded_channel();
        state.subscribers.insert(id, tx);

        Ok(SubscriberConnection {
            subscriber: Box::new(MemorySubscriber {
                id,
                backend: self.clone(),
            }),
            messages: stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed(),
        })
    }
}

struct MemoryPublisher {
    backend: MemoryBackend,
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        self.backend.publish(channel, payload)
    }

    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

struct MemorySubscriber {
    id: SubscriberId,
    backend: MemoryBackend,
}

impl MemorySubscriber {
    fn live_state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self.backend.state();
        state.ensure_online()?;
        if !state.subscribers.contains_key(&self.id) {
            return Err(GatewayError::BrokerUnavailable(
                "memory subscriber disconnected".into(),
            ));
        }
        Ok(state)
    }
}

#[async_trait]
impl Subscriber for MemorySubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        let mut state = self.live_state()?;
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(self.id);
        *state.subscribe_calls.entry(channel.to_string()).or_default() += 1;
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        let mut state = self.live_state()?;
        if let Some(members) = state.channels.get_mut(channel) {
            members.remove(&self.id);
            if members.is_empty() {
                state.channels.remove(channel);
            }
        }
        *state
            .unsubscribe_calls
            .entry(channel.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.backend.state().remove_subscriber(self.id);
        Ok(())
    }
}
