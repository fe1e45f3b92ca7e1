//! Topic registry
//!
//! The single source of truth for "which connections want which topic".
//! It also decides when a broker-level subscription is opened or retired:
//! a topic entry exists exactly while it has at least one subscriber, the
//! first subscriber dispatches a broker subscribe and the last one to leave
//! dispatches a broker unsubscribe.
//!
//! Every method is synchronous. Callers hold the registry lock for the whole
//! call, so each operation updates its state and enqueues its broker command
//! in one critical section. Broker I/O happens later on the bridge worker,
//! in the order commands were enqueued.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::broker::BrokerCommand;
use crate::broker::bridge::CommandSender;
use crate::client::{Connection, ConnectionId};
use crate::registry::topic::Topic;
use crate::transport::message::ServerMessage;
use crate::utils::{GatewayError, Result};

/// Topics under this prefix are published to everyone by other means and
/// can never be subscribed to by clients.
pub const RESERVED_PREFIX: &str = "public:";

pub fn validate_topic(topic: &str) -> Result<()> {
    if topic.is_empty() || topic.starts_with(RESERVED_PREFIX) {
        return Err(GatewayError::ForbiddenTopic(topic.to_string()));
    }
    Ok(())
}

#[derive(Debug)]
pub struct TopicRegistry {
    topics: HashMap<String, Topic>,
    broker: CommandSender,
}

impl TopicRegistry {
    pub fn new(broker: CommandSender) -> Self {
        Self {
            topics: HashMap::new(),
            broker,
        }
    }

    /// Subscribe `connection` to `topic` and return the frame to send back.
    ///
    /// The broker subscribe for a new topic is dispatched before the
    /// acknowledgement is returned. Dispatch problems are logged by the
    /// bridge and never undo the local subscription.
    pub fn subscribe(&mut self, connection: &Arc<Connection>, topic: &str) -> ServerMessage {
        if let Err(e) = validate_topic(topic) {
            warn!(connection = %connection.id, error = %e, "rejecting subscription");
            return ServerMessage::forbidden(topic);
        }

        let first = !self.topics.contains_key(topic);
        let entry = self
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));

        if entry.subscribe(connection.clone()) {
            connection.add_topic(topic);
            debug!(connection = %connection.id, topic, subscribers = entry.len(), "subscribed");
        }

        if first {
            info!(topic, "first subscriber; opening broker subscription");
            self.broker
                .dispatch(BrokerCommand::Subscribe(topic.to_string()));
        }

        ServerMessage::Subscribed {
            topic: topic.to_string(),
        }
    }

    /// Unsubscribe `connection` from `topic`. Always acknowledged, even when
    /// the connection was never subscribed.
    pub fn unsubscribe(&mut self, connection: &Connection, topic: &str) -> ServerMessage {
        connection.remove_topic(topic);
        self.detach(&connection.id, topic);

        ServerMessage::Unsubscribed {
            topic: topic.to_string(),
        }
    }

    /// Forget a closing connection: the unsubscribe bookkeeping for every
    /// topic it held, without acknowledgements.
    pub fn remove_connection(&mut self, connection: &Connection) {
        let topics = connection.drain_topics();
        let count = topics.len();
        for topic in topics {
            self.detach(&connection.id, &topic);
        }
        debug!(connection = %connection.id, topics = count, "removed connection from registry");
    }

    /// Fan a broker payload out to every subscriber of `topic`.
    ///
    /// A subscriber whose send fails is pruned from the topic and
    /// terminated; delivery to the rest carries on. Returns the number of
    /// connections the frame was queued for.
    pub fn deliver(&mut self, topic: &str, raw_payload: &str) -> usize {
        let Some(entry) = self.topics.get(topic) else {
            debug!(topic, "no local subscribers for broker message");
            return 0;
        };

        let frame = match ServerMessage::patch(topic, raw_payload).to_ws() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(topic, error = %e, "failed to encode patch frame");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead = Vec::new();
        for connection in entry.subscribers.values() {
            match connection.send_raw(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(connection = %connection.id, topic, error = %e, "pruning dead subscriber");
                    dead.push(connection.clone());
                }
            }
        }

        for connection in dead {
            connection.terminate();
            connection.remove_topic(topic);
            self.detach(&connection.id, topic);
        }

        delivered
    }

    /// Remove one membership; retire the topic if it was the last one.
    fn detach(&mut self, id: &ConnectionId, topic: &str) -> bool {
        let Some(entry) = self.topics.get_mut(topic) else {
            return false;
        };
        let removed = entry.unsubscribe(id);

        if entry.is_empty() {
            self.topics.remove(topic);
            info!(topic, "last subscriber left; closing broker subscription");
            self.broker
                .dispatch(BrokerCommand::Unsubscribe(topic.to_string()));
        }
        removed
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Topic::len)
    }

    pub fn is_subscribed(&self, topic: &str, id: &ConnectionId) -> bool {
        self.topics
            .get(topic)
            .is_some_and(|t| t.subscribers.contains_key(id))
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }
}
