//! Broker client capability.
//!
//! The gateway talks to its pub/sub broker through two independent logical
//! connections: a [`Publisher`] that only publishes, and a [`Subscriber`]
//! that only subscribes, unsubscribes and yields inbound messages. A
//! [`BrokerBackend`] knows how to open both. [`bridge::BrokerBridge`] sits
//! on top and adds readiness, degraded mode and reconnection.

pub mod bridge;
pub mod memory;
pub mod redis;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::utils::Result;

pub use bridge::{BrokerBridge, CommandSender};
pub use memory::MemoryBackend;
pub use redis::RedisBackend;

/// A message received from the broker on `channel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// Broker-level subscription changes requested by the topic registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerCommand {
    Subscribe(String),
    Unsubscribe(String),
}

pub type MessageStream = BoxStream<'static, BrokerMessage>;

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `channel`, returning how many broker-side
    /// subscribers received it.
    async fn publish(&self, channel: &str, payload: &str) -> Result<i64>;

    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
pub trait Subscriber: Send {
    async fn subscribe(&mut self, channel: &str) -> Result<()>;

    async fn unsubscribe(&mut self, channel: &str) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}

/// The subscribing half of a broker: the command side plus the stream of
/// messages for the channels it holds. The stream ends when the underlying
/// connection is lost.
pub struct SubscriberConnection {
    pub subscriber: Box<dyn Subscriber>,
    pub messages: MessageStream,
}

#[async_trait]
pub trait BrokerBackend: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>>;

    async fn connect_subscriber(&self) -> Result<SubscriberConnection>;
}

/// Pick a backend from a broker URL: `memory://` for the in-process
/// broker, anything else is handed to the Redis client.
pub fn backend_from_url(url: &str) -> Result<Arc<dyn BrokerBackend>> {
    if url.starts_with("memory://") {
        Ok(Arc::new(MemoryBackend::new()))
    } else {
        Ok(Arc::new(RedisBackend::open(url)?))
    }
}
