//! Redis pub/sub backend.
//!
//! Publishing goes over a multiplexed connection. Subscribing uses a
//! dedicated pub/sub connection split into its command sink and its
//! message stream, since a subscribed Redis connection can't run other
//! commands.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::{MultiplexedConnection, PubSubSink};
use tracing::{debug, warn};

use super::{BrokerBackend, BrokerMessage, Publisher, Subscriber, SubscriberConnection};
use crate::utils::Result;

#[derive(Clone)]
pub struct RedisBackend {
    client: redis::Client,
}

impl RedisBackend {
    /// Validates the URL; no connection is made until a publisher or
    /// subscriber is requested.
    pub fn open(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl BrokerBackend for RedisBackend {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect_publisher(&self) -> Result<Arc<dyn Publisher>> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(Arc::new(RedisPublisher { conn }))
    }

    async fn connect_subscriber(&self) -> Result<SubscriberConnection> {
        let (sink, stream) = self.client.get_async_pubsub().await?.split();

        let messages = stream
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(BrokerMessage {
                        channel: msg.get_channel_name().to_string(),
                        payload,
                    }),
                    Err(e) => {
                        warn!(channel = msg.get_channel_name(), error = %e, "dropping undecodable broker message");
                        None
                    }
                }
            })
            .boxed();

        Ok(SubscriberConnection {
            subscriber: Box::new(RedisSubscriber { sink: Some(sink) }),
            messages,
        })
    }
}

struct RedisPublisher {
    conn: MultiplexedConnection,
}

#[async_trait]
impl Publisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let receivers: i64 = conn.publish(channel, payload).await?;
        Ok(receivers)
    }

    async fn disconnect(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("QUIT").query_async(&mut conn).await?;
        Ok(())
    }
}

struct RedisSubscriber {
    sink: Option<PubSubSink>,
}

impl RedisSubscriber {
    fn sink(&mut self) -> Result<&mut PubSubSink> {
        self.sink.as_mut().ok_or_else(|| {
            crate::utils::GatewayError::BrokerUnavailable("subscriber disconnected".into())
        })
    }
}

#[async_trait]
impl Subscriber for RedisSubscriber {
    async fn subscribe(&mut self, channel: &str) -> Result<()> {
        self.sink()?.subscribe(channel).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, channel: &str) -> Result<()> {
        self.sink()?.unsubscribe(channel).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // the socket closes once the sink and the message stream are dropped
        if self.sink.take().is_some() {
            debug!("redis subscriber sink released");
        }
        Ok(())
    }
}
