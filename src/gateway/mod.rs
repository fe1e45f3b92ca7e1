//! The gateway ties the pieces together: it connects the broker bridge,
//! owns the topic registry, runs the fan-out task that turns inbound broker
//! messages into patch frames, and serves the WebSocket endpoint.

use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::{BrokerBackend, BrokerBridge, BrokerMessage, backend_from_url};
use crate::config::Settings;
use crate::registry::SharedRegistry;
use crate::transport::websocket::{ConnectionContext, start_websocket_server};
use crate::utils::Result;

/// Point-in-time view of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub connections: usize,
    pub topics: usize,
    pub degraded: bool,
}

pub struct Gateway {
    settings: Settings,
    bridge: BrokerBridge,
    registry: SharedRegistry,
    context: Arc<ConnectionContext>,
    shutdown: CancellationToken,
    fanout: Mutex<Option<JoinHandle<()>>>,
}

impl Gateway {
    /// Connect to the broker (degraded mode if it isn't ready) and start the
    /// fan-out task. Does not listen yet; see [`Gateway::serve`].
    pub async fn start(settings: Settings, backend: Arc<dyn BrokerBackend>) -> Self {
        let (bridge, inbound) = BrokerBridge::connect(backend, settings.broker.clone()).await;
        let registry = SharedRegistry::new(bridge.commands());
        let shutdown = CancellationToken::new();
        let context = Arc::new(ConnectionContext::new(
            &settings,
            registry.clone(),
            shutdown.clone(),
        ));
        let fanout = tokio::spawn(fan_out(inbound, registry.clone()));

        Self {
            settings,
            bridge,
            registry,
            context,
            shutdown,
            fanout: Mutex::new(Some(fanout)),
        }
    }

    /// Like [`Gateway::start`], picking the broker backend from
    /// `settings.broker.url`.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate().map_err(::config::ConfigError::Message)?;
        let backend = backend_from_url(&settings.broker.url)?;
        Ok(Self::start(settings, backend).await)
    }

    /// Bind the configured `server.host:server.port`.
    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        Ok(TcpListener::bind(&addr).await?)
    }

    /// Accept connections on `listener` until [`Gateway::shutdown`].
    pub async fn serve(&self, listener: TcpListener) {
        start_websocket_server(listener, self.context.clone()).await;
    }

    /// Bind and serve.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await;
        Ok(())
    }

    /// Serialize `payload` as JSON and publish it on `topic`. Returns how
    /// many broker subscribers received it.
    pub async fn publish<T: Serialize + ?Sized>(&self, topic: &str, payload: &T) -> Result<i64> {
        let body = serde_json::to_string(payload)?;
        let receivers = self.bridge.publish(topic, &body).await?;
        debug!(topic, receivers, "published");
        Ok(receivers)
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_degraded(&self) -> bool {
        self.bridge.is_degraded()
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            connections: self.context.live_connections(),
            topics: self.registry.lock().topic_count(),
            degraded: self.bridge.is_degraded(),
        }
    }

    /// Stop accepting, close every connection and disconnect from the
    /// broker. Safe to call more than once.
    pub async fn shutdown(&self) {
        info!("shutting down gateway");
        self.shutdown.cancel();
        self.bridge.shutdown().await;

        let fanout = self
            .fanout
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(fanout) = fanout {
            if let Err(e) = fanout.await {
                warn!(error = %e, "fan-out task ended abnormally");
            }
        }
    }
}

/// Deliver every inbound broker message to the topic's local subscribers.
/// Ends when the bridge worker stops.
async fn fan_out(mut inbound: UnboundedReceiver<BrokerMessage>, registry: SharedRegistry) {
    while let Some(msg) = inbound.recv().await {
        let delivered = registry.lock().deliver(&msg.channel, &msg.payload);
        debug!(topic = %msg.channel, delivered, "fan-out");
    }
    debug!("fan-out stopped");
}
