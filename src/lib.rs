//! # Matchday gateway
//!
//! `matchday-gateway` is the realtime notification gateway of the league
//! platform. Clients hold a WebSocket open, authenticate with a bearer
//! token and subscribe to topics such as `match:42`; backend workers
//! publish change events to a pub/sub broker (Redis), and the gateway fans
//! each event out to exactly the sockets subscribed to its topic.
//!
//! ## Core Modules
//!
//! - `auth`: credential extraction from the upgrade request and the
//!   verifier chain.
//! - `broker`: broker capability traits, the Redis and in-memory backends,
//!   and the bridge that handles readiness, degraded mode and reconnection.
//! - `client`: the gateway-side state of one connected socket.
//! - `config`: layered configuration loading.
//! - `gateway`: composes everything and exposes the publish API.
//! - `registry`: topic to connection mapping and broker subscription
//!   lifecycle.
//! - `transport`: the WebSocket server, wire protocol, handshake and
//!   heartbeat.
//! - `utils`: error type and logging setup.

pub mod auth;
pub mod broker;
pub mod client;
pub mod config;
pub mod gateway;
pub mod registry;
pub mod transport;
pub mod utils;
