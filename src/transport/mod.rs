//! The `transport` module is responsible for the client-facing side of the
//! gateway: the WebSocket server, the JSON frame protocol and the timers
//! that run per connection.
//!
//! - `message`: inbound commands and outbound frames, close codes
//! - `websocket`: accept loop and per-socket lifecycle
//! - `handshake`: ready acknowledgement and handshake timeout
//! - `heartbeat`: ping/pong liveness supervision

pub mod handshake;
pub mod heartbeat;
pub mod message;
pub mod websocket;
