//! The `client` module defines the gateway-side view of a connected socket.
//!
//! It provides the `Connection` struct, which holds the connection's
//! identity, its outbound frame queue, its topic set, and the liveness and
//! handshake flags driven by the transport.

pub mod connection;
pub use connection::{Connection, ConnectionId, HandshakeState};

#[cfg(test)]
mod tests;
