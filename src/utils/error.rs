//! Error taxonomy for the gateway.
//!
//! Only configuration and bind failures are fatal, and only at startup.
//! Everything else either closes a single connection (`AuthFailure`,
//! `HandshakeTimeout`, `DeadPeer`) or is absorbed and logged
//! (`ProtocolViolation`, `ForbiddenTopic`, `BrokerUnavailable`).

use thiserror::Error;

use crate::transport::message::{CLOSE_HANDSHAKE_TIMEOUT, CLOSE_UNAUTHORIZED};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthorized: {0}")]
    AuthFailure(String),

    #[error("handshake timeout")]
    HandshakeTimeout,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("forbidden topic: {0:?}")]
    ForbiddenTopic(String),

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("dead peer: {0}")]
    DeadPeer(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl GatewayError {
    /// Close code and reason sent to the peer when this error ends a
    /// connection. `None` for errors the connection survives.
    pub fn close_code(&self) -> Option<(u16, &'static str)> {
        match self {
            Self::AuthFailure(_) => Some((CLOSE_UNAUTHORIZED, "unauthorized")),
            Self::HandshakeTimeout => Some((CLOSE_HANDSHAKE_TIMEOUT, "handshake timeout")),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
