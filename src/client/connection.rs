//! Connection representation
//!
//! `Connection` is the state shared between a socket's reader, writer,
//! timers and the topic registry. Frames are pushed onto an unbounded
//! channel that the socket's writer task drains; once that task is gone
//! (or the connection is cancelled) every send fails with `DeadPeer`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use crate::transport::message::{ServerMessage, close_message};
use crate::utils::{GatewayError, Result};

pub type ConnectionId = Uuid;

const HANDSHAKE_PENDING: u8 = 0;
const HANDSHAKE_READY: u8 = 1;
const HANDSHAKE_TIMED_OUT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Pending,
    Ready,
    TimedOut,
}

#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    /// `sub` claim of the token the connection authenticated with.
    pub subject: Option<String>,
    pub connected_at: DateTime<Utc>,
    sender: UnboundedSender<WsMessage>,
    topics: Mutex<HashSet<String>>,
    alive: AtomicBool,
    handshake: AtomicU8,
    cancel: CancellationToken,
}

impl Connection {
    /// Create a connection around the sending side of its outbound queue.
    /// `cancel` is the token every task of this connection observes.
    pub fn new(
        sender: UnboundedSender<WsMessage>,
        cancel: CancellationToken,
        subject: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            subject,
            connected_at: Utc::now(),
            sender,
            topics: Mutex::new(HashSet::new()),
            alive: AtomicBool::new(true),
            handshake: AtomicU8::new(HANDSHAKE_PENDING),
            cancel,
        }
    }

    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        self.send_raw(msg.to_ws()?)
    }

    pub fn send_raw(&self, msg: WsMessage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::DeadPeer(format!("connection {} is closed", self.id)));
        }
        self.sender
            .send(msg)
            .map_err(|_| GatewayError::DeadPeer(format!("writer for {} has exited", self.id)))
    }

    /// Queue a close frame. The writer cancels the connection once the
    /// frame is on the wire.
    pub fn close(&self, code: u16, reason: &'static str) {
        if let Err(e) = self.send_raw(close_message(code, reason)) {
            debug!(connection = %self.id, error = %e, "close frame not queued; terminating");
            self.terminate();
        }
    }

    /// Close with the code an error maps to, or terminate if it has none.
    pub fn close_with(&self, err: &GatewayError) {
        match err.close_code() {
            Some((code, reason)) => self.close(code, reason),
            None => self.terminate(),
        }
    }

    /// Drop the connection without a closing handshake.
    pub fn terminate(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record a pong from the peer.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Release);
    }

    /// Clear the liveness flag, returning whether the peer answered since
    /// the last call.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    /// Settle the handshake as ready. Returns false if it was already
    /// settled either way.
    pub fn complete_handshake(&self) -> bool {
        self.settle_handshake(HANDSHAKE_READY)
    }

    /// Settle the handshake as timed out. Returns false if it was already
    /// settled either way.
    pub fn expire_handshake(&self) -> bool {
        self.settle_handshake(HANDSHAKE_TIMED_OUT)
    }

    fn settle_handshake(&self, outcome: u8) -> bool {
        self.handshake
            .compare_exchange(
                HANDSHAKE_PENDING,
                outcome,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn handshake_state(&self) -> HandshakeState {
        match self.handshake.load(Ordering::Acquire) {
            HANDSHAKE_READY => HandshakeState::Ready,
            HANDSHAKE_TIMED_OUT => HandshakeState::TimedOut,
            _ => HandshakeState::Pending,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.handshake_state() == HandshakeState::Ready
    }

    // Topic membership is only mutated by the topic registry, under its lock.

    pub(crate) fn add_topic(&self, topic: &str) -> bool {
        self.topic_set().insert(topic.to_string())
    }

    pub(crate) fn remove_topic(&self, topic: &str) -> bool {
        self.topic_set().remove(topic)
    }

    pub(crate) fn drain_topics(&self) -> Vec<String> {
        self.topic_set().drain().collect()
    }

    pub fn topics(&self) -> Vec<String> {
        self.topic_set().iter().cloned().collect()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topic_set().contains(topic)
    }

    fn topic_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
