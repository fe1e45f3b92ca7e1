//! Post-auth handshake.
//!
//! Two tasks race once a connection is authenticated: the acknowledgement,
//! which sends `{type:"ready"}` after a short delay and then starts the
//! heartbeat, and the timeout, which closes the socket with 4008 if the
//! acknowledgement hasn't gone out. Whichever settles the connection's
//! handshake state first wins; the other does nothing.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info};

use super::heartbeat;
use super::message::ServerMessage;
use crate::client::Connection;
use crate::config::{HandshakeSettings, HeartbeatSettings};
use crate::utils::GatewayError;

pub fn spawn(
    connection: Arc<Connection>,
    handshake: &HandshakeSettings,
    heartbeat: &HeartbeatSettings,
) -> (JoinHandle<()>, JoinHandle<()>) {
    let timer = connection.cancellation().child_token();

    let ack = {
        let connection = connection.clone();
        let timer = timer.clone();
        let delay = handshake.ack_delay();
        let every = heartbeat.interval();
        tokio::spawn(async move {
            tokio::select! {
                _ = connection.cancellation().cancelled() => return,
                _ = sleep(delay) => {}
            }
            if !connection.complete_handshake() {
                return;
            }
            timer.cancel();
            if let Err(e) = connection.send(&ServerMessage::Ready) {
                debug!(connection = %connection.id, error = %e, "ready frame not sent");
                connection.terminate();
                return;
            }
            info!(connection = %connection.id, "connection ready");
            heartbeat::spawn(connection, every);
        })
    };

    let expiry = {
        let limit = handshake.timeout();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = sleep(limit) => {
                    if connection.expire_handshake() {
                        info!(connection = %connection.id, ?limit, "handshake timed out");
                        connection.close_with(&GatewayError::HandshakeTimeout);
                    }
                }
            }
        })
    };

    (ack, expiry)
}
