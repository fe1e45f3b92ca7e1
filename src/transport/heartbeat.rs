//! Heartbeat supervisor.
//!
//! Every interval the liveness flag is checked and cleared, then a ping is
//! queued. A pong sets the flag again. A peer that didn't answer the
//! previous ping is terminated.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::client::Connection;

pub fn spawn(connection: Arc<Connection>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(supervise(connection, every))
}

/// Runs until the connection is cancelled or found dead. The first probe
/// goes out one interval after the call.
pub async fn supervise(connection: Arc<Connection>, every: Duration) {
    if every.is_zero() {
        warn!(connection = %connection.id, "heartbeat interval is zero; liveness checks disabled");
        return;
    }

    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = connection.cancellation().cancelled() => return,
            _ = ticker.tick() => {}
        }

        if !connection.take_alive() {
            info!(connection = %connection.id, "no pong since last ping; terminating");
            connection.terminate();
            return;
        }
        if let Err(e) = connection.send_raw(WsMessage::Ping(Default::default())) {
            debug!(connection = %connection.id, error = %e, "ping not sent; terminating");
            connection.terminate();
            return;
        }
    }
}
