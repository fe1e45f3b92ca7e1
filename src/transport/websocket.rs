//! WebSocket transport
//!
//! Runs the per-socket lifecycle:
//! - authenticate during the upgrade (credential from query, cookie,
//!   `Authorization` or `Sec-WebSocket-Protocol`) and close with 4001 on
//!   failure
//! - wire the reader, then start the handshake timers
//! - turn `subscribe`/`unsubscribe` text frames into registry calls
//! - on any close path, cancel the connection's tasks and drop it from the
//!   registry
//!
//! Each socket has a writer task draining the connection's outbound queue;
//! everything else (registry replies, fan-out, pings, close frames) only
//! ever pushes onto that queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tungstenite::http::HeaderValue;
use tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tungstenite::protocol::Message as WsMessage;

use super::handshake;
use super::message::{CLOSE_UNAUTHORIZED, Command, close_frame};
use crate::auth::{Authenticator, Credential, extract_credential, offered_protocol};
use crate::client::{Connection, ConnectionId};
use crate::config::{AuthSettings, HandshakeSettings, HeartbeatSettings, Settings};
use crate::registry::SharedRegistry;

type WsStream = WebSocketStream<TcpStream>;

/// How long a rejected peer gets to answer our close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything a socket task needs, shared by all of them.
pub struct ConnectionContext {
    pub authenticator: Authenticator,
    pub registry: SharedRegistry,
    pub auth: AuthSettings,
    pub handshake: HandshakeSettings,
    pub heartbeat: HeartbeatSettings,
    /// Parent of every connection's token; cancelling it closes them all.
    pub shutdown: CancellationToken,
    live: AtomicUsize,
}

impl ConnectionContext {
    pub fn new(settings: &Settings, registry: SharedRegistry, shutdown: CancellationToken) -> Self {
        Self {
            authenticator: Authenticator::from_settings(&settings.auth),
            registry,
            auth: settings.auth.clone(),
            handshake: settings.handshake.clone(),
            heartbeat: settings.heartbeat.clone(),
            shutdown,
            live: AtomicUsize::new(0),
        }
    }

    /// Number of authenticated sockets currently open.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

/// Accept sockets until `ctx.shutdown` fires. Accept errors are logged and
/// the loop carries on.
pub async fn start_websocket_server(listener: TcpListener, ctx: Arc<ConnectionContext>) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket server listening on ws://{addr}"),
        Err(e) => warn!(error = %e, "WebSocket server listening on unknown address"),
    }

    loop {
        let accepted = tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted TCP connection");
                let ctx = ctx.clone();
                tokio::spawn(async move { handle_connection(stream, ctx).await });
            }
            Err(e) => error!(error = %e, "failed to accept connection"),
        }
    }

    info!("WebSocket server stopped accepting connections");
}

pub async fn handle_connection(stream: TcpStream, ctx: Arc<ConnectionContext>) {
    let mut credential: Option<Credential> = None;
    let capture = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
        credential = extract_credential(request, &ctx.auth);
        if let Some(protocol) = offered_protocol(request) {
            match HeaderValue::from_str(&protocol) {
                Ok(value) => {
                    response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
                }
                Err(e) => debug!(error = %e, "offered protocol is not a valid header value"),
            }
        }
        Ok(response)
    };

    let mut ws = match accept_hdr_async(stream, capture).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake error");
            return;
        }
    };

    let claims = match ctx.authenticator.authenticate(credential.as_ref()) {
        Ok(claims) => claims,
        Err(e) => {
            info!(source = ?credential.as_ref().map(|c| c.source), error = %e, "rejecting connection");
            reject(&mut ws).await;
            return;
        }
    };

    let cancel = ctx.shutdown.child_token();
    let (tx, rx) = mpsc::unbounded_channel::<WsMessage>();
    let connection = Arc::new(Connection::new(tx, cancel.clone(), claims.sub));
    let id = connection.id;
    ctx.live.fetch_add(1, Ordering::AcqRel);
    info!(connection = %id, subject = ?connection.subject, "connection authenticated");

    let (sink, mut stream) = ws.split();
    let peer_closed = CancellationToken::new();
    let writer = tokio::spawn(write_loop(sink, rx, cancel, peer_closed.clone(), id));
    let timers = handshake::spawn(connection.clone(), &ctx.handshake, &ctx.heartbeat);

    if read_loop(&connection, &mut stream, &ctx.registry).await {
        peer_closed.cancel();
    }

    connection.terminate();
    ctx.registry.lock().remove_connection(&connection);
    if let Err(e) = writer.await {
        warn!(connection = %id, error = %e, "writer task ended abnormally");
    }
    for timer in [timers.0, timers.1] {
        if let Err(e) = timer.await {
            warn!(connection = %id, error = %e, "handshake task ended abnormally");
        }
    }
    ctx.live.fetch_sub(1, Ordering::AcqRel);
    info!(connection = %id, "connection closed");
}

async fn reject(ws: &mut WsStream) {
    if let Err(e) = ws.close(Some(close_frame(CLOSE_UNAUTHORIZED, "unauthorized"))).await {
        debug!(error = %e, "failed to send unauthorized close frame");
        return;
    }
    // let the peer complete the closing handshake
    let _ = timeout(CLOSE_GRACE, async {
        while let Some(Ok(_)) = ws.next().await {}
    })
    .await;
}

/// Returns `true` when the peer started the closing handshake.
async fn read_loop(
    connection: &Arc<Connection>,
    stream: &mut SplitStream<WsStream>,
    registry: &SharedRegistry,
) -> bool {
    loop {
        let frame = tokio::select! {
            _ = connection.cancellation().cancelled() => break,
            frame = stream.next() => frame,
        };

        match frame {
            Some(Ok(WsMessage::Text(text))) => handle_text(connection, registry, text.as_str()),
            Some(Ok(WsMessage::Pong(_))) => connection.mark_alive(),
            Some(Ok(WsMessage::Ping(_))) => {}
            Some(Ok(WsMessage::Binary(data))) => {
                debug!(connection = %connection.id, len = data.len(), "dropping binary frame");
            }
            Some(Ok(WsMessage::Close(frame))) => {
                debug!(connection = %connection.id, ?frame, "peer closed connection");
                return true;
            }
            Some(Ok(WsMessage::Frame(_))) => {}
            Some(Err(e)) => {
                debug!(connection = %connection.id, error = %e, "read error");
                break;
            }
            None => break,
        }
    }
    false
}

fn handle_text(connection: &Arc<Connection>, registry: &SharedRegistry, text: &str) {
    let command = match Command::parse(text) {
        Ok(command) => command,
        Err(e) => {
            warn!(
                connection = %connection.id,
                error = %e,
                frame = %text.chars().take(100).collect::<String>(),
                "dropping malformed frame"
            );
            return;
        }
    };

    // the reply is queued under the lock so it can't be overtaken by a patch
    let mut registry = registry.lock();
    let reply = match command {
        Command::Subscribe { topic } => registry.subscribe(connection, &topic),
        Command::Unsubscribe { topic } => registry.unsubscribe(connection, &topic),
        Command::Unrecognized => {
            debug!(connection = %connection.id, "ignoring unrecognized command");
            return;
        }
    };
    if let Err(e) = connection.send(&reply) {
        debug!(connection = %connection.id, error = %e, "reply not sent");
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut rx: UnboundedReceiver<WsMessage>,
    cancel: CancellationToken,
    peer_closed: CancellationToken,
    id: ConnectionId,
) {
    let mut reply_close = false;
    loop {
        let msg = tokio::select! {
            biased;
            // nothing but the close reply may follow the peer's close frame
            _ = peer_closed.cancelled() => {
                reply_close = true;
                break;
            }
            msg = rx.recv() => match msg {
                Some(msg) => msg,
                None => break,
            },
            _ = cancel.cancelled() => break,
        };

        let closing = msg.is_close();
        if let Err(e) = sink.send(msg).await {
            debug!(connection = %id, error = %e, "failed to send frame");
            break;
        }
        if closing {
            break;
        }
    }

    if reply_close {
        // flushes the close reply queued when the peer's frame was read
        match timeout(CLOSE_GRACE, sink.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(connection = %id, error = %e, "close reply not sent"),
            Err(_) => debug!(connection = %id, "timed out sending close reply"),
        }
    }

    cancel.cancel();
    debug!(connection = %id, "writer closed");
}
