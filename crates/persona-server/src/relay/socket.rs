//! Per-connection socket task.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::connection::Connection;
use super::dispatch::Relay;
use super::heartbeat::{run_heartbeat, HeartbeatResult};
use super::protocol::Outbound;

#[derive(Clone, Copy, Debug)]
pub struct SocketSettings {
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

/// Drive one upgraded WebSocket until the client leaves, goes quiet, or the
/// server shuts down. Frames from this client are handled one at a time in
/// arrival order.
pub async fn serve_connection(socket: WebSocket, relay: Arc<Relay>, settings: SocketSettings, shutdown: CancellationToken) {
    let registry = Arc::clone(relay.registry());
    let (conn, rx) = registry.register();
    info!(client_id = %conn.id, "websocket client connected");

    let (ws_tx, mut ws_rx) = socket.split();
    let close = conn.close_token();

    let writer = tokio::spawn(write_loop(ws_tx, rx, Arc::clone(&conn), settings.ping_interval));

    let heartbeat_conn = Arc::clone(&conn);
    let heartbeat = tokio::spawn(async move {
        let result = run_heartbeat(
            Arc::clone(&heartbeat_conn),
            settings.ping_interval,
            settings.idle_timeout,
            heartbeat_conn.close_token(),
        )
        .await;
        if result == HeartbeatResult::TimedOut {
            warn!(client_id = %heartbeat_conn.id, idle = ?heartbeat_conn.idle_for(), "client stopped responding, closing");
            heartbeat_conn.close();
        }
    });

    loop {
        tokio::select! {
            () = close.cancelled() => break,
            () = shutdown.cancelled() => break,
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    conn.mark_alive();
                    relay.handle_frame(&conn, text.as_str()).await;
                    conn.mark_alive();
                }
                Some(Ok(WsMessage::Binary(_))) => {
                    conn.mark_alive();
                    registry.send_to(&conn, &Outbound::error("Invalid message format"));
                }
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => conn.mark_alive(),
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(client_id = %conn.id, error = %e, "websocket read error");
                    break;
                }
            }
        }
    }

    conn.close();
    registry.unregister(&conn.id);
    let _ = writer.await;
    let _ = heartbeat.await;
    info!(
        client_id = %conn.id,
        dropped = conn.drop_count(),
        connected_for = ?conn.connected_at.elapsed(),
        "websocket client disconnected"
    );
}

/// Forward queued frames to the socket and send periodic pings.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, WsMessage>,
    mut rx: mpsc::Receiver<Arc<str>>,
    conn: Arc<Connection>,
    ping_interval: Duration,
) {
    let close = conn.close_token();
    let mut ping = tokio::time::interval(ping_interval);
    ping.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else { break };
                if ws_tx.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if ws_tx.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                trace!(client_id = %conn.id, "sent ping");
            }
            () = close.cancelled() => {
                // Flush what is already queued, then say goodbye.
                while let Ok(frame) = rx.try_recv() {
                    if ws_tx.send(WsMessage::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    conn.close();
}
