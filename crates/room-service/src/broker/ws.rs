//! WebSocket transport for the signaling protocol.
//!
//! One reader loop and one writer task per socket. The reader hands frames
//! to the broker one at a time, which keeps per-connection ordering. The
//! writer drains the connection's outbox; it ends when the broker drops the
//! outbox on disconnect. A heartbeat tick keeps an idle member's store
//! records from expiring.

use super::SignalingBroker;
use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// Handler for GET /ws
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let broker = Arc::clone(&state.broker);
    ws.on_upgrade(move |socket| serve_socket(socket, broker))
}

/// Run one signaling connection to completion.
pub async fn serve_socket(socket: WebSocket, broker: Arc<SignalingBroker>) {
    let (conn, mut outbox) = broker.connect();
    let (mut sink, mut stream) = socket.split();

    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    error!(target: "room.broker", connection_id = %writer_conn, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let shutdown = broker.shutdown_token();
    let period = broker.keepalive_interval();
    let mut heartbeat = interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(target: "room.broker", connection_id = %conn, "Closing connection for shutdown");
                break;
            }
            _ = heartbeat.tick() => broker.keepalive(&conn).await,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => broker.handle_text(&conn, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(target: "room.broker", connection_id = %conn, error = %e, "Socket read failed");
                    break;
                }
            }
        }
    }

    broker.disconnect(&conn).await;
    if let Err(e) = writer.await {
        debug!(target: "room.broker", connection_id = %conn, error = %e, "Writer task ended abnormally");
    }
}
