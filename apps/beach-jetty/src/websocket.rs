use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{Connection, ConnectionId, Outbound};
use crate::server::AppState;
use crate::signaling::{decode_binary, decode_text, ClientMessage, EnvelopeError};

/// How long an evicted connection's writer gets to flush its close frame.
const EVICTION_FLUSH: Duration = Duration::from_secs(1);

/// WebSocket upgrade handler
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, remote_addr))
}

fn to_message(outbound: Outbound) -> Message {
    match outbound {
        Outbound::Frame(frame) => Message::Text(frame.to_string()),
        Outbound::Probe => Message::Ping(Vec::new()),
        Outbound::Close { code, reason } => Message::Close(Some(CloseFrame {
            code,
            reason: Cow::Borrowed(reason),
        })),
    }
}

/// Drive one peer connection until either side goes away.
async fn handle_socket(socket: WebSocket, state: AppState, remote_addr: SocketAddr) {
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.outbound_buffer);
    let (connection, mut eviction) = Connection::new(tx);
    let connection_id = connection.id();
    let (mut sender, mut receiver) = socket.split();

    // Forward queued frames to the socket; a close frame ends the writer.
    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let closing = matches!(outbound, Outbound::Close { .. });
            if sender.send(to_message(outbound)).await.is_err() {
                break;
            }
            if closing {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    if !state.coordinator.connected(connection).await {
        warn!(connection_id = %connection_id, "coordinator unavailable; dropping connection");
        writer.abort();
        return;
    }

    info!(
        connection_id = %connection_id,
        remote_addr = %remote_addr,
        "websocket connected"
    );

    let mut evicted = false;
    loop {
        let frame = tokio::select! {
            _ = &mut eviction => {
                evicted = true;
                break;
            }
            frame = receiver.next() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection_id = %connection_id, error = %err, "websocket error");
                break;
            }
        };

        let decoded = match frame {
            Message::Text(text) => decode_text(&text, &state.relay_types),
            Message::Binary(bytes) => decode_binary(&bytes, &state.relay_types),
            Message::Pong(_) => {
                state.coordinator.alive(connection_id).await;
                continue;
            }
            // axum answers pings on its own.
            Message::Ping(_) => continue,
            Message::Close(frame) => {
                debug!(
                    connection_id = %connection_id,
                    reason = ?frame.map(|f| f.reason.to_string()),
                    "client closed websocket"
                );
                break;
            }
        };

        if !dispatch(&state, connection_id, decoded).await {
            break;
        }
    }

    if evicted {
        debug!(connection_id = %connection_id, "evicted by coordinator; flushing writer");
        if tokio::time::timeout(EVICTION_FLUSH, &mut writer).await.is_err() {
            warn!(connection_id = %connection_id, "writer stuck after eviction; dropping socket");
        }
    }
    state.coordinator.disconnected(connection_id).await;
    writer.abort();

    info!(connection_id = %connection_id, evicted, "websocket disconnected");
}

/// Hand a decoded frame to the coordinator. Malformed frames are dropped and
/// the connection stays open. Returns `false` once the coordinator is gone.
async fn dispatch(
    state: &AppState,
    connection_id: ConnectionId,
    decoded: Result<ClientMessage, EnvelopeError>,
) -> bool {
    match decoded {
        Ok(message) => state.coordinator.inbound(connection_id, message).await,
        Err(err) => {
            debug!(connection_id = %connection_id, error = %err, "dropping malformed frame");
            counter!("beach_jetty_malformed_frames_total", 1, "reason" => err.metric_label());
            true
        }
    }
}
