//! Remote command WebSocket endpoint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header::SEC_WEBSOCKET_PROTOCOL, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use saltdock_protocol::{CommandRequest, ServerEvent, SUBPROTOCOL};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::fanout::fan_out;
use crate::MasterState;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum OutboundMessage {
    Event(ServerEvent),
    Pong(Bytes),
    Close,
}

fn offers_subprotocol(headers: &HeaderMap) -> bool {
    headers
        .get_all(SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| p.trim() == SUBPROTOCOL)
}

/// Drop finished fan-out jobs. Returns how many were collected.
fn reap_finished(jobs: &mut JoinSet<()>) -> usize {
    let mut reaped = 0;
    while let Some(result) = jobs.try_join_next() {
        if let Err(e) = result {
            warn!(
                component = "websocket",
                event = "ws.fanout.failed",
                error = %e,
                "Fan-out task ended abnormally"
            );
        }
        reaped += 1;
    }
    reaped
}

/// WebSocket upgrade handler. Clients must offer the remote command
/// sub-protocol.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<MasterState>>,
) -> Response {
    if !offers_subprotocol(&headers) {
        warn!(
            component = "websocket",
            event = "ws.upgrade.rejected",
            "Client did not offer the {SUBPROTOCOL} sub-protocol"
        );
        return (StatusCode::BAD_REQUEST, "unsupported sub-protocol").into_response();
    }
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<MasterState>) {
    let conn_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        "WebSocket connection opened"
    );

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(100);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Event(event) => match serde_json::to_string(&event) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize server event"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
                OutboundMessage::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    // Fan-out tasks publish typed events; this forwards them to the writer.
    let (event_tx, mut event_rx) = mpsc::channel::<ServerEvent>(100);
    let forward_tx = outbound_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if forward_tx.send(OutboundMessage::Event(event)).await.is_err() {
                break;
            }
        }
    });

    let mut jobs = JoinSet::new();
    let close_after = state.fleet.close_after();
    let deadline = async move {
        match close_after {
            Some(after) => tokio::time::sleep(after).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        let next = tokio::select! {
            _ = &mut deadline => {
                info!(
                    component = "websocket",
                    event = "ws.connection.dropped",
                    connection_id = conn_id,
                    "Closing connection on schedule"
                );
                break;
            }
            next = ws_rx.next() => next,
        };

        let text = match next {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Ping(data))) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Some(Ok(Message::Close(_))) | None => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client closed connection"
                );
                break;
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                break;
            }
        };

        let request: CommandRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.message.parse_failed",
                    connection_id = conn_id,
                    error = %e,
                    payload_bytes = text.as_str().len(),
                    "Failed to parse command request"
                );
                continue;
            }
        };

        info!(
            component = "websocket",
            event = "ws.request.received",
            connection_id = conn_id,
            mode = ?request.mode(),
            target = %request.target,
            session_id = ?request.session_id,
        );
        reap_finished(&mut jobs);
        jobs.spawn(fan_out(state.fleet.clone(), request, event_tx.clone()));
    }

    jobs.abort_all();
    drop(event_tx);
    forward_task.abort();
    let _ = outbound_tx.send(OutboundMessage::Close).await;
    drop(outbound_tx);
    let _ = send_task.await;

    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        "WebSocket connection closed"
    );
}
