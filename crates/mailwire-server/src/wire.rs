use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mailwire_core::{ConnectionId, Identity};

use crate::protocol::{WireRequest, WireResponse};
use crate::registry::Connection;
use crate::relay::{relay, RelayContext};
use crate::server::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Upgrade handler for `/wire` and `/wire/{*path}`.
///
/// Authentication happens before the upgrade: an unauthenticated socket is
/// refused outright and never touches the registry or the relay.
pub async fn wire_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    match state.authenticator.authenticate(&headers) {
        Ok(Some(identity)) => {
            tracing::info!(principal = %identity, "wire socket authenticated");
            ws.on_upgrade(move |socket| handle_wire_socket(socket, identity, state))
        }
        Ok(None) => {
            tracing::warn!("unauthenticated wire connection rejected");
            StatusCode::UNAUTHORIZED.into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "wire authentication failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Drive one connection from Connecting through Closed.
///
/// The socket is split into three tasks: a writer draining the outbound
/// queue (plus heartbeat pings), a reader forwarding inbound text frames,
/// and a processor dispatching them to the relay one at a time, in receipt
/// order. Either half finishing (client disconnect or transport failure) drives
/// teardown: cancel the in-flight relay call, stop the processor, then
/// deregister.
async fn handle_wire_socket(mut socket: WebSocket, identity: Identity, state: AppState) {
    let id = ConnectionId::new();
    let cancel = CancellationToken::new();
    let backend = (state.backend_factory)();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(state.config.max_send_queue);

    let conn = Connection::new(
        id.clone(),
        identity.clone(),
        out_tx,
        backend,
        cancel.clone(),
    );
    if let Err(err) = state.registry.register(conn) {
        tracing::error!(error = %err, "closing socket: registration rejected");
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    }
    tracing::info!(connection_id = %id, principal = %identity, "wire connected");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (in_tx, mut in_rx) = mpsc::channel::<String>(state.config.max_send_queue);

    // Writer: outbound frames plus periodic pings.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                frame = out_rx.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Reader: inbound text frames until disconnect or transport failure.
    let reader = tokio::spawn(async move {
        while let Some(next) = ws_rx.next().await {
            match next {
                Ok(WsMessage::Text(text)) => {
                    if in_tx.send(text.to_string()).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Close(_)) => break,
                Ok(_) => {} // pongs and pings; axum answers pings itself
                Err(err) => {
                    tracing::warn!(error = %err, "wire transport error");
                    break;
                }
            }
        }
        // in_tx drops here, which stops the processor once it drains.
    });

    // Processor: sequential dispatch — one relay call in flight at most.
    let proc_state = state.clone();
    let proc_id = id.clone();
    let proc_cancel = cancel.clone();
    let processor = tokio::spawn(async move {
        let timeout = Duration::from_secs(proc_state.config.relay_timeout_secs);
        loop {
            let frame = tokio::select! {
                _ = proc_cancel.cancelled() => break,
                received = in_rx.recv() => match received {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let response = match serde_json::from_str::<WireRequest>(&frame) {
                Ok(request) => {
                    let Some(handle) = proc_state.registry.get(&proc_id) else {
                        break;
                    };
                    let ctx = RelayContext {
                        identity: &handle.identity,
                        backend: handle.backend.as_ref(),
                        timeout,
                    };
                    tokio::select! {
                        // Teardown abandons the in-flight backend call.
                        _ = proc_cancel.cancelled() => break,
                        response = relay(ctx, request) => response,
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "unparseable wire frame");
                    WireResponse::parse_error()
                }
            };

            let frame = match serde_json::to_string(&response) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(error = %err, "response serialization failed");
                    continue;
                }
            };
            let Some(handle) = proc_state.registry.get(&proc_id) else {
                break;
            };
            handle.send(frame);
        }
    });

    // Closing → Closed: client disconnect or failure of either half
    // triggers teardown. Deregistration happens exactly once on this path;
    // the registry absorbs any racing second signal.
    let mut reader = reader;
    let mut writer = writer;
    tokio::select! {
        _ = &mut reader => {}
        _ = &mut writer => {}
    }
    cancel.cancel();
    let _ = processor.await;
    reader.abort();
    writer.abort();
    if state.registry.deregister(&id).is_some() {
        tracing::info!(connection_id = %id, principal = %identity, "wire disconnected");
    }
}
