//! One WebSocket connection per (client, symbol): the subscriber's writer
//! task.
//!
//! The connection task drains the subscription's outbound queue onto the
//! socket, sends keepalives, applies the liveness timeout, and feeds client
//! acks/pings back as activity. Write errors close the subscription
//! immediately; client-initiated closes drain it first.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::sink::SinkExt;
use futures_util::stream::StreamExt;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use tickbridge_model::{ClientMessage, Symbol};

use crate::state::AppState;
use crate::websocket::messages::{stream_to_websocket, websocket_to_client};

/// `GET /api/v1/stream/{symbol}`: upgrade and stream deltas for one symbol.
pub async fn stream_handler(
    Path(symbol): Path<String>,
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let symbol = Symbol::from(symbol);
    if !state.registry.is_active(&symbol) {
        return (
            StatusCode::NOT_FOUND,
            format!("symbol not in the active set: {symbol}"),
        )
            .into_response();
    }
    upgrade.on_upgrade(move |socket| handle_stream(socket, state, symbol))
}

async fn handle_stream(socket: WebSocket, state: AppState, symbol: Symbol) {
    let subscription = state.hub.subscribe(symbol.clone());
    let id = subscription.id();
    info!(%id, %symbol, "stream connection opened");

    let hub_config = state.hub.config().clone();
    let write_timeout = hub_config.write_timeout();
    let liveness_timeout = hub_config.liveness_timeout();
    let mut keepalive = interval(hub_config.keepalive());
    // The first tick fires immediately; skip it so the snapshot goes first.
    keepalive.tick().await;

    let (mut sink, mut source) = socket.split();

    loop {
        tokio::select! {
            queued = subscription.next_message() => {
                match queued {
                    Some(message) => {
                        let frame = match stream_to_websocket(&message) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!(%id, "failed to encode frame: {err}");
                                continue;
                            }
                        };
                        match timeout(write_timeout, sink.send(frame)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(err)) => {
                                warn!(%id, %symbol, "subscriber-dead: write failed: {err}");
                                subscription.close();
                                break;
                            }
                            Err(_) => {
                                warn!(%id, %symbol, "subscriber-dead: write timed out");
                                subscription.close();
                                break;
                            }
                        }
                    }
                    None => {
                        // Drained or closed; say goodbye politely.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = keepalive.tick() => {
                if subscription.since_last_activity() > liveness_timeout {
                    warn!(%id, %symbol, "subscriber-dead: liveness timeout");
                    subscription.close();
                    break;
                }
                let frame = match stream_to_websocket(&subscription.keepalive_message()) {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                if timeout(write_timeout, sink.send(frame)).await.is_err() {
                    warn!(%id, %symbol, "subscriber-dead: keepalive write timed out");
                    subscription.close();
                    break;
                }
            }
            incoming = source.next() => {
                match incoming {
                    Some(Ok(frame)) => handle_client_frame(&subscription, &frame),
                    Some(Err(err)) => {
                        debug!(%id, %symbol, "stream read error: {err}");
                        subscription.close();
                        break;
                    }
                    None => {
                        debug!(%id, %symbol, "client went away");
                        subscription.close();
                        break;
                    }
                }
            }
        }
    }

    info!(%id, %symbol, dropped = subscription.dropped(), "stream connection closed");
    drop(subscription);
}

fn handle_client_frame(
    subscription: &tickbridge_core::SubscriberHandle,
    frame: &Message,
) {
    match frame {
        Message::Text(_) | Message::Binary(_) => match websocket_to_client(frame) {
            Ok(ClientMessage::Ack { seq }) => {
                debug!(id = %subscription.id(), seq, "ack");
                subscription.record_activity();
            }
            Ok(ClientMessage::Ping) => subscription.record_activity(),
            Ok(ClientMessage::Close) => subscription.begin_drain(),
            Err(err) => {
                debug!(id = %subscription.id(), "undecodable client frame: {err}");
            }
        },
        // Transport pings/pongs count as liveness too.
        Message::Ping(_) | Message::Pong(_) => subscription.record_activity(),
        Message::Close(_) => subscription.begin_drain(),
    }
}
