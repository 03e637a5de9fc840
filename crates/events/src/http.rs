//! Stats + WebSocket fan-out HTTP server.
//!
//! `GET /healthz` — liveness. `GET /stats` — ingestor counters.
//! `GET /ws?topics=log,phase_update` — upgrade and stream hub deliveries for
//! the requested outbound topics.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::stream::{SelectAll, StreamExt};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info};

use crate::hub::SubscriberHub;
use crate::ingestor::IngestorStats;

#[derive(Clone)]
struct AppState {
    hub: Arc<SubscriberHub>,
    stats: Arc<IngestorStats>,
}

/// Spawn the HTTP server; resolves when shutdown is signalled.
pub fn spawn_stats_server(
    port: u16,
    hub: Arc<SubscriberHub>,
    stats: Arc<IngestorStats>,
    shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new()
            .route("/healthz", get(healthz_handler))
            .route("/stats", get(stats_handler))
            .route("/ws", get(ws_handler))
            .with_state(AppState { hub, stats });

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(port, error = %e, "failed to bind event stats server");
                return;
            }
        };

        info!(port, "event stats server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut rx = shutdown;
                while !*rx.borrow() {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            })
            .await
            .ok();

        info!("event stats server stopped");
    })
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn stats_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.stats.snapshot())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let topics: Vec<String> = params
        .get("topics")
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    ws.on_upgrade(move |socket| stream_topics(socket, state, topics))
}

async fn stream_topics(mut socket: WebSocket, state: AppState, topics: Vec<String>) {
    if topics.is_empty() {
        let _ = socket
            .send(Message::Text("{\"error\": \"no topics requested\"}".into()))
            .await;
        return;
    }

    let mut streams: SelectAll<BroadcastStream<String>> = SelectAll::new();
    for topic in &topics {
        streams.push(BroadcastStream::new(state.hub.subscribe(topic)));
    }
    debug!(?topics, "websocket subscriber connected");

    loop {
        tokio::select! {
            delivery = streams.next() => {
                match delivery {
                    Some(Ok(payload)) => {
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    // A lagged subscriber skips missed entries and continues.
                    Some(Err(_)) => continue,
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    // Pings are answered by axum; other frames are ignored.
                    Some(Ok(_)) => continue,
                    Some(Err(_)) => break,
                }
            }
        }
    }
    debug!(?topics, "websocket subscriber disconnected");
}
