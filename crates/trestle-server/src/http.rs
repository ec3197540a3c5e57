//! HTTP/WebSocket entry points and the serve loop.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use trestle_types::WebviewMessage;

use crate::gateway::WebGateway;
use crate::ipc::ExtensionLink;
use crate::router::error_envelope;
use crate::AppState;

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let reaper_state = state.clone();
    let app = app_router(state.clone());
    let reaper = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let removed = reaper_state
                .sessions
                .cleanup_inactive(reaper_state.session_timeout)
                .await;
            if !removed.is_empty() {
                info!(count = removed.len(), "swept inactive sessions");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, extension = %state.extension_addr, "bridge listening");
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;
    reaper.abort();
    state.sessions.cleanup_all().await;
    result?;
    Ok(())
}

fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/config/providers", get(list_providers))
        .route("/api/config/models/{provider}", get(list_models))
        .route("/api/sessions", get(list_sessions))
        .route("/ws/{client_id}", get(ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn root() -> Json<Value> {
    Json(json!({
        "message": "Trestle Bridge API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "active_sessions": state.sessions.list_active().await.len(),
    }))
}

async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"providers": state.catalog.list_providers()}))
}

async fn list_models(
    State(state): State<AppState>,
    Path(provider): Path<String>,
) -> Json<Value> {
    Json(json!({
        "provider": provider,
        "models": state.catalog.get_models(&provider),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"sessions": state.sessions.list_active().await}))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, client_id))
}

async fn handle_connection(socket: WebSocket, state: AppState, client_id: String) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    state.web.register(&client_id, tx).await;
    let session = state.sessions.create(&client_id).await;

    // The socket stays usable without the extension; routed messages will
    // come back as error envelopes until it connects.
    let link = match ExtensionLink::connect(
        state.extension_addr,
        &client_id,
        state.router.clone(),
        state.extension.clone(),
    )
    .await
    {
        Ok(link) => Some(link),
        Err(err) => {
            warn!(%client_id, %err, "client connected without extension link");
            None
        }
    };
    info!(%client_id, session_id = %session.id, "web client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let recv_state = state.clone();
    let recv_client = client_id.clone();
    let session_id = session.id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                WsMessage::Text(text) => {
                    handle_frame(&recv_state, &recv_client, &session_id, text.as_str()).await;
                }
                WsMessage::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.web.unregister(&client_id).await;
    if let Some(link) = link {
        link.shutdown(&state.extension).await;
    }
    state.sessions.close(&session.id).await;
    info!(%client_id, "web client disconnected");
}

async fn handle_frame(state: &AppState, client_id: &str, session_id: &str, text: &str) {
    let message: WebviewMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!(client_id, %err, "invalid JSON from web client");
            let _ = state
                .web
                .send(client_id, error_envelope("unknown", "malformed message envelope"))
                .await;
            return;
        }
    };

    if message.kind == "ping" {
        let _ = state
            .web
            .send(client_id, json!({"type": "pong", "data": message.data}))
            .await;
        return;
    }

    state.sessions.touch(session_id).await;
    let ack = state.router.route_from_web(client_id, message).await;
    let _ = state.web.send(client_id, ack).await;
}
