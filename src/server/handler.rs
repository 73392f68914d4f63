//! WebSocket connection handlers and the HTTP status surface.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
    Json,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::protocol::{ClientEvent, ServerEvent};

use super::auth::{authenticate, AuthError, IdentityClaim, ValidatedIdentity};
use super::registry::RoomSummary;
use super::router;
use super::state::AppState;

/// WebSocket upgrade endpoint.
///
/// The identity claim arrives in the query string and is validated before
/// any room logic runs. Failed claims still get an upgraded socket, a
/// single `auth-error` event, and an immediate close, so clients observe a
/// structured rejection rather than a bare HTTP error.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(claim): Query<IdentityClaim>,
) -> impl IntoResponse {
    let conn_id = Uuid::new_v4();

    match authenticate(&claim, &state.config.allowed_roles) {
        Ok(identity) => {
            // Audit log: connection id, identity, outcome
            tracing::info!(
                "Connection '{}' authenticated: participant '{}', case '{}', role '{}'",
                conn_id,
                identity.participant_id,
                identity.case_id,
                identity.role
            );
            ws.on_upgrade(move |socket| handle_socket(socket, state, conn_id, identity))
        }
        Err(e) => {
            tracing::warn!(
                "Connection '{}' rejected: {} (participant '{}', role '{}')",
                conn_id,
                e,
                claim.participant_id,
                claim.role
            );
            ws.on_upgrade(move |socket| reject_socket(socket, e))
        }
    }
}

/// Send a structured auth failure and close the socket
async fn reject_socket(mut socket: WebSocket, error: AuthError) {
    let event = ServerEvent::AuthError {
        code: error.code().to_string(),
        message: error.to_string(),
    };
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    conn_id: Uuid,
    identity: ValidatedIdentity,
) {
    let (mut sender, mut receiver) = socket.split();

    // Channel consumed by this connection's write task; the registry fans
    // out by pushing serialized events into it.
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    {
        let mut registry = state.registry.lock().await;
        let now = state.clock.now_millis();
        if let Err(e) = registry.register(conn_id, identity.clone(), tx, now) {
            tracing::error!("Failed to register connection '{}': {}", conn_id, e);
            return;
        }
    }

    tracing::info!(
        "Participant '{}' connected as '{}'",
        identity.participant_id,
        conn_id
    );

    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!("WebSocket error on '{}': {}", conn_id, e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        router::handle_event(&recv_state, conn_id, event).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Unparseable event from '{}': {}",
                            recv_identity.participant_id,
                            e
                        );
                        let registry = recv_state.registry.lock().await;
                        registry.send_to(
                            conn_id,
                            &ServerEvent::ErrorMessage {
                                code: "INVALID_EVENT".to_string(),
                                message: format!("could not parse event: {}", e),
                            },
                        );
                    }
                },
                Message::Close(_) => {
                    tracing::info!("Connection '{}' requested close", conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // Handled by the protocol layer
                }
                _ => {}
            }
        }
    });

    let mut send_task = tokio::spawn(async move {
        while let Some(json) = rx.recv().await {
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    // Clear registry membership synchronously before returning
    router::handle_disconnect(&state, conn_id).await;
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Operational status surface for dashboards
pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let registry = state.registry.lock().await;
    Json(serde_json::json!({
        "server": "crisis chat server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "connected_clients": registry.connected_count(),
        "active_rooms": registry.room_count(),
    }))
}

/// Room summaries for the admin dashboard
pub async fn get_rooms(State(state): State<Arc<AppState>>) -> Json<Vec<RoomSummary>> {
    let registry = state.registry.lock().await;
    Json(registry.room_summaries())
}
