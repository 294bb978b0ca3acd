// WebSocket endpoint adapter.
//
// One authenticated socket per connection. The socket task owns the read
// loop; outbound frames flow through the connection manager's channel. Every
// exit path removes the connection from the indices and records presence.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::{principal_from_token, AppState};
use crate::error::AppError;

/// `GET /ws/chat` — token via `Authorization` header or `?token=` query
/// parameter (browsers cannot set headers on WebSocket upgrade).
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| params.get("token").cloned());

    let Some(token) = token else {
        return AppError::Authentication("Missing bearer token".into()).into_response();
    };
    let principal = match principal_from_token(&state, &token).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, principal.id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let connection_id = Uuid::new_v4().to_string();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state.chat.on_connect(&connection_id, user_id, tx).await;
    tracing::info!(connection = %connection_id, user = %user_id, "websocket connected");

    // Writer: drain the outbound channel into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Reader: the session ends on close or read error.
    while let Some(incoming) = ws_receiver.next().await {
        match incoming {
            Ok(Message::Text(text)) => {
                state.chat.handle_frame(&connection_id, text.as_str()).await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_)) => {}
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::debug!(connection = %connection_id, error = %err, "websocket read error");
                break;
            }
        }
    }

    state.chat.on_disconnect(&connection_id).await;
    writer.abort();
    tracing::info!(connection = %connection_id, user = %user_id, "websocket disconnected");
}
