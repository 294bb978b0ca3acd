// # HTTP/WebSocket Surface
//
// Thin axum adapter over the chat service: the room/member/message REST
// subset, the `/ws/chat` socket endpoint, and Prometheus exposition on
// `/metrics`. All domain behavior lives in the services; handlers only
// translate.

pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::chat::{MemberRole, RoomType};
use crate::error::{AppError, Result};
use crate::metrics::render;
use crate::permissions::{Role, UserPrincipal};
use crate::services::ServiceContainer;

pub type AppState = Arc<ServiceContainer>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/chat/rooms", get(list_rooms).post(create_room))
        .route("/chat/rooms/{id}", get(get_room))
        .route("/chat/rooms/{id}/members", post(add_member))
        .route(
            "/chat/rooms/{id}/members/{user_id}",
            put(update_member).delete(remove_member),
        )
        .route("/chat/rooms/{id}/messages", get(get_messages))
        .route("/chat/direct-chats", post(create_direct_chat))
        .route("/ws/chat", get(ws::ws_handler))
        .route("/metrics", get(metrics_endpoint))
        .route("/health", get(health))
        .with_state(state)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut body = json!({
            "success": false,
            "error": self.to_string(),
        });
        if let AppError::Validation { errors, .. } = &self {
            body["details"] = serde_json::to_value(errors).unwrap_or(Value::Null);
        }
        let mut response = (status, Json(body)).into_response();
        if let Some(headers) = self.rate_limit_headers() {
            for (name, value) in headers {
                if let (Ok(name), Ok(value)) = (
                    axum::http::HeaderName::try_from(name.as_str()),
                    axum::http::HeaderValue::try_from(value.as_str()),
                ) {
                    response.headers_mut().insert(name, value);
                }
            }
        }
        response
    }
}

/// Resolve the caller from the bearer token.
pub(crate) async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<UserPrincipal> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Authentication("Missing bearer token".into()))?;
    principal_from_token(state, token).await
}

pub(crate) async fn principal_from_token(state: &AppState, token: &str) -> Result<UserPrincipal> {
    let claims = state.security.validate_token(token).await?;
    let id = Uuid::parse_str(&claims.sub)
        .map_err(|_| AppError::Authentication("Token subject is not a user id".into()))?;
    let role = Role::parse(&claims.role).unwrap_or(Role::Member);
    Ok(UserPrincipal {
        id,
        role,
        extra_permissions: claims.permissions,
    })
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    let body = render(&state.metrics.registry());
    (
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

async fn list_rooms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let room_type = params
        .get("type")
        .and_then(|raw| serde_json::from_value(Value::String(raw.clone())).ok());
    let page = params
        .get("page")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(1);
    let page_size = params
        .get("page_size")
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(20);

    let rooms = state.chat.list_rooms(user.id, room_type, page, page_size).await;
    Ok(Json(json!({"success": true, "rooms": rooms})))
}

#[derive(Debug, Deserialize)]
struct CreateRoomMember {
    user_id: Uuid,
    #[serde(default)]
    role: Option<MemberRole>,
}

#[derive(Debug, Deserialize)]
struct CreateRoomBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    room_type: RoomType,
    #[serde(default)]
    company_id: Option<Uuid>,
    #[serde(default)]
    members: Vec<CreateRoomMember>,
}

async fn create_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomBody>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = authenticate(&state, &headers).await?;
    state.permissions.ensure_permission(&user, "chat:create").await?;

    let room = match body.room_type {
        RoomType::Direct => {
            let other = body
                .members
                .first()
                .map(|m| m.user_id)
                .ok_or_else(|| AppError::validation("direct rooms need a target member"))?;
            let (room, _) = state.chat.rooms.create_direct_chat(user.id, other).await?;
            room
        }
        RoomType::Group | RoomType::Company => {
            let name = body
                .name
                .ok_or_else(|| AppError::validation("group rooms need a name"))?;
            let member_ids = body.members.iter().map(|m| m.user_id).collect();
            let (room, _) = state
                .chat
                .rooms
                .create_group_chat(&name, user.id, member_ids, body.company_id)
                .await?;
            // Explicit member roles apply after creation; the creator stays
            // owner.
            for member in &body.members {
                if let Some(role) = member.role {
                    if role != MemberRole::Member && member.user_id != user.id {
                        state
                            .chat
                            .members
                            .update_role(room.id, member.user_id, role, user.id)
                            .await?;
                    }
                }
            }
            room
        }
    };
    Ok((
        StatusCode::CREATED,
        Json(json!({"success": true, "room": room})),
    ))
}

async fn get_room(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
) -> Result<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    if !state.chat.check_room_access(user.id, room_id).await {
        return Err(AppError::PermissionDenied("Access denied to room".into()));
    }
    let room = state.chat.room_info(room_id).await?;
    Ok(Json(json!({"success": true, "room": room})))
}

#[derive(Debug, Deserialize)]
struct AddMemberBody {
    user_id: Uuid,
    #[serde(default)]
    role: Option<MemberRole>,
}

async fn add_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Json(body): Json<AddMemberBody>,
) -> Result<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let role = body.role.unwrap_or(MemberRole::Member);
    let added = state
        .chat
        .rooms
        .add_members(room_id, vec![body.user_id], role, Some(user.id))
        .await?;
    Ok(Json(json!({"success": true, "added": added.len()})))
}

#[derive(Debug, Deserialize)]
struct UpdateMemberBody {
    role: MemberRole,
}

async fn update_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<UpdateMemberBody>,
) -> Result<Json<Value>> {
    let caller = authenticate(&state, &headers).await?;
    let member = state
        .chat
        .members
        .update_role(room_id, user_id, body.role, caller.id)
        .await?
        .ok_or_else(|| AppError::not_found("ChatMember", user_id))?;
    Ok(Json(json!({"success": true, "member": member})))
}

async fn remove_member(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((room_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Value>> {
    let caller = authenticate(&state, &headers).await?;
    let removed = state
        .chat
        .members
        .remove_member(room_id, user_id, caller.id)
        .await?;
    if !removed {
        return Err(AppError::not_found("ChatMember", user_id));
    }
    Ok(Json(json!({"success": true})))
}

async fn get_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(room_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    if !state.chat.check_room_access(user.id, room_id).await {
        return Err(AppError::PermissionDenied("Access denied to room".into()));
    }

    let limit = params
        .get("limit")
        .and_then(|raw| raw.parse::<usize>().ok())
        .unwrap_or(50)
        .clamp(1, 100);
    let before_id = params
        .get("before_id")
        .and_then(|raw| Uuid::parse_str(raw).ok());

    let messages = state
        .chat
        .messages
        .get_room_messages(room_id, limit, before_id, false)
        .await;
    let payload: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "room_id": m.room_id,
                "sender_id": m.sender_id,
                "message_type": m.message_type,
                "content": state.chat.messages.decrypt_content(m),
                "created_at": m.created_at.to_rfc3339(),
                "updated_at": m.updated_at.to_rfc3339(),
            })
        })
        .collect();
    Ok(Json(json!({"success": true, "messages": payload})))
}

#[derive(Debug, Deserialize)]
struct DirectChatBody {
    user_id: Uuid,
}

/// Returns the existing direct chat with the target (200) or creates one
/// (201).
async fn create_direct_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<DirectChatBody>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = authenticate(&state, &headers).await?;
    let (room, created) = state
        .chat
        .get_or_create_direct_chat(user.id, body.user_id)
        .await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(json!({"success": true, "room": room}))))
}
