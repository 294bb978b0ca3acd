// WebSocket command protocol.
//
// Client frames are JSON `{command, data, room_id?}`; server frames are
// `{type, data, success?, error?}`. Unknown fields are ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    JoinRoom,
    LeaveRoom,
    SendMessage,
    ReadMessages,
    TypingStart,
    TypingStop,
    FetchHistory,
    AddReaction,
    RemoveReaction,
    EditMessage,
    DeleteMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsCommand {
    pub command: CommandType,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub room_id: Option<Uuid>,
}

impl WsCommand {
    /// Room id from `data.room_id`, falling back to the top-level field.
    pub fn room_id(&self) -> Option<Uuid> {
        self.data
            .get("room_id")
            .and_then(Value::as_str)
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .or(self.room_id)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    pub fn data_uuid(&self, key: &str) -> Option<Uuid> {
        self.data_str(key).and_then(|raw| Uuid::parse_str(raw).ok())
    }

    pub fn data_usize(&self, key: &str) -> Option<usize> {
        self.data.get(key).and_then(Value::as_u64).map(|v| v as usize)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: Value,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsResponse {
    pub fn ok(kind: &str, data: Value) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            success: true,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".to_string(),
            data: Value::Null,
            success: false,
            error: Some(message.into()),
        }
    }

    pub fn to_frame(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn to_text(&self) -> String {
        self.to_frame().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_parsing() {
        let raw = json!({
            "command": "send_message",
            "data": {"room_id": "a7f1b6ea-5a40-4a52-93d4-6f53732cd607", "content": "hi"},
            "unknown_field": true
        });
        let cmd: WsCommand = serde_json::from_value(raw).unwrap();
        assert_eq!(cmd.command, CommandType::SendMessage);
        assert_eq!(cmd.data_str("content"), Some("hi"));
        assert_eq!(
            cmd.room_id().unwrap().to_string(),
            "a7f1b6ea-5a40-4a52-93d4-6f53732cd607"
        );
    }

    #[test]
    fn test_top_level_room_id_fallback() {
        let raw = json!({
            "command": "join_room",
            "room_id": "a7f1b6ea-5a40-4a52-93d4-6f53732cd607"
        });
        let cmd: WsCommand = serde_json::from_value(raw).unwrap();
        assert!(cmd.room_id().is_some());
    }

    #[test]
    fn test_unknown_command_rejected() {
        let raw = json!({"command": "explode"});
        assert!(serde_json::from_value::<WsCommand>(raw).is_err());
    }

    #[test]
    fn test_error_frame_shape() {
        let frame = WsResponse::error("Rate limit exceeded").to_frame();
        assert_eq!(frame["type"], "error");
        assert_eq!(frame["success"], false);
        assert_eq!(frame["error"], "Rate limit exceeded");
    }

    #[test]
    fn test_ok_frame_omits_error() {
        let text = WsResponse::ok("room_joined", json!({"room_id": "x"})).to_text();
        assert!(!text.contains("\"error\""));
        assert!(text.contains("\"room_joined\""));
    }
}
