use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// EventType identifies what kind of envelope is being delivered to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Message,
    AiTyping,
    AiStream,
    AiComplete,
    AiError,
}

/// Every frame sent to a room member is one JSON-encoded envelope.
///
/// Envelopes are immutable once built; the hub fans them out as
/// `Arc<Envelope>` so every member shares the same allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub room_id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        event_type: EventType,
        payload: impl Serialize,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            room_id: room_id.into(),
            user_id: user_id.into(),
            event_type,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A persisted (or transient) chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    pub user_id: String,
    pub status: String,
}

/// One incremental piece of a relayed AI answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunkPayload {
    /// Correlation id shared by every chunk of one relay.
    pub id: String,
    /// Accumulated text up to and including this chunk.
    pub content: String,
    pub chunk: String,
    pub user_id: String,
    pub user_name: String,
    pub user_email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletePayload {
    pub temp_id: String,
    pub user_id: String,
    pub message: StoredMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub user_id: String,
    pub error: String,
}

// HTTP bodies

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPromptRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponsePayload {
    pub fn ok(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::new("r1", "u1", EventType::AiStream, json!({"chunk": "hi"})).unwrap();
        let v: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(v["room_id"], "r1");
        assert_eq!(v["user_id"], "u1");
        assert_eq!(v["type"], "ai_stream");
        assert_eq!(v["payload"]["chunk"], "hi");
    }

    #[test]
    fn event_type_names() {
        let names: Vec<String> = [
            EventType::Message,
            EventType::AiTyping,
            EventType::AiStream,
            EventType::AiComplete,
            EventType::AiError,
        ]
        .iter()
        .map(|t| serde_json::to_value(t).unwrap().as_str().unwrap().to_string())
        .collect();
        assert_eq!(
            names,
            ["message", "ai_typing", "ai_stream", "ai_complete", "ai_error"]
        );
    }
}
