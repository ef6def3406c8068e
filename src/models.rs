use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

pub type ConversationId = i64;

// Either a client placeholder or the id the server assigned
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum MessageId {
    Server(i64),
    Temporary(Uuid),
}

impl MessageId {
    pub fn temporary() -> Self {
        MessageId::Temporary(Uuid::new_v4())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, MessageId::Temporary(_))
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    // The server stores assistant replies as "ai"
    #[serde(alias = "ai")]
    Assistant,
}

// A single message as displayed in the conversation view
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(id: MessageId, content: String) -> Self {
        Self {
            id,
            content,
            sender: Sender::User,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(id: MessageId, content: String) -> Self {
        Self {
            id,
            content,
            sender: Sender::Assistant,
            timestamp: Utc::now(),
        }
    }
}

// Server-confirmed message record carried by `meta` and `done` events
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct ServerMessage {
    pub id: i64,
    #[serde(default)]
    pub content: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

// Conversation metadata, owned by the server
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

// Body of POST /api/chat
#[derive(Serialize, Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
}

#[derive(Deserialize, Debug)]
pub struct ConversationsEnvelope {
    pub conversations: Vec<Conversation>,
}

#[derive(Deserialize, Debug)]
pub struct MessagesEnvelope {
    pub messages: Vec<HistoryMessage>,
}

#[derive(Deserialize, Debug)]
pub struct HistoryMessage {
    pub id: i64,
    pub content: String,
    pub sender: Sender,
    #[serde(deserialize_with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl From<HistoryMessage> for Message {
    fn from(msg: HistoryMessage) -> Self {
        Self {
            id: MessageId::Server(msg.id),
            content: msg.content,
            sender: msg.sender,
            timestamp: msg.timestamp,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct MeEnvelope {
    pub user: Option<User>,
}

/// Accepts RFC 3339 timestamps as well as naive ISO-8601 ones, which the
/// backend emits for UTC times without an offset.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_naive_and_offset_timestamps() {
        let naive = parse_timestamp("2024-05-01T10:20:30.123456").unwrap();
        assert_eq!(naive.hour(), 10);
        let offset = parse_timestamp("2024-05-01T12:20:30+02:00").unwrap();
        assert_eq!(offset.hour(), 10);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn history_message_maps_ai_sender() {
        let raw = r#"{"messages":[{"id":3,"content":"hi","sender":"ai","timestamp":"2024-05-01T10:20:30"}]}"#;
        let envelope: MessagesEnvelope = serde_json::from_str(raw).unwrap();
        let msg: Message = envelope.messages.into_iter().next().unwrap().into();
        assert_eq!(msg.id, MessageId::Server(3));
        assert_eq!(msg.sender, Sender::Assistant);
    }

    #[test]
    fn chat_request_omits_missing_conversation() {
        let body = serde_json::to_value(ChatRequest {
            message: "hello".to_string(),
            conversation_id: None,
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "message": "hello" }));
    }

    #[test]
    fn temporary_ids_never_equal_server_ids() {
        let temp = MessageId::temporary();
        assert!(temp.is_temporary());
        assert_ne!(temp, MessageId::Server(42));
    }
}
