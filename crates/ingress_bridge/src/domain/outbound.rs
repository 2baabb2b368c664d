use chrono::{DateTime, Utc};
use common::domain::format_timestamp;
use serde::Serialize;
use serde_json::Value;

/// Messages the bridge sends to a device, serialized as
/// `{"type": "...", ...}` JSON text frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Welcome { connection_id: u64, timestamp: String },
    #[serde(rename_all = "camelCase")]
    Ack {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<Value>,
        topic: String,
        timestamp: String,
    },
    Error { error: String },
    Ping { timestamp: String },
    Command { payload: Value },
}

impl ServerMessage {
    pub fn welcome(connection_id: u64, now: DateTime<Utc>) -> Self {
        Self::Welcome {
            connection_id,
            timestamp: format_timestamp(&now),
        }
    }

    pub fn ack(message_id: Option<Value>, topic: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self::Ack {
            message_id,
            topic: topic.into(),
            timestamp: format_timestamp(&now),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    pub fn ping(now: DateTime<Utc>) -> Self {
        Self::Ping {
            timestamp: format_timestamp(&now),
        }
    }

    pub fn command(payload: Value) -> Self {
        Self::Command { payload }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Welcome { .. } => "welcome",
            Self::Ack { .. } => "ack",
            Self::Error { .. } => "error",
            Self::Ping { .. } => "ping",
            Self::Command { .. } => "command",
        }
    }
}

/// WebSocket close code 1001, "going away".
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// One item on a connection's outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// Send a close frame and stop writing.
    Close { code: u16, reason: String },
}

impl Outbound {
    pub fn shutdown() -> Self {
        Self::Close {
            code: CLOSE_GOING_AWAY,
            reason: "Server shutdown".to_string(),
        }
    }
}

impl From<ServerMessage> for Outbound {
    fn from(message: ServerMessage) -> Self {
        Self::Message(message)
    }
}
