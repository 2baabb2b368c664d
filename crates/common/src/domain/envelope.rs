use crate::domain::Category;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Validated, in-flight representation of one device message.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub device_id: String,
    /// The `dataType` the device declared, verbatim. May name an unknown type.
    pub declared_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: Map<String, Value>,
    /// Echoed back in the ack exactly as the device sent it.
    pub message_id: Option<Value>,
    pub tenant_id: Option<String>,
}

impl Envelope {
    /// The declared type when it names a known category.
    pub fn declared_category(&self) -> Option<Category> {
        self.declared_type
            .as_deref()
            .and_then(|data_type| data_type.parse().ok())
    }
}

/// Where a broker message entered the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub source: String,
    pub bridge_id: String,
    pub connection_id: u64,
    pub client_ip: String,
}

/// Wire shape of a device message on the broker, shared by the bridge
/// (which publishes it) and the distributor (which consumes it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerEnvelope {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Value>,
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Provenance>,
}

pub const AUTO_DETECTED: &str = "auto-detected";

impl BrokerEnvelope {
    pub fn from_envelope(envelope: &Envelope, provenance: Provenance) -> Self {
        Self {
            device_id: envelope.device_id.clone(),
            tenant_id: envelope.tenant_id.clone(),
            data_type: Some(
                envelope
                    .declared_type
                    .clone()
                    .unwrap_or_else(|| AUTO_DETECTED.to_string()),
            ),
            timestamp: Some(format_timestamp(&envelope.timestamp)),
            message_id: envelope.message_id.clone(),
            payload: Some(Value::Object(envelope.payload.clone())),
            metadata: Some(provenance),
        }
    }
}

/// RFC 3339 with millisecond precision, the timestamp format on every wire.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Lenient timestamp read: RFC 3339 strings or epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
