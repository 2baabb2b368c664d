use chrono::{DateTime, Utc};

/// One numeric reading from a time-series message.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPoint {
    pub device_id: String,
    pub tenant_id: Option<String>,
    pub data_type: String,
    pub field: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

/// Metadata of a file persisted by the file sink.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub device_id: String,
    pub filename: String,
    pub content_type: String,
    pub byte_length: u64,
    pub storage_path: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub device_id: String,
    pub event_type: String,
    pub severity: String,
    pub message: String,
    pub count: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponseRecord {
    pub device_id: String,
    pub command_id: String,
    pub status: String,
    pub result: String,
    pub response_time_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Catch-all record holding the raw payload as an opaque JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericRecord {
    pub device_id: String,
    pub data_type: String,
    pub raw_payload: String,
    pub timestamp: DateTime<Utc>,
}
