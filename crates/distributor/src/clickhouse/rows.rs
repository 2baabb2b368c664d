use chrono::{DateTime, Utc};
use clickhouse::Row;
use common::domain::{CommandResponseRecord, EventRecord, FileRecord, GenericRecord, SensorPoint};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct SensorDataRow {
    pub device_id: String,
    pub tenant_id: String,
    pub data_type: String,
    pub field: String,
    pub value: f64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<&SensorPoint> for SensorDataRow {
    fn from(point: &SensorPoint) -> Self {
        Self {
            device_id: point.device_id.clone(),
            tenant_id: point.tenant_id.clone().unwrap_or_default(),
            data_type: point.data_type.clone(),
            field: point.field.clone(),
            value: point.value,
            timestamp: point.timestamp,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct FileMetadataRow {
    pub device_id: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: u64,
    pub file_path: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<&FileRecord> for FileMetadataRow {
    fn from(record: &FileRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            filename: record.filename.clone(),
            content_type: record.content_type.clone(),
            file_size: record.byte_length,
            file_path: record.storage_path.clone(),
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct EventRow {
    pub device_id: String,
    pub event_type: String,
    pub severity: String,
    pub message: String,
    pub count: u32,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<&EventRecord> for EventRow {
    fn from(record: &EventRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            event_type: record.event_type.clone(),
            severity: record.severity.clone(),
            message: record.message.clone(),
            count: record.count,
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct CommandResponseRow {
    pub device_id: String,
    pub command_id: String,
    pub status: String,
    pub result: String,
    pub response_time_ms: i64,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<&CommandResponseRecord> for CommandResponseRow {
    fn from(record: &CommandResponseRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            command_id: record.command_id.clone(),
            status: record.status.clone(),
            result: record.result.clone(),
            response_time_ms: record.response_time_ms,
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, Row, Serialize, Deserialize)]
pub struct GenericDataRow {
    pub device_id: String,
    pub data_type: String,
    pub raw_data: String,
    #[serde(with = "clickhouse::serde::chrono::datetime64::millis")]
    pub timestamp: DateTime<Utc>,
}

impl From<&GenericRecord> for GenericDataRow {
    fn from(record: &GenericRecord) -> Self {
        Self {
            device_id: record.device_id.clone(),
            data_type: record.data_type.clone(),
            raw_data: record.raw_payload.clone(),
            timestamp: record.timestamp,
        }
    }
}
