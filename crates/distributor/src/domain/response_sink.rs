use crate::domain::{DeviceMessage, SinkOutcome, TelemetryStore, STORE_NOT_CONFIGURED};
use common::domain::{CommandResponseRecord, DomainResult};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Persists device replies to commands.
#[derive(Clone)]
pub struct ResponseSink {
    store: Option<Arc<dyn TelemetryStore>>,
}

impl ResponseSink {
    pub fn new(store: Option<Arc<dyn TelemetryStore>>) -> Self {
        Self { store }
    }

    pub fn record(message: &DeviceMessage) -> CommandResponseRecord {
        let response_time_ms = match message.payload.get("responseTime") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|v| v.round() as i64))
                .unwrap_or(0),
            _ => 0,
        };

        CommandResponseRecord {
            device_id: message.device_id.clone(),
            command_id: message.text_field("commandId", "unknown"),
            status: message.text_field("status", "unknown"),
            result: message.text_field("result", ""),
            response_time_ms,
            timestamp: message.record_time(message.payload.get("timestamp")),
        }
    }

    pub async fn write(&self, message: &DeviceMessage) -> DomainResult<SinkOutcome> {
        let Some(store) = &self.store else {
            warn!(device_id = %message.device_id, "no time-series store configured, skipping command response");
            return Ok(SinkOutcome::skipped(STORE_NOT_CONFIGURED));
        };

        let record = Self::record(message);
        info!(
            device_id = %record.device_id,
            command_id = %record.command_id,
            status = %record.status,
            "storing command response"
        );
        store.write_command_response(record).await?;
        Ok(SinkOutcome::Written(1))
    }
}
