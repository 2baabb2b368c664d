use crate::domain::{DeviceMessage, SinkOutcome, TelemetryStore, TimeSeriesSink, STORE_NOT_CONFIGURED};
use common::domain::{has_numeric_field, DomainError, DomainResult, GenericRecord};
use std::sync::Arc;
use tracing::{info, warn};

/// Fallback for messages no other sink claims. Numeric payloads still go to
/// the time-series sink; anything else is kept as an opaque JSON string.
#[derive(Clone)]
pub struct GenericSink {
    time_series: TimeSeriesSink,
    store: Option<Arc<dyn TelemetryStore>>,
}

impl GenericSink {
    pub fn new(time_series: TimeSeriesSink, store: Option<Arc<dyn TelemetryStore>>) -> Self {
        Self { time_series, store }
    }

    pub async fn write(&self, message: &DeviceMessage) -> DomainResult<SinkOutcome> {
        if has_numeric_field(&message.payload) {
            info!(device_id = %message.device_id, "treating unclassified message as time-series data");
            return self.time_series.write(message).await;
        }

        let Some(store) = &self.store else {
            warn!(device_id = %message.device_id, "no time-series store configured, skipping generic data");
            return Ok(SinkOutcome::skipped(STORE_NOT_CONFIGURED));
        };

        let raw_payload = serde_json::to_string(&message.payload)
            .map_err(|e| DomainError::SinkWrite(format!("failed to encode payload: {}", e)))?;

        store
            .write_generic(GenericRecord {
                device_id: message.device_id.clone(),
                data_type: message
                    .data_type
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                raw_payload,
                timestamp: message.record_time(message.payload.get("timestamp")),
            })
            .await?;

        info!(device_id = %message.device_id, "stored generic data");
        Ok(SinkOutcome::Written(1))
    }
}
