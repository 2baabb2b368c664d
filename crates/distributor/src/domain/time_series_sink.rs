use crate::domain::{DeviceMessage, SinkOutcome, TelemetryStore, STORE_NOT_CONFIGURED};
use common::domain::{numeric_fields, Category, DomainResult, SensorPoint, AUTO_DETECTED};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes one point per numeric payload field.
#[derive(Clone)]
pub struct TimeSeriesSink {
    store: Option<Arc<dyn TelemetryStore>>,
}

impl TimeSeriesSink {
    pub fn new(store: Option<Arc<dyn TelemetryStore>>) -> Self {
        Self { store }
    }

    pub fn points(message: &DeviceMessage) -> Vec<SensorPoint> {
        let data_type = match message.data_type.as_deref() {
            None | Some(AUTO_DETECTED) => Category::TimeSeries.as_str().to_string(),
            Some(declared) => declared.to_string(),
        };
        let timestamp = message.record_time(message.payload.get("timestamp"));

        numeric_fields(&message.payload)
            .into_iter()
            .map(|(field, value)| SensorPoint {
                device_id: message.device_id.clone(),
                tenant_id: message.tenant_id.clone(),
                data_type: data_type.clone(),
                field,
                value,
                timestamp,
            })
            .collect()
    }

    pub async fn write(&self, message: &DeviceMessage) -> DomainResult<SinkOutcome> {
        let points = Self::points(message);
        if points.is_empty() {
            debug!(device_id = %message.device_id, "no numeric fields, nothing to write");
            return Ok(SinkOutcome::skipped("no numeric fields"));
        }

        let Some(store) = &self.store else {
            warn!(device_id = %message.device_id, "no time-series store configured, skipping sensor data");
            return Ok(SinkOutcome::skipped(STORE_NOT_CONFIGURED));
        };

        let count = points.len();
        store.write_sensor_points(points).await?;
        debug!(device_id = %message.device_id, points = count, "wrote sensor points");
        Ok(SinkOutcome::Written(count))
    }
}
