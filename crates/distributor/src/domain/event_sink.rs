use crate::domain::{DeviceMessage, SinkOutcome, TelemetryStore, STORE_NOT_CONFIGURED};
use common::domain::{DomainResult, EventRecord};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct EventSink {
    store: Option<Arc<dyn TelemetryStore>>,
}

impl EventSink {
    pub fn new(store: Option<Arc<dyn TelemetryStore>>) -> Self {
        Self { store }
    }

    pub fn record(message: &DeviceMessage) -> EventRecord {
        EventRecord {
            device_id: message.device_id.clone(),
            event_type: message.text_field("eventType", "unknown"),
            severity: message.text_field("severity", "info"),
            message: message.text_field("message", ""),
            count: 1,
            timestamp: message.record_time(message.payload.get("timestamp")),
        }
    }

    pub async fn write(&self, message: &DeviceMessage) -> DomainResult<SinkOutcome> {
        let Some(store) = &self.store else {
            warn!(device_id = %message.device_id, "no time-series store configured, skipping event");
            return Ok(SinkOutcome::skipped(STORE_NOT_CONFIGURED));
        };

        let record = Self::record(message);
        info!(
            device_id = %record.device_id,
            event_type = %record.event_type,
            severity = %record.severity,
            "storing event"
        );
        store.write_event(record).await?;
        Ok(SinkOutcome::Written(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::MockTelemetryStore;
    use chrono::{TimeZone, Utc};
    use common::domain::Topic;
    use serde_json::json;

    fn message(payload: serde_json::Value) -> DeviceMessage {
        DeviceMessage::decode(
            Topic::parse("events/door-1/data").unwrap(),
            json!({ "payload": payload }).to_string().as_bytes(),
        )
        .unwrap()
    }

    #[test]
    fn test_record_defaults() {
        let record = EventSink::record(&message(json!({})));
        assert_eq!(record.device_id, "door-1");
        assert_eq!(record.event_type, "unknown");
        assert_eq!(record.severity, "info");
        assert_eq!(record.message, "");
        assert_eq!(record.count, 1);
    }

    #[tokio::test]
    async fn test_writes_one_event() {
        let mut store = MockTelemetryStore::new();
        store
            .expect_write_event()
            .withf(|record| {
                record.event_type == "door_open"
                    && record.severity == "warning"
                    && record.message == "front door"
                    && record.timestamp == Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
            })
            .times(1)
            .returning(|_| Ok(()));

        let sink = EventSink::new(Some(Arc::new(store)));
        let outcome = sink
            .write(&message(json!({
                "eventType": "door_open",
                "severity": "warning",
                "message": "front door",
                "timestamp": "2024-03-01T08:00:00Z"
            })))
            .await
            .unwrap();
        assert_eq!(outcome, SinkOutcome::Written(1));
    }

    #[tokio::test]
    async fn test_missing_store_is_noop() {
        let outcome = EventSink::new(None)
            .write(&message(json!({"eventType": "x"})))
            .await
            .unwrap();
        assert!(matches!(outcome, SinkOutcome::Skipped(_)));
    }
}
