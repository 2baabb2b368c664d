use chrono::{DateTime, Utc};
use common::domain::{parse_timestamp, DomainError, DomainResult, Topic, ValidationError};
use serde_json::{Map, Value};

/// A broker message as the distributor sees it: addressing from the topic,
/// everything else from the decoded body.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMessage {
    pub topic: Topic,
    pub device_id: String,
    pub tenant_id: Option<String>,
    pub data_type: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub payload: Map<String, Value>,
}

impl DeviceMessage {
    /// Decode a broker message body. When the body has no `payload` object
    /// the whole body is treated as the payload.
    pub fn decode(topic: Topic, raw: &[u8]) -> DomainResult<Self> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| DomainError::Validation(ValidationError::MalformedEncoding(e.to_string())))?;

        let Value::Object(body) = value else {
            return Err(DomainError::Validation(ValidationError::NotAnObject));
        };

        let tenant_id = topic.tenant_id().map(str::to_string).or_else(|| {
            body.get("tenantId")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        let data_type = body
            .get("dataType")
            .and_then(Value::as_str)
            .map(str::to_string);
        let timestamp = body.get("timestamp").and_then(parse_timestamp);
        let payload = match body.get("payload") {
            Some(Value::Object(payload)) => payload.clone(),
            _ => body,
        };

        Ok(Self {
            device_id: topic.device_id.clone(),
            topic,
            tenant_id,
            data_type,
            timestamp,
            payload,
        })
    }

    /// Timestamp for a sink record: the record's own timestamp if it parses,
    /// then the message timestamp, then now.
    pub fn record_time(&self, own: Option<&Value>) -> DateTime<Utc> {
        own.and_then(parse_timestamp)
            .or(self.timestamp)
            .unwrap_or_else(Utc::now)
    }

    /// A payload field rendered as text, or `default` when absent, null,
    /// empty or false.
    pub fn text_field(&self, key: &str, default: &str) -> String {
        match self.payload.get(key) {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(true)) => "true".to_string(),
            Some(value @ (Value::Array(_) | Value::Object(_))) => value.to_string(),
            _ => default.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::domain::Category;
    use serde_json::json;

    fn decode(topic: &str, body: Value) -> DeviceMessage {
        DeviceMessage::decode(Topic::parse(topic).unwrap(), body.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn test_decode_bridge_message() {
        let msg = decode(
            "sensors/d1/data",
            json!({
                "deviceId": "d1",
                "dataType": "auto-detected",
                "timestamp": "2024-05-01T12:00:00.000Z",
                "payload": {"temp": 22.4}
            }),
        );

        assert_eq!(msg.device_id, "d1");
        assert_eq!(msg.topic.category, Category::TimeSeries);
        assert_eq!(msg.data_type.as_deref(), Some("auto-detected"));
        assert_eq!(msg.timestamp, Some(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
        assert_eq!(msg.payload.get("temp"), Some(&json!(22.4)));
        assert_eq!(msg.tenant_id, None);
    }

    #[test]
    fn test_device_and_tenant_come_from_topic() {
        let msg = decode(
            "tenants/acme/devices/d9/events/data",
            json!({"deviceId": "spoofed", "payload": {"eventType": "alarm"}}),
        );
        assert_eq!(msg.device_id, "d9");
        assert_eq!(msg.tenant_id.as_deref(), Some("acme"));
    }

    #[test]
    fn test_body_without_payload_is_payload() {
        let msg = decode("sensors/d1/data", json!({"temp": 1, "humidity": 40}));
        assert_eq!(msg.payload.len(), 2);
        assert_eq!(msg.data_type, None);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let topic = Topic::parse("sensors/d1/data").unwrap();
        assert!(matches!(
            DeviceMessage::decode(topic.clone(), b"not json"),
            Err(DomainError::Validation(ValidationError::MalformedEncoding(_)))
        ));
        assert!(matches!(
            DeviceMessage::decode(topic, b"[1]"),
            Err(DomainError::Validation(ValidationError::NotAnObject))
        ));
    }

    #[test]
    fn test_record_time_precedence() {
        let envelope_ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut msg = decode("events/d1/data", json!({"payload": {}}));
        msg.timestamp = Some(envelope_ts);

        let own = json!("2024-02-02T00:00:00Z");
        assert_eq!(
            msg.record_time(Some(&own)),
            Utc.with_ymd_and_hms(2024, 2, 2, 0, 0, 0).unwrap()
        );
        assert_eq!(msg.record_time(Some(&json!("garbage"))), envelope_ts);
        assert_eq!(msg.record_time(None), envelope_ts);
    }

    #[test]
    fn test_text_field_defaults() {
        let msg = decode(
            "events/d1/data",
            json!({"payload": {"eventType": "door", "severity": "", "code": 42, "flag": false}}),
        );
        assert_eq!(msg.text_field("eventType", "unknown"), "door");
        assert_eq!(msg.text_field("severity", "info"), "info");
        assert_eq!(msg.text_field("code", "none"), "42");
        assert_eq!(msg.text_field("flag", "none"), "none");
        assert_eq!(msg.text_field("missing", "unknown"), "unknown");
    }
}
