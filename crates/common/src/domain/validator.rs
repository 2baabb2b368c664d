use crate::domain::{is_valid_topic_segment, parse_timestamp, Category, Envelope};
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Default cap on the serialized size of one inbound message (10 MiB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 10 * 1024 * 1024;

/// Why an inbound message was rejected. The display text is what the
/// device receives in its `error` message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Message too large")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format")]
    MalformedEncoding(String),

    #[error("Invalid message format")]
    NotAnObject,

    #[error("Invalid payload format")]
    PayloadNotAnObject,

    #[error("Missing or invalid deviceId")]
    MissingDeviceId,

    #[error("Missing or invalid deviceId")]
    InvalidDeviceId(String),

    #[error("Invalid tenantId")]
    InvalidTenantId,
}

impl ValidationError {
    /// Stable identifier of the failure kind, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::MalformedEncoding(_) => "malformed_encoding",
            Self::NotAnObject => "not_an_object",
            Self::PayloadNotAnObject => "payload_not_an_object",
            Self::MissingDeviceId => "missing_device_id",
            Self::InvalidDeviceId(_) => "invalid_device_id",
            Self::InvalidTenantId => "invalid_tenant_id",
        }
    }
}

/// Turns raw inbound bytes into an [`Envelope`].
#[derive(Debug, Clone)]
pub struct MessageValidator {
    max_message_bytes: usize,
}

impl Default for MessageValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_BYTES)
    }
}

impl MessageValidator {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Validate one raw message received at `received_at`.
    ///
    /// The size cap is checked before decoding so oversized input is never
    /// parsed. An unrecognised `dataType` is logged and kept; the classifier
    /// falls back to content detection for it.
    pub fn validate(&self, raw: &[u8], received_at: DateTime<Utc>) -> Result<Envelope, ValidationError> {
        if raw.len() > self.max_message_bytes {
            return Err(ValidationError::MessageTooLarge {
                size: raw.len(),
                max: self.max_message_bytes,
            });
        }

        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| ValidationError::MalformedEncoding(e.to_string()))?;

        let Value::Object(mut body) = value else {
            return Err(ValidationError::NotAnObject);
        };

        let device_id = match body.get("deviceId") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            _ => return Err(ValidationError::MissingDeviceId),
        };
        if !is_valid_topic_segment(&device_id) {
            return Err(ValidationError::InvalidDeviceId(device_id));
        }

        let tenant_id = match body.get("tenantId") {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) if is_valid_topic_segment(id) => Some(id.clone()),
            Some(_) => return Err(ValidationError::InvalidTenantId),
        };

        let declared_type = match body.get("dataType") {
            None | Some(Value::Null) => None,
            Some(Value::String(data_type)) => {
                if data_type.parse::<Category>().is_err() {
                    warn!(
                        device_id = %device_id,
                        data_type = %data_type,
                        "unknown data type, will auto-detect"
                    );
                }
                Some(data_type.clone())
            }
            Some(other) => {
                warn!(
                    device_id = %device_id,
                    data_type = %other,
                    "non-string data type ignored, will auto-detect"
                );
                None
            }
        };

        let timestamp = match body.get("timestamp") {
            None | Some(Value::Null) => received_at,
            Some(raw_ts) => parse_timestamp(raw_ts).unwrap_or_else(|| {
                warn!(
                    device_id = %device_id,
                    timestamp = %raw_ts,
                    "unparseable timestamp, using receipt time"
                );
                received_at
            }),
        };

        let message_id = body.get("messageId").filter(|id| !id.is_null()).cloned();

        let payload = match body.remove("payload") {
            Some(Value::Object(payload)) => payload,
            None | Some(Value::Null) => body,
            Some(_) => return Err(ValidationError::PayloadNotAnObject),
        };

        Ok(Envelope {
            device_id,
            declared_type,
            timestamp,
            payload,
            message_id,
            tenant_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn validate(value: serde_json::Value) -> Result<Envelope, ValidationError> {
        MessageValidator::default().validate(value.to_string().as_bytes(), now())
    }

    #[test]
    fn test_accepts_minimal_message() {
        let envelope = validate(json!({"deviceId": "d1", "payload": {"temp": 22.4}})).unwrap();
        assert_eq!(envelope.device_id, "d1");
        assert_eq!(envelope.payload["temp"], json!(22.4));
        assert_eq!(envelope.timestamp, now());
        assert!(envelope.declared_type.is_none());
        assert!(envelope.tenant_id.is_none());
    }

    #[test]
    fn test_rejects_malformed_encoding() {
        let result = MessageValidator::default().validate(b"{not json", now());
        assert!(matches!(result, Err(ValidationError::MalformedEncoding(_))));
    }

    #[test]
    fn test_rejects_non_object_body() {
        assert_eq!(validate(json!([1, 2, 3])), Err(ValidationError::NotAnObject));
        assert_eq!(validate(json!("d1")), Err(ValidationError::NotAnObject));
        assert_eq!(validate(json!(null)), Err(ValidationError::NotAnObject));
    }

    #[test]
    fn test_rejects_missing_device_id() {
        assert_eq!(
            validate(json!({"payload": {"temp": 1}})),
            Err(ValidationError::MissingDeviceId)
        );
        assert_eq!(
            validate(json!({"deviceId": 42, "payload": {}})),
            Err(ValidationError::MissingDeviceId)
        );
        assert_eq!(
            validate(json!({"deviceId": "", "payload": {}})),
            Err(ValidationError::MissingDeviceId)
        );
    }

    #[test]
    fn test_rejects_device_id_with_topic_characters() {
        let result = validate(json!({"deviceId": "d1/../x", "payload": {}}));
        assert!(matches!(result, Err(ValidationError::InvalidDeviceId(_))));
    }

    #[test]
    fn test_rejects_oversized_message() {
        let validator = MessageValidator::new(64);
        let body = json!({"deviceId": "d1", "payload": {"blob": "x".repeat(100)}}).to_string();
        let result = validator.validate(body.as_bytes(), now());
        assert!(matches!(
            result,
            Err(ValidationError::MessageTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_size_limit_is_inclusive() {
        let body = json!({"deviceId": "d1"}).to_string();
        let validator = MessageValidator::new(body.len());
        assert!(validator.validate(body.as_bytes(), now()).is_ok());
    }

    #[test]
    fn test_accepts_unknown_data_type() {
        let envelope =
            validate(json!({"deviceId": "d1", "dataType": "telemetry", "payload": {"a": "b"}}))
                .unwrap();
        assert_eq!(envelope.declared_type.as_deref(), Some("telemetry"));
        assert_eq!(envelope.declared_category(), None);
    }

    #[test]
    fn test_rejects_non_object_payload() {
        assert_eq!(
            validate(json!({"deviceId": "d1", "payload": [1, 2]})),
            Err(ValidationError::PayloadNotAnObject)
        );
    }

    #[test]
    fn test_missing_payload_uses_whole_body() {
        let envelope = validate(json!({"deviceId": "d1", "temp": 21.0})).unwrap();
        assert_eq!(envelope.payload["temp"], json!(21.0));
        assert_eq!(envelope.payload["deviceId"], json!("d1"));
    }

    #[test]
    fn test_reads_optional_fields() {
        let envelope = validate(json!({
            "deviceId": "d1",
            "tenantId": "acme",
            "messageId": 17,
            "timestamp": "2024-01-02T03:04:05Z",
            "payload": {}
        }))
        .unwrap();
        assert_eq!(envelope.tenant_id.as_deref(), Some("acme"));
        assert_eq!(envelope.message_id, Some(json!(17)));
        assert_eq!(
            envelope.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
        );
    }

    #[test]
    fn test_bad_timestamp_falls_back_to_receipt_time() {
        let envelope =
            validate(json!({"deviceId": "d1", "timestamp": "soon", "payload": {}})).unwrap();
        assert_eq!(envelope.timestamp, now());
    }

    #[test]
    fn test_rejects_invalid_tenant() {
        assert_eq!(
            validate(json!({"deviceId": "d1", "tenantId": "a/b", "payload": {}})),
            Err(ValidationError::InvalidTenantId)
        );
        assert_eq!(
            validate(json!({"deviceId": "d1", "tenantId": 5, "payload": {}})),
            Err(ValidationError::InvalidTenantId)
        );
    }

    #[test]
    fn test_error_display_is_device_facing() {
        assert_eq!(ValidationError::MissingDeviceId.to_string(), "Missing or invalid deviceId");
        assert_eq!(
            ValidationError::MessageTooLarge { size: 2, max: 1 }.to_string(),
            "Message too large"
        );
        assert_eq!(ValidationError::NotAnObject.kind(), "not_an_object");
    }
}
