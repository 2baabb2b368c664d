use crate::domain::{Category, Envelope, QosLevel, Topic, TopicScope};
use serde_json::{Map, Value};

/// Outcome of classifying one envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub category: Category,
    pub topic: Topic,
    pub qos: QosLevel,
    /// True when the category came from content detection rather than a
    /// declared `dataType`.
    pub auto_detected: bool,
}

/// One content-detection rule: if `matches` holds for the payload, the
/// message belongs to `category`.
pub struct DetectionRule {
    pub name: &'static str,
    pub category: Category,
    pub matches: fn(&Map<String, Value>) -> bool,
}

/// Content-detection rules, in priority order. The first rule that matches
/// wins, so a payload carrying both a numeric reading and an `eventType`
/// is time-series data.
pub const DETECTION_RULES: [DetectionRule; 4] = [
    DetectionRule {
        name: "numeric_field",
        category: Category::TimeSeries,
        matches: has_numeric_field,
    },
    DetectionRule {
        name: "file_blob",
        category: Category::File,
        matches: looks_like_file,
    },
    DetectionRule {
        name: "event_marker",
        category: Category::Event,
        matches: looks_like_event,
    },
    DetectionRule {
        name: "command_response",
        category: Category::Response,
        matches: looks_like_response,
    },
];

/// Category used when no rule matches.
pub const FALLBACK_CATEGORY: Category = Category::TimeSeries;

const TIMESTAMP_FIELD: &str = "timestamp";

/// Map an envelope to its category, topic and QoS.
pub fn classify(envelope: &Envelope) -> Classification {
    let (category, auto_detected) = match envelope.declared_category() {
        Some(category) => (category, false),
        None => (detect_category(&envelope.payload), true),
    };

    let scope = match &envelope.tenant_id {
        Some(tenant_id) => TopicScope::Tenant(tenant_id.clone()),
        None => TopicScope::Legacy,
    };

    Classification {
        category,
        topic: Topic::new(scope, envelope.device_id.clone(), category),
        qos: category.qos(),
        auto_detected,
    }
}

/// Run the detection rules against a payload.
pub fn detect_category(payload: &Map<String, Value>) -> Category {
    DETECTION_RULES
        .iter()
        .find(|rule| (rule.matches)(payload))
        .map(|rule| rule.category)
        .unwrap_or(FALLBACK_CATEGORY)
}

/// Numeric payload fields, excluding the timestamp, in payload order.
pub fn numeric_fields(payload: &Map<String, Value>) -> Vec<(String, f64)> {
    payload
        .iter()
        .filter(|(key, _)| key.as_str() != TIMESTAMP_FIELD)
        .filter_map(|(key, value)| value.as_f64().map(|v| (key.clone(), v)))
        .collect()
}

pub fn has_numeric_field(payload: &Map<String, Value>) -> bool {
    payload
        .iter()
        .any(|(key, value)| key.as_str() != TIMESTAMP_FIELD && value.is_number())
}

fn looks_like_file(payload: &Map<String, Value>) -> bool {
    is_set(payload, "data") && is_set(payload, "filename")
}

fn looks_like_event(payload: &Map<String, Value>) -> bool {
    is_set(payload, "eventType") || is_set(payload, "severity")
}

fn looks_like_response(payload: &Map<String, Value>) -> bool {
    is_set(payload, "commandId") && is_set(payload, "status")
}

/// A field counts as set when it is present and not empty-ish
/// (null, false, zero, empty string).
fn is_set(payload: &Map<String, Value>, key: &str) -> bool {
    match payload.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn envelope(declared: Option<&str>, payload: Value) -> Envelope {
        Envelope {
            device_id: "d1".to_string(),
            declared_type: declared.map(str::to_string),
            timestamp: Utc::now(),
            payload: payload.as_object().cloned().unwrap_or_default(),
            message_id: None,
            tenant_id: None,
        }
    }

    #[test]
    fn test_declared_categories_map_to_fixed_templates() {
        let cases = [
            ("timeseries", "sensors/d1/data", 1),
            ("file", "files/d1/data", 2),
            ("event", "events/d1/data", 1),
            ("response", "commands/d1/response", 1),
            ("command", "commands/d1/request", 1),
        ];
        for (declared, topic, qos) in cases {
            // Payload content must not override a declared category.
            let result = classify(&envelope(Some(declared), json!({"eventType": "x", "v": 1})));
            assert_eq!(result.topic.to_string(), topic, "declared {}", declared);
            assert_eq!(result.qos.level(), qos, "declared {}", declared);
            assert!(!result.auto_detected);
        }
    }

    #[test]
    fn test_numeric_wins_over_event_marker() {
        let result = classify(&envelope(None, json!({"temp": 21.5, "eventType": "alarm"})));
        assert_eq!(result.category, Category::TimeSeries);
        assert_eq!(result.topic.to_string(), "sensors/d1/data");
        assert!(result.auto_detected);
    }

    #[test]
    fn test_detects_file() {
        let result = classify(&envelope(None, json!({"filename": "a.bin", "data": "AAEC"})));
        assert_eq!(result.category, Category::File);
        assert_eq!(result.qos, QosLevel::ExactlyOnce);
    }

    #[test]
    fn test_detects_event() {
        assert_eq!(
            detect_category(json!({"severity": "high"}).as_object().unwrap()),
            Category::Event
        );
        assert_eq!(
            detect_category(json!({"eventType": "door_open"}).as_object().unwrap()),
            Category::Event
        );
    }

    #[test]
    fn test_detects_response() {
        let payload = json!({"commandId": "c-1", "status": "ok"});
        assert_eq!(detect_category(payload.as_object().unwrap()), Category::Response);
    }

    #[test]
    fn test_partial_markers_fall_through() {
        let payload = json!({"commandId": "c-1", "filename": "a.bin"});
        assert_eq!(detect_category(payload.as_object().unwrap()), FALLBACK_CATEGORY);
        let payload = json!({"eventType": ""});
        assert_eq!(detect_category(payload.as_object().unwrap()), FALLBACK_CATEGORY);
    }

    #[test]
    fn test_numeric_timestamp_is_not_a_reading() {
        let payload = json!({"timestamp": 1714564800000_i64, "severity": "low"});
        assert_eq!(detect_category(payload.as_object().unwrap()), Category::Event);
    }

    #[test]
    fn test_unknown_declared_type_auto_detects() {
        let result = classify(&envelope(Some("bogus"), json!({"status": "ok", "commandId": "7"})));
        assert_eq!(result.category, Category::Response);
        assert!(result.auto_detected);
    }

    #[test]
    fn test_tenant_scope() {
        let mut env = envelope(None, json!({"temp": 1}));
        env.tenant_id = Some("acme".to_string());
        let result = classify(&env);
        assert_eq!(result.topic.to_string(), "tenants/acme/devices/d1/sensors/data");
    }

    #[test]
    fn test_numeric_fields_skip_timestamp_and_strings() {
        let payload = json!({"temp": 22.4, "timestamp": 5, "unit": "C", "rssi": -70});
        let fields = numeric_fields(payload.as_object().unwrap());
        assert_eq!(fields.len(), 2);
        assert!(fields.contains(&("temp".to_string(), 22.4)));
        assert!(fields.contains(&("rssi".to_string(), -70.0)));
    }

    #[test]
    fn test_rule_order_is_explicit() {
        let names: Vec<&str> = DETECTION_RULES.iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec!["numeric_field", "file_blob", "event_marker", "command_response"]
        );
    }
}
