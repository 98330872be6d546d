//! Inbound image-event payload decoding.
//!
//! The image service publishes through Kafka-style plumbing, so a payload may
//! arrive as an envelope wrapping the body under `value`, as raw bytes, as a
//! JSON string or as an already decoded object. Decoding tries those shapes
//! in order and rejects anything that does not end in an object with a
//! structured `data` field.

use serde_json::{Map, Value};

/// A raw broker payload before decoding.
#[derive(Clone, Debug)]
pub enum EventPayload {
    Bytes(Vec<u8>),
    Value(Value),
}

/// A decoded event: the type discriminator plus its `data` object.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageEventEnvelope {
    pub event_type: Option<String>,
    pub data: Map<String, Value>,
}

/// Decode a broker payload into an event envelope.
///
/// Returns `None` for anything malformed; the caller decides how to log.
pub fn parse_payload(payload: EventPayload) -> Option<ImageEventEnvelope> {
    let source = match payload {
        EventPayload::Bytes(bytes) => {
            let text = String::from_utf8(bytes).ok()?;
            serde_json::from_str(&text).ok()?
        }
        EventPayload::Value(value) => unwrap_envelope(value),
    };
    into_envelope(source)
}

/// Transports may hand over the body wrapped under a `value` key.
/// Only one level is unwrapped; the inner value may itself be a JSON string.
fn unwrap_envelope(value: Value) -> Value {
    match value {
        Value::Object(mut object) if object.contains_key("value") => {
            object.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn into_envelope(source: Value) -> Option<ImageEventEnvelope> {
    let decoded = match source {
        Value::String(text) => serde_json::from_str(&text).ok()?,
        other => other,
    };

    let mut object = match decoded {
        Value::Object(object) => object,
        _ => return None,
    };

    let data = match object.remove("data") {
        Some(Value::Object(data)) => data,
        _ => return None,
    };
    let event_type = match object.remove("eventType") {
        Some(Value::String(event_type)) => Some(event_type),
        _ => None,
    };

    Some(ImageEventEnvelope { event_type, data })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body() -> Value {
        json!({
            "eventType": "image.uploaded",
            "data": { "externalId": "img-1", "entityId": 7, "entityType": "catalog.product" }
        })
    }

    #[test]
    fn test_decoded_object_passes_through() {
        let envelope = parse_payload(EventPayload::Value(body())).unwrap();
        assert_eq!(envelope.event_type.as_deref(), Some("image.uploaded"));
        assert_eq!(envelope.data["externalId"], "img-1");
    }

    #[test]
    fn test_bytes_are_parsed_as_json() {
        let bytes = serde_json::to_vec(&body()).unwrap();
        let envelope = parse_payload(EventPayload::Bytes(bytes)).unwrap();
        assert_eq!(envelope.data["entityId"], 7);
    }

    #[test]
    fn test_json_string_is_parsed() {
        let text = serde_json::to_string(&body()).unwrap();
        let envelope = parse_payload(EventPayload::Value(Value::String(text))).unwrap();
        assert_eq!(envelope.data["entityId"], 7);
    }

    #[test]
    fn test_value_envelope_is_unwrapped() {
        let wrapped = json!({ "value": body() });
        let envelope = parse_payload(EventPayload::Value(wrapped)).unwrap();
        assert_eq!(envelope.event_type.as_deref(), Some("image.uploaded"));
    }

    #[test]
    fn test_value_envelope_with_string_body() {
        let wrapped = json!({ "value": serde_json::to_string(&body()).unwrap() });
        let envelope = parse_payload(EventPayload::Value(wrapped)).unwrap();
        assert_eq!(envelope.data["externalId"], "img-1");
    }

    #[test]
    fn test_invalid_utf8_rejected() {
        assert!(parse_payload(EventPayload::Bytes(vec![0xff, 0xfe])).is_none());
    }

    #[test]
    fn test_invalid_json_rejected() {
        let raw = b"not json".to_vec();
        assert!(parse_payload(EventPayload::Bytes(raw)).is_none());
    }

    #[test]
    fn test_missing_data_rejected() {
        let no_data = json!({ "eventType": "image.uploaded" });
        assert!(parse_payload(EventPayload::Value(no_data)).is_none());
    }

    #[test]
    fn test_non_object_data_rejected() {
        let bad_data = json!({ "eventType": "image.uploaded", "data": "img-1" });
        assert!(parse_payload(EventPayload::Value(bad_data)).is_none());
    }

    #[test]
    fn test_scalar_payload_rejected() {
        assert!(parse_payload(EventPayload::Value(json!(42))).is_none());
    }

    #[test]
    fn test_missing_event_type_kept_as_none() {
        let body = json!({ "data": { "externalId": "img-1" } });
        let envelope = parse_payload(EventPayload::Value(body)).unwrap();
        assert_eq!(envelope.event_type, None);
    }
}
