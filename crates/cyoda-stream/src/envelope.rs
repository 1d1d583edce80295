use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StreamError;

/// Generic wire message exchanged over the stream.
///
/// Envelopes are immutable once constructed. Inbound envelopes come from the
/// platform; outbound ones are produced by the response builders.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    id: String,
    source: String,
    spec_version: String,
    #[serde(rename = "type")]
    event_type: String,
    payload: String,
}

impl Envelope {
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        spec_version: impl Into<String>,
        event_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            spec_version: spec_version.into(),
            event_type: event_type.into(),
            payload: payload.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn spec_version(&self) -> &str {
        &self.spec_version
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Raw text payload as carried on the wire.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Decode the payload into a typed document.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T, StreamError> {
        serde_json::from_str(&self.payload).map_err(StreamError::Payload)
    }

    /// Decode the payload as a JSON object; empty payloads decode to an empty map.
    pub fn document(&self) -> Result<Map<String, Value>, StreamError> {
        if self.payload.trim().is_empty() {
            return Ok(Map::new());
        }
        self.decode()
    }
}

/// In-process description of a response, materialized into an [`Envelope`]
/// by the builder registered for `response_type`.
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseSpec {
    pub response_type: String,
    pub data: Map<String, Value>,
    pub source_event_id: Option<String>,
    pub success: bool,
}

impl ResponseSpec {
    pub fn new(response_type: impl Into<String>) -> Self {
        Self {
            response_type: response_type.into(),
            data: Map::new(),
            source_event_id: None,
            success: true,
        }
    }

    pub fn with_source_event(mut self, event_id: impl Into<String>) -> Self {
        self.source_event_id = Some(event_id.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_success(mut self, success: bool) -> Self {
        self.success = success;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_payload_decodes_to_empty_document() {
        let envelope = Envelope::new("e1", "src", "1.0", "CalculationMemberKeepAliveEvent", "");
        assert!(envelope.document().unwrap().is_empty());
    }

    #[test]
    fn malformed_payload_is_a_payload_error() {
        let envelope = Envelope::new("e1", "src", "1.0", "ErrorEvent", "{not json");
        let err = envelope.document().expect_err("must reject");
        assert!(matches!(err, StreamError::Payload(_)));
    }

    #[test]
    fn response_spec_builder_collects_fields() {
        let spec = ResponseSpec::new("EventAckResponse")
            .with_source_event("E1")
            .with_field("matches", json!(true))
            .with_success(false);

        assert_eq!(spec.source_event_id.as_deref(), Some("E1"));
        assert_eq!(spec.data.get("matches"), Some(&json!(true)));
        assert!(!spec.success);
    }
}
