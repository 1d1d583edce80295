//! Response builders.
//!
//! A builder turns a [`ResponseSpec`] into a well-formed outbound
//! [`Envelope`]: fresh id, fixed source/spec version, and a payload holding
//! the response data plus the bookkeeping fields the platform expects.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::{Envelope, ResponseSpec};
use crate::error::StreamError;
use crate::protocol::{event_types, SOURCE, SPEC_VERSION};

/// Materializes one kind of response.
pub trait ResponseBuilder: Send + Sync {
    fn build(&self, spec: &ResponseSpec, owner: &str) -> Result<Envelope, StreamError>;
}

/// Builder emitting `event_type` envelopes whose payload is the response data
/// merged with `id`, `owner`, `success` and `sourceEventId`.
pub struct DocumentBuilder {
    event_type: &'static str,
}

impl DocumentBuilder {
    pub const fn new(event_type: &'static str) -> Self {
        Self { event_type }
    }
}

impl ResponseBuilder for DocumentBuilder {
    fn build(&self, spec: &ResponseSpec, owner: &str) -> Result<Envelope, StreamError> {
        let id = new_event_id();
        let mut document = spec.data.clone();
        document.insert("id".to_string(), Value::String(id.clone()));
        document.insert("owner".to_string(), Value::String(owner.to_string()));
        document.insert("success".to_string(), Value::Bool(spec.success));
        if let Some(source_event_id) = &spec.source_event_id {
            document.insert(
                "sourceEventId".to_string(),
                Value::String(source_event_id.clone()),
            );
        }

        let payload = serde_json::to_string(&Value::Object(document))?;
        Ok(Envelope::new(id, SOURCE, SPEC_VERSION, self.event_type, payload))
    }
}

/// Registry of builders keyed by response type.
///
/// Populated once at startup and shared read-only afterwards.
pub struct ResponseBuilders {
    owner: String,
    builders: HashMap<String, Arc<dyn ResponseBuilder>>,
}

impl ResponseBuilders {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            builders: HashMap::new(),
        }
    }

    /// Registry with the ack, calc-response and criteria-response builders.
    pub fn standard(owner: impl Into<String>) -> Self {
        let mut registry = Self::new(owner);
        for event_type in [
            event_types::ACK,
            event_types::CALC_RESPONSE,
            event_types::CRITERIA_RESPONSE,
        ] {
            registry.register(event_type, Arc::new(DocumentBuilder::new(event_type)));
        }
        registry
    }

    /// Register a builder; a later registration for the same type replaces it.
    pub fn register(&mut self, response_type: impl Into<String>, builder: Arc<dyn ResponseBuilder>) {
        self.builders.insert(response_type.into(), builder);
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn has(&self, response_type: &str) -> bool {
        self.builders.contains_key(response_type)
    }

    pub fn build(&self, spec: &ResponseSpec) -> Result<Envelope, StreamError> {
        let builder = self
            .builders
            .get(&spec.response_type)
            .ok_or_else(|| StreamError::UnregisteredResponseType(spec.response_type.clone()))?;
        builder.build(spec, &self.owner)
    }

    /// Join message announcing this member and its tags.
    pub fn join(&self, tags: &[String]) -> Result<Envelope, StreamError> {
        let id = new_event_id();
        let mut document = Map::new();
        document.insert("id".to_string(), Value::String(id.clone()));
        document.insert("owner".to_string(), Value::String(self.owner.clone()));
        document.insert(
            "tags".to_string(),
            Value::Array(tags.iter().cloned().map(Value::String).collect()),
        );

        let payload = serde_json::to_string(&Value::Object(document))?;
        Ok(Envelope::new(id, SOURCE, SPEC_VERSION, event_types::JOIN, payload))
    }
}

pub fn new_event_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ack_references_source_event() {
        let builders = ResponseBuilders::standard("PLAY");
        let spec = ResponseSpec::new(event_types::ACK).with_source_event("E1");

        let envelope = builders.build(&spec).unwrap();
        assert_eq!(envelope.event_type(), event_types::ACK);
        assert_eq!(envelope.source(), SOURCE);
        assert_eq!(envelope.spec_version(), SPEC_VERSION);
        assert!(!envelope.id().is_empty());

        let document = envelope.document().unwrap();
        assert_eq!(document["sourceEventId"], json!("E1"));
        assert_eq!(document["owner"], json!("PLAY"));
        assert_eq!(document["success"], json!(true));
        assert_eq!(document["id"], json!(envelope.id()));
    }

    #[test]
    fn data_fields_survive_materialization() {
        let builders = ResponseBuilders::standard("PLAY");
        let spec = ResponseSpec::new(event_types::CALC_RESPONSE)
            .with_field("requestId", "r-1")
            .with_field("entityId", "42")
            .with_field("payload", json!({"type": "TREE", "data": {"nested": [1, 2, 3]}}));

        let envelope = builders.build(&spec).unwrap();
        let document = envelope.document().unwrap();
        for (key, value) in &spec.data {
            assert_eq!(document.get(key), Some(value), "field {key} must round-trip");
        }
        assert!(document.get("sourceEventId").is_none());
    }

    #[test]
    fn every_build_gets_a_fresh_id() {
        let builders = ResponseBuilders::standard("PLAY");
        let spec = ResponseSpec::new(event_types::ACK);
        let first = builders.build(&spec).unwrap();
        let second = builders.build(&spec).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn unregistered_response_type_is_rejected() {
        let builders = ResponseBuilders::standard("PLAY");
        let err = builders
            .build(&ResponseSpec::new("SomethingElse"))
            .expect_err("must reject");
        assert!(matches!(err, StreamError::UnregisteredResponseType(t) if t == "SomethingElse"));
    }

    #[test]
    fn join_announces_owner_and_tags() {
        let builders = ResponseBuilders::new("PLAY");
        let join = builders.join(&["rust".to_string()]).unwrap();

        assert_eq!(join.event_type(), event_types::JOIN);
        let document = join.document().unwrap();
        assert_eq!(document["owner"], json!("PLAY"));
        assert_eq!(document["tags"], json!(["rust"]));
    }
}
