//! Wire vocabulary of the calculation-member protocol.
//!
//! Event type tags, the fixed envelope attributes and the payload shapes of
//! the inbound work requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `source` attribute stamped on every outbound envelope.
pub const SOURCE: &str = "SimpleSample";

/// CloudEvents spec version stamped on every outbound envelope.
pub const SPEC_VERSION: &str = "1.0";

/// Default entity payload format tag.
pub const DEFAULT_PAYLOAD_TYPE: &str = "TREE";

pub mod event_types {
    pub const JOIN: &str = "CalculationMemberJoinEvent";
    pub const KEEP_ALIVE: &str = "CalculationMemberKeepAliveEvent";
    pub const ACK: &str = "EventAckResponse";
    pub const GREET: &str = "CalculationMemberGreetEvent";
    pub const ERROR: &str = "ErrorEvent";
    pub const CALC_REQUEST: &str = "EntityProcessorCalculationRequest";
    pub const CALC_RESPONSE: &str = "EntityProcessorCalculationResponse";
    pub const CRITERIA_REQUEST: &str = "EntityCriteriaCalculationRequest";
    pub const CRITERIA_RESPONSE: &str = "EntityCriteriaCalculationResponse";
}

/// Entity document carried by calculation requests and responses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    #[serde(rename = "type", default = "default_payload_type")]
    pub format: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl EntityPayload {
    /// Model name declared under `meta.modelKey.name`, if any.
    pub fn model_name(&self) -> Option<&str> {
        self.meta
            .as_ref()?
            .get("modelKey")?
            .get("name")?
            .as_str()
            .filter(|name| !name.is_empty())
    }
}

impl Default for EntityPayload {
    fn default() -> Self {
        Self {
            format: default_payload_type(),
            data: Value::Null,
            meta: None,
        }
    }
}

fn default_payload_type() -> String {
    DEFAULT_PAYLOAD_TYPE.to_string()
}

/// `EntityProcessorCalculationRequest` payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorRequest {
    pub request_id: String,
    pub entity_id: String,
    pub processor_name: String,
    #[serde(default)]
    pub payload: EntityPayload,
}

/// `EntityCriteriaCalculationRequest` payload.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaRequest {
    pub request_id: String,
    pub entity_id: String,
    pub criteria_name: String,
    #[serde(default)]
    pub payload: EntityPayload,
}

/// Payload of an inbound `ErrorEvent`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotice {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub source_event_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn model_name_is_read_from_model_key() {
        let payload: EntityPayload = serde_json::from_value(json!({
            "type": "TREE",
            "data": {"v": 1},
            "meta": {"modelKey": {"name": "nobel_prize", "version": 1}}
        }))
        .unwrap();

        assert_eq!(payload.model_name(), Some("nobel_prize"));
    }

    #[test]
    fn processor_request_defaults_missing_payload() {
        let request: ProcessorRequest = serde_json::from_value(json!({
            "requestId": "r-1",
            "entityId": "42",
            "processorName": "P"
        }))
        .unwrap();

        assert_eq!(request.payload.format, DEFAULT_PAYLOAD_TYPE);
        assert!(request.payload.data.is_null());
        assert_eq!(request.payload.model_name(), None);
    }
}
