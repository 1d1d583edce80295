use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{EventHandler, HandlerContext};
use crate::envelope::{Envelope, ResponseSpec};
use crate::error::StreamError;
use crate::protocol::{event_types, CriteriaRequest, EntityPayload, ProcessorRequest};

/// Runs the named processor against the request entity.
///
/// Failures are raised as [`StreamError::Processing`]; no partial response is
/// ever produced.
pub struct CalcRequestHandler;

#[async_trait]
impl EventHandler for CalcRequestHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError> {
        let request: ProcessorRequest = envelope.decode()?;
        let model = request.payload.model_name().map(str::to_string);
        let EntityPayload { format, data, meta } = request.payload;

        debug!(
            event_id = envelope.id(),
            processor = %request.processor_name,
            entity_id = %request.entity_id,
            model = model.as_deref().unwrap_or("generic"),
            "running processor"
        );

        let entity = ctx.entities.resolve(model.as_deref(), data);
        let processed = ctx
            .processors
            .process(&request.processor_name, entity)
            .await
            .map_err(|source| StreamError::Processing {
                processor_name: request.processor_name.clone(),
                entity_id: request.entity_id.clone(),
                source,
            })?;

        let payload = EntityPayload {
            format,
            data: processed.into_data(),
            meta,
        };

        Ok(Some(
            ResponseSpec::new(event_types::CALC_RESPONSE)
                .with_source_event(envelope.id())
                .with_field("requestId", request.request_id)
                .with_field("entityId", request.entity_id)
                .with_field("payload", serde_json::to_value(payload)?),
        ))
    }
}

/// Evaluates the named criteria against the request entity.
///
/// Evaluation failures never escape: they answer `matches: false`. A payload
/// that does not decode still gets `matches: false` as long as its
/// `requestId` can be read; otherwise the payload error is raised.
pub struct CriteriaRequestHandler;

#[async_trait]
impl EventHandler for CriteriaRequestHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError> {
        let request: CriteriaRequest = match envelope.decode() {
            Ok(request) => request,
            Err(err) => return unreadable_criteria_request(envelope, err),
        };
        let model = request.payload.model_name().map(str::to_string);
        let entity = ctx
            .entities
            .resolve(model.as_deref(), request.payload.data);

        let matches = match ctx.criteria.check(&request.criteria_name, &entity).await {
            Ok(matches) => matches,
            Err(err) => {
                warn!(
                    event_id = envelope.id(),
                    criteria = %request.criteria_name,
                    entity_id = %request.entity_id,
                    error = %err,
                    "criteria evaluation failed; answering no match"
                );
                false
            }
        };

        Ok(Some(
            ResponseSpec::new(event_types::CRITERIA_RESPONSE)
                .with_source_event(envelope.id())
                .with_field("requestId", request.request_id)
                .with_field("entityId", request.entity_id)
                .with_field("matches", matches),
        ))
    }
}

fn unreadable_criteria_request(
    envelope: &Envelope,
    err: StreamError,
) -> Result<Option<ResponseSpec>, StreamError> {
    let Ok(document) = envelope.document() else {
        return Err(err);
    };
    let Some(request_id) = document.get("requestId").and_then(Value::as_str) else {
        return Err(err);
    };
    let entity_id = document
        .get("entityId")
        .and_then(Value::as_str)
        .unwrap_or_default();

    warn!(
        event_id = envelope.id(),
        request_id,
        error = %err,
        "malformed criteria request; answering no match"
    );
    Ok(Some(
        ResponseSpec::new(event_types::CRITERIA_RESPONSE)
            .with_source_event(envelope.id())
            .with_field("requestId", request_id)
            .with_field("entityId", entity_id)
            .with_field("matches", false),
    ))
}
