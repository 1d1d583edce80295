//! Inbound processing pipeline.
//!
//! Every inbound envelope runs through Logging → Metrics → Error-isolation →
//! Dispatch. Each stage owns its successor; Dispatch is terminal. The chain
//! resolves to the outbound envelope that was enqueued, if any.

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::builders::ResponseBuilders;
use crate::envelope::Envelope;
use crate::error::StreamError;
use crate::handlers::HandlerContext;
use crate::metrics::StreamMetrics;
use crate::outbox::Outbox;
use crate::protocol::event_types;
use crate::router::EventRouter;

pub type MiddlewareResult = Result<Option<Envelope>, StreamError>;

#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, envelope: &Envelope) -> MiddlewareResult;
}

/// One structured line per inbound event.
pub struct LoggingMiddleware {
    next: Arc<dyn Middleware>,
}

impl LoggingMiddleware {
    pub fn new(next: Arc<dyn Middleware>) -> Self {
        Self { next }
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(&self, envelope: &Envelope) -> MiddlewareResult {
        match envelope.event_type() {
            event_types::KEEP_ALIVE | event_types::ACK => debug!(
                event_id = envelope.id(),
                event_type = envelope.event_type(),
                "inbound event"
            ),
            _ => info!(
                event_id = envelope.id(),
                event_type = envelope.event_type(),
                payload_bytes = envelope.payload().len(),
                "inbound event"
            ),
        }
        self.next.handle(envelope).await
    }
}

/// Counts and times everything downstream.
pub struct MetricsMiddleware {
    metrics: StreamMetrics,
    next: Arc<dyn Middleware>,
}

impl MetricsMiddleware {
    pub fn new(metrics: StreamMetrics, next: Arc<dyn Middleware>) -> Self {
        Self { metrics, next }
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    async fn handle(&self, envelope: &Envelope) -> MiddlewareResult {
        let started = Instant::now();
        let result = self.next.handle(envelope).await;
        // Error-isolation below turns every failure into `Ok(None)`.
        let outcome = match &result {
            Ok(Some(_)) => "responded",
            _ => "no_response",
        };
        self.metrics.record_message(
            envelope.event_type(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
        result
    }
}

/// Swallows every downstream error and panic so a single message can never
/// take the stream down.
pub struct ErrorIsolationMiddleware {
    metrics: StreamMetrics,
    next: Arc<dyn Middleware>,
}

impl ErrorIsolationMiddleware {
    pub fn new(metrics: StreamMetrics, next: Arc<dyn Middleware>) -> Self {
        Self { metrics, next }
    }
}

#[async_trait]
impl Middleware for ErrorIsolationMiddleware {
    async fn handle(&self, envelope: &Envelope) -> MiddlewareResult {
        let outcome = AssertUnwindSafe(self.next.handle(envelope))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => {
                self.metrics.record_failure(envelope.event_type(), err.kind());
                log_failure(envelope, &err);
                Ok(None)
            }
            Err(panic) => {
                self.metrics.record_failure(envelope.event_type(), "panic");
                error!(
                    event_id = envelope.id(),
                    event_type = envelope.event_type(),
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked; event dropped"
                );
                Ok(None)
            }
        }
    }
}

fn log_failure(envelope: &Envelope, err: &StreamError) {
    match err {
        StreamError::Processing {
            processor_name,
            entity_id,
            source,
        } => error!(
            event_id = envelope.id(),
            processor = %processor_name,
            entity_id = %entity_id,
            error = %source,
            "calculation failed; no response sent"
        ),
        StreamError::Payload(cause) => warn!(
            event_id = envelope.id(),
            event_type = envelope.event_type(),
            error = %cause,
            "malformed event payload; event dropped"
        ),
        StreamError::UnregisteredResponseType(response_type) => error!(
            event_id = envelope.id(),
            response_type = %response_type,
            "handler produced a response type with no builder"
        ),
        other => error!(
            event_id = envelope.id(),
            event_type = envelope.event_type(),
            kind = other.kind(),
            error = %other,
            "event handling failed"
        ),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Terminal stage: route, handle, build, enqueue.
pub struct DispatchMiddleware {
    router: Arc<EventRouter>,
    builders: Arc<ResponseBuilders>,
    outbox: Outbox,
    ctx: HandlerContext,
}

impl DispatchMiddleware {
    pub fn new(
        router: Arc<EventRouter>,
        builders: Arc<ResponseBuilders>,
        outbox: Outbox,
        ctx: HandlerContext,
    ) -> Self {
        Self {
            router,
            builders,
            outbox,
            ctx,
        }
    }
}

#[async_trait]
impl Middleware for DispatchMiddleware {
    async fn handle(&self, envelope: &Envelope) -> MiddlewareResult {
        let Some(handler) = self.router.route(envelope) else {
            warn!(
                event_id = envelope.id(),
                event_type = envelope.event_type(),
                "no handler registered; event dropped"
            );
            return Ok(None);
        };

        let Some(spec) = handler.handle(envelope, &self.ctx).await? else {
            return Ok(None);
        };

        let response = self.builders.build(&spec)?;
        if !self.outbox.send(response.clone()) {
            return Ok(None);
        }
        debug!(
            event_id = envelope.id(),
            response_id = response.id(),
            response_type = response.event_type(),
            "response enqueued"
        );
        Ok(Some(response))
    }
}

/// Assemble the standard chain in front of `dispatch`.
pub fn build_chain(dispatch: DispatchMiddleware, metrics: StreamMetrics) -> Arc<dyn Middleware> {
    let isolation = Arc::new(ErrorIsolationMiddleware::new(
        metrics.clone(),
        Arc::new(dispatch),
    ));
    let instrumented = Arc::new(MetricsMiddleware::new(metrics, isolation));
    Arc::new(LoggingMiddleware::new(instrumented))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{processor_fn, CriteriaRegistry, ProcessorRegistry};
    use crate::entity::ModelRegistry;
    use crate::envelope::ResponseSpec;
    use crate::handlers::{standard_router, EventHandler};
    use futures::StreamExt;
    use serde_json::json;

    struct Exploding;

    #[async_trait]
    impl EventHandler for Exploding {
        async fn handle(
            &self,
            _envelope: &Envelope,
            _ctx: &HandlerContext,
        ) -> Result<Option<ResponseSpec>, StreamError> {
            panic!("handler bug");
        }
    }

    struct WrongResponse;

    #[async_trait]
    impl EventHandler for WrongResponse {
        async fn handle(
            &self,
            _envelope: &Envelope,
            _ctx: &HandlerContext,
        ) -> Result<Option<ResponseSpec>, StreamError> {
            Ok(Some(ResponseSpec::new("NotARealResponse")))
        }
    }

    struct Fixture {
        chain: Arc<dyn Middleware>,
        outbox: Outbox,
        metrics: StreamMetrics,
    }

    fn fixture() -> Fixture {
        let mut router = standard_router();
        router.register("Explode", Arc::new(Exploding));
        router.register("Wrong", Arc::new(WrongResponse));

        let mut processors = ProcessorRegistry::new();
        processors.register(processor_fn("P", |entity| {
            Ok(entity.with_data(json!({"v": 2})))
        }));
        let ctx = HandlerContext::new(
            Arc::new(processors),
            Arc::new(CriteriaRegistry::new()),
            Arc::new(ModelRegistry::new()),
        );

        let outbox = Outbox::new();
        let metrics = StreamMetrics::unregistered().unwrap();
        let dispatch = DispatchMiddleware::new(
            Arc::new(router),
            Arc::new(ResponseBuilders::standard("PLAY")),
            outbox.clone(),
            ctx,
        );
        Fixture {
            chain: build_chain(dispatch, metrics.clone()),
            outbox,
            metrics,
        }
    }

    fn event(id: &str, event_type: &str, payload: serde_json::Value) -> Envelope {
        Envelope::new(id, "platform", "1.0", event_type, payload.to_string())
    }

    async fn drained(outbox: &Outbox) -> Vec<Envelope> {
        outbox.close();
        outbox
            .sequence(event("join", event_types::JOIN, json!({})))
            .skip(1)
            .collect()
            .await
    }

    #[tokio::test]
    async fn keep_alive_flows_through_to_outbox() {
        let fixture = fixture();
        let response = fixture
            .chain
            .handle(&event("E1", event_types::KEEP_ALIVE, json!({})))
            .await
            .unwrap()
            .expect("ack expected");

        assert_eq!(response.event_type(), event_types::ACK);
        let queued = drained(&fixture.outbox).await;
        assert_eq!(queued, vec![response]);
        assert!(fixture
            .metrics
            .render()
            .contains("outcome=\"responded\""));
    }

    #[tokio::test]
    async fn responses_after_close_are_not_counted_as_sent() {
        let fixture = fixture();
        fixture.outbox.close();

        let result = fixture
            .chain
            .handle(&event("E2", event_types::KEEP_ALIVE, json!({})))
            .await
            .unwrap();

        assert!(result.is_none());
        let text = fixture.metrics.render();
        assert!(text.contains("outcome=\"no_response\""));
        assert!(!text.contains("outcome=\"responded\""));
    }

    #[tokio::test]
    async fn unroutable_events_are_dropped() {
        let fixture = fixture();
        let result = fixture
            .chain
            .handle(&event("X", "SomethingNew", json!({})))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(drained(&fixture.outbox).await.is_empty());
    }

    #[tokio::test]
    async fn processing_errors_are_swallowed_without_response() {
        let fixture = fixture();
        let request = json!({
            "requestId": "r-1",
            "entityId": "42",
            "processorName": "missing",
            "payload": {"data": {"v": 1}}
        });
        let result = fixture
            .chain
            .handle(&event("C1", event_types::CALC_REQUEST, request))
            .await
            .unwrap();

        assert!(result.is_none());
        assert!(drained(&fixture.outbox).await.is_empty());
        assert!(fixture
            .metrics
            .render()
            .contains("kind=\"processing\""));
    }

    #[tokio::test]
    async fn panics_and_unregistered_response_types_are_contained() {
        let fixture = fixture();
        assert!(fixture
            .chain
            .handle(&event("P1", "Explode", json!({})))
            .await
            .unwrap()
            .is_none());
        assert!(fixture
            .chain
            .handle(&event("W1", "Wrong", json!({})))
            .await
            .unwrap()
            .is_none());

        let text = fixture.metrics.render();
        assert!(text.contains("kind=\"panic\""));
        assert!(text.contains("kind=\"unregistered_response_type\""));
    }

    #[tokio::test]
    async fn failing_message_does_not_block_concurrent_message() {
        let fixture = fixture();
        let failing = {
            let chain = fixture.chain.clone();
            tokio::spawn(async move { chain.handle(&event("M1", "Explode", json!({}))).await })
        };
        let succeeding = {
            let chain = fixture.chain.clone();
            let request = json!({
                "requestId": "r-2",
                "entityId": "42",
                "processorName": "P",
                "payload": {"data": {"v": 1}}
            });
            tokio::spawn(async move {
                chain
                    .handle(&event("M2", event_types::CALC_REQUEST, request))
                    .await
            })
        };

        assert!(failing.await.unwrap().unwrap().is_none());
        let response = succeeding
            .await
            .unwrap()
            .unwrap()
            .expect("calc response expected");

        let queued = drained(&fixture.outbox).await;
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0], response);
        let document = response.document().unwrap();
        assert_eq!(document["entityId"], json!("42"));
        assert_eq!(document["payload"]["data"], json!({"v": 2}));
    }
}
