//! Inbound event handlers.
//!
//! One handler per inbound event type. Handlers return an optional
//! [`ResponseSpec`]; the dispatch stage turns it into an outbound envelope.

use async_trait::async_trait;
use std::sync::Arc;

use crate::contracts::{CriteriaChecker, CriteriaRegistry, Processor, ProcessorRegistry};
use crate::entity::{EntityResolver, ModelRegistry};
use crate::envelope::{Envelope, ResponseSpec};
use crate::error::StreamError;
use crate::protocol::event_types;
use crate::router::EventRouter;

mod calculation;
mod keep_alive;
mod notices;

pub use calculation::{CalcRequestHandler, CriteriaRequestHandler};
pub use keep_alive::KeepAliveHandler;
pub use notices::{AckHandler, ErrorEventHandler, GreetHandler};

/// Services available to handlers.
#[derive(Clone)]
pub struct HandlerContext {
    pub processors: Arc<dyn Processor>,
    pub criteria: Arc<dyn CriteriaChecker>,
    pub entities: Arc<dyn EntityResolver>,
}

impl HandlerContext {
    pub fn new(
        processors: Arc<dyn Processor>,
        criteria: Arc<dyn CriteriaChecker>,
        entities: Arc<dyn EntityResolver>,
    ) -> Self {
        Self {
            processors,
            criteria,
            entities,
        }
    }
}

impl Default for HandlerContext {
    fn default() -> Self {
        Self::new(
            Arc::new(ProcessorRegistry::new()),
            Arc::new(CriteriaRegistry::new()),
            Arc::new(ModelRegistry::new()),
        )
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &Envelope,
        ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError>;
}

/// Router with a handler for every inbound event type of the protocol.
pub fn standard_router() -> EventRouter {
    let mut router = EventRouter::new();
    router.register(event_types::KEEP_ALIVE, Arc::new(KeepAliveHandler));
    router.register(event_types::ACK, Arc::new(AckHandler));
    router.register(event_types::GREET, Arc::new(GreetHandler));
    router.register(event_types::ERROR, Arc::new(ErrorEventHandler));
    router.register(event_types::CALC_REQUEST, Arc::new(CalcRequestHandler));
    router.register(event_types::CRITERIA_REQUEST, Arc::new(CriteriaRequestHandler));
    router
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_router_covers_inbound_types() {
        let router = standard_router();
        for event_type in [
            event_types::KEEP_ALIVE,
            event_types::ACK,
            event_types::GREET,
            event_types::ERROR,
            event_types::CALC_REQUEST,
            event_types::CRITERIA_REQUEST,
        ] {
            assert!(router.has(event_type), "{event_type} must be routed");
        }
        assert!(!router.has(event_types::JOIN));
        assert!(!router.has(event_types::CALC_RESPONSE));
    }
}
