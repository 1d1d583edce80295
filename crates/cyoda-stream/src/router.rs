use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::handlers::EventHandler;

/// Maps inbound event types to their handlers.
///
/// Built once before the stream starts and only read afterwards.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_type`, replacing any earlier registration.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event_type.into(), handler);
    }

    pub fn route(&self, envelope: &Envelope) -> Option<Arc<dyn EventHandler>> {
        self.handlers.get(envelope.event_type()).cloned()
    }

    pub fn has(&self, event_type: &str) -> bool {
        self.handlers.contains_key(event_type)
    }

    pub fn event_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::ResponseSpec;
    use crate::error::StreamError;
    use crate::handlers::HandlerContext;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    struct Tagged;

    #[async_trait]
    impl EventHandler for Tagged {
        async fn handle(
            &self,
            _envelope: &Envelope,
            _ctx: &HandlerContext,
        ) -> Result<Option<ResponseSpec>, StreamError> {
            Ok(None)
        }
    }

    fn envelope_of(event_type: &str) -> Envelope {
        Envelope::new("id", "src", "1.0", event_type, "{}")
    }

    #[test]
    fn later_registration_wins() {
        let first: Arc<dyn EventHandler> = Arc::new(Tagged);
        let second: Arc<dyn EventHandler> = Arc::new(Tagged);

        let mut router = EventRouter::new();
        router.register("Greet", first);
        router.register("Greet", second.clone());

        let routed = router.route(&envelope_of("Greet")).unwrap();
        assert!(Arc::ptr_eq(&routed, &second));
        assert_eq!(router.event_types(), vec!["Greet"]);
    }

    proptest! {
        #[test]
        fn property_routes_exactly_registered_types(
            registered in proptest::collection::btree_set("[A-Za-z]{1,12}", 1..8),
            candidate in "[A-Za-z]{1,12}",
        ) {
            let mut router = EventRouter::new();
            let mut expected = Vec::new();
            for event_type in &registered {
                let handler: Arc<dyn EventHandler> = Arc::new(Tagged);
                router.register(event_type.clone(), handler.clone());
                expected.push((event_type.clone(), handler));
            }

            for (event_type, handler) in &expected {
                let routed = router.route(&envelope_of(event_type));
                prop_assert!(routed.is_some_and(|routed| Arc::ptr_eq(&routed, handler)));
            }

            let known: BTreeSet<&String> = registered.iter().collect();
            if !known.contains(&candidate) {
                prop_assert!(router.route(&envelope_of(&candidate)).is_none());
            }
        }
    }
}
