use async_trait::async_trait;
use tracing::debug;

use super::{EventHandler, HandlerContext};
use crate::envelope::{Envelope, ResponseSpec};
use crate::error::StreamError;
use crate::protocol::event_types;

/// Acknowledges every keep-alive so the platform keeps the member registered.
pub struct KeepAliveHandler;

#[async_trait]
impl EventHandler for KeepAliveHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        _ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError> {
        debug!(event_id = envelope.id(), "keep-alive received");
        Ok(Some(
            ResponseSpec::new(event_types::ACK).with_source_event(envelope.id()),
        ))
    }
}
