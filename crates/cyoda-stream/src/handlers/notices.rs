//! Observe-only handlers. None of these ever produce a response.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{EventHandler, HandlerContext};
use crate::envelope::{Envelope, ResponseSpec};
use crate::error::StreamError;
use crate::protocol::ErrorNotice;

pub struct AckHandler;

#[async_trait]
impl EventHandler for AckHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        _ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError> {
        debug!(event_id = envelope.id(), "ack received");
        Ok(None)
    }
}

pub struct GreetHandler;

#[async_trait]
impl EventHandler for GreetHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        _ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError> {
        info!(
            event_id = envelope.id(),
            source = envelope.source(),
            "greeted by platform"
        );
        Ok(None)
    }
}

/// Logs error notices sent by the platform.
pub struct ErrorEventHandler;

#[async_trait]
impl EventHandler for ErrorEventHandler {
    async fn handle(
        &self,
        envelope: &Envelope,
        _ctx: &HandlerContext,
    ) -> Result<Option<ResponseSpec>, StreamError> {
        // An unreadable notice is still worth a log line.
        let notice: ErrorNotice = envelope.decode().unwrap_or_default();
        warn!(
            event_id = envelope.id(),
            code = notice.code.as_deref().unwrap_or("unknown"),
            source_event_id = notice.source_event_id.as_deref().unwrap_or(""),
            message = notice.message.as_deref().unwrap_or(envelope.payload()),
            "platform reported an error"
        );
        Ok(None)
    }
}
