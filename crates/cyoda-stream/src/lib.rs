//! Calculation-member streaming client.
//!
//! Holds one long-lived bidirectional event stream to the platform, routes
//! inbound events through a middleware chain to typed handlers, and sends
//! responses back in order through a single outbox.

#![deny(unsafe_code)]

pub mod backoff;
pub mod builders;
pub mod config;
pub mod contracts;
pub mod credentials;
pub mod entity;
pub mod envelope;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod outbox;
pub mod pb;
pub mod protocol;
pub mod router;
pub mod transport;

pub use backoff::Backoff;
pub use builders::{DocumentBuilder, ResponseBuilder, ResponseBuilders};
pub use config::ClientConfig;
pub use contracts::{
    criteria_fn, processor_fn, CriteriaChecker, CriteriaError, CriteriaRegistry, EntityCriteria,
    EntityProcessor, Processor, ProcessorError, ProcessorRegistry,
};
pub use credentials::{Credential, CredentialProvider, OAuthClientCredentials, StaticToken};
pub use entity::{Entity, EntityModel, EntityResolver, ModelRegistry, TypedModel};
pub use envelope::{Envelope, ResponseSpec};
pub use error::StreamError;
pub use facade::{ConnectionPhase, StreamingClient, StreamingClientBuilder};
pub use handlers::{standard_router, EventHandler, HandlerContext};
pub use metrics::StreamMetrics;
pub use middleware::Middleware;
pub use outbox::Outbox;
pub use router::EventRouter;
pub use transport::{GrpcConnector, InboundStream, StreamConnector};
