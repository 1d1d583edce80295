use thiserror::Error;

use crate::contracts::ProcessorError;

/// Streaming core errors.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Credential provisioning failed: {0}")]
    Credential(String),

    #[error("Processing failed for processor '{processor_name}' on entity '{entity_id}': {source}")]
    Processing {
        processor_name: String,
        entity_id: String,
        #[source]
        source: ProcessorError,
    },

    #[error("Malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("No response builder registered for '{0}'")]
    UnregisteredResponseType(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StreamError {
    /// Whether the failure means the presented credential was rejected.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Authentication(_))
    }

    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Authentication(_) => "authentication",
            Self::Credential(_) => "credential",
            Self::Processing { .. } => "processing",
            Self::Payload(_) => "payload",
            Self::UnregisteredResponseType(_) => "unregistered_response_type",
            Self::Config(_) => "config",
        }
    }
}

impl From<tonic::Status> for StreamError {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated => Self::Authentication(status.message().to_string()),
            code => Self::Transport(format!("{code:?}: {}", status.message())),
        }
    }
}

impl From<tonic::transport::Error> for StreamError {
    fn from(err: tonic::transport::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<config::ConfigError> for StreamError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
