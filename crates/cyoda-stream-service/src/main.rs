//! cyoda-streamd - calculation member daemon
//!
//! Joins the platform event stream, answers keep-alives and dispatches
//! calculation requests until interrupted.
//!
//! Business logic is registered by name in [`handler_context`]. Out of the
//! box the daemon serves only the `noop` processor and the `match_all`
//! criteria, which are enough to check wiring against a platform. Any other
//! processor name fails the calculation with `NotFound`; any other criteria
//! name answers no match. Applications with their own logic either extend
//! [`handler_context`] or embed `cyoda-stream` and pass their registries to
//! `StreamingClientBuilder::context`.

use anyhow::{bail, Context};
use clap::Parser;
use cyoda_stream::{
    criteria_fn, processor_fn, standard_router, ClientConfig, CredentialProvider,
    CriteriaRegistry, GrpcConnector, HandlerContext, ModelRegistry, OAuthClientCredentials,
    ProcessorRegistry, StaticToken, StreamMetrics, StreamingClient,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Calculation member daemon CLI
#[derive(Parser)]
#[command(name = "cyoda-streamd")]
#[command(about = "Calculation member for the platform event stream", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CYODA_CONFIG")]
    config: Option<String>,

    /// Platform gRPC endpoint
    #[arg(short, long, env = "CYODA_ENDPOINT")]
    endpoint: Option<String>,

    /// Log level
    #[arg(long, env = "CYODA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CYODA_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ClientConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // Override with CLI args
    if let Some(endpoint) = cli.endpoint {
        config.grpc.endpoint = endpoint;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;

    init_tracing(&config);

    let credentials = credential_provider(&config)?;
    let metrics = StreamMetrics::new(prometheus::default_registry())?;
    let client = StreamingClient::builder(
        Arc::new(GrpcConnector::new(config.grpc.clone())),
        credentials,
    )
    .with_config(&config)
    .router(standard_router())
    .context(handler_context())
    .metrics(metrics.clone())
    .build()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        endpoint = %config.grpc.endpoint,
        owner = %config.member.owner,
        tags = ?config.member.tags,
        "starting calculation member"
    );
    let handle = client.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    client.stop();
    handle.await.context("reconnect loop panicked")?;
    tracing::debug!(metrics = %metrics.render(), "final metrics");

    Ok(())
}

fn init_tracing(config: &ClientConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Processors and criteria served by this member.
fn handler_context() -> HandlerContext {
    let mut processors = ProcessorRegistry::new();
    processors.register(processor_fn("noop", |entity| Ok(entity)));

    let mut criteria = CriteriaRegistry::new();
    criteria.register(criteria_fn("match_all", |_| Ok(true)));

    info!(
        processors = ?processors.names(),
        criteria = ?criteria.names(),
        "business logic registered"
    );
    HandlerContext::new(
        Arc::new(processors),
        Arc::new(criteria),
        Arc::new(ModelRegistry::new()),
    )
}

fn credential_provider(config: &ClientConfig) -> anyhow::Result<Arc<dyn CredentialProvider>> {
    let auth = &config.auth;
    if let Some(token) = &auth.static_token {
        return Ok(Arc::new(StaticToken::new(token.clone())));
    }

    match (&auth.token_url, &auth.client_id, &auth.client_secret) {
        (Some(token_url), Some(client_id), Some(client_secret)) => {
            let provider = OAuthClientCredentials::new(
                token_url.clone(),
                client_id.clone(),
                client_secret.clone(),
                Duration::from_secs(auth.request_timeout_secs),
            )?
            .with_refresh_margin(Duration::from_secs(auth.refresh_margin_secs));
            Ok(Arc::new(provider))
        }
        _ => bail!(
            "no credentials configured: set auth.static_token or auth.token_url, auth.client_id and auth.client_secret"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyoda_stream::{CriteriaChecker, Entity, Processor};

    #[test]
    fn cli_parses_overrides() {
        let cli = Cli::parse_from([
            "cyoda-streamd",
            "--config",
            "member.toml",
            "--endpoint",
            "http://127.0.0.1:50051",
            "--json",
        ]);
        assert_eq!(cli.config.as_deref(), Some("member.toml"));
        assert_eq!(cli.endpoint.as_deref(), Some("http://127.0.0.1:50051"));
        assert!(cli.json);
    }

    #[test]
    fn missing_credentials_are_rejected() {
        assert!(credential_provider(&ClientConfig::default()).is_err());
    }

    #[test]
    fn static_token_takes_precedence() {
        let mut config = ClientConfig::default();
        config.auth.static_token = Some("dev".into());
        config.auth.token_url = Some("https://auth.example/oauth/token".into());
        assert!(credential_provider(&config).is_ok());
    }

    #[tokio::test]
    async fn builtin_logic_is_registered() {
        let ctx = handler_context();
        let entity = Entity::generic(serde_json::json!({"v": 1}));

        let processed = ctx.processors.process("noop", entity.clone()).await.unwrap();
        assert_eq!(processed.data(), entity.data());
        assert!(ctx.criteria.check("match_all", &entity).await.unwrap());
        assert!(ctx.processors.process("pricing", entity).await.is_err());
    }
}
