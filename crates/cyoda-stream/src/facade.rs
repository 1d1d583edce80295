//! Connection lifecycle for a calculation member.
//!
//! [`StreamingClient`] owns the reconnect loop: it provisions a credential,
//! opens the stream with the outbox sequence as its outbound side, hands each
//! inbound envelope to the middleware chain on its own task, and backs off
//! between failed attempts.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::builders::ResponseBuilders;
use crate::config::ClientConfig;
use crate::credentials::{fetch_with_retry, CredentialProvider};
use crate::envelope::Envelope;
use crate::error::StreamError;
use crate::handlers::{standard_router, HandlerContext};
use crate::metrics::StreamMetrics;
use crate::middleware::{build_chain, DispatchMiddleware, Middleware};
use crate::outbox::Outbox;
use crate::router::EventRouter;
use crate::transport::StreamConnector;

/// Observable state of the reconnect loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Streaming,
    Reconnecting,
    Stopped,
}

/// Assembles a [`StreamingClient`].
pub struct StreamingClientBuilder {
    connector: Arc<dyn StreamConnector>,
    credentials: Arc<dyn CredentialProvider>,
    router: Option<EventRouter>,
    builders: Option<ResponseBuilders>,
    context: HandlerContext,
    metrics: Option<StreamMetrics>,
    backoff: Backoff,
    tags: Vec<String>,
}

impl StreamingClientBuilder {
    /// Owner, join tags and backoff bounds from `config`.
    pub fn with_config(mut self, config: &ClientConfig) -> Self {
        self.builders = Some(ResponseBuilders::standard(config.member.owner.clone()));
        self.tags = config.member.tags.clone();
        self.backoff = Backoff::new(config.initial_backoff(), config.max_backoff());
        self
    }

    pub fn router(mut self, router: EventRouter) -> Self {
        self.router = Some(router);
        self
    }

    pub fn response_builders(mut self, builders: ResponseBuilders) -> Self {
        self.builders = Some(builders);
        self
    }

    pub fn context(mut self, context: HandlerContext) -> Self {
        self.context = context;
        self
    }

    pub fn metrics(mut self, metrics: StreamMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(initial, max);
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn build(self) -> Result<StreamingClient, StreamError> {
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => StreamMetrics::unregistered()
                .map_err(|e| StreamError::Config(format!("metrics registration failed: {e}")))?,
        };
        let router = Arc::new(self.router.unwrap_or_else(standard_router));
        let builders = Arc::new(
            self.builders
                .unwrap_or_else(|| ResponseBuilders::standard("PLAY")),
        );
        let outbox = Outbox::new();

        let dispatch =
            DispatchMiddleware::new(router, builders.clone(), outbox.clone(), self.context);
        let chain = build_chain(dispatch, metrics.clone());

        let (running, _) = watch::channel(false);
        let (phase, _) = watch::channel(ConnectionPhase::Idle);

        Ok(StreamingClient {
            shared: Arc::new(Shared {
                connector: self.connector,
                credentials: self.credentials,
                chain,
                builders,
                outbox,
                metrics,
                tags: self.tags,
                backoff: self.backoff,
                running,
                phase,
            }),
        })
    }
}

struct Shared {
    connector: Arc<dyn StreamConnector>,
    credentials: Arc<dyn CredentialProvider>,
    chain: Arc<dyn Middleware>,
    builders: Arc<ResponseBuilders>,
    outbox: Outbox,
    metrics: StreamMetrics,
    tags: Vec<String>,
    backoff: Backoff,
    running: watch::Sender<bool>,
    phase: watch::Sender<ConnectionPhase>,
}

/// Streaming facade. Cheap to clone; clones control the same loop.
#[derive(Clone)]
pub struct StreamingClient {
    shared: Arc<Shared>,
}

impl StreamingClient {
    pub fn builder(
        connector: Arc<dyn StreamConnector>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> StreamingClientBuilder {
        StreamingClientBuilder {
            connector,
            credentials,
            router: None,
            builders: None,
            context: HandlerContext::default(),
            metrics: None,
            backoff: Backoff::default(),
            tags: vec!["rust".to_string()],
        }
    }

    /// Spawn the reconnect loop and return immediately.
    ///
    /// A client runs at most once: calling `start` on a client that already
    /// left [`ConnectionPhase::Idle`] spawns nothing and returns a finished
    /// task.
    pub fn start(&self) -> JoinHandle<()> {
        let started = self.shared.phase.send_if_modified(|phase| {
            if *phase == ConnectionPhase::Idle {
                *phase = ConnectionPhase::Connecting;
                true
            } else {
                false
            }
        });
        if !started {
            warn!(phase = ?self.phase(), "streaming client already started");
            return tokio::spawn(async {});
        }

        self.shared.running.send_replace(true);
        let shared = self.shared.clone();
        tokio::spawn(async move { shared.run().await })
    }

    /// Stop the loop and close the outbox. Safe from any phase.
    pub fn stop(&self) {
        info!("stopping streaming client");
        self.shared.running.send_replace(false);
        self.shared.outbox.close();
        self.shared.phase.send_if_modified(|phase| {
            if *phase == ConnectionPhase::Idle {
                *phase = ConnectionPhase::Stopped;
                true
            } else {
                false
            }
        });
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.borrow()
    }

    pub fn phase(&self) -> ConnectionPhase {
        *self.shared.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ConnectionPhase> {
        self.shared.phase.subscribe()
    }

    pub fn metrics(&self) -> &StreamMetrics {
        &self.shared.metrics
    }
}

impl Shared {
    fn set_phase(&self, phase: ConnectionPhase) {
        self.phase.send_replace(phase);
    }

    async fn run(self: Arc<Self>) {
        let mut backoff = self.backoff.clone();
        let mut running = self.running.subscribe();

        while *running.borrow() {
            self.set_phase(ConnectionPhase::Connecting);
            let outcome = self.connect_once(&mut running).await;
            if !*running.borrow() {
                break;
            }

            self.set_phase(ConnectionPhase::Reconnecting);
            // A credential never outlives the attempt it was fetched for.
            self.credentials.invalidate().await;
            match outcome {
                Ok(()) => {
                    info!("stream closed by peer; reconnecting");
                    self.metrics.record_reconnect("closed");
                    backoff.reset();
                    continue;
                }
                Err(err) if err.is_authentication() => {
                    warn!(error = %err, "stream rejected credentials");
                    self.metrics.record_reconnect(err.kind());
                }
                Err(err) => {
                    error!(kind = err.kind(), error = %err, "stream failed");
                    self.metrics.record_reconnect(err.kind());
                }
            }

            let delay = backoff.next_delay();
            info!(delay_secs = delay.as_secs(), "reconnecting after backoff");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut running) => {}
            }
        }

        self.set_phase(ConnectionPhase::Stopped);
        info!("streaming client stopped");
    }

    /// One connection attempt. `Ok` means the peer closed the stream cleanly
    /// or the client was stopped.
    async fn connect_once(&self, running: &mut watch::Receiver<bool>) -> Result<(), StreamError> {
        let credential = fetch_with_retry(self.credentials.as_ref()).await?;
        let join = self.builders.join(&self.tags)?;
        let mut inbound = self
            .connector
            .open(&credential, self.outbox.sequence(join))
            .await?;
        self.set_phase(ConnectionPhase::Streaming);

        loop {
            tokio::select! {
                item = inbound.next() => match item {
                    Some(Ok(envelope)) => self.dispatch(envelope),
                    Some(Err(err)) => return Err(err),
                    None => return Ok(()),
                },
                _ = stopped(running) => return Ok(()),
            }
        }
    }

    fn dispatch(&self, envelope: Envelope) {
        let chain = self.chain.clone();
        tokio::spawn(async move {
            if let Err(err) = chain.handle(&envelope).await {
                debug!(event_id = envelope.id(), error = %err, "event handling ended with error");
            }
        });
    }
}

/// Resolves once the running flag turns false or its sender is gone.
async fn stopped(running: &mut watch::Receiver<bool>) {
    while *running.borrow_and_update() {
        if running.changed().await.is_err() {
            return;
        }
    }
}
