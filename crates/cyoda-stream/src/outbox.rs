//! Ordered hand-off between message handlers and the outbound stream.
//!
//! Any number of handler tasks may [`Outbox::send`]; exactly one outbound
//! sequence drains the queue at a time. Creating a new sequence ends the
//! previous one. The queue is unbounded so producers never wait on the wire.

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, Mutex, Notify};
use tracing::debug;

use crate::envelope::Envelope;

#[derive(Debug)]
enum OutboxItem {
    Message(Envelope),
    Close,
}

struct OutboxInner {
    tx: mpsc::UnboundedSender<OutboxItem>,
    rx: Mutex<mpsc::UnboundedReceiver<OutboxItem>>,
    closed: AtomicBool,
    generation: AtomicU64,
    superseded: Notify,
}

impl OutboxInner {
    async fn next_item(&self, generation: u64) -> Option<Envelope> {
        let superseded = self.superseded.notified();
        tokio::pin!(superseded);
        superseded.as_mut().enable();
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }

        let mut rx = self.rx.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            return None;
        }
        let item = match rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) if self.closed.load(Ordering::SeqCst) => None,
            Err(TryRecvError::Empty) => tokio::select! {
                item = rx.recv() => item,
                _ = &mut superseded => None,
            },
            Err(TryRecvError::Disconnected) => None,
        };

        match item {
            Some(OutboxItem::Message(envelope)) => Some(envelope),
            Some(OutboxItem::Close) | None => None,
        }
    }
}

/// FIFO outbound queue terminated by a close sentinel.
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

impl Outbox {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(OutboxInner {
                tx,
                rx: Mutex::new(rx),
                closed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                superseded: Notify::new(),
            }),
        }
    }

    /// Enqueue an envelope. Returns `false` when the outbox is closed and the
    /// envelope was discarded.
    pub fn send(&self, envelope: Envelope) -> bool {
        if self.is_closed() {
            debug!(
                event_id = envelope.id(),
                event_type = envelope.event_type(),
                "outbox closed; discarding envelope"
            );
            return false;
        }
        self.inner.tx.send(OutboxItem::Message(envelope)).is_ok()
    }

    /// Enqueue the close sentinel. Safe to call repeatedly.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let _ = self.inner.tx.send(OutboxItem::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Outbound sequence for one connection: `join`, then every queued
    /// envelope in order, ending at the first close sentinel.
    ///
    /// Envelopes not yet drained when a connection drops stay queued for the
    /// next sequence.
    pub fn sequence(&self, join: Envelope) -> BoxStream<'static, Envelope> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.superseded.notify_waiters();

        let queued = stream::unfold(self.inner.clone(), move |inner| async move {
            let envelope = inner.next_item(generation).await?;
            Some((envelope, inner))
        });

        stream::once(async move { join }).chain(queued).boxed()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}
