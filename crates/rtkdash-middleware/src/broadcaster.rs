//! [`EventBroadcaster`] – fan-out of named events to Server-Sent Events
//! subscribers.
//!
//! Each subscriber owns a queue drained by its own writer task, so a publisher
//! never waits on a browser. Staleness is measured in time, not queue depth:
//! a subscriber whose transport write fails, whose write stalls past
//! [`BroadcasterConfig::write_timeout`], or whose oldest queued frame has
//! waited longer than that timeout is marked stale. A burst of events to a
//! browser that keeps reading is delivered in full. Stale and closed
//! subscribers are dropped on the next [`EventBroadcaster::tick`].
//!
//! Events published concurrently for *different* fields may reach a client in
//! either order. Events for the same field arrive in publish order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use rtkdash_types::{ChangeSink, FieldChange};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::{ClientShared, ClientState, SseClient};
use crate::frame;

type Frame = Arc<str>;

/// A frame plus the instant it was queued, used to measure lag.
struct Queued {
    frame: Frame,
    at: Instant,
}

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Tuning knobs for [`EventBroadcaster`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcasterConfig {
    /// Most queued frames a writer sends with a single flush.
    pub client_buffer: usize,
    /// Longest a write may take, or a queued frame may wait, before the
    /// client goes stale.
    pub write_timeout: Duration,
    /// Interval between heartbeat ticks driven by the server.
    pub heartbeat_interval: Duration,
    /// Reconnect delay advertised to browsers via `retry:`.
    pub retry_hint: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            client_buffer: 64,
            write_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(5),
            retry_hint: Duration::from_secs(10),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Reports
// ────────────────────────────────────────────────────────────────────────────

/// Outcome of one [`EventBroadcaster::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Event id assigned to this publish.
    pub id: u64,
    /// Clients the frame was queued for.
    pub delivered: usize,
    /// Clients whose writer had already gone; they were marked stale.
    pub dropped: usize,
}

/// Outcome of one [`EventBroadcaster::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Clients still connected after the tick.
    pub live: usize,
    /// Clients removed by this tick.
    pub evicted: Vec<Uuid>,
}

// ────────────────────────────────────────────────────────────────────────────
// EventBroadcaster
// ────────────────────────────────────────────────────────────────────────────

struct ClientSlot {
    tx: mpsc::UnboundedSender<Queued>,
    shared: Arc<ClientShared>,
}

impl ClientSlot {
    /// Queue `frame`. `false` means the writer task is gone.
    fn push(&self, frame: &Frame) -> bool {
        self.shared.queued();
        self.tx
            .send(Queued {
                frame: Arc::clone(frame),
                at: Instant::now(),
            })
            .is_ok()
    }
}

/// Registry of live SSE subscribers.
///
/// Share it behind an `Arc`; every method takes `&self`.
pub struct EventBroadcaster {
    config: BroadcasterConfig,
    clients: RwLock<HashMap<Uuid, ClientSlot>>,
    next_id: AtomicU64,
    heartbeat: Frame,
}

impl EventBroadcaster {
    pub fn new(mut config: BroadcasterConfig) -> Self {
        config.client_buffer = config.client_buffer.max(1);
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            heartbeat: Arc::from(frame::HEARTBEAT),
        }
    }

    pub fn config(&self) -> &BroadcasterConfig {
        &self.config
    }

    /// Register `transport` as a new subscriber and start its writer task.
    ///
    /// The transport receives the `retry:` preamble first, then every event
    /// published from this point on. Must be called within a Tokio runtime.
    pub fn subscribe<W>(&self, transport: W) -> SseClient
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = ClientShared::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let slot = ClientSlot {
            tx,
            shared: Arc::clone(&shared),
        };

        let retry_ms = self.config.retry_hint.as_millis() as u64;
        slot.push(&Frame::from(frame::retry(retry_ms)));

        let id = shared.id();
        self.write_clients().insert(id, slot);
        tokio::spawn(write_loop(
            transport,
            rx,
            Arc::clone(&shared),
            self.config.write_timeout,
            self.config.client_buffer,
        ));

        info!(client = %id, clients = self.client_count(), "SSE client subscribed");
        SseClient::new(shared)
    }

    /// Queue one named event for every connected client.
    ///
    /// Never waits on a client. Only a client whose writer has already
    /// stopped misses the frame, and it is marked stale.
    pub fn publish(&self, event: &str, data: &str) -> PublishReport {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let encoded: Frame = Frame::from(frame::event(id, event, data));

        let mut report = PublishReport {
            id,
            ..PublishReport::default()
        };
        for slot in self.read_clients().values() {
            if slot.shared.state() != ClientState::Connected {
                continue;
            }
            if slot.push(&encoded) {
                report.delivered += 1;
            } else {
                warn!(client = %slot.shared.id(), event, "client writer gone, marking stale");
                slot.shared.mark_stale();
                report.dropped += 1;
            }
        }
        report
    }

    /// Send a heartbeat to every connected client and drop the ones that are
    /// stale, closed, or have had frames waiting longer than
    /// [`BroadcasterConfig::write_timeout`].
    ///
    /// The server calls this every [`BroadcasterConfig::heartbeat_interval`].
    pub fn tick(&self) -> TickReport {
        let mut evicted = Vec::new();
        {
            let clients = self.read_clients();
            for (id, slot) in clients.iter() {
                if slot.shared.state() == ClientState::Connected {
                    if slot.shared.is_lagging(self.config.write_timeout) {
                        debug!(client = %id, pending = slot.shared.pending(), "client stopped draining");
                        slot.shared.mark_stale();
                    } else if !slot.push(&self.heartbeat) {
                        debug!(client = %id, "heartbeat could not be queued");
                        slot.shared.mark_stale();
                    }
                }
                if slot.shared.state() != ClientState::Connected {
                    evicted.push(*id);
                }
            }
        }

        let live = if evicted.is_empty() {
            self.client_count()
        } else {
            let mut clients = self.write_clients();
            for id in &evicted {
                if let Some(slot) = clients.remove(id) {
                    info!(client = %id, state = %slot.shared.state(), "SSE client evicted");
                }
            }
            clients.len()
        };

        TickReport { live, evicted }
    }

    /// Number of registered clients, including ones awaiting eviction.
    pub fn client_count(&self) -> usize {
        self.read_clients().len()
    }

    fn read_clients(&self) -> RwLockReadGuard<'_, HashMap<Uuid, ClientSlot>> {
        self.clients.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_clients(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, ClientSlot>> {
        self.clients.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(BroadcasterConfig::default())
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("config", &self.config)
            .field("clients", &self.client_count())
            .finish()
    }
}

/// Field writes become events named after the field, carrying the formatted
/// value.
impl ChangeSink for EventBroadcaster {
    fn field_changed(&self, change: &FieldChange) {
        self.publish(change.field.name(), &change.formatted);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Writer task
// ────────────────────────────────────────────────────────────────────────────

async fn write_loop<W>(
    mut transport: W,
    mut rx: mpsc::UnboundedReceiver<Queued>,
    shared: Arc<ClientShared>,
    write_timeout: Duration,
    max_batch: usize,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let mut batch = Vec::with_capacity(max_batch);
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.stopped() => None,
            next = rx.recv() => next,
        };
        let Some(first) = next else { break };

        let waited = first.at.elapsed();
        if waited > write_timeout {
            debug!(client = %shared.id(), waited_ms = waited.as_millis() as u64, "SSE client lagging");
            shared.mark_stale();
            break;
        }
        batch.push(first);
        while batch.len() < max_batch {
            match rx.try_recv() {
                Ok(queued) => batch.push(queued),
                Err(_) => break,
            }
        }

        match time::timeout(write_timeout, write_batch(&mut transport, &batch)).await {
            Ok(Ok(())) => {
                shared.written(batch.len());
                batch.clear();
            }
            Ok(Err(e)) => {
                debug!(client = %shared.id(), error = %e, "SSE write failed");
                shared.mark_stale();
                break;
            }
            Err(_) => {
                debug!(client = %shared.id(), timeout_ms = write_timeout.as_millis() as u64, "SSE write timed out");
                shared.mark_stale();
                break;
            }
        }
    }
    let _ = time::timeout(write_timeout, transport.shutdown()).await;
}

async fn write_batch<W: AsyncWrite + Unpin>(transport: &mut W, batch: &[Queued]) -> std::io::Result<()> {
    for queued in batch {
        transport.write_all(queued.frame.as_bytes()).await?;
    }
    transport.flush().await
}
