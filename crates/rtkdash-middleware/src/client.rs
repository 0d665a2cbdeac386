//! [`SseClient`] – one browser subscription and its liveness.
//!
//! A client moves `Connected → Stale` when a write to it fails, or when
//! frames wait on it longer than the write timeout, and
//! to `Closed` when its transport goes away. Neither transition is ever
//! reversed; the broadcaster evicts anything that is not `Connected` on its
//! next heartbeat tick.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// ClientState
// ────────────────────────────────────────────────────────────────────────────

/// Liveness of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Events are being written successfully.
    Connected,
    /// A write failed, timed out or could not be queued.
    Stale,
    /// The transport was closed by the peer or by the server.
    Closed,
}

impl ClientState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connected,
            1 => Self::Stale,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Connected => 0,
            Self::Stale => 1,
            Self::Closed => 2,
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connected => "connected",
            Self::Stale => "stale",
            Self::Closed => "closed",
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

/// State shared between the broadcaster, the writer task and any handles.
pub(crate) struct ClientShared {
    id: Uuid,
    state: AtomicU8,
    epoch: Instant,
    /// Microseconds since `epoch` of the last successful write.
    last_activity_us: AtomicU64,
    /// Frames queued but not yet written.
    pending: AtomicUsize,
    shutdown: Notify,
}

impl ClientShared {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            id: Uuid::new_v4(),
            state: AtomicU8::new(ClientState::Connected.as_u8()),
            epoch: Instant::now(),
            last_activity_us: AtomicU64::new(0),
            pending: AtomicUsize::new(0),
            shutdown: Notify::new(),
        })
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Record a successful write. The timestamp never moves backwards.
    pub(crate) fn touch(&self) {
        let now = self.epoch.elapsed().as_micros() as u64;
        self.last_activity_us.fetch_max(now, Ordering::AcqRel);
    }

    pub(crate) fn last_activity(&self) -> Instant {
        self.epoch + Duration::from_micros(self.last_activity_us.load(Ordering::Acquire))
    }

    /// Account for one newly queued frame. An idle client restarts its
    /// activity clock so the wait is measured from this frame.
    pub(crate) fn queued(&self) {
        if self.pending.fetch_add(1, Ordering::AcqRel) == 0 {
            self.touch();
        }
    }

    /// Account for `n` frames written to the transport.
    pub(crate) fn written(&self, n: usize) {
        self.touch();
        self.pending.fetch_sub(n, Ordering::AcqRel);
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Frames are waiting and nothing has been written for `timeout`.
    pub(crate) fn is_lagging(&self, timeout: Duration) -> bool {
        self.pending() > 0 && self.last_activity().elapsed() > timeout
    }

    /// `Connected → Stale`. Returns `true` if this call made the transition.
    pub(crate) fn mark_stale(&self) -> bool {
        let changed = self
            .state
            .compare_exchange(
                ClientState::Connected.as_u8(),
                ClientState::Stale.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if changed {
            self.shutdown.notify_waiters();
        }
        changed
    }

    /// Any state `→ Closed`.
    pub(crate) fn close(&self) {
        let previous = self.state.swap(ClientState::Closed.as_u8(), Ordering::AcqRel);
        if previous != ClientState::Closed.as_u8() {
            self.shutdown.notify_waiters();
        }
    }

    /// Resolves once the client leaves `Connected`.
    pub(crate) async fn stopped(&self) {
        loop {
            let notified = self.shutdown.notified();
            tokio::pin!(notified);
            // Register before checking so a transition in between is not lost.
            notified.as_mut().enable();
            if self.state() != ClientState::Connected {
                return;
            }
            notified.await;
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SseClient
// ────────────────────────────────────────────────────────────────────────────

/// Handle to one subscription returned by
/// [`EventBroadcaster::subscribe`](crate::EventBroadcaster::subscribe).
///
/// Cloning is cheap; all clones observe the same state.
#[derive(Clone)]
pub struct SseClient {
    shared: Arc<ClientShared>,
}

impl SseClient {
    pub(crate) fn new(shared: Arc<ClientShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> Uuid {
        self.shared.id()
    }

    pub fn state(&self) -> ClientState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Instant of the last frame successfully written to the transport.
    pub fn last_activity(&self) -> Instant {
        self.shared.last_activity()
    }

    /// Close the subscription, e.g. when the peer hung up. The writer task
    /// stops and the broadcaster drops the client on its next tick.
    pub fn close(&self) {
        self.shared.close();
    }

    /// Wait until the subscription is no longer `Connected`.
    pub async fn stopped(&self) {
        self.shared.stopped().await;
    }
}

impl fmt::Debug for SseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseClient")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}
