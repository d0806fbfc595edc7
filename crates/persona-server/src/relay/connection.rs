//! Per-client WebSocket connection state.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use persona_core::{CharacterId, ConnectionId};

/// One connected client.
///
/// Frames are queued to the socket writer through a bounded channel; when the
/// queue is full the frame is dropped and counted rather than awaited.
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::Sender<Arc<str>>,
    /// Joined session. Also serves as the per-connection lock for membership moves.
    session: Mutex<Option<CharacterId>>,
    open: AtomicBool,
    /// Refreshed by any inbound frame or Pong.
    last_seen: Mutex<time::Instant>,
    pub dropped_messages: AtomicU64,
    pub connected_at: Instant,
    close: CancellationToken,
}

impl Connection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<str>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            tx,
            session: Mutex::new(None),
            open: AtomicBool::new(true),
            last_seen: Mutex::new(time::Instant::now()),
            dropped_messages: AtomicU64::new(0),
            connected_at: now,
            close: CancellationToken::new(),
        }
    }

    pub fn session(&self) -> Option<CharacterId> {
        *self.session.lock()
    }

    pub(crate) fn session_slot(&self) -> MutexGuard<'_, Option<CharacterId>> {
        self.session.lock()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Mark the transport closed and wake the socket task. Idempotent.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.close.cancel();
    }

    /// Cancelled once `close` is called.
    pub fn close_token(&self) -> CancellationToken {
        self.close.clone()
    }

    /// Queue a frame. Returns `false` when it was dropped.
    pub fn send(&self, frame: Arc<str>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let dropped = self.dropped_messages.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(client_id = %self.id, frame_len = frame.len(), dropped, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn mark_alive(&self) {
        *self.last_seen.lock() = time::Instant::now();
    }

    /// Time since the client was last heard from.
    pub fn idle_for(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }
}
