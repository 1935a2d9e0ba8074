//! Exchange Adapter: per-venue streaming clients.
//!
//! Every venue's wire protocol differs in envelope shape, but the
//! supervisor only ever sees the same capability set — `symbols()`,
//! `spawn(cache, cancel)`, `is_connected()` — matching the single
//! capability-set/one-impl-per-venue design. Concrete venues live in
//! sibling modules (`binance`, `bybit`); both follow the same
//! `CONNECTING -> STREAMING -> (ERROR | CLOSED) -> BACKOFF(5s) -> CONNECTING`
//! state machine used by the project's other streaming feeds.

pub mod binance;
pub mod bybit;

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::FreshnessCache;
use crate::types::{Symbol, VenueId};

/// Observable lifecycle of a single per-symbol stream task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    Connecting = 0,
    Streaming = 1,
    Error = 2,
    Backoff = 3,
    Closed = 4,
}

impl StreamState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Streaming,
            2 => Self::Error,
            3 => Self::Backoff,
            _ => Self::Closed,
        }
    }
}

/// Lock-free state cell the supervisor (or a test) can poll without
/// touching the adapter's internal task.
#[derive(Default)]
pub struct StreamStateCell(AtomicU8);

impl StreamStateCell {
    pub fn get(&self) -> StreamState {
        StreamState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: StreamState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Backoff applied between a stream's `ERROR`/`CLOSED` state and its next
/// `CONNECTING` attempt.
pub const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

/// Ceiling on a single `connect_async` call and on the wait for the next
/// message once streaming. Distinct from [`RECONNECT_BACKOFF`]: this bounds
/// how long a stalled handshake or a silent socket can hang before the
/// stream is torn down and retried, not how long the loop waits before that
/// retry.
pub const STREAM_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Grace period the supervisor gives an adapter to stop before abandoning it.
pub const SHUTDOWN_GRACE: std::time::Duration = std::time::Duration::from_secs(15);

/// The capability set every venue adapter implements. The supervisor
/// is polymorphic only over this trait.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// The venue this adapter streams from.
    fn venue(&self) -> &VenueId;

    /// Resolves the operating symbol set: configured symbols intersected
    /// with what the venue actually supports. A venue that can enumerate no
    /// usable symbol should return an empty vec — the supervisor skips it
    /// with a warning rather than treating it as fatal.
    fn symbols(&self) -> Vec<Symbol>;

    /// Launches one supervised task per symbol, writing normalized
    /// snapshots into `cache`. Returns immediately; tasks run until
    /// `cancel` fires.
    async fn spawn(self: Arc<Self>, cache: Arc<FreshnessCache>, cancel: CancellationToken);

    /// Whether any stream for this venue currently believes itself
    /// connected. Best-effort, used for diagnostics only.
    fn is_connected(&self) -> bool;
}

/// Shared connectivity flag a concrete adapter can implement `is_connected`
/// against; factored out because every venue needs the identical bit.
#[derive(Default)]
pub struct ConnectedFlag(AtomicBool);

impl ConnectedFlag {
    pub fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
