// =============================================================================
// Central Application State
// =============================================================================
//
// Ties the candle store and the feed status together for the REST handlers.
// The feed task holds its own `Arc`s to the same store and status, so nothing
// here is a process-wide singleton: tests build as many instances as they need.
//
// Thread safety:
//   - Atomic counters for lock-free version and statistics tracking.
//   - parking_lot::RwLock for the connection state and timestamps.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::feed::ConnectionState;
use crate::market_data::CandleStore;
use crate::runtime_config::RuntimeConfig;

// =============================================================================
// FeedStatus
// =============================================================================

/// Live statistics written by the feed task, read by the status endpoint.
pub struct FeedStatus {
    state: RwLock<ConnectionState>,
    last_state_change: RwLock<DateTime<Utc>>,
    last_tick_exchange_ts: RwLock<Option<i64>>,
    last_error: RwLock<Option<String>>,

    pub connections: AtomicU64,
    pub disconnects: AtomicU64,
    pub ticks_accepted: AtomicU64,
    pub ticks_rejected: AtomicU64,
    pub packets_ignored: AtomicU64,
    pub decode_errors: AtomicU64,
    pub candles_published: AtomicU64,

    /// Attempt number and delay of the most recent reconnect backoff.
    reconnect_attempt: AtomicU64,
    last_backoff_ms: AtomicU64,
}

/// Serialisable copy of [`FeedStatus`].
#[derive(Debug, Clone, Serialize)]
pub struct FeedStatusSnapshot {
    pub state: ConnectionState,
    pub last_state_change: String,
    pub last_tick_exchange_ts: Option<i64>,
    pub last_error: Option<String>,
    pub connections: u64,
    pub disconnects: u64,
    pub ticks_accepted: u64,
    pub ticks_rejected: u64,
    pub packets_ignored: u64,
    pub decode_errors: u64,
    pub candles_published: u64,
    pub reconnect_attempt: u64,
    pub last_backoff_ms: u64,
}

impl FeedStatus {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            last_state_change: RwLock::new(Utc::now()),
            last_tick_exchange_ts: RwLock::new(None),
            last_error: RwLock::new(None),
            connections: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            ticks_accepted: AtomicU64::new(0),
            ticks_rejected: AtomicU64::new(0),
            packets_ignored: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            candles_published: AtomicU64::new(0),
            reconnect_attempt: AtomicU64::new(0),
            last_backoff_ms: AtomicU64::new(0),
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            *current = state;
            *self.last_state_change.write() = Utc::now();
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn record_error(&self, msg: impl Into<String>) {
        *self.last_error.write() = Some(msg.into());
    }

    pub fn record_tick(&self, exchange_ts: i64) {
        self.ticks_accepted.fetch_add(1, Ordering::Relaxed);
        *self.last_tick_exchange_ts.write() = Some(exchange_ts);
    }

    pub fn record_backoff(&self, attempt: u32, delay: Duration) {
        self.reconnect_attempt
            .store(u64::from(attempt), Ordering::Relaxed);
        self.last_backoff_ms
            .store(delay.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FeedStatusSnapshot {
        FeedStatusSnapshot {
            state: self.state(),
            last_state_change: self.last_state_change.read().to_rfc3339(),
            last_tick_exchange_ts: *self.last_tick_exchange_ts.read(),
            last_error: self.last_error.read().clone(),
            connections: self.connections.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            ticks_accepted: self.ticks_accepted.load(Ordering::Relaxed),
            ticks_rejected: self.ticks_rejected.load(Ordering::Relaxed),
            packets_ignored: self.packets_ignored.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            candles_published: self.candles_published.load(Ordering::Relaxed),
            reconnect_attempt: self.reconnect_attempt.load(Ordering::Relaxed),
            last_backoff_ms: self.last_backoff_ms.load(Ordering::Relaxed),
        }
    }
}

impl Default for FeedStatus {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// AppState
// =============================================================================

/// Shared state handed to the REST router via `Arc<AppState>`.
pub struct AppState {
    /// Incremented whenever candles are published. Lets pollers skip
    /// unchanged responses.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub candle_store: Arc<CandleStore>,
    pub feed_status: Arc<FeedStatus>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        let store = Arc::new(CandleStore::new(config.max_candles));
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            candle_store: store,
            feed_status: Arc::new(FeedStatus::new()),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_snapshot_reflects_counters() {
        let status = FeedStatus::new();
        assert_eq!(status.state(), ConnectionState::Disconnected);

        status.set_state(ConnectionState::Connected);
        FeedStatus::bump(&status.connections);
        status.record_tick(1_700_000_000);
        status.record_tick(1_700_000_005);
        FeedStatus::bump(&status.decode_errors);
        status.record_error("boom");
        status.record_backoff(3, Duration::from_millis(4_000));

        let snap = status.snapshot();
        assert_eq!(snap.state, ConnectionState::Connected);
        assert_eq!(snap.connections, 1);
        assert_eq!(snap.ticks_accepted, 2);
        assert_eq!(snap.decode_errors, 1);
        assert_eq!(snap.last_tick_exchange_ts, Some(1_700_000_005));
        assert_eq!(snap.last_error.as_deref(), Some("boom"));
        assert_eq!((snap.reconnect_attempt, snap.last_backoff_ms), (3, 4_000));
    }

    #[test]
    fn app_state_store_uses_configured_capacity() {
        let mut cfg = RuntimeConfig::default();
        cfg.max_candles = 7;
        let state = AppState::new(cfg);
        assert_eq!(state.candle_store.capacity(), 7);
        let v = state.current_state_version();
        state.increment_version();
        assert_eq!(state.current_state_version(), v + 1);
    }
}
