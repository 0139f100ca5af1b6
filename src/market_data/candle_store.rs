use std::collections::VecDeque;

use parking_lot::RwLock;

use super::Candle;

// ---------------------------------------------------------------------------
// CandleStore -- bounded, thread-safe history of completed candles
// ---------------------------------------------------------------------------

struct Inner {
    completed: VecDeque<Candle>,
    live: Option<Candle>,
}

/// Thread-safe buffer of completed candles plus the latest in-progress
/// snapshot.
///
/// The feed connection is the only writer. Readers (the REST handlers) copy
/// out what they need under the read lock; no lock is ever held across I/O.
/// Once more than `max_candles` completed candles are held the oldest are
/// dropped.
pub struct CandleStore {
    inner: RwLock<Inner>,
    max_candles: usize,
}

impl CandleStore {
    pub fn new(max_candles: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                completed: VecDeque::with_capacity(max_candles.min(4096)),
                live: None,
            }),
            max_candles: max_candles.max(1),
        }
    }

    /// Append a batch of completed candles, oldest first. The whole batch
    /// becomes visible at once.
    pub fn append(&self, candles: Vec<Candle>) {
        if candles.is_empty() {
            return;
        }
        let mut inner = self.inner.write();
        inner.completed.extend(candles);
        while inner.completed.len() > self.max_candles {
            inner.completed.pop_front();
        }
    }

    /// Up to `n` of the most recently appended candles (oldest-first order).
    pub fn read_last(&self, n: usize) -> Vec<Candle> {
        let inner = self.inner.read();
        let start = inner.completed.len().saturating_sub(n);
        inner.completed.range(start..).cloned().collect()
    }

    /// Replace the in-progress snapshot.
    pub fn set_live(&self, candle: Option<Candle>) {
        self.inner.write().live = candle;
    }

    pub fn live(&self) -> Option<Candle> {
        self.inner.read().live.clone()
    }

    /// Close price of the most recent completed candle, if any.
    #[cfg(test)]
    pub fn last_close(&self) -> Option<f64> {
        self.inner.read().completed.back().map(|c| c.close)
    }

    pub fn len(&self) -> usize {
        self.inner.read().completed.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_candles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use chrono::{DateTime, FixedOffset};

    use super::*;

    fn sample_candle(minute: i64, close: f64) -> Candle {
        let start: DateTime<FixedOffset> = DateTime::from_timestamp(1_700_000_000 + minute * 60, 0)
            .unwrap()
            .fixed_offset();
        Candle {
            bucket_start: start,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
        }
    }

    #[test]
    fn read_last_returns_tail_in_order() {
        let store = CandleStore::new(100);
        store.append((0..5).map(|i| sample_candle(i, 100.0 + i as f64)).collect());

        let closes: Vec<f64> = store.read_last(3).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
        assert_eq!(store.read_last(50).len(), 5);
        assert!(store.read_last(0).is_empty());
    }

    #[test]
    fn retention_cap_drops_oldest() {
        let store = CandleStore::new(3);
        for i in 0..5 {
            store.append(vec![sample_candle(i, 100.0 + i as f64)]);
        }
        assert_eq!(store.len(), 3);
        let closes: Vec<f64> = store.read_last(10).iter().map(|c| c.close).collect();
        assert_eq!(closes, vec![102.0, 103.0, 104.0]);
        assert_eq!(store.last_close(), Some(104.0));
    }

    #[test]
    fn empty_store() {
        let store = CandleStore::new(10);
        assert!(store.is_empty());
        assert_eq!(store.last_close(), None);
        assert!(store.read_last(5).is_empty());
        assert_eq!(store.live(), None);
    }

    #[test]
    fn live_candle_is_not_part_of_history() {
        let store = CandleStore::new(10);
        store.append(vec![sample_candle(0, 10.0)]);
        store.set_live(Some(sample_candle(1, 11.0)));
        assert_eq!(store.read_last(10).len(), 1);
        assert_eq!(store.live().map(|c| c.close), Some(11.0));
        store.set_live(None);
        assert_eq!(store.live(), None);
    }

    #[test]
    fn concurrent_readers_see_whole_batches_in_order() {
        const BATCHES: i64 = 200;
        const BATCH: i64 = 3;

        let store = Arc::new(CandleStore::new(10_000));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut last_seen = 0usize;
                    while !done.load(Ordering::Acquire) {
                        let snapshot = store.read_last(usize::MAX);
                        assert!(snapshot.len() >= last_seen, "reader went backwards");
                        assert_eq!(snapshot.len() as i64 % BATCH, 0, "partial batch observed");
                        for (i, c) in snapshot.iter().enumerate() {
                            assert_eq!(c.close, i as f64, "duplicate or reordered candle");
                        }
                        last_seen = snapshot.len();
                    }
                })
            })
            .collect();

        for b in 0..BATCHES {
            let batch = (0..BATCH)
                .map(|k| {
                    let idx = b * BATCH + k;
                    sample_candle(idx, idx as f64)
                })
                .collect();
            store.append(batch);
            // Every fully appended batch must be visible to a read started now.
            assert!(store.read_last(usize::MAX).len() as i64 >= (b + 1) * BATCH);
        }
        done.store(true, Ordering::Release);

        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(store.len() as i64, BATCHES * BATCH);
    }
}
