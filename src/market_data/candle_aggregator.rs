// =============================================================================
// Candle Aggregator: timezone-local OHLC bucketing of a tick stream
// =============================================================================
//
// Bucket boundaries are computed on local wall-clock time in the configured
// timezone: a 60-minute timeframe in Asia/Kolkata starts candles at :00 local,
// which is :30 UTC.
//
// Buckets are ordered by the absolute instant of their start. When the local
// clock repeats an hour (DST fall-back) the repeated hour gets its own buckets,
// each carrying the offset in force at that point.
//
// Exactly one in-progress candle exists once the first tick has been seen. A
// tick in a later bucket closes it into the completed queue; a tick in an
// earlier bucket is rejected and leaves all state untouched.
// =============================================================================

use std::cmp::Ordering;

use chrono::{DateTime, FixedOffset, LocalResult, Offset, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single OHLC candle. `bucket_start` is serialised as `timestamp` with the
/// local UTC offset of the bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "timestamp")]
    pub bucket_start: DateTime<FixedOffset>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    fn opened_at(bucket_start: DateTime<FixedOffset>, price: f64) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    fn apply(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickRejection {
    /// The tick maps to a bucket before the in-progress one.
    OutOfOrder,
    /// Non-finite or non-positive price.
    InvalidPrice,
    /// The timestamp cannot be represented as a calendar date.
    InvalidTimestamp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickOutcome {
    /// First tick ever; an in-progress candle was opened.
    Opened,
    /// The in-progress candle was updated.
    Updated,
    /// The previous candle was closed and a new one opened.
    Rolled,
    Rejected(TickRejection),
}

/// Bucket start as an absolute instant (`key`, epoch seconds) and with the
/// local offset in force at that instant.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    key: i64,
    start: DateTime<FixedOffset>,
}

pub struct CandleAggregator {
    timeframe_secs: i64,
    tz: Tz,
    current_key: Option<i64>,
    current: Option<Candle>,
    completed: Vec<Candle>,
}

impl CandleAggregator {
    /// `timeframe_secs` must be non-zero; `RuntimeConfig::validate` enforces
    /// this before an aggregator is built.
    pub fn new(timeframe_secs: u32, tz: Tz) -> Self {
        Self {
            timeframe_secs: i64::from(timeframe_secs.max(1)),
            tz,
            current_key: None,
            current: None,
            completed: Vec::new(),
        }
    }

    fn bucket_for(&self, epoch_secs: i64) -> Option<Bucket> {
        let local = DateTime::from_timestamp(epoch_secs, 0)?.with_timezone(&self.tz);

        let local_secs = local.naive_local().and_utc().timestamp();
        let floored_secs = local_secs.div_euclid(self.timeframe_secs) * self.timeframe_secs;
        let floored = DateTime::from_timestamp(floored_secs, 0)?.naive_utc();

        let start = match self.tz.from_local_datetime(&floored) {
            LocalResult::Single(start) => start.fixed_offset(),
            // Repeated wall-clock time: the latest pass not after the tick.
            LocalResult::Ambiguous(earliest, latest) => {
                if latest <= local {
                    latest.fixed_offset()
                } else {
                    earliest.fixed_offset()
                }
            }
            // Floored into skipped wall-clock time: keep the tick's offset.
            LocalResult::None => local
                .offset()
                .fix()
                .from_local_datetime(&floored)
                .single()?,
        };
        Some(Bucket {
            key: start.timestamp(),
            start,
        })
    }

    /// Bucket start for a timestamp, in the configured timezone.
    #[cfg(test)]
    pub fn bucket_start(&self, epoch_secs: i64) -> Option<DateTime<FixedOffset>> {
        self.bucket_for(epoch_secs).map(|b| b.start)
    }

    pub fn add_tick(&mut self, price: f64, epoch_secs: i64) -> TickOutcome {
        if !price.is_finite() || price <= 0.0 {
            return TickOutcome::Rejected(TickRejection::InvalidPrice);
        }
        let Some(bucket) = self.bucket_for(epoch_secs) else {
            return TickOutcome::Rejected(TickRejection::InvalidTimestamp);
        };

        match self.current_key.map(|key| bucket.key.cmp(&key)) {
            Some(Ordering::Equal) => {
                if let Some(candle) = self.current.as_mut() {
                    candle.apply(price);
                }
                TickOutcome::Updated
            }
            Some(Ordering::Less) => {
                debug!(
                    epoch_secs,
                    bucket = %bucket.start,
                    "tick precedes the in-progress bucket; rejected"
                );
                TickOutcome::Rejected(TickRejection::OutOfOrder)
            }
            _ => {
                let rolled = match self.current.take() {
                    Some(closed) => {
                        self.completed.push(closed);
                        true
                    }
                    None => false,
                };
                self.current = Some(Candle::opened_at(bucket.start, price));
                self.current_key = Some(bucket.key);
                if rolled {
                    TickOutcome::Rolled
                } else {
                    TickOutcome::Opened
                }
            }
        }
    }

    /// Take every candle closed since the last drain, oldest first.
    pub fn drain_completed(&mut self) -> Vec<Candle> {
        std::mem::take(&mut self.completed)
    }

    /// The in-progress candle, if any tick has been seen.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }
}
