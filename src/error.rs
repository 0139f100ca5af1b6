// =============================================================================
// Error types: decode, configuration and feed-loop failures
// =============================================================================
//
// Setup paths use `anyhow` with context. The enums below exist for the places
// where callers branch on the failure kind.
// =============================================================================

use thiserror::Error;

/// A packet that cannot become a tick. Always recoverable: the packet is
/// dropped and the stream continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("packet truncated: need {needed} bytes, got {got}")]
    Truncated { needed: usize, got: usize },

    #[error("ticker price {0} is not a finite positive number")]
    InvalidPrice(f64),
}

/// Startup configuration problems. Fatal: the process must not connect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingCredential(&'static str),

    #[error("unknown timezone identifier: {0}")]
    UnknownTimezone(String),

    #[error("timeframe must be at least one second")]
    InvalidTimeframe,

    #[error("max_candles must be greater than zero")]
    InvalidCapacity,

    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("reconnect_initial_ms ({initial}) exceeds reconnect_max_ms ({max})")]
    InvalidBackoff { initial: u64, max: u64 },
}

/// Conditions that stop the feed loop for good.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed endpoint rejected credentials (HTTP {status})")]
    AuthRejected { status: u16 },

    #[error("invalid feed endpoint: {0}")]
    InvalidEndpoint(#[from] url::ParseError),
}
