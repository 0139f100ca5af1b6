pub mod candle_aggregator;
pub mod candle_store;

pub use candle_aggregator::{Candle, CandleAggregator, TickOutcome};
pub use candle_store::CandleStore;
