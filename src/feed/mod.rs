pub mod backoff;
pub mod connection;
pub mod decoder;
pub mod heartbeat;
pub mod subscription;

pub use connection::{ConnectionState, FeedConnection};
