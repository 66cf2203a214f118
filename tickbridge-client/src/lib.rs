//! # Tickbridge Client
//!
//! The consumer side of the bridge: subscribe to per-symbol delta streams,
//! keep a TTL'd local snapshot cache, and degrade to polling the historical
//! API when the stream is down.
//!
//! The cache is authoritative about continuity: a sequence gap invalidates
//! the affected symbol and reads return [`ConsumerRead::Unknown`] until a
//! fresh snapshot arrives.

pub mod api_client;
pub mod cache;
pub mod consumer;
pub mod error;

pub use api_client::BridgeApiClient;
pub use cache::{ApplyOutcome, ConsumerRead, SnapshotCache, TickView};
pub use consumer::{ConsumerConfig, StreamingConsumer};
pub use error::{ClientError, Result};
