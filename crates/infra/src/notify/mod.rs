//! Cross-process change notification transports.
//!
//! In-process deployments use `stockroom_events::InMemoryEventBus`; the
//! transports here carry the same envelopes between processes.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisNotificationBus};

/// Default pub/sub channel for ledger commits.
pub const DEFAULT_CHANNEL: &str = "stockroom.ledger";
