//! Live update fan-out
//!
//! - [`hub`]: per-session subscriber registry with bounded, drop-on-full queues
//! - [`relay`]: cross-process message bus (redis or in-memory)
//! - [`bridge`]: background task delivering relay messages to local subscribers
//! - [`channel`]: relay channel naming

mod bridge;
pub mod channel;
pub mod hub;
pub mod relay;

pub use channel::{broadcast_channel, session_id_from_channel, BROADCAST_PATTERN};
pub use hub::{BroadcastHub, HubConfig, HubMetricsSnapshot, Subscriber, SubscriberKey};
pub use relay::{InMemoryRelay, RedisRelay, RelayBus, RelayError, RelayFrame, RelayMessage};
