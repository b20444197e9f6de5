//! SummitHub Live Tracking Service
//!
//! Real-time GPS session tracking with live fan-out
//!
//! Features:
//! - Incremental distance and elevation gain aggregation per fix
//! - Session-scoped broadcast hub with bounded, drop-on-full subscriber queues
//! - Optional redis relay so several service instances share live subscribers
//! - WebSocket live stream and REST API for sessions and points
pub mod aggregator;
pub mod error;
pub mod geo;
pub mod models;
pub mod repository;
pub mod server;
pub mod stream;
pub mod websocket;

pub use aggregator::TrackingAggregator;
pub use error::TrackingError;
pub use models::{Fix, Session, SessionStatus, StartSessionRequest, Summary, TrackPoint};
pub use repository::{InMemoryTrackingRepository, PostgresTrackingRepository, TrackingRepository};
pub use server::{configure, start_server, ServerState};
pub use stream::{BroadcastHub, HubConfig, InMemoryRelay, RedisRelay, RelayBus, Subscriber};
