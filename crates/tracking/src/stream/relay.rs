//! Relay bus connecting hub instances across processes
//!
//! A hub publishes every broadcast on `tracking:{session_id}:broadcast`; the
//! relay bridge of every hub (including the publisher's own) receives it
//! through a pattern subscription. Payloads are wrapped in a small frame
//! carrying the publishing hub's instance id so a hub can skip its own
//! messages.
//!
//! Two buses are provided: [`RedisRelay`] for production and [`InMemoryRelay`]
//! for single-process deployments and tests.
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use redis::AsyncCommands;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::channel::pattern_matches;

/// Stream of inbound relay messages
pub type RelayStream = BoxStream<'static, RelayMessage>;

/// One message received from the relay bus
#[derive(Debug, Clone, PartialEq)]
pub struct RelayMessage {
    pub channel: String,
    pub payload: Bytes,
}

impl RelayMessage {
    pub fn new(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Relay errors; the hub logs these and never surfaces them to callers
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Relay connection error: {0}")]
    Connection(String),

    #[error("Relay publish error on {channel}: {message}")]
    Publish { channel: String, message: String },

    #[error("Relay subscribe error on {pattern}: {message}")]
    Subscribe { pattern: String, message: String },
}

/// Cross-process message bus
///
/// Implementations must allow concurrent `publish` calls from many tasks
/// while a subscription stream is being consumed.
#[async_trait]
pub trait RelayBus: Send + Sync {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), RelayError>;

    /// Subscribe to every channel matching a `*` glob pattern
    async fn subscribe(&self, pattern: &str) -> Result<RelayStream, RelayError>;

    /// Connectivity check for the health endpoint
    async fn is_healthy(&self) -> bool {
        true
    }
}

const FRAME_MAGIC: &[u8; 4] = b"SHR1";
const FRAME_HEADER_LEN: usize = FRAME_MAGIC.len() + 16;

/// Relay wire frame: `SHR1` + 16-byte origin hub id + payload
///
/// Messages without the header (from other publishers) decode with no origin
/// and the whole message as payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayFrame {
    pub origin: Option<Uuid>,
    pub payload: Bytes,
}

impl RelayFrame {
    pub fn encode(origin: Uuid, payload: &[u8]) -> Bytes {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        buf.extend_from_slice(FRAME_MAGIC);
        buf.extend_from_slice(origin.as_bytes());
        buf.extend_from_slice(payload);
        Bytes::from(buf)
    }

    pub fn decode(raw: Bytes) -> Self {
        if raw.len() >= FRAME_HEADER_LEN && raw.starts_with(FRAME_MAGIC) {
            if let Ok(origin) = Uuid::from_slice(&raw[FRAME_MAGIC.len()..FRAME_HEADER_LEN]) {
                return Self {
                    origin: Some(origin),
                    payload: raw.slice(FRAME_HEADER_LEN..),
                };
            }
        }

        Self {
            origin: None,
            payload: raw,
        }
    }
}

/// Redis pub/sub relay
///
/// Publishing goes through one multiplexed connection shared by all callers;
/// each subscription opens its own dedicated pub/sub connection.
pub struct RedisRelay {
    client: redis::Client,
    publisher: redis::aio::MultiplexedConnection,
    connect_timeout: Duration,
}

impl RedisRelay {
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self, RelayError> {
        let client =
            redis::Client::open(url).map_err(|e| RelayError::Connection(e.to_string()))?;

        let publisher = tokio::time::timeout(connect_timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| RelayError::Connection("timed out connecting to redis".to_string()))?
            .map_err(|e| RelayError::Connection(e.to_string()))?;

        tracing::info!("Connected redis relay");

        Ok(Self {
            client,
            publisher,
            connect_timeout,
        })
    }
}

#[async_trait]
impl RelayBus for RedisRelay {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), RelayError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(channel, payload.as_ref())
            .await
            .map_err(|e| RelayError::Publish {
                channel: channel.to_string(),
                message: e.to_string(),
            })?;

        tracing::trace!(channel, receivers, "Published relay message");
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<RelayStream, RelayError> {
        let subscribe_err = |message: String| RelayError::Subscribe {
            pattern: pattern.to_string(),
            message,
        };

        let connection =
            tokio::time::timeout(self.connect_timeout, self.client.get_async_connection())
                .await
                .map_err(|_| subscribe_err("timed out connecting to redis".to_string()))?
                .map_err(|e| subscribe_err(e.to_string()))?;
        let mut pubsub = connection.into_pubsub();

        pubsub
            .psubscribe(pattern)
            .await
            .map_err(|e| subscribe_err(e.to_string()))?;

        tracing::info!(pattern, "Subscribed to redis relay pattern");

        let messages = pubsub.into_on_message().map(|msg| {
            RelayMessage::new(
                msg.get_channel_name().to_string(),
                Bytes::copy_from_slice(msg.get_payload_bytes()),
            )
        });

        Ok(messages.boxed())
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.publisher.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await
            .is_ok()
    }
}

/// In-process relay bus backed by a tokio broadcast channel
///
/// Cloning yields a handle to the same bus, so several hubs in one process
/// can share it exactly as separate processes share a redis server.
#[derive(Clone)]
pub struct InMemoryRelay {
    tx: broadcast::Sender<RelayMessage>,
}

impl InMemoryRelay {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Number of live subscriptions on this bus
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryRelay {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl RelayBus for InMemoryRelay {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), RelayError> {
        // no receivers is not an error, same as redis PUBLISH returning 0
        let _ = self.tx.send(RelayMessage::new(channel, payload));
        Ok(())
    }

    async fn subscribe(&self, pattern: &str) -> Result<RelayStream, RelayError> {
        let rx = self.tx.subscribe();
        let pattern = pattern.to_string();

        let messages = stream::unfold(rx, move |mut rx| {
            let pattern = pattern.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(msg) if pattern_matches(&pattern, &msg.channel) => {
                            return Some((msg, rx));
                        }
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "In-memory relay subscriber lagged");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(messages.boxed())
    }
}
