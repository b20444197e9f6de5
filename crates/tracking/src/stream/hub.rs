//! Session-scoped broadcast hub
//!
//! Keeps a registry of live subscribers per tracking session and fans out
//! payloads to them. Every subscriber owns a bounded queue; fan-out uses
//! `try_send`, so a slow subscriber loses messages instead of stalling the
//! producer.
//!
//! When a relay bus is attached, every broadcast is also published on the
//! session's relay channel and a background [`RelayBridge`] feeds messages
//! published by other hub instances into the local registry.
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use summithub_core::config::parse_env_var;
use summithub_core::{RetryPolicy, SummitHubError};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::bridge::RelayBridge;
use super::channel::broadcast_channel;
use super::relay::{RelayBus, RelayFrame};

/// Default per-subscriber queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Hub configuration
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages buffered per subscriber before new ones are dropped
    pub queue_capacity: usize,

    /// Backoff schedule for relay resubscription
    pub resubscribe_policy: RetryPolicy,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            resubscribe_policy: RetryPolicy::resubscribe(),
        }
    }
}

impl HubConfig {
    /// Read `SUMMITHUB_HUB_QUEUE_CAPACITY` (default 64)
    pub fn from_env() -> Result<Self, SummitHubError> {
        let queue_capacity =
            parse_env_var("SUMMITHUB_HUB_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        if queue_capacity == 0 {
            return Err(SummitHubError::config(
                "queue capacity must be greater than 0",
                "SUMMITHUB_HUB_QUEUE_CAPACITY",
            ));
        }

        Ok(Self {
            queue_capacity,
            ..Self::default()
        })
    }

    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }
}

/// Registry identity of a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberKey {
    pub id: Uuid,
    pub session_id: String,
}

/// Receiving end of a subscription
///
/// The queue closes when the subscriber is unregistered; `recv` then drains
/// whatever is still buffered and returns `None`.
#[derive(Debug)]
pub struct Subscriber {
    key: SubscriberKey,
    receiver: mpsc::Receiver<Bytes>,
}

impl Subscriber {
    pub fn key(&self) -> &SubscriberKey {
        &self.key
    }

    /// Wait for the next payload; `None` once unregistered and drained
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.receiver.recv().await
    }

    /// Next buffered payload without waiting
    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Hub counters
#[derive(Debug, Default)]
pub struct HubMetrics {
    delivered: AtomicU64,
    dropped: AtomicU64,
    relay_published: AtomicU64,
    relay_failed: AtomicU64,
    relay_forwarded: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HubMetricsSnapshot {
    /// Payloads enqueued to a subscriber
    pub delivered: u64,
    /// Payloads dropped because a subscriber queue was full
    pub dropped: u64,
    pub relay_published: u64,
    pub relay_failed: u64,
    /// Relay messages from other instances fanned out locally
    pub relay_forwarded: u64,
}

impl HubMetrics {
    pub(crate) fn record_relay_forwarded(&self) {
        self.relay_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            relay_published: self.relay_published.load(Ordering::Relaxed),
            relay_failed: self.relay_failed.load(Ordering::Relaxed),
            relay_forwarded: self.relay_forwarded.load(Ordering::Relaxed),
        }
    }
}

type SessionSubscribers = HashMap<Uuid, mpsc::Sender<Bytes>>;

/// Registry shared between the hub and its relay bridge
pub(crate) struct Registry {
    sessions: RwLock<HashMap<String, SessionSubscribers>>,
    pub(crate) metrics: HubMetrics,
}

impl Registry {
    fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            metrics: HubMetrics::default(),
        }
    }

    /// Non-blocking fan-out to local subscribers; returns how many got the payload
    pub(crate) fn deliver_local(&self, session_id: &str, payload: &Bytes) -> usize {
        let targets: Vec<(Uuid, mpsc::Sender<Bytes>)> = {
            let sessions = self.sessions.read();
            match sessions.get(session_id) {
                Some(subscribers) => subscribers
                    .iter()
                    .map(|(id, tx)| (*id, tx.clone()))
                    .collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        session_id,
                        subscriber_id = %id,
                        "Subscriber queue full, dropping message"
                    );
                }
                // receiver dropped without unregistering
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            self.prune(session_id, &closed);
        }

        self.metrics
            .delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);
        delivered
    }

    fn prune(&self, session_id: &str, closed: &[Uuid]) {
        let mut sessions = self.sessions.write();
        let Some(subscribers) = sessions.get_mut(session_id) else {
            return;
        };

        for id in closed {
            // the id may have been unregistered concurrently
            if subscribers.get(id).is_some_and(|tx| tx.is_closed()) {
                subscribers.remove(id);
            }
        }
        if subscribers.is_empty() {
            sessions.remove(session_id);
        }

        tracing::debug!(
            session_id,
            pruned = closed.len(),
            "Pruned closed live subscribers"
        );
    }
}

struct RelayLink {
    bus: Arc<dyn RelayBus>,
    bridge: Mutex<Option<RelayBridge>>,
}

/// Session-keyed broadcast hub
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct BroadcastHub {
    instance_id: Uuid,
    config: HubConfig,
    registry: Arc<Registry>,
    relay: Option<RelayLink>,
}

impl BroadcastHub {
    /// Hub without a relay; broadcasts reach local subscribers only
    pub fn new(config: HubConfig) -> Self {
        Self {
            instance_id: Uuid::new_v4(),
            config,
            registry: Arc::new(Registry::new()),
            relay: None,
        }
    }

    /// Hub attached to a relay bus
    ///
    /// Subscribes to the broadcast pattern before returning, so messages
    /// published on the bus afterwards are not missed. A failed initial
    /// subscription is logged and retried in the background; the hub works
    /// locally in the meantime.
    pub async fn with_relay(config: HubConfig, bus: Arc<dyn RelayBus>) -> Self {
        let instance_id = Uuid::new_v4();
        let registry = Arc::new(Registry::new());

        let bridge = RelayBridge::start(
            instance_id,
            registry.clone(),
            bus.clone(),
            config.resubscribe_policy.clone(),
        )
        .await;

        Self {
            instance_id,
            config,
            registry,
            relay: Some(RelayLink {
                bus,
                bridge: Mutex::new(Some(bridge)),
            }),
        }
    }

    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }

    /// Relay connectivity; `None` without a relay
    pub async fn relay_healthy(&self) -> Option<bool> {
        match &self.relay {
            Some(relay) => Some(relay.bus.is_healthy().await),
            None => None,
        }
    }

    /// Add a subscriber to `session_id`
    pub fn register(&self, session_id: impl Into<String>) -> Subscriber {
        let session_id = session_id.into();
        let (tx, receiver) = mpsc::channel(self.config.queue_capacity);
        let key = SubscriberKey {
            id: Uuid::new_v4(),
            session_id,
        };

        {
            let mut sessions = self.registry.sessions.write();
            sessions
                .entry(key.session_id.clone())
                .or_default()
                .insert(key.id, tx);
        }

        tracing::info!(
            session_id = %key.session_id,
            subscriber_id = %key.id,
            "Registered live subscriber"
        );

        Subscriber { key, receiver }
    }

    /// Remove a subscriber and close its queue
    ///
    /// Returns `false` if it was already unregistered.
    pub fn unregister(&self, key: &SubscriberKey) -> bool {
        let removed = {
            let mut sessions = self.registry.sessions.write();
            let Some(subscribers) = sessions.get_mut(&key.session_id) else {
                return false;
            };
            let removed = subscribers.remove(&key.id);
            if subscribers.is_empty() {
                sessions.remove(&key.session_id);
            }
            removed
        };

        // Dropping the registry's sender closes the queue. A broadcast that
        // snapshotted it just before removal releases its clone on return.
        match removed {
            Some(tx) => {
                drop(tx);
                tracing::info!(
                    session_id = %key.session_id,
                    subscriber_id = %key.id,
                    "Unregistered live subscriber"
                );
                true
            }
            None => false,
        }
    }

    /// Fan `payload` out to the session's subscribers
    ///
    /// Never fails: full queues drop the message, relay errors are logged.
    pub async fn broadcast(&self, session_id: &str, payload: impl Into<Bytes>) {
        let payload = payload.into();
        let delivered = self.registry.deliver_local(session_id, &payload);

        tracing::debug!(session_id, delivered, "Broadcast live update");

        if let Some(relay) = &self.relay {
            let channel = broadcast_channel(session_id);
            let frame = RelayFrame::encode(self.instance_id, &payload);

            match relay.bus.publish(&channel, frame).await {
                Ok(()) => {
                    self.registry
                        .metrics
                        .relay_published
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.registry
                        .metrics
                        .relay_failed
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(session_id, error = %e, "Relay publish failed");
                }
            }
        }
    }

    /// Number of live subscribers for a session
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.registry
            .sessions
            .read()
            .get(session_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Number of sessions with at least one subscriber
    pub fn session_count(&self) -> usize {
        self.registry.sessions.read().len()
    }

    pub fn metrics(&self) -> HubMetricsSnapshot {
        self.registry.metrics.snapshot()
    }

    /// Stop the relay bridge and wait for it to exit
    ///
    /// Idempotent. Local fan-out keeps working afterwards; relay publishing
    /// continues too, only inbound relay messages stop.
    pub async fn shutdown(&self) {
        let bridge = self
            .relay
            .as_ref()
            .and_then(|relay| relay.bridge.lock().take());

        if let Some(bridge) = bridge {
            bridge.stop().await;
        }
    }
}
