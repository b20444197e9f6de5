//! Background task feeding relay messages into the local registry
//!
//! The bridge owns one pattern subscription on [`BROADCAST_PATTERN`]. Each
//! inbound message is mapped back to its session id and fanned out to local
//! subscribers with the same non-blocking delivery used for local broadcasts.
//! Frames published by this hub instance are skipped; they were already
//! delivered locally.
//!
//! When the subscription stream ends (connection loss) the bridge
//! resubscribes with exponential backoff until it is stopped.
use futures_util::StreamExt;
use std::sync::Arc;
use summithub_core::RetryPolicy;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::channel::{session_id_from_channel, BROADCAST_PATTERN};
use super::hub::Registry;
use super::relay::{RelayBus, RelayFrame, RelayMessage, RelayStream};

/// Handle to a running relay bridge
///
/// Dropping the handle signals the task to stop without waiting for it;
/// [`RelayBridge::stop`] signals and joins.
pub(crate) struct RelayBridge {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl RelayBridge {
    /// Subscribe and spawn the forwarding task
    ///
    /// The first subscription attempt happens before this returns. If it
    /// fails, the task keeps retrying in the background.
    pub(crate) async fn start(
        origin: Uuid,
        registry: Arc<Registry>,
        bus: Arc<dyn RelayBus>,
        policy: RetryPolicy,
    ) -> Self {
        let initial = match bus.subscribe(BROADCAST_PATTERN).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::warn!(error = %e, "Initial relay subscription failed, retrying in background");
                None
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = BridgeWorker {
            origin,
            registry,
            bus,
            policy,
            shutdown_rx,
        };
        let handle = tokio::spawn(worker.run(initial));

        tracing::info!(%origin, pattern = BROADCAST_PATTERN, "Relay bridge started");

        Self {
            shutdown_tx,
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for it to exit
    pub(crate) async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Relay bridge task failed");
            }
        }
    }
}

impl Drop for RelayBridge {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown_tx.send(true);
        }
    }
}

struct BridgeWorker {
    origin: Uuid,
    registry: Arc<Registry>,
    bus: Arc<dyn RelayBus>,
    policy: RetryPolicy,
    shutdown_rx: watch::Receiver<bool>,
}

impl BridgeWorker {
    async fn run(mut self, initial: Option<RelayStream>) {
        let mut pending = initial;
        let mut attempt: u32 = 0;

        loop {
            let stream = match pending.take() {
                Some(stream) => stream,
                None => match self.resubscribe(attempt).await {
                    Resubscribe::Subscribed(stream) => {
                        attempt = 0;
                        stream
                    }
                    Resubscribe::Failed => {
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                    Resubscribe::Shutdown => break,
                },
            };

            if !self.forward(stream).await {
                break;
            }

            tracing::warn!("Relay subscription ended, resubscribing");
        }

        tracing::info!(origin = %self.origin, "Relay bridge stopped");
    }

    /// Pump one subscription; returns false when shut down
    async fn forward(&mut self, mut stream: RelayStream) -> bool {
        loop {
            if *self.shutdown_rx.borrow() {
                return false;
            }

            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => return false,
                next = stream.next() => match next {
                    Some(msg) => self.handle_message(msg),
                    None => return true,
                },
            }
        }
    }

    fn handle_message(&self, msg: RelayMessage) {
        let frame = RelayFrame::decode(msg.payload);
        if frame.origin == Some(self.origin) {
            return;
        }

        let session_id = session_id_from_channel(&msg.channel);
        if session_id.is_empty() {
            tracing::warn!(channel = %msg.channel, "Ignoring relay message on malformed channel");
            return;
        }

        let delivered = self.registry.deliver_local(&session_id, &frame.payload);
        self.registry.metrics.record_relay_forwarded();

        tracing::debug!(%session_id, delivered, "Forwarded relay message");
    }

    async fn resubscribe(&mut self, attempt: u32) -> Resubscribe {
        let delay = self.policy.delay_for_attempt(attempt);

        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => return Resubscribe::Shutdown,
            _ = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            biased;
            _ = self.shutdown_rx.changed() => Resubscribe::Shutdown,
            result = self.bus.subscribe(BROADCAST_PATTERN) => match result {
                Ok(stream) => {
                    tracing::info!(attempt, "Relay subscription restored");
                    Resubscribe::Subscribed(stream)
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Relay resubscription failed");
                    Resubscribe::Failed
                }
            },
        }
    }
}

enum Resubscribe {
    Subscribed(RelayStream),
    Failed,
    Shutdown,
}
