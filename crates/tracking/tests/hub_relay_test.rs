//! Integration tests for the broadcast hub and relay bridge
//!
//! Hubs share an in-process relay bus, standing in for separate service
//! instances connected to the same redis server.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use summithub_core::RetryPolicy;
use summithub_tracking::stream::{
    broadcast_channel, session_id_from_channel, BroadcastHub, HubConfig, InMemoryRelay, RelayBus,
    RelayError, RelayMessage, Subscriber,
};
use summithub_tracking::stream::relay::RelayStream;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_millis(500);
const QUIET: Duration = Duration::from_millis(100);

async fn expect_message(sub: &mut Subscriber) -> Bytes {
    timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for live update")
        .expect("subscriber closed unexpectedly")
}

async fn expect_quiet(sub: &mut Subscriber) {
    assert!(
        timeout(QUIET, sub.recv()).await.is_err(),
        "received an unexpected message"
    );
}

fn fast_resubscribe() -> HubConfig {
    HubConfig {
        resubscribe_policy: RetryPolicy::new(
            u32::MAX,
            Duration::from_millis(10),
            Duration::from_millis(50),
            false,
        ),
        ..HubConfig::default()
    }
}

#[tokio::test]
async fn test_each_subscriber_receives_broadcast_once() {
    let hub = BroadcastHub::new(HubConfig::default());
    let mut a = hub.register("session-1");
    let mut b = hub.register("session-1");
    let mut other = hub.register("session-2");

    hub.broadcast("session-1", Bytes::from_static(b"{\"id\":1}")).await;

    assert_eq!(expect_message(&mut a).await, Bytes::from_static(b"{\"id\":1}"));
    assert_eq!(expect_message(&mut b).await, Bytes::from_static(b"{\"id\":1}"));
    assert!(a.try_recv().is_err());
    assert!(b.try_recv().is_err());
    assert!(other.try_recv().is_err());
}

#[tokio::test]
async fn test_broadcast_without_subscribers_is_noop() {
    let hub = BroadcastHub::new(HubConfig::default());

    hub.broadcast("nobody", Bytes::from_static(b"x")).await;

    assert_eq!(hub.session_count(), 0);
    assert_eq!(hub.metrics().delivered, 0);
    assert_eq!(hub.metrics().dropped, 0);
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_others() {
    let hub = BroadcastHub::new(HubConfig::default().with_queue_capacity(1));
    let mut slow = hub.register("s");
    let mut fast = hub.register("s");

    hub.broadcast("s", Bytes::from_static(b"1")).await;
    assert_eq!(expect_message(&mut fast).await, Bytes::from_static(b"1"));

    // slow still holds "1", so "2" is dropped for it only
    timeout(WAIT, hub.broadcast("s", Bytes::from_static(b"2")))
        .await
        .expect("broadcast blocked on a full queue");

    assert_eq!(expect_message(&mut fast).await, Bytes::from_static(b"2"));
    assert_eq!(expect_message(&mut slow).await, Bytes::from_static(b"1"));
    assert!(slow.try_recv().is_err());
    assert_eq!(hub.metrics().dropped, 1);
}

#[tokio::test]
async fn test_relay_round_trip_between_hubs() {
    let bus = InMemoryRelay::default();
    let hub_a = BroadcastHub::with_relay(HubConfig::default(), Arc::new(bus.clone())).await;
    let hub_b = BroadcastHub::with_relay(HubConfig::default(), Arc::new(bus.clone())).await;

    let mut on_a = hub_a.register("abc123");
    let mut on_b = hub_b.register("abc123");

    hub_a.broadcast("abc123", Bytes::from_static(b"{\"lat\":-6.2}")).await;

    assert_eq!(expect_message(&mut on_a).await, Bytes::from_static(b"{\"lat\":-6.2}"));
    assert_eq!(expect_message(&mut on_b).await, Bytes::from_static(b"{\"lat\":-6.2}"));

    // the publisher's own bridge must not deliver a second copy
    expect_quiet(&mut on_a).await;
    expect_quiet(&mut on_b).await;

    assert_eq!(hub_a.metrics().relay_published, 1);
    assert_eq!(hub_b.metrics().relay_forwarded, 1);
    assert_eq!(hub_a.metrics().relay_forwarded, 0);

    hub_a.shutdown().await;
    hub_b.shutdown().await;
}

#[tokio::test]
async fn test_foreign_relay_messages_are_forwarded_verbatim() {
    let bus = InMemoryRelay::default();
    let hub = BroadcastHub::with_relay(HubConfig::default(), Arc::new(bus.clone())).await;
    let mut sub = hub.register("abc123");

    // empty session id, ignored
    bus.publish("tracking::broadcast", Bytes::from_static(b"lost"))
        .await
        .unwrap();
    bus.publish(&broadcast_channel("abc123"), Bytes::from_static(b"plain"))
        .await
        .unwrap();

    assert_eq!(expect_message(&mut sub).await, Bytes::from_static(b"plain"));
    expect_quiet(&mut sub).await;
    assert_eq!(hub.metrics().relay_forwarded, 1);

    hub.shutdown().await;
}

#[test]
fn test_channel_naming() {
    assert_eq!(session_id_from_channel("tracking:abc123:broadcast"), "abc123");
    assert_eq!(session_id_from_channel("bad"), "");
}

struct FailingRelay;

#[async_trait]
impl RelayBus for FailingRelay {
    async fn publish(&self, channel: &str, _payload: Bytes) -> Result<(), RelayError> {
        Err(RelayError::Publish {
            channel: channel.to_string(),
            message: "connection refused".to_string(),
        })
    }

    async fn subscribe(&self, _pattern: &str) -> Result<RelayStream, RelayError> {
        Ok(stream::pending::<RelayMessage>().boxed())
    }
}

#[tokio::test]
async fn test_relay_failure_never_reaches_caller() {
    let hub = BroadcastHub::with_relay(HubConfig::default(), Arc::new(FailingRelay)).await;
    let mut sub = hub.register("s");

    hub.broadcast("s", Bytes::from_static(b"local")).await;

    assert_eq!(expect_message(&mut sub).await, Bytes::from_static(b"local"));
    assert_eq!(hub.metrics().relay_failed, 1);
    assert_eq!(hub.metrics().relay_published, 0);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_stops_inbound_relay() {
    let bus = InMemoryRelay::default();
    let hub = BroadcastHub::with_relay(HubConfig::default(), Arc::new(bus.clone())).await;
    let mut sub = hub.register("abc123");

    timeout(WAIT, hub.shutdown())
        .await
        .expect("bridge did not stop");
    // idempotent
    hub.shutdown().await;

    bus.publish(&broadcast_channel("abc123"), Bytes::from_static(b"late"))
        .await
        .unwrap();
    expect_quiet(&mut sub).await;

    // local fan-out keeps working
    hub.broadcast("abc123", Bytes::from_static(b"local")).await;
    assert_eq!(expect_message(&mut sub).await, Bytes::from_static(b"local"));
}

/// Fails the first subscription, then behaves like the wrapped bus
struct FlakyRelay {
    inner: InMemoryRelay,
    subscribe_calls: AtomicUsize,
}

#[async_trait]
impl RelayBus for FlakyRelay {
    async fn publish(&self, channel: &str, payload: Bytes) -> Result<(), RelayError> {
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, pattern: &str) -> Result<RelayStream, RelayError> {
        match self.subscribe_calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err(RelayError::Subscribe {
                pattern: pattern.to_string(),
                message: "connection refused".to_string(),
            }),
            // stream ends at once, like a dropped connection
            1 => Ok(stream::empty::<RelayMessage>().boxed()),
            _ => self.inner.subscribe(pattern).await,
        }
    }
}

#[tokio::test]
async fn test_bridge_resubscribes_after_failures() {
    let bus = InMemoryRelay::default();
    let flaky = Arc::new(FlakyRelay {
        inner: bus.clone(),
        subscribe_calls: AtomicUsize::new(0),
    });
    let hub = BroadcastHub::with_relay(fast_resubscribe(), flaky.clone()).await;
    let mut sub = hub.register("abc123");

    let mut received = None;
    for _ in 0..40 {
        bus.publish(&broadcast_channel("abc123"), Bytes::from_static(b"retry"))
            .await
            .unwrap();
        if let Ok(msg) = timeout(Duration::from_millis(50), sub.recv()).await {
            received = msg;
            break;
        }
    }

    assert_eq!(received, Some(Bytes::from_static(b"retry")));
    assert!(flaky.subscribe_calls.load(Ordering::SeqCst) >= 3);

    hub.shutdown().await;
}

#[tokio::test]
async fn test_dropping_hub_stops_bridge() {
    let bus = InMemoryRelay::default();
    let hub = BroadcastHub::with_relay(HubConfig::default(), Arc::new(bus.clone())).await;
    drop(hub);

    // the bridge's subscription goes away once its task exits
    let mut gone = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if bus.receiver_count() == 0 {
            gone = true;
            break;
        }
    }
    assert!(gone, "bridge still subscribed after hub was dropped");
}
