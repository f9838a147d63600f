//! Stream broker behavior: fan-out, replay buffer, since-filter, size cap,
//! close sentinel.

use std::sync::Arc;
use std::time::Duration;

use atelier::broker::{BrokerConfig, StreamBroker, StreamItem};
use atelier::cache::{Cache, CacheError, InMemoryCache};
use serde_json::json;
use stream_event::{StreamEvent, StreamEventType};
use tokio::sync::mpsc;
use uuid::Uuid;

fn broker() -> Arc<StreamBroker> {
    Arc::new(StreamBroker::new(
        Arc::new(InMemoryCache::new()),
        BrokerConfig::default(),
    ))
}

fn event(n: u64) -> StreamEvent {
    StreamEvent::new(StreamEventType::MessageCreated, json!({"n": n}))
}

async fn next_event(rx: &mut mpsc::Receiver<StreamItem>) -> StreamEvent {
    match rx.recv().await.expect("stream open") {
        StreamItem::Event(event) => event,
        StreamItem::Closed => panic!("unexpected close"),
    }
}

#[tokio::test]
async fn broadcast_reaches_all_session_connections() {
    let broker = broker();
    let session = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let (_, mut rx1) = broker.register(session, owner, None).await;
    let (_, mut rx2) = broker.register(session, owner, None).await;

    let sent = broker.broadcast(session, event(1), true).await.unwrap();
    assert_eq!(sent, 2);
    assert_eq!(next_event(&mut rx1).await.payload["n"], 1);
    assert_eq!(next_event(&mut rx2).await.payload["n"], 1);
}

#[tokio::test]
async fn buffer_is_bounded_even_under_high_publish_rate() {
    let cache: Arc<dyn Cache> = Arc::new(InMemoryCache::new());
    let broker = Arc::new(StreamBroker::new(cache.clone(), BrokerConfig::default()));
    let session = Uuid::new_v4();

    for n in 0..250 {
        broker.broadcast(session, event(n), true).await.unwrap();
    }
    let buffered = cache
        .range(&format!("stream:buffer:{session}"))
        .await
        .unwrap();
    assert_eq!(buffered.len(), 100);
    // Newest first: the latest event leads the buffer.
    let newest: StreamEvent = serde_json::from_str(&buffered[0]).unwrap();
    assert_eq!(newest.payload["n"], 249);
}

#[tokio::test]
async fn reconnect_with_since_replays_only_newer_events() {
    let broker = broker();
    let session = Uuid::new_v4();
    let owner = Uuid::new_v4();

    broker.broadcast(session, event(1), true).await.unwrap();
    // Capture e1's timestamp from the buffer itself, as a client would.
    let (conn, mut rx) = broker.register(session, owner, None).await;
    let e1 = next_event(&mut rx).await;
    broker.unregister(session, conn).await;

    broker.broadcast(session, event(2), true).await.unwrap();

    let (_, mut rx) = broker.register(session, owner, Some(e1.timestamp)).await;
    let replayed = next_event(&mut rx).await;
    assert_eq!(replayed.payload["n"], 2, "e1 must not be delivered again");
    assert!(
        tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .is_err(),
        "exactly one event expected in replay"
    );
}

#[tokio::test]
async fn replay_without_since_is_oldest_first() {
    let broker = broker();
    let session = Uuid::new_v4();
    let owner = Uuid::new_v4();

    for n in 0..3 {
        broker.broadcast(session, event(n), true).await.unwrap();
    }
    let (_, mut rx) = broker.register(session, owner, None).await;
    for n in 0..3 {
        assert_eq!(next_event(&mut rx).await.payload["n"], n);
    }
}

#[tokio::test]
async fn oversized_payload_is_replaced() {
    let broker = broker();
    let session = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let (_, mut rx) = broker.register(session, owner, None).await;

    let big = "x".repeat(20 * 1024);
    let oversized = StreamEvent::new(StreamEventType::MessageCreated, json!({"blob": big}));
    broker.broadcast(session, oversized, false).await.unwrap();

    let received = next_event(&mut rx).await;
    assert!(received.payload["error"].is_string());
    assert!(received.payload.get("blob").is_none());
}

#[tokio::test]
async fn broadcast_to_owner_covers_every_session() {
    let broker = broker();
    let owner = Uuid::new_v4();
    let s1 = Uuid::new_v4();
    let s2 = Uuid::new_v4();
    let (_, mut rx1) = broker.register(s1, owner, None).await;
    let (_, mut rx2) = broker.register(s2, owner, None).await;

    let sent = broker
        .broadcast_to_owner(owner, event(7), true)
        .await
        .unwrap();
    assert_eq!(sent, 2);
    assert_eq!(next_event(&mut rx1).await.session_id, Some(s1));
    assert_eq!(next_event(&mut rx2).await.session_id, Some(s2));
}

#[tokio::test]
async fn stop_closes_connections_with_the_sentinel() {
    let broker = broker();
    broker.start().await;
    let session = Uuid::new_v4();
    let (_, mut rx) = broker.register(session, Uuid::new_v4(), None).await;

    broker.stop().await;
    assert!(matches!(rx.recv().await, Some(StreamItem::Closed)));
    assert_eq!(broker.stats().await.total_connections, 0);
}

#[tokio::test]
async fn unregister_drops_session_and_owner_indexes() {
    let broker = broker();
    let session = Uuid::new_v4();
    let owner = Uuid::new_v4();
    let (conn, _rx) = broker.register(session, owner, None).await;

    broker.unregister(session, conn).await;
    let stats = broker.stats().await;
    assert_eq!(stats.total_connections, 0);
    assert_eq!(stats.total_sessions, 0);
    assert_eq!(stats.total_users, 0);
}

#[tokio::test(start_paused = true)]
async fn heartbeats_are_enqueued_periodically() {
    let broker = Arc::new(StreamBroker::new(
        Arc::new(InMemoryCache::new()),
        BrokerConfig {
            heartbeat_interval: Duration::from_secs(30),
            ..BrokerConfig::default()
        },
    ));
    broker.start().await;
    let session = Uuid::new_v4();
    let (_, mut rx) = broker.register(session, Uuid::new_v4(), None).await;

    tokio::time::advance(Duration::from_secs(31)).await;
    let beat = next_event(&mut rx).await;
    assert_eq!(beat.event_type, StreamEventType::Heartbeat);
    assert_eq!(beat.session_id, Some(session));
    broker.stop().await;
}

/// Cache that refuses list pushes; used to force buffer failures.
pub struct FailingCache;

#[async_trait::async_trait]
impl Cache for FailingCache {
    async fn get(&self, _key: &str) -> Option<String> {
        None
    }
    async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }
    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }
    async fn push_front(&self, _key: &str, _value: String) -> Result<usize, CacheError> {
        Err(CacheError::Backend("cache down".to_string()))
    }
    async fn trim(&self, _key: &str, _max_len: usize) -> Result<(), CacheError> {
        Ok(())
    }
    async fn range(&self, _key: &str) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }
    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[tokio::test]
async fn buffer_failure_surfaces_as_publish_error() {
    let broker = Arc::new(StreamBroker::new(
        Arc::new(FailingCache),
        BrokerConfig::default(),
    ));
    let err = broker
        .broadcast(Uuid::new_v4(), event(1), true)
        .await
        .unwrap_err();
    assert!(matches!(err, atelier::CoreError::Publish(_)));
}
