//! End-to-end delivery behaviour of `ActivityClient` against an in-memory
//! collector.

mod common;

use std::time::Duration;

use beacon_core::{ConnectionState, OverflowStore, QueuedRequest};
use common::*;
use tempfile::TempDir;

const BUCKET: &str = "test-bucket";

async fn connected(client: &beacon_core::ActivityClient) {
    client.connect().unwrap();
    assert!(
        wait_until(WAIT, || client.is_connected()).await,
        "client never connected"
    );
}

#[tokio::test]
async fn test_delivers_in_enqueue_order_while_connected() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    for label in ["a", "b", "c", "d"] {
        client.send_event(BUCKET, &labelled(label));
    }

    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["a", "b", "c", "d"]));
    client.disconnect().await;
}

#[tokio::test]
async fn test_failed_send_is_retried_before_later_events() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    collector.fail_once("c");
    for label in ["a", "b", "c", "d", "e", "f"] {
        client.send_event(BUCKET, &labelled(label));
    }

    assert!(client.flush(WAIT).await);
    assert_eq!(
        collector.delivered(),
        strings(&["a", "b", "c", "d", "e", "f"])
    );
    assert_eq!(collector.attempts().iter().filter(|l| *l == "c").count(), 2);
    client.disconnect().await;
}

#[tokio::test]
async fn test_event_enqueued_during_failing_send_is_not_lost() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    collector.hold_posts();
    client.send_event(BUCKET, &labelled("d"));
    assert!(wait_until(WAIT, || collector.attempts() == strings(&["d"])).await);

    // "d" is in flight; "e" arrives while still connected
    client.send_event(BUCKET, &labelled("e"));
    collector.fail_once("d");
    collector.stop_holding();

    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["d", "e"]));
    assert_eq!(collector.attempts(), strings(&["d", "d", "e"]));
    client.disconnect().await;
}

#[tokio::test]
async fn test_bucket_created_once() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);

    client.setup_bucket("b1", "t1");
    client.setup_bucket("b1", "t1");
    connected(&client).await;

    assert_eq!(collector.created(), strings(&["b1"]));
    let body = &collector.created_bodies()[0];
    assert_eq!(body["type"], "t1");
    assert_eq!(body["client"], "test-watcher");
    assert!(body.get("id").is_none());
    client.disconnect().await;
}

#[tokio::test]
async fn test_existing_bucket_is_not_recreated() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    collector.add_bucket("b1");
    let client = client_with(dir.path(), &collector);

    client.setup_bucket("b1", "t1");
    client.setup_bucket("b2", "t2");
    connected(&client).await;

    assert_eq!(collector.created(), strings(&["b2"]));
    client.disconnect().await;
}

#[tokio::test]
async fn test_offline_events_replayed_in_order_after_connect() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::offline();
    let client = client_with(dir.path(), &collector);

    for label in ["a", "b", "c"] {
        client.send_event(BUCKET, &labelled(label));
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert_eq!(client.overflow_len().unwrap(), 3);
    assert_eq!(client.pending_len(), 0);

    let path = client.config().overflow_path();
    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 3);

    collector.set_offline(false);
    connected(&client).await;

    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["a", "b", "c"]));
    assert_eq!(client.overflow_len().unwrap(), 0);
    client.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_waits_for_in_flight_send() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    collector.hold_posts();
    client.send_event(BUCKET, &labelled("x"));
    assert!(wait_until(WAIT, || collector.attempts() == strings(&["x"])).await);

    tokio::join!(client.disconnect(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        collector.release();
    });

    assert_eq!(client.state(), ConnectionState::Stopped);
    assert_eq!(collector.delivered(), strings(&["x"]));
    assert_eq!(client.pending_len(), 0);
    assert_eq!(client.overflow_len().unwrap(), 0);
}

#[tokio::test]
async fn test_disconnect_persists_undelivered_events() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    collector.hold_posts();
    for label in ["a", "b", "c"] {
        client.send_event(BUCKET, &labelled(label));
    }
    assert!(wait_until(WAIT, || collector.attempts() == strings(&["a"])).await);

    tokio::join!(client.disconnect(), async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        collector.release();
    });

    assert_eq!(collector.delivered(), strings(&["a"]));
    let store = OverflowStore::open(client.config().overflow_path()).unwrap();
    let labels: Vec<String> = store
        .read_all()
        .unwrap()
        .iter()
        .map(|r: &QueuedRequest| r.data()["data"]["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, strings(&["b", "c"]));
}

#[tokio::test]
async fn test_drop_without_disconnect_persists_queue() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    collector.hold_posts();
    for label in ["a", "b", "c"] {
        client.send_event(BUCKET, &labelled(label));
    }
    assert!(wait_until(WAIT, || collector.attempts() == strings(&["a"])).await);

    let path = client.config().overflow_path();
    drop(client);

    let store = OverflowStore::open(path).unwrap();
    let labels: Vec<String> = store
        .read_all()
        .unwrap()
        .iter()
        .map(|r: &QueuedRequest| r.data()["data"]["label"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(labels, strings(&["b", "c"]));
}

#[tokio::test]
async fn test_recovers_after_outage() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    client.send_event(BUCKET, &labelled("a"));
    assert!(client.flush(WAIT).await);

    collector.set_offline(true);
    client.send_event(BUCKET, &labelled("b"));
    assert!(wait_until(WAIT, || client.state() == ConnectionState::Disconnected).await);
    client.send_event(BUCKET, &labelled("c"));
    assert!(!client.flush(Duration::from_millis(100)).await);

    collector.set_offline(false);
    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["a", "b", "c"]));
    client.disconnect().await;
}

#[tokio::test]
async fn test_queued_events_survive_restart() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::offline();

    {
        let client = client_with(dir.path(), &collector);
        connected_or_not(&client).await;
        client.send_event(BUCKET, &labelled("a"));
        client.send_event(BUCKET, &labelled("b"));
        client.disconnect().await;
    }

    collector.set_offline(false);
    let client = client_with(dir.path(), &collector);
    assert_eq!(client.overflow_len().unwrap(), 2);
    connected(&client).await;

    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["a", "b"]));
    client.disconnect().await;
}

/// Start the worker against a collector that may be down.
async fn connected_or_not(client: &beacon_core::ActivityClient) {
    client.connect().unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
}

#[tokio::test]
async fn test_batches_and_heartbeats_are_delivered() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);
    connected(&client).await;

    client.send_events(BUCKET, &[labelled("a"), labelled("b")]);
    client.heartbeat(BUCKET, &labelled("c"), 5.0);
    client.replace_last_event(BUCKET, &labelled("d"));

    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["a", "b", "c", "d"]));
    client.disconnect().await;
}

#[tokio::test]
async fn test_reads_fail_when_collector_unreachable() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::offline();
    let client = client_with(dir.path(), &collector);

    assert!(client.get_buckets().await.is_err());

    collector.set_offline(false);
    collector.add_bucket("b1");
    let buckets = client.get_buckets().await.unwrap();
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets["b1"].event_type, "test");
}

#[tokio::test]
async fn test_connect_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);

    connected(&client).await;
    client.connect().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(collector.listings(), 1);
    client.disconnect().await;
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let dir = TempDir::new().unwrap();
    let collector = MockCollector::online();
    let client = client_with(dir.path(), &collector);

    connected(&client).await;
    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Stopped);

    client.send_event(BUCKET, &labelled("a"));
    assert_eq!(client.overflow_len().unwrap(), 1);

    connected(&client).await;
    assert!(client.flush(WAIT).await);
    assert_eq!(collector.delivered(), strings(&["a"]));
    client.disconnect().await;
}
