//! Integration tests against a live Redis instance. Gated behind `#[ignore]`
//! the way `ai-agent-storage`'s `redis_test.rs` gates its connection tests —
//! run explicitly with `cargo test -- --ignored` once `TEST_REDIS_URL` is
//! set.

use sitesearch_broker::QueueBroker;
use std::time::Duration;
use uuid::Uuid;

fn test_redis_url() -> String {
    std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

fn unique_queue(name: &str) -> String {
    format!("test_{}_{}", name, Uuid::new_v4())
}

#[tokio::test]
#[ignore]
async fn enqueue_then_claim_round_trips_payload() {
    let broker = QueueBroker::connect(&test_redis_url()).await.unwrap();
    let queue = unique_queue("enqueue_claim");

    broker.enqueue(&queue, "hello".to_string()).await.unwrap();
    let claimed: Vec<sitesearch_common::model::Envelope<String>> =
        broker.claim_batch(&queue, 1).await.unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].payload, "hello");
}

#[tokio::test]
#[ignore]
async fn claim_batch_respects_fifo_order() {
    let broker = QueueBroker::connect(&test_redis_url()).await.unwrap();
    let queue = unique_queue("fifo");

    broker.enqueue(&queue, "first".to_string()).await.unwrap();
    broker.enqueue(&queue, "second".to_string()).await.unwrap();

    let claimed: Vec<sitesearch_common::model::Envelope<String>> =
        broker.claim_batch(&queue, 2).await.unwrap();

    assert_eq!(claimed[0].payload, "first");
    assert_eq!(claimed[1].payload, "second");
}

#[tokio::test]
#[ignore]
async fn ack_success_updates_metrics_and_clears_processing() {
    let broker = QueueBroker::connect(&test_redis_url()).await.unwrap();
    let queue = unique_queue("ack_success");

    broker.enqueue(&queue, "work".to_string()).await.unwrap();
    let claimed: Vec<sitesearch_common::model::Envelope<String>> =
        broker.claim_batch(&queue, 1).await.unwrap();
    broker
        .ack_success(&queue, &claimed[0], Duration::from_millis(50))
        .await
        .unwrap();

    let metrics = broker.metrics(&queue).await.unwrap();
    assert_eq!(metrics.pending, 0);
    assert_eq!(metrics.processing, 0);
    assert_eq!(metrics.completed, 1);
    assert!(metrics.last_activity.is_some());
}

#[tokio::test]
#[ignore]
async fn ack_failure_moves_envelope_to_failed_set() {
    let broker = QueueBroker::connect(&test_redis_url()).await.unwrap();
    let queue = unique_queue("ack_failure");

    broker.enqueue(&queue, "work".to_string()).await.unwrap();
    let claimed: Vec<sitesearch_common::model::Envelope<String>> =
        broker.claim_batch(&queue, 1).await.unwrap();
    broker
        .ack_failure(&queue, &claimed[0], "boom")
        .await
        .unwrap();

    let metrics = broker.metrics(&queue).await.unwrap();
    assert_eq!(metrics.failed, 1);
    assert_eq!(metrics.processing, 0);
}

#[tokio::test]
#[ignore]
async fn set_add_reports_whether_member_was_new() {
    let broker = QueueBroker::connect(&test_redis_url()).await.unwrap();
    let set_key = unique_queue("crawled_urls");

    assert!(broker.set_add(&set_key, "https://a.example/").await.unwrap());
    assert!(!broker.set_add(&set_key, "https://a.example/").await.unwrap());
    assert_eq!(broker.set_cardinality(&set_key).await.unwrap(), 1);

    broker.delete_keys(&[set_key]).await.unwrap();
}
