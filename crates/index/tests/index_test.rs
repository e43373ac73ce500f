//! Integration tests against live Qdrant and Redis instances. Gated behind
//! `#[ignore]` the same way `broker_test.rs`/`storage_test.rs` gate their
//! live-service tests — run explicitly with `cargo test -- --ignored` once
//! `TEST_QDRANT_URL` and `TEST_REDIS_URL` are set.

use async_trait::async_trait;
use sitesearch_broker::QueueBroker;
use sitesearch_common::Result;
use sitesearch_index::{ChunkEmbedding, EmbeddingClient, Indexer, IndexerConfig, RerankClient, SparseVector};
use std::sync::Arc;
use uuid::Uuid;

struct FixedEmbedder;

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<ChunkEmbedding>> {
        Ok(texts
            .iter()
            .map(|_| ChunkEmbedding {
                dense: vec![0.1, 0.2, 0.3, 0.4],
                sparse: SparseVector { indices: vec![1, 2], values: vec![0.5, 0.5] },
            })
            .collect())
    }
}

struct NoopReranker;

#[async_trait]
impl RerankClient for NoopReranker {
    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(candidates.iter().map(|_| 1.0).collect())
    }
}

fn test_qdrant_url() -> String {
    std::env::var("TEST_QDRANT_URL").unwrap_or_else(|_| "http://localhost:6334".to_string())
}

fn test_redis_url() -> String {
    std::env::var("TEST_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn indexer() -> Indexer {
    let qdrant = qdrant_client::Qdrant::from_url(&test_qdrant_url()).build().unwrap();
    let broker = QueueBroker::connect(&test_redis_url()).await.unwrap();
    Indexer::new(
        qdrant,
        broker,
        Arc::new(FixedEmbedder),
        Arc::new(NoopReranker),
        IndexerConfig { dense_dim: 4, similarity_cutoff: 0.0, ..IndexerConfig::default() },
    )
}

#[tokio::test]
#[ignore]
async fn index_then_search_round_trips() {
    let indexer = indexer().await;
    let site_id = format!("test_site_{}", Uuid::new_v4().simple());
    let hash = "hash-abc";

    indexer
        .index_document(&site_id, "https://a.test/page", Some("Title"), "text/html", hash, "hello world")
        .await
        .unwrap();

    let results = indexer.search(&site_id, "hello", Some(5), false).await.unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].url, "https://a.test/page");
}

#[tokio::test]
#[ignore]
async fn delete_by_content_hash_removes_chunks() {
    let indexer = indexer().await;
    let site_id = format!("test_site_{}", Uuid::new_v4().simple());
    let hash = "hash-def";

    indexer
        .index_document(&site_id, "https://a.test/page2", None, "text/html", hash, "goodbye world")
        .await
        .unwrap();
    indexer.delete_by_content_hash(&site_id, hash).await.unwrap();

    let results = indexer.search(&site_id, "goodbye", Some(5), false).await.unwrap();
    assert!(results.is_empty());
}
