//! The Indexer (C3): owns a per-site Qdrant collection plus a broker-backed
//! chunk document store, and implements ingestion, deletion, and hybrid
//! retrieval (§4.3).

use crate::chunk::{chunk_text, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
use crate::collection::{collection_name, ensure_collection, SEARCH_EF};
use crate::embed::{EmbeddingClient, RerankClient, SparseVector};
use qdrant_client::qdrant::{
    Condition, DeletePointsBuilder, Filter, PointStruct, ScrollPointsBuilder, SearchParamsBuilder,
    SearchPointsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use sitesearch_broker::{keys, QueueBroker};
use sitesearch_common::model::SiteId;
use sitesearch_common::{CoreError, Result};
use std::sync::Arc;
use tracing::{instrument, warn};
use uuid::Uuid;

/// Result of a `search` call (§4.3 "Retrieval").
#[derive(Debug, Clone)]
pub struct SearchRecord {
    pub ref_doc_id: String,
    pub url: String,
    pub title: Option<String>,
    pub chunk_text: String,
    pub score: f32,
}

pub struct IndexerConfig {
    pub dense_dim: u64,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub default_top_k: usize,
    pub rerank_top_k: usize,
    pub similarity_cutoff: f32,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            dense_dim: 1024,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            default_top_k: 10,
            rerank_top_k: 10,
            similarity_cutoff: 0.6,
        }
    }
}

pub struct Indexer {
    qdrant: Qdrant,
    broker: QueueBroker,
    embedder: Arc<dyn EmbeddingClient>,
    reranker: Arc<dyn RerankClient>,
    config: IndexerConfig,
}

impl Indexer {
    pub fn new(
        qdrant: Qdrant,
        broker: QueueBroker,
        embedder: Arc<dyn EmbeddingClient>,
        reranker: Arc<dyn RerankClient>,
        config: IndexerConfig,
    ) -> Self {
        Self { qdrant, broker, embedder, reranker, config }
    }

    /// Ingestion pipeline (§4.3 steps 1-4).
    #[instrument(skip(self, clean_content), fields(url = %url, site_id = %site_id))]
    pub async fn index_document(
        &self,
        site_id: &SiteId,
        url: &str,
        title: Option<&str>,
        mimetype: &str,
        content_hash: &str,
        clean_content: &str,
    ) -> Result<usize> {
        ensure_collection(&self.qdrant, site_id, self.config.dense_dim).await?;

        // content_hash changed ⇒ new doc_id; callers on the Edit path delete
        // the previous doc_id's chunks via `delete_by_content_hash` first.
        let doc_id = format!("{site_id}:{content_hash}");
        let collection = collection_name(site_id);

        let chunks = chunk_text(clean_content, self.config.chunk_size, self.config.chunk_overlap);
        let embeddings = self.embedder.embed(&chunks).await?;

        let mut points = Vec::with_capacity(chunks.len());
        for (idx, (text, embedding)) in chunks.iter().zip(embeddings.iter()).enumerate() {
            let point_id = chunk_point_id(&doc_id, idx);
            let payload = chunk_payload(
                site_id,
                url,
                title,
                mimetype,
                content_hash,
                &doc_id,
                idx,
                text,
                &embedding.sparse,
            )?;
            points.push(PointStruct::new(point_id.clone(), embedding.dense.clone(), payload));

            self.broker
                .hash_set(&keys::doc_store(site_id), &point_id, text)
                .await?;
        }

        if !points.is_empty() {
            self.qdrant
                .upsert_points(qdrant_client::qdrant::UpsertPointsBuilder::new(&collection, points))
                .await
                .map_err(|e| CoreError::VectorStore(e.to_string()))?;
        }

        Ok(chunks.len())
    }

    /// `delete_by_content_hash` (§4.3 "Deletion"). Removes every chunk
    /// tagged with `ref_doc_id = "{site_id}:{h}"` from both the vector
    /// collection and the broker document store.
    #[instrument(skip(self))]
    pub async fn delete_by_content_hash(&self, site_id: &SiteId, content_hash: &str) -> Result<()> {
        let doc_id = format!("{site_id}:{content_hash}");
        let collection = collection_name(site_id);
        let filter = ref_doc_filter(&doc_id);

        let scrolled = self
            .qdrant
            .scroll(ScrollPointsBuilder::new(&collection).filter(filter.clone()).with_payload(true).limit(10_000))
            .await
            .map_err(|e| CoreError::VectorStore(e.to_string()))?;

        for point in &scrolled.result {
            if let Some(id) = point_id_string(point) {
                self.broker.hash_del(&keys::doc_store(site_id), &id).await?;
            }
        }

        self.qdrant
            .delete_points(DeletePointsBuilder::new(&collection).points(filter))
            .await
            .map_err(|e| CoreError::VectorStore(e.to_string()))?;

        Ok(())
    }

    /// Hybrid retrieval (§4.3 "Retrieval"): dense ANN search, client-side
    /// sparse rescoring against the stored sparse vector, optional external
    /// rerank, then the similarity cutoff. Self-heals any `ref_doc_id` the
    /// vector store still has but the document store has lost.
    #[instrument(skip(self, query))]
    pub async fn search(
        &self,
        site_id: &SiteId,
        query: &str,
        top_k: Option<usize>,
        rerank: bool,
    ) -> Result<Vec<SearchRecord>> {
        let collection = collection_name(site_id);
        let limit = top_k.unwrap_or(self.config.default_top_k);

        let query_embedding = self
            .embedder
            .embed(std::slice::from_ref(&query.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CoreError::VectorStore("embedding service returned no vector".into()))?;

        let search_points = SearchPointsBuilder::new(&collection, query_embedding.dense.clone(), limit as u64)
            .with_payload(true)
            .params(SearchParamsBuilder::default().hnsw_ef(SEARCH_EF));

        let hits = self
            .qdrant
            .search_points(search_points)
            .await
            .map_err(|e| CoreError::VectorStore(e.to_string()))?
            .result;

        let mut records = Vec::with_capacity(hits.len());
        for hit in hits {
            let point_id = point_id_string(&hit);
            if let Some(id) = &point_id {
                if !self.broker.hash_exists(&keys::doc_store(site_id), id).await? {
                    warn!(point_id = %id, "orphaned vector point with no document-store entry; healing");
                    self.qdrant
                        .delete_points(
                            DeletePointsBuilder::new(&collection)
                                .points(vec![qdrant_client::qdrant::PointId::from(id.clone())]),
                        )
                        .await
                        .map_err(|e| CoreError::VectorStore(e.to_string()))?;
                    continue;
                }
            }

            let payload = &hit.payload;
            let stored_sparse = sparse_from_payload(payload);
            let sparse_score = query_embedding.sparse.dot(&stored_sparse);
            let combined_score = hit.score + sparse_score;

            records.push(SearchRecord {
                ref_doc_id: payload_str(payload, "ref_doc_id"),
                url: payload_str(payload, "url"),
                title: payload.get("title").and_then(|v| v.as_str()).map(str::to_string),
                chunk_text: payload_str(payload, "chunk_text"),
                score: combined_score,
            });
        }

        if rerank && !records.is_empty() {
            let candidates: Vec<String> = records.iter().map(|r| r.chunk_text.clone()).collect();
            let scores = self.reranker.rerank(query, &candidates).await?;
            for (record, score) in records.iter_mut().zip(scores) {
                record.score = score;
            }
            records.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
            records.truncate(self.config.rerank_top_k);
        } else {
            records.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        }

        records.retain(|r| r.score >= self.config.similarity_cutoff);
        Ok(records)
    }
}

fn chunk_point_id(doc_id: &str, idx: usize) -> String {
    let namespace = Uuid::NAMESPACE_URL;
    Uuid::new_v5(&namespace, format!("{doc_id}:{idx}").as_bytes()).to_string()
}

#[allow(clippy::too_many_arguments)]
fn chunk_payload(
    site_id: &SiteId,
    url: &str,
    title: Option<&str>,
    mimetype: &str,
    content_hash: &str,
    ref_doc_id: &str,
    chunk_index: usize,
    chunk_text: &str,
    sparse: &SparseVector,
) -> Result<Payload> {
    let value = serde_json::json!({
        "site_id": site_id,
        "url": url,
        "title": title,
        "mimetype": mimetype,
        "content_hash": content_hash,
        "ref_doc_id": ref_doc_id,
        "chunk_index": chunk_index,
        "chunk_text": chunk_text,
        "sparse_indices": sparse.indices,
        "sparse_values": sparse.values,
    });
    Payload::try_from(value).map_err(|e: serde_json::Error| CoreError::Serialization(e))
}

fn ref_doc_filter(doc_id: &str) -> Filter {
    Filter::must(vec![Condition::matches("ref_doc_id", doc_id.to_string())])
}

fn payload_str(payload: &std::collections::HashMap<String, qdrant_client::qdrant::Value>, key: &str) -> String {
    payload.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string()
}

fn sparse_from_payload(
    payload: &std::collections::HashMap<String, qdrant_client::qdrant::Value>,
) -> SparseVector {
    let indices = payload
        .get("sparse_indices")
        .and_then(|v| v.as_list())
        .map(|list| list.iter().filter_map(|x| x.as_integer()).map(|i| i as u32).collect())
        .unwrap_or_default();
    let values = payload
        .get("sparse_values")
        .and_then(|v| v.as_list())
        .map(|list| list.iter().filter_map(|x| x.as_double()).map(|f| f as f32).collect())
        .unwrap_or_default();
    SparseVector { indices, values }
}

fn point_id_string<P: PointIdSource>(point: &P) -> Option<String> {
    point.point_id_string()
}

trait PointIdSource {
    fn point_id_string(&self) -> Option<String>;
}

impl PointIdSource for qdrant_client::qdrant::ScoredPoint {
    fn point_id_string(&self) -> Option<String> {
        self.id.as_ref().and_then(point_id_to_string)
    }
}

impl PointIdSource for qdrant_client::qdrant::RetrievedPoint {
    fn point_id_string(&self) -> Option<String> {
        self.id.as_ref().and_then(point_id_to_string)
    }
}

fn point_id_to_string(id: &qdrant_client::qdrant::PointId) -> Option<String> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match &id.point_id_options {
        Some(PointIdOptions::Uuid(s)) => Some(s.clone()),
        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
        None => None,
    }
}
