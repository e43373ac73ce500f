//! Embedding and rerank HTTP clients (§4.3 step 3, retrieval rerank step).
//! Both are modeled as trait objects so the indexer can be unit-tested
//! against fakes, the same seam `sitesearch-clean`'s `DocumentConverter`
//! uses for the same reason.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitesearch_common::retry::{with_retry, RetryPolicy};
use sitesearch_common::{CoreError, Result};

/// A sparse (BGE-M3-style) embedding: parallel index/value arrays.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SparseVector {
    pub indices: Vec<u32>,
    pub values: Vec<f32>,
}

impl SparseVector {
    /// Dot product against another sparse vector, matching indices only.
    /// Used for client-side sparse scoring at retrieval time since it
    /// avoids depending on the vector store's own sparse-query surface
    /// (see DESIGN.md).
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let mut i = 0;
        let mut j = 0;
        let mut sum = 0.0f32;
        while i < self.indices.len() && j < other.indices.len() {
            match self.indices[i].cmp(&other.indices[j]) {
                std::cmp::Ordering::Equal => {
                    sum += self.values[i] * other.values[j];
                    i += 1;
                    j += 1;
                }
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
            }
        }
        sum
    }
}

#[derive(Debug, Clone)]
pub struct ChunkEmbedding {
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
}

#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<ChunkEmbedding>>;
}

#[async_trait]
pub trait RerankClient: Send + Sync {
    /// Scores parallel to `candidates`, higher is more relevant.
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>>;
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    input: &'a [String],
    return_dense: bool,
    return_sparse: bool,
    return_colbert_vecs: bool,
}

/// Matches §6's documented contract: `embedding` is either a dense
/// `number[]` or a sparse `{token_id: weight}` map, disambiguated by
/// `object`, with `return_dense`/`return_sparse` producing one `data`
/// entry per input per requested kind (so two entries per input when both
/// flags are set).
#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    object: String,
    embedding: EmbeddingValue,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingValue {
    Dense(Vec<f32>),
    Sparse(std::collections::HashMap<String, f32>),
}

pub struct HttpEmbeddingClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpEmbeddingClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EmbeddingClient for HttpEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<ChunkEmbedding>> {
        let request = EmbeddingsRequest {
            input: texts,
            return_dense: true,
            return_sparse: true,
            return_colbert_vecs: false,
        };

        let response: EmbeddingsResponse = with_retry(RetryPolicy::external_service(), || async {
            self.http
                .post(format!("{}/embeddings", self.endpoint))
                .json(&request)
                .send()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| CoreError::Http(e.to_string()))?
                .json::<EmbeddingsResponse>()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))
        })
        .await?;

        let mut dense: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut sparse: Vec<SparseVector> = vec![SparseVector::default(); texts.len()];

        for datum in response.data {
            if datum.index >= texts.len() {
                continue;
            }
            match datum.embedding {
                EmbeddingValue::Dense(v) => dense[datum.index] = Some(v),
                EmbeddingValue::Sparse(map) => {
                    let mut pairs: Vec<(u32, f32)> = map
                        .into_iter()
                        .filter_map(|(k, v)| k.parse::<u32>().ok().map(|id| (id, v)))
                        .collect();
                    pairs.sort_by_key(|(id, _)| *id);
                    sparse[datum.index] = SparseVector {
                        indices: pairs.iter().map(|(id, _)| *id).collect(),
                        values: pairs.iter().map(|(_, v)| *v).collect(),
                    };
                }
            }
            let _ = &datum.object;
        }

        dense
            .into_iter()
            .zip(sparse)
            .enumerate()
            .map(|(i, (dense, sparse))| {
                dense
                    .map(|dense| ChunkEmbedding { dense, sparse })
                    .ok_or_else(|| {
                        CoreError::Http(format!("embedding service returned no dense vector for input {i}"))
                    })
            })
            .collect()
    }
}

/// JinaRerank-compatible request (§6 "Reranker service").
#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
    model: &'a str,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f32,
}

pub struct HttpRerankClient {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpRerankClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RerankClient for HttpRerankClient {
    async fn rerank(&self, query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        let request = RerankRequest {
            query,
            documents: candidates,
            top_n: candidates.len(),
            model: "jina-reranker-v2",
        };
        let response: RerankResponse = with_retry(RetryPolicy::external_service(), || async {
            self.http
                .post(format!("{}/rerank", self.endpoint))
                .json(&request)
                .send()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))?
                .error_for_status()
                .map_err(|e| CoreError::Http(e.to_string()))?
                .json::<RerankResponse>()
                .await
                .map_err(|e| CoreError::Http(e.to_string()))
        })
        .await?;

        let mut scores = vec![0.0f32; candidates.len()];
        for result in response.results {
            if result.index < scores.len() {
                scores[result.index] = result.relevance_score;
            }
        }
        Ok(scores)
    }
}

/// Stand-in reranker for deployments with no `reranker_url` configured:
/// every candidate keeps its retrieval-order score of `0.0`, so rerank is
/// effectively skipped rather than failing closed.
pub struct NoopRerankClient;

#[async_trait]
impl RerankClient for NoopRerankClient {
    async fn rerank(&self, _query: &str, candidates: &[String]) -> Result<Vec<f32>> {
        Ok(vec![0.0; candidates.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_dot_product_matches_overlapping_indices() {
        let a = SparseVector { indices: vec![1, 3, 5], values: vec![1.0, 2.0, 3.0] };
        let b = SparseVector { indices: vec![1, 4, 5], values: vec![2.0, 9.0, 4.0] };
        assert_eq!(a.dot(&b), 1.0 * 2.0 + 3.0 * 4.0);
    }

    #[test]
    fn sparse_dot_product_of_disjoint_vectors_is_zero() {
        let a = SparseVector { indices: vec![1, 2], values: vec![1.0, 1.0] };
        let b = SparseVector { indices: vec![3, 4], values: vec![1.0, 1.0] };
        assert_eq!(a.dot(&b), 0.0);
    }
}
