//! Indexer (C3): chunking, dense+sparse embedding, Qdrant collection
//! management, and hybrid retrieval (§4.3).

pub mod chunk;
pub mod collection;
pub mod embed;
pub mod indexer;

pub use chunk::{chunk_text, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};
pub use collection::{collection_name, ensure_collection};
pub use embed::{
    ChunkEmbedding, EmbeddingClient, HttpEmbeddingClient, HttpRerankClient, NoopRerankClient, RerankClient,
    SparseVector,
};
pub use indexer::{Indexer, IndexerConfig, SearchRecord};
