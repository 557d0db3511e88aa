//! Domain-isolated retrieval
//!
//! Provides:
//! - The `VectorStore` contract consumed by the engine (search + fetch)
//! - A caching `VectorRetriever` (embedding cache + query-result cache)
//! - The deduplicating, feedback-adjusted `Ranker`
//!
//! Retrieval is restricted to one domain per pass as a hard filter;
//! a cross-domain result is a correctness bug, not a soft preference.

mod ranker;
mod retriever;
mod store;

pub use ranker::Ranker;
pub use retriever::VectorRetriever;
pub use store::{HttpVectorStore, MemoryVectorStore, StoredChunk};

use crate::domain::Domain;
use deskwise_common::errors::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// A chunk returned by the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredChunk {
    /// Chunk ID
    pub chunk_id: Uuid,

    /// Source document ID
    pub document_id: Uuid,

    /// Tenant the chunk belongs to
    pub tenant_id: Uuid,

    /// Domain the chunk was indexed under
    pub domain: Domain,

    /// Chunk content
    pub content: String,

    /// Title of the source document
    pub source_title: String,

    /// Similarity score (0.0 - 1.0)
    pub score: f32,
}

/// Contract for the external vector index.
///
/// `upsert` and index maintenance belong to the ingestion pipeline and are
/// out of scope here.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Similarity search restricted to one tenant and one domain.
    /// The domain filter is hard; implementations must never return chunks
    /// from another domain.
    async fn search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        domain: Domain,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>>;

    /// Fetch chunk content by id. Cheap compared to a search; used to
    /// rehydrate query-cache hits.
    async fn fetch(&self, tenant_id: Uuid, chunk_ids: &[Uuid]) -> Result<Vec<ScoredChunk>>;
}

/// Normalize a query for cache keying: lowercase, collapsed whitespace
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Stable hash of a normalized text, used in cache keys
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
