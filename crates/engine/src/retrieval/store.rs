//! Vector store adapters
//!
//! `HttpVectorStore` speaks the JSON search API of the external index;
//! `MemoryVectorStore` is a cosine-similarity store for tests and the
//! `memory` provider.

use super::{ScoredChunk, VectorStore};
use crate::domain::Domain;
use deskwise_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use std::time::Duration;
use uuid::Uuid;

/// HTTP-backed vector store client
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    collection: &'a str,
    vector: &'a [f32],
    top_k: usize,
    min_score: f32,
    filter: SearchFilter,
}

#[derive(Serialize)]
struct SearchFilter {
    tenant_id: Uuid,
    domain: String,
}

#[derive(Deserialize)]
struct SearchReply {
    results: Vec<ScoredChunk>,
}

#[derive(Serialize)]
struct FetchBody<'a> {
    collection: &'a str,
    tenant_id: Uuid,
    ids: &'a [Uuid],
}

#[derive(Deserialize)]
struct FetchReply {
    chunks: Vec<ScoredChunk>,
}

impl HttpVectorStore {
    /// Create a new client against the store's search API
    pub fn new(
        base_url: String,
        collection: String,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url,
            collection,
            api_key,
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.header("api-key", key);
        }
        builder
    }

    /// Classify an HTTP failure; 5xx and transport errors are retryable
    fn classify_status(status: reqwest::StatusCode, body: &str) -> AppError {
        if status.as_u16() == 429 || status.is_server_error() {
            AppError::VectorStoreUnavailable {
                message: format!("store error {}: {}", status, body),
            }
        } else {
            AppError::Internal {
                message: format!("store rejected request {}: {}", status, body),
            }
        }
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T> {
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::VectorStoreUnavailable {
                message: format!("request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::VectorStoreUnavailable {
                message: format!("failed to parse store response: {}", e),
            })
    }
}

#[async_trait::async_trait]
impl VectorStore for HttpVectorStore {
    async fn search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        domain: Domain,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let body = SearchBody {
            collection: &self.collection,
            vector: query_vector,
            top_k,
            min_score,
            filter: SearchFilter {
                tenant_id,
                domain: domain.as_str().to_string(),
            },
        };

        let reply: SearchReply = self.send(self.request("/search").json(&body)).await?;
        Ok(reply.results)
    }

    async fn fetch(&self, tenant_id: Uuid, chunk_ids: &[Uuid]) -> Result<Vec<ScoredChunk>> {
        let body = FetchBody {
            collection: &self.collection,
            tenant_id,
            ids: chunk_ids,
        };

        let reply: FetchReply = self.send(self.request("/fetch").json(&body)).await?;
        Ok(reply.chunks)
    }
}

/// A chunk stored in the in-memory index
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: ScoredChunk,
    pub embedding: Vec<f32>,
}

/// In-memory cosine-similarity store
#[derive(Default)]
pub struct MemoryVectorStore {
    chunks: RwLock<Vec<StoredChunk>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk with its embedding
    pub fn insert(&self, chunk: ScoredChunk, embedding: Vec<f32>) {
        self.chunks
            .write()
            .expect("store lock poisoned")
            .push(StoredChunk { chunk, embedding });
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            0.0
        } else {
            dot / (norm_a * norm_b)
        }
    }
}

#[async_trait::async_trait]
impl VectorStore for MemoryVectorStore {
    async fn search(
        &self,
        tenant_id: Uuid,
        query_vector: &[f32],
        domain: Domain,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().expect("store lock poisoned");

        let mut scored: Vec<ScoredChunk> = chunks
            .iter()
            .filter(|s| s.chunk.tenant_id == tenant_id && s.chunk.domain == domain)
            .map(|s| {
                let mut chunk = s.chunk.clone();
                // Stored test fixtures may carry a fixed score; an embedding
                // of matching dimension overrides it with real similarity
                if s.embedding.len() == query_vector.len() {
                    chunk.score = Self::cosine(query_vector, &s.embedding);
                }
                chunk
            })
            .filter(|c| c.score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn fetch(&self, tenant_id: Uuid, chunk_ids: &[Uuid]) -> Result<Vec<ScoredChunk>> {
        let chunks = self.chunks.read().expect("store lock poisoned");
        Ok(chunk_ids
            .iter()
            .filter_map(|id| {
                chunks
                    .iter()
                    .find(|s| s.chunk.chunk_id == *id && s.chunk.tenant_id == tenant_id)
                    .map(|s| s.chunk.clone())
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(domain: Domain, tenant_id: Uuid, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            tenant_id,
            domain,
            content: "content".to_string(),
            source_title: "Title".to_string(),
            score,
        }
    }

    #[tokio::test]
    async fn test_memory_store_domain_filter_is_hard() {
        let store = MemoryVectorStore::new();
        let tenant = Uuid::new_v4();
        store.insert(chunk(Domain::Hr, tenant, 0.9), vec![]);
        store.insert(chunk(Domain::It, tenant, 0.95), vec![]);

        let results = store.search(tenant, &[1.0], Domain::Hr, 10, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].domain, Domain::Hr);
    }

    #[tokio::test]
    async fn test_memory_store_tenant_isolation() {
        let store = MemoryVectorStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        store.insert(chunk(Domain::Hr, tenant_a, 0.9), vec![]);

        let results = store.search(tenant_b, &[1.0], Domain::Hr, 10, 0.0).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_memory_store_min_score_and_order() {
        let store = MemoryVectorStore::new();
        let tenant = Uuid::new_v4();
        store.insert(chunk(Domain::Hr, tenant, 0.91), vec![]);
        store.insert(chunk(Domain::Hr, tenant, 0.60), vec![]);
        store.insert(chunk(Domain::Hr, tenant, 0.85), vec![]);

        let results = store.search(tenant, &[1.0], Domain::Hr, 10, 0.7).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_memory_store_fetch_by_id() {
        let store = MemoryVectorStore::new();
        let tenant = Uuid::new_v4();
        let stored = chunk(Domain::It, tenant, 0.8);
        let id = stored.chunk_id;
        store.insert(stored, vec![]);

        let fetched = store.fetch(tenant, &[id, Uuid::new_v4()]).await.unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].chunk_id, id);
    }

    #[test]
    fn test_cosine() {
        assert!((MemoryVectorStore::cosine(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(MemoryVectorStore::cosine(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }
}
