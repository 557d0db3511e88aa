//! Caching vector retriever
//!
//! Wraps the vector store with two caches:
//! - embedding cache: normalized-text hash -> query vector
//! - query-result cache: (domain, normalized-query hash) -> (chunk id, score)
//!   pairs; a hit re-fetches only chunk content by id instead of repeating
//!   the search
//!
//! Embedding-provider failures and vector-store failures surface as two
//! distinct retryable errors so the orchestrator can back off differently.

use super::{normalize_query, text_hash, ScoredChunk, VectorStore};
use crate::domain::{Citation, Domain};
use deskwise_common::cache::{keys, Cache};
use deskwise_common::config::RetrievalConfig;
use deskwise_common::errors::{AppError, Result};
use deskwise_common::llm::LanguageModel;
use deskwise_common::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

/// Domain-filtered, cache-aware retriever
pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    llm: Arc<dyn LanguageModel>,
    cache: Cache,
    embedding_model: String,
    config: RetrievalConfig,
}

impl VectorRetriever {
    pub fn new(
        store: Arc<dyn VectorStore>,
        llm: Arc<dyn LanguageModel>,
        cache: Cache,
        embedding_model: String,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            llm,
            cache,
            embedding_model,
            config,
        }
    }

    /// Retrieve up to `top_k` citations for the query, restricted to the
    /// given domain.
    pub async fn retrieve(
        &self,
        query_text: &str,
        tenant_id: Uuid,
        domain: Domain,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<Citation>> {
        let normalized = normalize_query(query_text);
        let query_hash = text_hash(&normalized);
        let query_key = keys::query_result(tenant_id, domain.as_str(), &query_hash);

        let cached: Option<Vec<(Uuid, f32)>> = self.cache.get(&query_key).await.unwrap_or(None);

        let chunks = match cached {
            Some(entries) => {
                metrics::record_cache(true, "query");
                self.rehydrate(tenant_id, &entries).await?
            }
            None => {
                metrics::record_cache(false, "query");
                let results = self
                    .search(&normalized, tenant_id, domain, top_k, min_score)
                    .await?;

                let entries: Vec<(Uuid, f32)> =
                    results.iter().map(|c| (c.chunk_id, c.score)).collect();
                self.cache
                    .set_best_effort(
                        &query_key,
                        &entries,
                        Duration::from_secs(self.config.query_cache_ttl_secs),
                    )
                    .await;

                results
            }
        };

        // The store filter is hard already; re-check here because a
        // cross-domain citation reaching the generator is a correctness bug
        let citations: Vec<Citation> = chunks
            .into_iter()
            .filter(|chunk| {
                if chunk.domain != domain {
                    warn!(
                        chunk_id = %chunk.chunk_id,
                        expected = %domain,
                        actual = %chunk.domain,
                        "Dropping cross-domain chunk from retrieval results"
                    );
                    return false;
                }
                true
            })
            .map(|chunk| Citation {
                chunk_id: chunk.chunk_id,
                document_id: chunk.document_id,
                tenant_id: chunk.tenant_id,
                domain: chunk.domain,
                content: chunk.content,
                source_title: chunk.source_title,
                similarity_score: chunk.score,
                adjusted_score: chunk.score,
                rank: 0,
            })
            .collect();

        metrics::record_retrieval(domain.as_str(), citations.len());
        debug!(
            domain = %domain,
            count = citations.len(),
            "Retrieval pass complete"
        );

        Ok(citations)
    }

    /// Run the expensive path: embed the query and search the store
    async fn search(
        &self,
        normalized: &str,
        tenant_id: Uuid,
        domain: Domain,
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<ScoredChunk>> {
        let embedding = self.query_embedding(normalized).await?;
        self.store
            .search(tenant_id, &embedding, domain, top_k, min_score)
            .await
    }

    /// Compute or fetch the query embedding
    async fn query_embedding(&self, normalized: &str) -> Result<Vec<f32>> {
        let key = keys::embedding(&self.embedding_model, &text_hash(normalized));

        if let Ok(Some(vector)) = self.cache.get::<Vec<f32>>(&key).await {
            metrics::record_cache(true, "embedding");
            return Ok(vector);
        }
        metrics::record_cache(false, "embedding");

        let vector = self.llm.embed(normalized).await.map_err(|e| match e {
            // Keep the embedding failure mode distinct from the vector store's
            AppError::ModelUnavailable { message } => AppError::EmbeddingUnavailable { message },
            other => other,
        })?;

        self.cache
            .set_best_effort(
                &key,
                &vector,
                Duration::from_secs(self.config.embedding_cache_ttl_secs),
            )
            .await;

        Ok(vector)
    }

    /// Rebuild results from cached (id, score) pairs, re-fetching only
    /// chunk content. Chunks that vanished from the store are skipped.
    async fn rehydrate(
        &self,
        tenant_id: Uuid,
        entries: &[(Uuid, f32)],
    ) -> Result<Vec<ScoredChunk>> {
        let ids: Vec<Uuid> = entries.iter().map(|(id, _)| *id).collect();
        let fetched = self.store.fetch(tenant_id, &ids).await?;

        Ok(entries
            .iter()
            .filter_map(|(id, score)| {
                fetched.iter().find(|c| c.chunk_id == *id).map(|c| {
                    let mut chunk = c.clone();
                    chunk.score = *score;
                    chunk
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::MemoryVectorStore;
    use deskwise_common::config::AppConfig;
    use deskwise_common::llm::MockLanguageModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunk(domain: Domain, tenant_id: Uuid, content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            tenant_id,
            domain,
            content: content.to_string(),
            source_title: "Employee Handbook".to_string(),
            score,
        }
    }

    fn retriever(store: Arc<dyn VectorStore>) -> VectorRetriever {
        let config = AppConfig::default();
        VectorRetriever::new(
            store,
            Arc::new(MockLanguageModel::new(64)),
            Cache::in_memory(),
            "mock-embedding".to_string(),
            config.retrieval,
        )
    }

    #[tokio::test]
    async fn test_min_score_filters_candidates() {
        // Scores [0.91, 0.85, 0.60] with min_score 0.7 must yield 2 citations
        let store = Arc::new(MemoryVectorStore::new());
        let tenant = Uuid::new_v4();
        store.insert(chunk(Domain::Hr, tenant, "Szabadság szabályzat", 0.91), vec![]);
        store.insert(chunk(Domain::Hr, tenant, "Éves szabadság", 0.85), vec![]);
        store.insert(chunk(Domain::Hr, tenant, "Kapcsolódó téma", 0.60), vec![]);

        let retriever = retriever(store);
        let citations = retriever
            .retrieve("Mi a szabadság politika?", tenant, Domain::Hr, 10, 0.7)
            .await
            .unwrap();

        assert_eq!(citations.len(), 2);
        assert!(citations.iter().all(|c| c.similarity_score >= 0.7));
    }

    #[tokio::test]
    async fn test_all_citations_match_requested_domain() {
        let store = Arc::new(MemoryVectorStore::new());
        let tenant = Uuid::new_v4();
        for domain in Domain::ALL {
            store.insert(chunk(domain, tenant, "policy text", 0.9), vec![]);
        }

        let retriever = retriever(store);
        for domain in Domain::ALL {
            let citations = retriever
                .retrieve("policy", tenant, domain, 10, 0.0)
                .await
                .unwrap();
            assert!(!citations.is_empty());
            assert!(citations.iter().all(|c| c.domain == domain));
        }
    }

    /// Store wrapper that counts searches, to prove the cache short-circuits
    struct CountingStore {
        inner: MemoryVectorStore,
        searches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl VectorStore for CountingStore {
        async fn search(
            &self,
            tenant_id: Uuid,
            query_vector: &[f32],
            domain: Domain,
            top_k: usize,
            min_score: f32,
        ) -> Result<Vec<ScoredChunk>> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner
                .search(tenant_id, query_vector, domain, top_k, min_score)
                .await
        }

        async fn fetch(&self, tenant_id: Uuid, chunk_ids: &[Uuid]) -> Result<Vec<ScoredChunk>> {
            self.inner.fetch(tenant_id, chunk_ids).await
        }
    }

    #[tokio::test]
    async fn test_query_cache_skips_second_search() {
        let tenant = Uuid::new_v4();
        let inner = MemoryVectorStore::new();
        inner.insert(chunk(Domain::It, tenant, "VPN setup guide", 0.88), vec![]);
        let store = Arc::new(CountingStore {
            inner,
            searches: AtomicUsize::new(0),
        });

        let retriever = retriever(store.clone());

        let first = retriever
            .retrieve("vpn setup", tenant, Domain::It, 5, 0.0)
            .await
            .unwrap();
        // Different surface form, same normalized query
        let second = retriever
            .retrieve("  VPN   setup ", tenant, Domain::It, 5, 0.0)
            .await
            .unwrap();

        assert_eq!(store.searches.load(Ordering::SeqCst), 1);
        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].chunk_id, second[0].chunk_id);
        assert_eq!(first[0].similarity_score, second[0].similarity_score);
    }
}
