//! Hybrid search combining lexical and vector retrieval

use super::{merge, HybridResponse, RetrievalHit};
use crate::config::{EmbeddingConfig, RetrievalConfig};
use crate::embedding::{DocumentCatalog, EmbeddingProvider, KeywordIndex, VectorIndex};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Vector search failed: {0}")]
    VectorSearchError(String),

    #[error("Keyword search failed: {0}")]
    KeywordSearchError(String),

    #[error("{0} search timed out after {1:?}")]
    Timeout(&'static str, Duration),

    #[error("Document catalog error: {0}")]
    CatalogError(String),

    #[error("Both indexes failed (keyword: {lexical}; vector: {vector})")]
    AllSourcesFailed { lexical: String, vector: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

/// Runs the keyword and vector searches concurrently and merges them
pub struct HybridSearcher {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    keyword_index: Arc<RwLock<KeywordIndex>>,
    vector_index: Arc<RwLock<VectorIndex>>,
    catalog: Arc<DocumentCatalog>,
    config: RetrievalConfig,
    embed_timeout: Duration,
}

impl HybridSearcher {
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        keyword_index: Arc<RwLock<KeywordIndex>>,
        vector_index: Arc<RwLock<VectorIndex>>,
        catalog: Arc<DocumentCatalog>,
        config: RetrievalConfig,
        embedding_config: &EmbeddingConfig,
    ) -> Self {
        Self {
            embedding_provider,
            keyword_index,
            vector_index,
            catalog,
            config,
            embed_timeout: Duration::from_secs(embedding_config.timeout_secs),
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Search with the configured weight and `top_k`
    pub async fn search_default(&self, question: &str) -> Result<HybridResponse, SearchError> {
        self.search(question, self.config.hybrid_weight, self.config.top_k)
            .await
    }

    /// Hybrid search. `weight` is the vector share of the combined score.
    ///
    /// If one index fails or times out, the other one's results are
    /// returned with the weight forced to it and `degraded` set.
    pub async fn search(
        &self,
        question: &str,
        weight: f32,
        top_k: usize,
    ) -> Result<HybridResponse, SearchError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&weight) {
            return Err(SearchError::InvalidQuery(format!(
                "hybrid weight must be within [0, 1], got {}",
                weight
            )));
        }
        if top_k == 0 {
            return Ok(HybridResponse::default());
        }

        let fetch_k = top_k.saturating_mul(self.config.candidate_multiplier.max(1));
        let timeout = self.config.timeout();

        let (lexical, vector) = tokio::join!(
            with_timeout("Keyword", timeout, self.keyword_search(question, fetch_k)),
            with_timeout("Vector", timeout, self.semantic_search(question, fetch_k)),
        );

        let mut response = HybridResponse::default();
        let (lexical_hits, vector_hits, weight) = match (lexical, vector) {
            (Ok(lexical), Ok(vector)) => (lexical, vector, weight),
            (Ok(lexical), Err(e)) => {
                warn!("Vector search unavailable, using keyword results only: {}", e);
                response.degraded = true;
                response.warnings.push(e.to_string());
                (lexical, Vec::new(), 0.0)
            }
            (Err(e), Ok(vector)) => {
                warn!("Keyword search unavailable, using vector results only: {}", e);
                response.degraded = true;
                response.warnings.push(e.to_string());
                (Vec::new(), vector, 1.0)
            }
            (Err(lexical), Err(vector)) => {
                return Err(SearchError::AllSourcesFailed {
                    lexical: lexical.to_string(),
                    vector: vector.to_string(),
                });
            }
        };

        debug!(
            "Merging {} keyword and {} vector candidates (weight {})",
            lexical_hits.len(),
            vector_hits.len(),
            weight
        );

        let merged = merge(&lexical_hits, &vector_hits, weight, fetch_k);
        let mut hits = self.hydrate(merged).await?;

        if self.config.min_combined_score > 0.0 {
            hits.retain(|h| h.combined_score >= self.config.min_combined_score);
        }
        hits.truncate(top_k);
        response.hits = hits;

        Ok(response)
    }

    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>, SearchError> {
        let index = self.keyword_index.clone().read_owned().await;
        let query = query.to_string();

        tokio::task::spawn_blocking(move || index.search(&query, limit))
            .await
            .map_err(|e| SearchError::KeywordSearchError(e.to_string()))?
            .map_err(|e| SearchError::KeywordSearchError(e.to_string()))
    }

    async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>, SearchError> {
        let provider = self.embedding_provider.clone();
        let text = query.to_string();
        let embedding = with_timeout(
            "Embedding",
            self.embed_timeout,
            async move {
                tokio::task::spawn_blocking(move || provider.embed(&text))
                    .await
                    .map_err(|e| SearchError::EmbeddingError(e.to_string()))?
                    .map_err(|e| SearchError::EmbeddingError(e.to_string()))
            },
        )
        .await?;

        let index = self.vector_index.clone().read_owned().await;
        tokio::task::spawn_blocking(move || index.search(&embedding, limit))
            .await
            .map_err(|e| SearchError::VectorSearchError(e.to_string()))?
            .map_err(|e| SearchError::VectorSearchError(e.to_string()))
    }

    /// Fill in source text and metadata. Hits whose document is missing
    /// from the catalog are dropped.
    async fn hydrate(&self, merged: Vec<RetrievalHit>) -> Result<Vec<RetrievalHit>, SearchError> {
        if merged.is_empty() {
            return Ok(merged);
        }

        let catalog = self.catalog.clone();
        let ids: Vec<String> = merged.iter().map(|h| h.document_id.clone()).collect();
        let mut documents = tokio::task::spawn_blocking(move || catalog.get_many(&ids))
            .await
            .map_err(|e| SearchError::CatalogError(e.to_string()))?
            .map_err(|e| SearchError::CatalogError(e.to_string()))?;

        let mut hydrated = Vec::with_capacity(merged.len());
        for mut hit in merged {
            match documents.remove(&hit.document_id) {
                Some(document) => {
                    hit.source_text = document.text;
                    hit.metadata = document.metadata;
                    hydrated.push(hit);
                }
                None => warn!("Indexed document {} missing from catalog", hit.document_id),
            }
        }

        Ok(hydrated)
    }
}

async fn with_timeout<T, F>(what: &'static str, limit: Duration, future: F) -> Result<T, SearchError>
where
    F: std::future::Future<Output = Result<T, SearchError>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| SearchError::Timeout(what, limit))?
}
