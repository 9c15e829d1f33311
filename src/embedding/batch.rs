/// Bulk loading of documents into the catalog and both indexes
use super::{Document, DocumentCatalog, EmbeddingProvider, KeywordIndex, VectorIndex};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Outcome of an indexing run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexReport {
    pub processed: usize,
    pub failed: usize,
    pub duration_ms: u64,
}

/// Embeds documents in bounded-concurrency batches and writes them to
/// the catalog, the keyword index and the vector index.
///
/// A batch whose embedding fails is skipped entirely, as is any document
/// whose vector the index would refuse, so all three stores keep the same
/// document set.
pub struct IndexBuilder {
    provider: Arc<dyn EmbeddingProvider>,
    catalog: Arc<DocumentCatalog>,
    keyword_index: Arc<RwLock<KeywordIndex>>,
    vector_index: Arc<RwLock<VectorIndex>>,
    batch_size: usize,
    max_concurrent: usize,
}

impl IndexBuilder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        catalog: Arc<DocumentCatalog>,
        keyword_index: Arc<RwLock<KeywordIndex>>,
        vector_index: Arc<RwLock<VectorIndex>>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            catalog,
            keyword_index,
            vector_index,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub async fn process(&self, documents: Vec<Document>) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        info!("Indexing {} document(s)", documents.len());

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();

        for (batch_no, chunk) in documents.chunks(self.batch_size).enumerate() {
            let permit = semaphore.clone().acquire_owned().await?;
            let provider = self.provider.clone();
            let chunk = chunk.to_vec();
            tasks.spawn_blocking(move || {
                let texts: Vec<String> = chunk.iter().map(|d| d.text.clone()).collect();
                let result = provider.embed_batch(&texts);
                drop(permit);
                (batch_no, chunk, result)
            });
        }

        let mut batches = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            batches.push(joined.context("embedding task panicked")?);
        }
        batches.sort_by_key(|(batch_no, ..)| *batch_no);

        let mut report = IndexReport::default();
        let mut stale_vectors = false;
        let mut keyword_index = self.keyword_index.write().await;
        let mut vector_index = self.vector_index.write().await;

        for (batch_no, chunk, result) in batches {
            let embeddings = match result {
                Ok(embeddings) if embeddings.len() == chunk.len() => embeddings,
                Ok(embeddings) => {
                    warn!(
                        "Batch {}: expected {} embeddings, got {}",
                        batch_no,
                        chunk.len(),
                        embeddings.len()
                    );
                    report.failed += chunk.len();
                    continue;
                }
                Err(e) => {
                    warn!("Batch {} failed to embed: {}", batch_no, e);
                    report.failed += chunk.len();
                    continue;
                }
            };

            for (document, embedding) in chunk.iter().zip(&embeddings) {
                // nothing is written for a document whose vector would be refused
                if let Err(e) = vector_index.validate(&document.document_id, embedding) {
                    warn!("Skipping {}: {}", document.document_id, e);
                    report.failed += 1;
                    continue;
                }

                self.catalog
                    .upsert(document, Some(embedding))
                    .with_context(|| format!("failed to store {}", document.document_id))?;
                keyword_index.insert(&document.document_id, &document.text)?;

                if vector_index.contains(&document.document_id) {
                    stale_vectors = true;
                } else {
                    vector_index.insert(&document.document_id, embedding)?;
                }
                report.processed += 1;
            }
            debug!("Indexed batch {} ({} documents)", batch_no, chunk.len());
        }

        keyword_index.commit()?;

        if stale_vectors {
            info!("Re-indexed documents changed; rebuilding vector index");
            rebuild_vectors(&self.catalog, &mut vector_index)?;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Indexing complete: {} processed, {} failed, {}ms",
            report.processed, report.failed, report.duration_ms
        );

        Ok(report)
    }
}

/// Refill a vector index from the embeddings stored in the catalog
pub fn rebuild_vectors(catalog: &DocumentCatalog, index: &mut VectorIndex) -> Result<usize> {
    index.clear();
    let mut skipped = 0;
    for (document_id, embedding) in catalog.embeddings()? {
        if let Err(e) = index.insert(&document_id, &embedding) {
            warn!("Skipping stored vector for {}: {}", document_id, e);
            skipped += 1;
        }
    }
    debug!("Vector index holds {} document(s)", index.len());
    Ok(skipped)
}
