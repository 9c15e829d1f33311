//! Hybrid retrieval integration tests
//!
//! Indexes a small corpus into on-disk stores, then searches it through
//! the keyword index, the vector index and the merger.

mod common;

use common::{FailingEmbedder, HashBagEmbedder, SlowEmbedder, HASH_DIM};
use quarry::config::{EmbeddingConfig, RetrievalConfig};
use quarry::embedding::{
    rebuild_vectors, Document, DocumentCatalog, EmbeddingProvider, IndexBuilder, KeywordIndex,
    VectorIndex,
};
use quarry::retrieval::{HybridSearcher, SearchError};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::RwLock;

struct Stores {
    catalog: Arc<DocumentCatalog>,
    keyword: Arc<RwLock<KeywordIndex>>,
    vector: Arc<RwLock<VectorIndex>>,
}

fn open_stores(dir: &Path) -> Stores {
    let catalog = DocumentCatalog::open(&dir.join("catalog.db")).unwrap();
    let keyword = KeywordIndex::new(dir.join("lexical")).unwrap();
    let mut vector = VectorIndex::new(HASH_DIM, 200, 16, 64, 1000);
    rebuild_vectors(&catalog, &mut vector).unwrap();

    Stores {
        catalog: Arc::new(catalog),
        keyword: Arc::new(RwLock::new(keyword)),
        vector: Arc::new(RwLock::new(vector)),
    }
}

fn corpus() -> Vec<Document> {
    vec![
        Document::new(
            "policy-rent",
            "Rent relief policy for small retail stores affected by falling foot traffic",
        )
        .with_metadata(serde_json::json!({"kind": "policy", "year": 2024})),
        Document::new(
            "memo-cafe",
            "Cafe openings in the northern region doubled after the transit extension",
        ),
        Document::new(
            "note-logistics",
            "Logistics costs for warehouses rose with fuel prices during the second quarter",
        ),
        Document::new(
            "brief-tourism",
            "Tourism spending recovered in coastal regions, lifting hotel and cafe revenue",
        ),
    ]
}

async fn index_corpus(stores: &Stores) {
    let builder = IndexBuilder::new(
        Arc::new(HashBagEmbedder),
        stores.catalog.clone(),
        stores.keyword.clone(),
        stores.vector.clone(),
        2,
        2,
    );
    let report = builder.process(corpus()).await.unwrap();
    assert_eq!(report.processed, 4);
    assert_eq!(report.failed, 0);
}

fn searcher(stores: &Stores, provider: Arc<dyn EmbeddingProvider>, embedding: &EmbeddingConfig) -> HybridSearcher {
    HybridSearcher::new(
        provider,
        stores.keyword.clone(),
        stores.vector.clone(),
        stores.catalog.clone(),
        RetrievalConfig::default(),
        embedding,
    )
}

#[tokio::test]
async fn test_hybrid_search_ranks_relevant_document_first() {
    let temp = TempDir::new().unwrap();
    let stores = open_stores(temp.path());
    index_corpus(&stores).await;
    println!("✓ Indexed corpus at {:?}", temp.path());

    let searcher = searcher(&stores, Arc::new(HashBagEmbedder), &EmbeddingConfig::default());
    let response = searcher.search("rent relief for retail stores", 0.5, 3).await.unwrap();

    assert!(!response.degraded);
    assert!(!response.hits.is_empty());
    assert!(response.hits.len() <= 3);

    let top = &response.hits[0];
    assert_eq!(top.document_id, "policy-rent");
    assert!(top.source_text.starts_with("Rent relief"));
    assert_eq!(top.metadata["kind"], "policy");
    assert!(top.lexical_score.is_some());
    assert!(top.vector_score.is_some());

    for pair in response.hits.windows(2) {
        assert!(pair[0].combined_score >= pair[1].combined_score);
    }
    println!("✓ Top hit: {} ({:.3})", top.document_id, top.combined_score);
}

#[tokio::test]
async fn test_weight_extremes_use_one_side() {
    let temp = TempDir::new().unwrap();
    let stores = open_stores(temp.path());
    index_corpus(&stores).await;
    let searcher = searcher(&stores, Arc::new(HashBagEmbedder), &EmbeddingConfig::default());

    // keyword only: documents without the term cannot score above zero
    let lexical = searcher.search("logistics", 0.0, 4).await.unwrap();
    assert_eq!(lexical.hits[0].document_id, "note-logistics");
    assert!((lexical.hits[0].combined_score - 1.0).abs() < 1e-6);
    for hit in lexical.hits.iter().filter(|h| h.lexical_score.is_none()) {
        assert_eq!(hit.combined_score, 0.0);
    }

    // vector only: every hit was scored by the vector index
    let semantic = searcher.search("logistics", 1.0, 4).await.unwrap();
    assert!(semantic.hits.iter().all(|h| h.vector_score.is_some()));
}

#[tokio::test]
async fn test_embedding_failure_degrades_to_keyword() {
    let temp = TempDir::new().unwrap();
    let stores = open_stores(temp.path());
    index_corpus(&stores).await;

    let searcher = searcher(&stores, Arc::new(FailingEmbedder), &EmbeddingConfig::default());
    let response = searcher.search("cafe", 0.9, 5).await.unwrap();

    assert!(response.degraded);
    assert_eq!(response.warnings.len(), 1);
    assert!(!response.hits.is_empty());
    assert!(response.hits.iter().all(|h| h.vector_score.is_none()));
    assert!(response
        .hits
        .iter()
        .any(|h| h.document_id == "memo-cafe" || h.document_id == "brief-tourism"));
    println!("✓ Degraded search returned {} keyword hit(s)", response.hits.len());
}

#[tokio::test]
async fn test_slow_embedding_times_out() {
    let temp = TempDir::new().unwrap();
    let stores = open_stores(temp.path());
    index_corpus(&stores).await;

    let embedding = EmbeddingConfig {
        timeout_secs: 1,
        ..EmbeddingConfig::default()
    };
    let searcher = searcher(
        &stores,
        Arc::new(SlowEmbedder(Duration::from_millis(2500))),
        &embedding,
    );
    let response = searcher.search("warehouses fuel", 0.5, 5).await.unwrap();

    assert!(response.degraded);
    assert_eq!(response.hits[0].document_id, "note-logistics");
}

#[tokio::test]
async fn test_keyword_timeout_degrades_to_vector() {
    let temp = TempDir::new().unwrap();
    let stores = open_stores(temp.path());
    index_corpus(&stores).await;

    let searcher = HybridSearcher::new(
        Arc::new(HashBagEmbedder),
        stores.keyword.clone(),
        stores.vector.clone(),
        stores.catalog.clone(),
        RetrievalConfig {
            timeout_secs: 1,
            ..RetrievalConfig::default()
        },
        &EmbeddingConfig::default(),
    );
    // the keyword side waits on a held write lock until the timeout
    let _writer = stores.keyword.write().await;

    let response = searcher.search("rent relief for retail stores", 0.0, 3).await.unwrap();

    assert!(response.degraded);
    assert_eq!(response.warnings.len(), 1);
    assert!(!response.hits.is_empty());
    assert!(response.hits.iter().all(|h| h.lexical_score.is_none()));
    assert!(response.hits.iter().all(|h| h.vector_score.is_some()));
    // weight 0.0 was overridden, so combined scores come from the vector side
    assert!(response.hits[0].combined_score > 0.0);
    assert_eq!(response.hits[0].document_id, "policy-rent");
}

#[tokio::test]
async fn test_both_sources_failing_is_an_error() {
    let temp = TempDir::new().unwrap();
    let stores = open_stores(temp.path());
    index_corpus(&stores).await;

    // the embedder fails outright and the keyword side waits on a held
    // write lock until the retrieval timeout
    let searcher = HybridSearcher::new(
        Arc::new(FailingEmbedder),
        stores.keyword.clone(),
        stores.vector.clone(),
        stores.catalog.clone(),
        RetrievalConfig {
            timeout_secs: 1,
            ..RetrievalConfig::default()
        },
        &EmbeddingConfig::default(),
    );
    let _writer = stores.keyword.write().await;

    let result = searcher.search("cafe", 0.5, 5).await;
    assert!(matches!(result, Err(SearchError::AllSourcesFailed { .. })));
}

#[tokio::test]
async fn test_reopened_stores_serve_the_same_results() {
    let temp = TempDir::new().unwrap();

    let before = {
        let stores = open_stores(temp.path());
        index_corpus(&stores).await;
        let searcher = searcher(&stores, Arc::new(HashBagEmbedder), &EmbeddingConfig::default());
        searcher.search("tourism hotel revenue", 0.5, 2).await.unwrap()
    };

    let stores = open_stores(temp.path());
    assert_eq!(stores.catalog.len().unwrap(), 4);
    assert_eq!(stores.keyword.read().await.len(), 4);
    assert_eq!(stores.vector.read().await.len(), 4);

    let searcher = searcher(&stores, Arc::new(HashBagEmbedder), &EmbeddingConfig::default());
    let after = searcher.search("tourism hotel revenue", 0.5, 2).await.unwrap();

    let ids = |r: &quarry::retrieval::HybridResponse| {
        r.hits.iter().map(|h| h.document_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&before), ids(&after));
    assert_eq!(after.hits[0].document_id, "brief-tourism");
}
