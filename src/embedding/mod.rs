//! Embedding and indexing
//!
//! - [`EmbeddingProvider`] abstracts the embedding backend
//!   ([`FastEmbedProvider`] runs locally, all-MiniLM-L6-v2 by default)
//! - [`KeywordIndex`]: tantivy BM25 over document text
//! - [`VectorIndex`]: HNSW cosine search
//! - [`DocumentCatalog`]: SQLite store of text, metadata and embeddings
//! - [`IndexBuilder`]: loads documents into all of the above

mod batch;
mod catalog;
mod keyword_index;
mod provider;
mod vector_index;

pub use batch::{rebuild_vectors, IndexBuilder, IndexReport};
pub use catalog::{CatalogError, Document, DocumentCatalog};
pub use keyword_index::{KeywordIndex, KeywordIndexError};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider, SUPPORTED_MODELS};
pub use vector_index::{VectorIndex, VectorIndexError};

use crate::config::IndexingConfig;
use std::path::PathBuf;

/// On-disk layout under `indexing.data_dir`
#[derive(Debug, Clone)]
pub struct IndexPaths {
    pub lexical_dir: PathBuf,
    pub catalog_db: PathBuf,
}

impl IndexPaths {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            lexical_dir: data_dir.join("lexical"),
            catalog_db: data_dir.join("catalog.db"),
        }
    }

    pub fn from_config(config: &IndexingConfig) -> crate::Result<Self> {
        Ok(Self::new(crate::config::expand_path(&config.data_dir)?))
    }
}
