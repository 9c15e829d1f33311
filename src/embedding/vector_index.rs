/// HNSW vector index for cosine similarity search
use crate::config::IndexingConfig;
use ahash::AHashMap;
use hnsw_rs::prelude::*;
use thiserror::Error;

/// hnsw_rs caps the layer count at 16
const MAX_LAYERS: usize = 16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Vector for {0} has zero norm")]
    ZeroNorm(String),

    #[error("Document {0} is already indexed")]
    DuplicateId(String),

    #[error("Vector contains non-finite values")]
    NonFinite,
}

/// Approximate nearest neighbour index keyed by document id
///
/// hnsw_rs works with `usize` ids, so documents are assigned dense slots
/// in insertion order. HNSW graphs do not support removal; rebuild with
/// [`clear`](Self::clear) instead.
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    dimension: usize,
    ef_construction: usize,
    m: usize,
    ef_search: usize,
    max_elements: usize,
    ids: Vec<String>,
    slots: AHashMap<String, usize>,
}

impl VectorIndex {
    pub fn new(
        dimension: usize,
        ef_construction: usize,
        m: usize,
        ef_search: usize,
        max_elements: usize,
    ) -> Self {
        Self {
            index: Hnsw::<f32, DistCosine>::new(m, max_elements, MAX_LAYERS, ef_construction, DistCosine),
            dimension,
            ef_construction,
            m,
            ef_search,
            max_elements,
            ids: Vec::new(),
            slots: AHashMap::new(),
        }
    }

    pub fn from_config(config: &IndexingConfig) -> Self {
        Self::new(
            config.vector_dim,
            config.hnsw_ef_construction,
            config.hnsw_m,
            config.hnsw_ef_search,
            config.max_elements,
        )
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(VectorIndexError::NonFinite);
        }
        Ok(())
    }

    /// Whether `vector` could be inserted: right dimension, finite, non-zero
    pub fn validate(&self, doc_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.check_vector(vector)?;
        if vector.iter().all(|x| *x == 0.0) {
            return Err(VectorIndexError::ZeroNorm(doc_id.to_string()));
        }
        Ok(())
    }

    pub fn insert(&mut self, doc_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        self.validate(doc_id, vector)?;
        if self.slots.contains_key(doc_id) {
            return Err(VectorIndexError::DuplicateId(doc_id.to_string()));
        }

        let slot = self.ids.len();
        self.index.insert((vector, slot));
        self.ids.push(doc_id.to_string());
        self.slots.insert(doc_id.to_string(), slot);

        Ok(())
    }

    pub fn insert_batch(&mut self, items: &[(String, Vec<f32>)]) -> Result<(), VectorIndexError> {
        for (doc_id, vector) in items {
            self.insert(doc_id, vector)?;
        }
        Ok(())
    }

    /// `top_k` nearest documents as `(document_id, cosine similarity)`,
    /// best first. Similarity is in [-1, 1].
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(String, f32)>, VectorIndexError> {
        self.check_vector(query)?;
        if query.iter().all(|x| *x == 0.0) {
            return Err(VectorIndexError::ZeroNorm("query".to_string()));
        }
        if top_k == 0 || self.ids.is_empty() {
            return Ok(Vec::new());
        }

        let ef = self.ef_search.max(top_k);
        let mut results: Vec<(String, f32)> = self
            .index
            .search(query, top_k, ef)
            .into_iter()
            .filter_map(|neighbour| {
                self.ids
                    .get(neighbour.d_id)
                    .map(|id| (id.clone(), (1.0 - neighbour.distance).clamp(-1.0, 1.0)))
            })
            .collect();

        results.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        results.truncate(top_k);

        Ok(results)
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.slots.contains_key(doc_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn clear(&mut self) {
        self.index = Hnsw::<f32, DistCosine>::new(
            self.m,
            self.max_elements,
            MAX_LAYERS,
            self.ef_construction,
            DistCosine,
        );
        self.ids.clear();
        self.slots.clear();
    }
}
