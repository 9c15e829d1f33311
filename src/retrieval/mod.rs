//! Hybrid retrieval
//!
//! Keyword (BM25) and vector (cosine) results are min-max normalised per
//! list and blended with a single weight.

mod fusion;
mod hit;
mod hybrid;

pub use fusion::{merge, normalize_scores};
pub use hit::{HybridResponse, RetrievalHit};
pub use hybrid::{HybridSearcher, SearchError};
