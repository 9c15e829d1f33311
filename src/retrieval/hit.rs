//! Scored retrieval results

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A merged search hit
///
/// `lexical_score` and `vector_score` are the min-max normalised scores
/// that went into `combined_score`; `None` means the document was absent
/// from that result list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
    pub document_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_score: Option<f32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f32>,

    pub combined_score: f32,

    /// Filled from the document catalog after merging
    pub source_text: String,

    pub metadata: Value,
}

impl RetrievalHit {
    /// First `max_chars` characters of the source text
    pub fn snippet(&self, max_chars: usize) -> String {
        let mut chars = self.source_text.chars();
        let head: String = chars.by_ref().take(max_chars).collect();
        if chars.next().is_some() {
            format!("{}...", head)
        } else {
            head
        }
    }
}

/// Result of a hybrid search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HybridResponse {
    pub hits: Vec<RetrievalHit>,

    /// One of the two indexes failed and only the other contributed
    pub degraded: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}
