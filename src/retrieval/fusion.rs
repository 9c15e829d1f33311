//! Weighted min-max fusion of lexical and vector result lists

use super::RetrievalHit;
use ahash::AHashMap;
use serde_json::Value;

/// Min-max normalise a result list into [0, 1]
///
/// A single hit, or a list whose scores are all equal, normalises to 1.0.
/// Duplicate ids keep their first (best) occurrence.
pub fn normalize_scores(hits: &[(String, f32)]) -> AHashMap<&str, f32> {
    let mut normalized = AHashMap::with_capacity(hits.len());
    if hits.is_empty() {
        return normalized;
    }

    let (min, max) = hits.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), (_, s)| {
        (lo.min(*s), hi.max(*s))
    });
    let range = max - min;

    for (id, score) in hits {
        let value = if range <= f32::EPSILON * max.abs().max(1.0) {
            1.0
        } else {
            (score - min) / range
        };
        normalized.entry(id.as_str()).or_insert(value);
    }

    normalized
}

/// Merge two ranked lists
///
/// `combined = weight * vector + (1 - weight) * lexical`, with a missing
/// side contributing 0. Results are sorted by combined score descending,
/// ties broken by `document_id` ascending, and truncated to `top_k`.
/// `weight` is clamped to [0, 1]. Source text and metadata are left empty
/// for the caller to hydrate.
pub fn merge(
    lexical_hits: &[(String, f32)],
    vector_hits: &[(String, f32)],
    weight: f32,
    top_k: usize,
) -> Vec<RetrievalHit> {
    let weight = if weight.is_nan() { 0.5 } else { weight.clamp(0.0, 1.0) };
    let lexical = normalize_scores(lexical_hits);
    let vector = normalize_scores(vector_hits);

    let mut ids: Vec<&str> = lexical.keys().chain(vector.keys()).copied().collect();
    ids.sort_unstable();
    ids.dedup();

    let mut merged: Vec<RetrievalHit> = ids
        .into_iter()
        .map(|id| {
            let lexical_score = lexical.get(id).copied();
            let vector_score = vector.get(id).copied();
            let combined_score =
                weight * vector_score.unwrap_or(0.0) + (1.0 - weight) * lexical_score.unwrap_or(0.0);
            RetrievalHit {
                document_id: id.to_string(),
                lexical_score,
                vector_score,
                combined_score,
                source_text: String::new(),
                metadata: Value::Null,
            }
        })
        .collect();

    merged.sort_by(|a, b| {
        b.combined_score
            .total_cmp(&a.combined_score)
            .then_with(|| a.document_id.cmp(&b.document_id))
    });
    merged.truncate(top_k);

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(items: &[(&str, f32)]) -> Vec<(String, f32)> {
        items.iter().map(|(id, s)| (id.to_string(), *s)).collect()
    }

    fn ids(hits: &[RetrievalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.document_id.as_str()).collect()
    }

    #[test]
    fn test_normalization() {
        let list = hits(&[("a", 10.0), ("b", 5.0), ("c", 0.0)]);
        let normalized = normalize_scores(&list);
        assert_eq!(normalized["a"], 1.0);
        assert_eq!(normalized["b"], 0.5);
        assert_eq!(normalized["c"], 0.0);

        let single = hits(&[("only", 3.7)]);
        assert_eq!(normalize_scores(&single)["only"], 1.0);

        let flat = hits(&[("x", 0.4), ("y", 0.4)]);
        let normalized = normalize_scores(&flat);
        assert_eq!(normalized["x"], 1.0);
        assert_eq!(normalized["y"], 1.0);
    }

    #[test]
    fn test_rounding_noise_at_large_magnitudes() {
        // adjacent f32 values near 1.2e7 are one ulp apart
        let list = hits(&[("a", 12_345_679.0), ("b", 12_345_678.0)]);
        let normalized = normalize_scores(&list);
        assert_eq!(normalized["a"], 1.0);
        assert_eq!(normalized["b"], 1.0);

        let list = hits(&[("a", 10_000_000.0), ("b", 5_000_000.0)]);
        let normalized = normalize_scores(&list);
        assert_eq!(normalized["b"], 0.0);
    }

    #[test]
    fn test_both_empty() {
        assert!(merge(&[], &[], 0.5, 10).is_empty());
    }

    #[test]
    fn test_combined_scores() {
        let lexical = hits(&[("a", 8.0), ("b", 4.0)]);
        let vector = hits(&[("b", 0.9), ("c", 0.3)]);
        let merged = merge(&lexical, &vector, 0.5, 10);

        // a: lex 1.0 vec - ; b: lex 0.0 vec 1.0 ; c: vec 0.0
        assert_eq!(ids(&merged), vec!["a", "b", "c"]);
        assert_eq!(merged[0].combined_score, 0.5);
        assert_eq!(merged[0].vector_score, None);
        assert_eq!(merged[1].combined_score, 0.5);
        assert_eq!(merged[1].lexical_score, Some(0.0));
        assert_eq!(merged[2].combined_score, 0.0);
    }

    #[test]
    fn test_ties_broken_by_document_id() {
        let lexical = hits(&[("zeta", 1.0), ("alpha", 1.0), ("mid", 1.0)]);
        let merged = merge(&lexical, &[], 0.0, 10);
        assert_eq!(ids(&merged), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_single_source_keeps_order() {
        let vector = hits(&[("v1", 0.9), ("v2", 0.7), ("v3", 0.2)]);
        let merged = merge(&[], &vector, 1.0, 10);
        assert_eq!(ids(&merged), vec!["v1", "v2", "v3"]);

        let lexical = hits(&[("l1", 12.0), ("l2", 3.0)]);
        let merged = merge(&lexical, &[], 0.0, 10);
        assert_eq!(ids(&merged), vec!["l1", "l2"]);
        assert_eq!(merged[0].combined_score, 1.0);
    }

    #[test]
    fn test_weight_monotonicity() {
        let lexical = hits(&[("lex-best", 10.0), ("vec-best", 1.0)]);
        let vector = hits(&[("vec-best", 0.95), ("lex-best", 0.10)]);

        let mut previous = f32::NEG_INFINITY;
        for step in 0..=10 {
            let weight = step as f32 / 10.0;
            let merged = merge(&lexical, &vector, weight, 10);
            let vec_best = merged
                .iter()
                .find(|h| h.document_id == "vec-best")
                .unwrap()
                .combined_score;
            assert!(vec_best >= previous);
            previous = vec_best;
        }

        assert_eq!(merge(&lexical, &vector, 0.0, 1)[0].document_id, "lex-best");
        assert_eq!(merge(&lexical, &vector, 1.0, 1)[0].document_id, "vec-best");
    }

    #[test]
    fn test_truncates_to_top_k() {
        let lexical = hits(&[("a", 3.0), ("b", 2.0), ("c", 1.0)]);
        assert_eq!(merge(&lexical, &[], 0.0, 2).len(), 2);
        assert!(merge(&lexical, &[], 0.0, 0).is_empty());
    }

    #[test]
    fn test_out_of_range_weight_is_clamped() {
        let lexical = hits(&[("a", 1.0)]);
        let vector = hits(&[("b", 1.0)]);
        assert_eq!(merge(&lexical, &vector, 7.0, 1)[0].document_id, "b");
        assert_eq!(merge(&lexical, &vector, -3.0, 1)[0].document_id, "a");
    }
}
