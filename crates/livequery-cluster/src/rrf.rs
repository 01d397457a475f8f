//! Reciprocal Rank Fusion.
//!
//! Merges K ranked lists by summing `1 / (k + rank)` per key (ranks are
//! 1-based; a list that does not contain the key contributes nothing).
//! Rank-based fusion tolerates divergent score scales, which is exactly
//! the situation with per-node BM25: each node's IDF reflects only its
//! local corpus, and scores must never be re-normalized across nodes.

/// Merge ranked lists of `(key, score)` pairs into one list of
/// `(key, rrf_score)`, sorted by descending fused score with ties broken
/// by ascending key.
///
/// Input lists must already be in descending score order; only the
/// positions matter here.
pub fn rrf_merge(lists: &[Vec<(String, f64)>], k: f64) -> Vec<(String, f64)> {
    let mut fused: Vec<(String, f64)> = Vec::new();
    let mut index: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();

    for list in lists {
        for (rank, (key, _score)) in list.iter().enumerate() {
            let contribution = 1.0 / (k + (rank + 1) as f64);
            match index.get(key.as_str()).copied() {
                Some(at) => fused[at].1 += contribution,
                None => {
                    fused.push((key.clone(), contribution));
                    index.insert(key.as_str(), fused.len() - 1);
                }
            }
        }
    }

    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[(&str, f64)]) -> Vec<(String, f64)> {
        entries.iter().map(|(k, s)| (k.to_string(), *s)).collect()
    }

    #[test]
    fn test_empty() {
        assert!(rrf_merge(&[], 60.0).is_empty());
        assert!(rrf_merge(&[vec![]], 60.0).is_empty());
    }

    #[test]
    fn test_single_list_keeps_order() {
        let merged = rrf_merge(&[list(&[("a", 0.9), ("b", 0.5), ("c", 0.1)])], 60.0);
        let keys: Vec<&str> = merged.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_key_in_multiple_lists_wins() {
        // the scatter-gather scenario: doc-common appears on two nodes
        let n1 = list(&[("doc-local", 0.9)]);
        let n2 = list(&[("doc-common", 0.95), ("doc-remote", 0.8)]);
        let n3 = list(&[("doc-common", 0.85)]);

        let merged = rrf_merge(&[n1, n2, n3], 60.0);
        assert_eq!(merged[0].0, "doc-common");
        // 2/(60+1) vs 1/(60+1): double presence dominates
        assert!((merged[0].1 - 2.0 / 61.0).abs() < 1e-12);
        let rest: Vec<&str> = merged[1..].iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(rest, vec!["doc-local", "doc-remote"]);
    }

    #[test]
    fn test_scores_are_rank_based() {
        // wildly different score scales, same ranks, same fusion
        let a = rrf_merge(&[list(&[("x", 1000.0), ("y", 999.0)])], 60.0);
        let b = rrf_merge(&[list(&[("x", 0.002), ("y", 0.001)])], 60.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_tie_broken_by_key() {
        let merged = rrf_merge(&[list(&[("b", 1.0)]), list(&[("a", 1.0)])], 60.0);
        assert_eq!(merged[0].0, "a");
        assert_eq!(merged[1].0, "b");
    }

    #[test]
    fn test_k_parameter_shapes_contributions() {
        let merged = rrf_merge(&[list(&[("a", 1.0), ("b", 0.5)])], 1.0);
        assert!((merged[0].1 - 0.5).abs() < 1e-12);
        assert!((merged[1].1 - 1.0 / 3.0).abs() < 1e-12);
    }
}
