//! Thread-level result diversity

use crate::retrieval::RetrievalResult;
use ahash::{HashSet, HashSetExt};

/// Keep the best-scoring chunk of each thread, up to `top_k` results
///
/// # Arguments
/// * `results` - Results already sorted by final score descending
/// * `top_k` - Maximum number of results to return
///
/// # Returns
/// At most `top_k` results with pairwise distinct thread ids, in input order.
/// Fewer than `top_k` distinct threads yields a shorter list; skipped chunks
/// are never used to fill the quota.
pub fn deduplicate_by_thread(results: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    let mut seen_threads: HashSet<String> = HashSet::with_capacity(top_k);
    let mut kept = Vec::with_capacity(top_k.min(results.len()));

    for result in results {
        if kept.len() >= top_k {
            break;
        }
        if seen_threads.insert(result.thread_id.clone()) {
            kept.push(result);
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Chunk;
    use crate::retrieval::ScoreBreakdown;

    fn result(id: &str, thread: &str, score: f32) -> RetrievalResult {
        RetrievalResult::from_chunk(
            &Chunk::new(id, format!("m-{id}"), thread, "body"),
            ScoreBreakdown {
                fused: score,
                final_score: score,
                ..ScoreBreakdown::default()
            },
        )
    }

    fn ids(results: &[RetrievalResult]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn test_keeps_first_of_each_thread() {
        let results = vec![
            result("C", "T2", 0.13),
            result("A", "T1", 0.016),
            result("B", "T1", 0.015),
        ];

        let deduped = deduplicate_by_thread(results, 10);
        assert_eq!(ids(&deduped), vec!["C", "A"]);
    }

    #[test]
    fn test_stops_at_top_k() {
        let results: Vec<RetrievalResult> = (0..20)
            .map(|i| result(&format!("c{i:02}"), &format!("t{i}"), 1.0 - i as f32 * 0.01))
            .collect();

        let deduped = deduplicate_by_thread(results, 10);
        assert_eq!(deduped.len(), 10);
        assert_eq!(deduped[9].chunk_id, "c09");
    }

    #[test]
    fn test_no_backfill_from_repeated_threads() {
        let results = vec![
            result("a1", "T1", 0.9),
            result("a2", "T1", 0.8),
            result("b1", "T2", 0.7),
            result("a3", "T1", 0.6),
        ];

        let deduped = deduplicate_by_thread(results, 5);
        assert_eq!(ids(&deduped), vec!["a1", "b1"]);
    }

    #[test]
    fn test_threads_are_distinct_and_bounded() {
        let threads = ["t1", "t2", "t1", "t3", "t2", "t4", "t4", "t1"];
        let results: Vec<RetrievalResult> = threads
            .iter()
            .enumerate()
            .map(|(i, t)| result(&format!("c{i}"), t, 1.0 - i as f32 * 0.1))
            .collect();

        for top_k in 0..6 {
            let deduped = deduplicate_by_thread(results.clone(), top_k);
            let mut seen: Vec<&str> = deduped.iter().map(|r| r.thread_id.as_str()).collect();
            assert!(deduped.len() <= top_k.min(4));
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), deduped.len());
        }
    }

    #[test]
    fn test_empty() {
        assert!(deduplicate_by_thread(Vec::new(), 10).is_empty());
    }
}
