//! Reciprocal Rank Fusion across query expansions

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FusionError {
    #[error("Invalid RRF constant {0}: must be positive")]
    InvalidK(f32),

    #[error("Invalid weight configuration: weights must be positive")]
    InvalidWeights,
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// RRF K constant (60)
    pub rrf_k: f32,

    /// Weight for lexical results
    pub lexical_weight: f32,

    /// Weight for semantic results
    pub semantic_weight: f32,

    /// Candidates kept after fusion
    pub max_candidates: usize,
}

impl FusionConfig {
    pub fn new(
        rrf_k: f32,
        lexical_weight: f32,
        semantic_weight: f32,
        max_candidates: usize,
    ) -> Result<Self, FusionError> {
        if !(rrf_k.is_finite() && rrf_k > 0.0) {
            return Err(FusionError::InvalidK(rrf_k));
        }
        if !(lexical_weight > 0.0 && semantic_weight > 0.0) {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            rrf_k,
            lexical_weight,
            semantic_weight,
            max_candidates,
        })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            lexical_weight: 1.0,
            semantic_weight: 1.0,
            max_candidates: 200,
        }
    }
}

/// Ranked chunk ids returned for one expansion
///
/// `None` means that search did not run (its backend failed); it contributes
/// nothing, exactly like an empty list.
#[derive(Debug, Clone, Default)]
pub struct ExpansionRanking {
    pub lexical: Option<Vec<String>>,
    pub semantic: Option<Vec<String>>,
}

/// A chunk after fusion, before any metadata adjustment
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub chunk_id: String,
    pub fused_score: f32,
    pub lexical_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
    pub expansion_hits: usize,
}

impl FusedCandidate {
    fn new(chunk_id: &str) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            fused_score: 0.0,
            lexical_rank: None,
            semantic_rank: None,
            expansion_hits: 0,
        }
    }
}

fn best_rank(current: Option<usize>, rank: usize) -> Option<usize> {
    Some(current.map_or(rank, |r| r.min(rank)))
}

/// Fuse every expansion's lexical and semantic rankings into one list
///
/// Each appearance contributes `weight / (k + rank)` with rank 0 for the top
/// hit, and contributions are summed over all expansions. A repeated id within
/// one list only counts at its first position. The result is sorted by fused
/// score descending (ties by chunk id) and cut to `max_candidates`.
pub fn reciprocal_rank_fusion(
    rankings: &[ExpansionRanking],
    config: &FusionConfig,
) -> Vec<FusedCandidate> {
    let mut candidates: HashMap<String, FusedCandidate> = HashMap::new();

    for ranking in rankings {
        let mut hit_this_expansion: HashSet<&str> = HashSet::new();

        for (ids, weight, is_lexical) in [
            (&ranking.lexical, config.lexical_weight, true),
            (&ranking.semantic, config.semantic_weight, false),
        ] {
            let Some(ids) = ids else { continue };
            let mut seen: HashSet<&str> = HashSet::with_capacity(ids.len());

            for (rank, chunk_id) in ids.iter().enumerate() {
                if !seen.insert(chunk_id.as_str()) {
                    continue;
                }
                let candidate = candidates
                    .entry(chunk_id.clone())
                    .or_insert_with(|| FusedCandidate::new(chunk_id));

                candidate.fused_score += weight / (config.rrf_k + rank as f32);
                if is_lexical {
                    candidate.lexical_rank = best_rank(candidate.lexical_rank, rank);
                } else {
                    candidate.semantic_rank = best_rank(candidate.semantic_rank, rank);
                }
                if hit_this_expansion.insert(chunk_id.as_str()) {
                    candidate.expansion_hits += 1;
                }
            }
        }
    }

    let mut fused: Vec<FusedCandidate> = candidates.into_values().collect();
    fused.sort_by(|a, b| {
        b.fused_score
            .total_cmp(&a.fused_score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    fused.truncate(config.max_candidates);

    fused
}
