//! Semantic search on top of a vector backend

use super::vector_index::{VectorBackend, VectorIndexError};
use ahash::{HashSet, HashSetExt};
use std::sync::Arc;

/// Chunk id with cosine similarity to the query vector
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub chunk_id: String,
    pub similarity: f32,
}

/// Ranks chunks by cosine similarity to an already-embedded query
///
/// Backends may return ties in any order (or even repeat an id); this wrapper
/// normalizes the list so rankings are reproducible.
#[derive(Clone)]
pub struct SemanticIndex {
    backend: Arc<dyn VectorBackend>,
}

impl SemanticIndex {
    pub fn new(backend: Arc<dyn VectorBackend>) -> Self {
        Self { backend }
    }

    /// Up to `limit` chunks by descending similarity, ties by chunk id
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SemanticHit>, VectorIndexError> {
        if query_vector.len() != self.backend.dimension() {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.backend.dimension(),
                actual: query_vector.len(),
            });
        }

        if limit == 0 {
            return Ok(Vec::new());
        }

        let raw = self.backend.query(query_vector, limit).await?;

        let mut hits: Vec<SemanticHit> = raw
            .into_iter()
            .filter(|hit| hit.similarity.is_finite())
            .map(|hit| SemanticHit {
                chunk_id: hit.chunk_id,
                similarity: hit.similarity,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });

        let mut seen = HashSet::with_capacity(hits.len());
        hits.retain(|hit| seen.insert(hit.chunk_id.clone()));
        hits.truncate(limit);

        Ok(hits)
    }

    pub fn dimension(&self) -> usize {
        self.backend.dimension()
    }

    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorHit;
    use async_trait::async_trait;

    /// Returns canned hits in whatever order they were given
    struct CannedBackend(Vec<VectorHit>);

    #[async_trait]
    impl VectorBackend for CannedBackend {
        async fn query(
            &self,
            _vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<VectorHit>, VectorIndexError> {
            Ok(self.0.clone())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    fn hit(id: &str, similarity: f32) -> VectorHit {
        VectorHit {
            chunk_id: id.to_string(),
            similarity,
        }
    }

    #[tokio::test]
    async fn test_reorders_ties_and_drops_repeats() {
        let index = SemanticIndex::new(Arc::new(CannedBackend(vec![
            hit("b", 0.5),
            hit("c", 0.9),
            hit("a", 0.5),
            hit("c", 0.4),
            hit("d", f32::NAN),
        ])));

        let ids: Vec<String> = index
            .search(&[1.0, 0.0], 10)
            .await
            .unwrap()
            .into_iter()
            .map(|h| h.chunk_id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_limit_and_dimension() {
        let index = SemanticIndex::new(Arc::new(CannedBackend(vec![
            hit("a", 0.9),
            hit("b", 0.8),
            hit("c", 0.7),
        ])));

        assert_eq!(index.search(&[1.0, 0.0], 2).await.unwrap().len(), 2);
        assert!(index.search(&[1.0, 0.0], 0).await.unwrap().is_empty());
        assert!(index.search(&[1.0], 2).await.is_err());
    }
}
