/// Nearest-neighbour backends for semantic search
use crate::corpus::Corpus;
use async_trait::async_trait;
use hnsw_rs::prelude::*;
use thiserror::Error;

/// Upper bound on HNSW layers
const HNSW_MAX_LAYERS: usize = 16;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Raw backend hit: chunk id with cosine similarity
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub similarity: f32,
}

/// Vector similarity backend
///
/// Implementations may be in-process or remote; either way they must return
/// hits ordered by descending similarity and at most `limit` of them. Retrying
/// transient failures is the backend's job.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Return up to `limit` nearest chunks to `vector`
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, VectorIndexError>;

    /// Dimension of the stored vectors
    fn dimension(&self) -> usize;

    /// Number of stored vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn check_dimension(expected: usize, vector: &[f32]) -> Result<(), VectorIndexError> {
    if vector.len() != expected {
        return Err(VectorIndexError::InvalidDimension {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// HNSW approximate nearest-neighbour backend
///
/// Uses cosine distance; similarity is reported as `1 - distance`.
pub struct HnswBackend {
    index: Hnsw<'static, f32, DistCosine>,
    chunk_ids: Vec<String>,
    dimension: usize,
    ef_search: usize,
}

impl HnswBackend {
    /// Build the graph from every chunk embedding in the corpus
    ///
    /// # Arguments
    /// * `corpus` - Source chunks (embeddings already validated)
    /// * `ef_construction` - Construction breadth (higher = better recall, slower build)
    /// * `m` - Connections per layer
    /// * `ef_search` - Search breadth used by `query`
    pub fn build(
        corpus: &Corpus,
        ef_construction: usize,
        m: usize,
        ef_search: usize,
    ) -> Result<Self, VectorIndexError> {
        if m == 0 || ef_construction == 0 {
            return Err(VectorIndexError::InitializationError(
                "HNSW m and ef_construction must be positive".to_string(),
            ));
        }

        let index = Hnsw::<f32, DistCosine>::new(
            m,
            corpus.len().max(1),
            HNSW_MAX_LAYERS,
            ef_construction,
            DistCosine,
        );

        let mut chunk_ids = Vec::with_capacity(corpus.len());
        for (ordinal, chunk) in corpus.iter().enumerate() {
            check_dimension(corpus.dimension(), &chunk.embedding)?;
            let data = chunk.embedding.clone();
            index.insert((&data, ordinal));
            chunk_ids.push(chunk.chunk_id.clone());
        }

        tracing::info!(
            "HNSW index built over {} vectors ({}D, m={}, ef_construction={})",
            chunk_ids.len(),
            corpus.dimension(),
            m,
            ef_construction
        );

        Ok(Self {
            index,
            chunk_ids,
            dimension: corpus.dimension(),
            ef_search: ef_search.max(1),
        })
    }
}

#[async_trait]
impl VectorBackend for HnswBackend {
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
        check_dimension(self.dimension, vector)?;

        if limit == 0 || self.chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ef_search = self.ef_search.max(limit);
        let neighbours = self.index.search(vector, limit, ef_search);

        neighbours
            .into_iter()
            .map(|neighbour| {
                let chunk_id = self.chunk_ids.get(neighbour.d_id).ok_or_else(|| {
                    VectorIndexError::SearchError(format!(
                        "Unknown vector id {}",
                        neighbour.d_id
                    ))
                })?;
                Ok(VectorHit {
                    chunk_id: chunk_id.clone(),
                    similarity: 1.0 - neighbour.distance,
                })
            })
            .collect()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.chunk_ids.len()
    }
}

/// Exact cosine backend: scores every stored vector
///
/// Linear in corpus size, but fully deterministic. Suited to small corpora and
/// to tests.
pub struct ExactBackend {
    entries: Vec<(String, Vec<f32>)>,
    dimension: usize,
}

impl ExactBackend {
    pub fn new(dimension: usize) -> Self {
        Self {
            entries: Vec::new(),
            dimension,
        }
    }

    pub fn build(corpus: &Corpus) -> Result<Self, VectorIndexError> {
        let mut backend = Self::new(corpus.dimension());
        for chunk in corpus.iter() {
            backend.insert(&chunk.chunk_id, &chunk.embedding)?;
        }
        Ok(backend)
    }

    pub fn insert(&mut self, chunk_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        check_dimension(self.dimension, vector)?;
        self.entries.push((chunk_id.to_string(), vector.to_vec()));
        Ok(())
    }
}

#[async_trait]
impl VectorBackend for ExactBackend {
    async fn query(&self, vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
        check_dimension(self.dimension, vector)?;

        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|(chunk_id, stored)| VectorHit {
                chunk_id: chunk_id.clone(),
                similarity: cosine_similarity(vector, stored),
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);

        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
