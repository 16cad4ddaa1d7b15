//! Hybrid retrieval and reranking
//!
//! Lexical (BM25) and semantic (cosine) search run for every query expansion,
//! are merged with Reciprocal Rank Fusion, rescored with email metadata, and
//! reduced to one passage per thread.

mod deduplication;
mod fusion;
mod pipeline;
mod reranker;
mod types;

pub use deduplication::deduplicate_by_thread;
pub use fusion::{
    reciprocal_rank_fusion, ExpansionRanking, FusedCandidate, FusionConfig, FusionError,
};
pub use pipeline::{IndexSnapshot, PipelineSettings, RetrievalPipeline, Stage};
pub use reranker::{Adjustment, MetadataReranker, QuerySignals, RerankError};
pub use types::{Degradation, RetrievalOutcome, RetrievalResult, ScoreBreakdown};

use crate::index::{LexicalIndexError, VectorIndexError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Every lexical and every semantic search of the request failed
    #[error("Retrieval unavailable (lexical: {lexical}; semantic: {semantic})")]
    RetrievalUnavailable { lexical: String, semantic: String },

    #[error("Index dimension {index} does not match embedding dimension {embedder}")]
    DimensionMismatch { index: usize, embedder: usize },

    #[error("Lexical index error: {0}")]
    Lexical(#[from] LexicalIndexError),

    #[error("Vector index error: {0}")]
    Vector(#[from] VectorIndexError),

    #[error("Reranker error: {0}")]
    Rerank(#[from] RerankError),

    #[error("Fusion error: {0}")]
    Fusion(#[from] FusionError),
}
