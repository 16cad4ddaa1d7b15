//! Search indexes over the chunk corpus
//!
//! - `LexicalIndex`: in-RAM Tantivy index, whitespace + lowercase tokens, BM25
//! - `VectorBackend`: nearest-neighbour backends (HNSW, exact cosine)
//! - `SemanticIndex`: deterministic ranking on top of a vector backend
//! - `EmbeddingProvider`: query embedding (FastEmbed locally)
//!
//! All indexes are built once from a `Corpus` and are read-only afterwards, so
//! they can be shared across concurrent retrievals behind an `Arc`.

mod keyword_index;
mod provider;
mod semantic;
mod vector_index;

pub use keyword_index::{tokenize, LexicalHit, LexicalIndex, LexicalIndexError};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use semantic::{SemanticHit, SemanticIndex};
pub use vector_index::{
    cosine_similarity, ExactBackend, HnswBackend, VectorBackend, VectorHit, VectorIndexError,
};

use serde::{Deserialize, Serialize};

/// Which nearest-neighbour backend to build for semantic search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackendKind {
    /// Approximate search with HNSW
    #[default]
    Hnsw,
    /// Brute-force cosine over every stored vector
    Exact,
}

impl std::fmt::Display for VectorBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorBackendKind::Hnsw => write!(f, "hnsw"),
            VectorBackendKind::Exact => write!(f, "exact"),
        }
    }
}
