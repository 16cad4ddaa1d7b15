//! Result structures returned by the retrieval pipeline

use crate::corpus::Chunk;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a result's final score was assembled
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// Reciprocal rank fusion score summed over all expansions
    pub fused: f32,

    pub subject_boost: f32,

    pub sender_boost: f32,

    pub year_boost: f32,

    /// Stored as a positive amount that was subtracted
    pub spam_penalty: f32,

    pub final_score: f32,

    /// Best (lowest) lexical rank over all expansions, 0 = top hit
    pub lexical_rank: Option<usize>,

    /// Best (lowest) semantic rank over all expansions, 0 = top hit
    pub semantic_rank: Option<usize>,

    /// Number of expansions that surfaced this chunk in either list
    pub expansion_hits: usize,
}

/// One ranked chunk with enough metadata to cite it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: String,

    pub message_id: String,

    pub thread_id: String,

    pub subject: String,

    pub sender: String,

    #[serde(default)]
    pub recipients: Vec<String>,

    pub date: DateTime<Utc>,

    pub chunk_index: usize,

    pub text: String,

    pub final_score: f32,

    pub breakdown: ScoreBreakdown,
}

impl RetrievalResult {
    /// Result for a chunk that so far only has its fused score
    pub fn from_chunk(chunk: &Chunk, breakdown: ScoreBreakdown) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            message_id: chunk.message_id.clone(),
            thread_id: chunk.thread_id.clone(),
            subject: chunk.subject.clone(),
            sender: chunk.sender.clone(),
            recipients: chunk.recipients.clone(),
            date: chunk.date,
            chunk_index: chunk.chunk_index,
            text: chunk.text.clone(),
            final_score: breakdown.final_score,
            breakdown,
        }
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        if self.text.chars().count() <= max_chars {
            self.text.clone()
        } else {
            let prefix: String = self.text.chars().take(max_chars).collect();
            format!("{}...", prefix)
        }
    }
}

/// Which parts of a retrieval ran in a reduced mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Degradation {
    /// Expansion failed; only the original question was searched
    pub expansion: bool,

    /// At least one lexical search failed
    pub lexical: bool,

    /// At least one semantic search (or its query embedding) failed
    pub semantic: bool,

    /// Session history could not be read; expansion saw no context
    pub history: bool,
}

impl Degradation {
    pub fn any(&self) -> bool {
        self.expansion || self.lexical || self.semantic || self.history
    }
}

/// Everything one `retrieve` call produces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalOutcome {
    /// Ranked results, at most one per thread
    pub results: Vec<RetrievalResult>,

    /// Queries that were actually searched, original first
    pub expansions: Vec<String>,

    pub degradation: Degradation,
}

impl RetrievalOutcome {
    pub fn is_degraded(&self) -> bool {
        self.degradation.any()
    }
}
