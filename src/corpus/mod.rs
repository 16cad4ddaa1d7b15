//! Chunk corpus
//!
//! A `Corpus` is the immutable set of email chunks that both search indexes are
//! built from. Chunks are prepared by the ingestion side (parsing, splitting,
//! embedding) and arrive here as JSON lines; retrieval only ever reads them.

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CorpusError {
    #[error("Failed to read corpus file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Malformed chunk on line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Chunk id must not be empty (message {message_id})")]
    EmptyChunkId { message_id: String },

    #[error("Duplicate chunk id: {0}")]
    DuplicateChunk(String),

    #[error("Chunk {chunk_id} has embedding of dimension {actual}, expected {expected}")]
    DimensionMismatch {
        chunk_id: String,
        expected: usize,
        actual: usize,
    },
}

/// A bounded slice of one email's body text, the atomic unit of retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk identifier
    pub chunk_id: String,

    /// Message the chunk was cut from
    pub message_id: String,

    /// Conversation the message belongs to
    pub thread_id: String,

    #[serde(default)]
    pub subject: String,

    /// Raw `From` header, e.g. `"Jane Doe <jane@example.com>"`
    #[serde(default)]
    pub sender: String,

    /// Raw `To` addresses
    #[serde(default)]
    pub recipients: Vec<String>,

    pub date: DateTime<Utc>,

    /// Position of this chunk within its message
    #[serde(default)]
    pub chunk_index: usize,

    pub text: String,

    #[serde(default)]
    pub token_count: usize,

    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Chunk {
    /// Create a chunk with empty metadata, dated at the Unix epoch
    pub fn new(
        chunk_id: impl Into<String>,
        message_id: impl Into<String>,
        thread_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let text = text.into();
        Self {
            chunk_id: chunk_id.into(),
            message_id: message_id.into(),
            thread_id: thread_id.into(),
            subject: String::new(),
            sender: String::new(),
            recipients: Vec::new(),
            date: DateTime::<Utc>::default(),
            chunk_index: 0,
            token_count: text.split_whitespace().count(),
            text,
            embedding: Vec::new(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = date;
        self
    }

    pub fn with_chunk_index(mut self, chunk_index: usize) -> Self {
        self.chunk_index = chunk_index;
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Summary numbers for a loaded corpus
#[derive(Debug, Clone, Serialize)]
pub struct CorpusStats {
    pub chunks: usize,
    pub messages: usize,
    pub threads: usize,
    pub average_tokens: f64,
    pub dimension: usize,
}

/// Immutable, validated chunk collection
///
/// Chunks are kept sorted by chunk id so that every index built from the corpus
/// assigns the same ordinals on every build.
#[derive(Debug)]
pub struct Corpus {
    chunks: Vec<Chunk>,
    by_id: HashMap<String, usize>,
    dimension: usize,
}

impl Corpus {
    /// Validate and index a set of chunks
    ///
    /// Every chunk must carry an embedding of exactly `dimension` values.
    pub fn new(mut chunks: Vec<Chunk>, dimension: usize) -> Result<Self, CorpusError> {
        chunks.sort_by(|a, b| a.chunk_id.cmp(&b.chunk_id));

        let mut by_id = HashMap::with_capacity(chunks.len());
        for (ordinal, chunk) in chunks.iter().enumerate() {
            if chunk.chunk_id.is_empty() {
                return Err(CorpusError::EmptyChunkId {
                    message_id: chunk.message_id.clone(),
                });
            }
            if chunk.embedding.len() != dimension {
                return Err(CorpusError::DimensionMismatch {
                    chunk_id: chunk.chunk_id.clone(),
                    expected: dimension,
                    actual: chunk.embedding.len(),
                });
            }
            if by_id.insert(chunk.chunk_id.clone(), ordinal).is_some() {
                return Err(CorpusError::DuplicateChunk(chunk.chunk_id.clone()));
            }
        }

        Ok(Self {
            chunks,
            by_id,
            dimension,
        })
    }

    /// Load chunks from a JSON-lines file, one `Chunk` per line
    pub fn load_jsonl(path: &Path, dimension: usize) -> Result<Self, CorpusError> {
        let file = std::fs::File::open(path).map_err(|e| CorpusError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let mut chunks = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| CorpusError::Io {
                path: path.display().to_string(),
                source: e,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|e| CorpusError::Parse {
                line: idx + 1,
                source: e,
            })?;
            chunks.push(chunk);
        }

        tracing::info!("Loaded {} chunks from {}", chunks.len(), path.display());

        Self::new(chunks, dimension)
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.by_id.get(chunk_id).map(|&ordinal| &self.chunks[ordinal])
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.by_id.contains_key(chunk_id)
    }

    /// Chunk at a build ordinal (position in chunk-id order)
    pub fn chunk_at(&self, ordinal: usize) -> Option<&Chunk> {
        self.chunks.get(ordinal)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn stats(&self) -> CorpusStats {
        let mut messages = HashSet::new();
        let mut threads = HashSet::new();
        let mut tokens = 0usize;

        for chunk in &self.chunks {
            messages.insert(chunk.message_id.as_str());
            threads.insert(chunk.thread_id.as_str());
            tokens += chunk.token_count;
        }

        let average_tokens = if self.chunks.is_empty() {
            0.0
        } else {
            tokens as f64 / self.chunks.len() as f64
        };

        CorpusStats {
            chunks: self.chunks.len(),
            messages: messages.len(),
            threads: threads.len(),
            average_tokens,
            dimension: self.dimension,
        }
    }
}
