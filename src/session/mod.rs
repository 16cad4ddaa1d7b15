//! Conversation history
//!
//! Retrieval only ever reads history (to resolve references like "their email"
//! during query expansion). Whoever records answers owns the writes; the stores
//! here guarantee that an append is visible to every read that starts after it.

use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },
}

/// One question/answer exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
    #[serde(default = "Utc::now")]
    pub asked_at: DateTime<Utc>,
}

impl Turn {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            asked_at: Utc::now(),
        }
    }
}

/// Read access to per-session conversation history
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Ordered turns for a session, most recent last; empty for unknown sessions
    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError>;
}

/// Keep only the newest `max_turns` entries
fn trim_history(turns: &mut Vec<Turn>, max_turns: usize) {
    if turns.len() > max_turns {
        turns.drain(..turns.len() - max_turns);
    }
}

/// Process-local store
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<Turn>>>,
    max_turns: usize,
}

impl InMemorySessionStore {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_turns,
        }
    }

    pub async fn append(&self, session_id: &str, turn: Turn) {
        let mut sessions = self.sessions.write().await;
        let turns = sessions.entry(session_id.to_string()).or_default();
        turns.push(turn);
        trim_history(turns, self.max_turns);
    }

    pub async fn clear(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// One JSON file per session under a directory
///
/// Writes go to a temporary file that is renamed over the old one, so a reader
/// sees either the previous or the new history, never a partial file.
pub struct FileSessionStore {
    dir: PathBuf,
    max_turns: usize,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSessionStore {
    pub fn new(dir: PathBuf, max_turns: usize) -> Self {
        Self {
            dir,
            max_turns,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf, SessionError> {
        let valid = !session_id.is_empty()
            && session_id.len() <= 128
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(SessionError::InvalidSessionId(session_id.to_string()));
        }
        Ok(self.dir.join(format!("{session_id}.json")))
    }

    async fn read_turns(path: &Path) -> Result<Vec<Turn>, SessionError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(SessionError::Io {
                    source: e,
                    context: format!("Failed to read session file: {}", path.display()),
                })
            }
        };

        serde_json::from_str(&content).map_err(|e| SessionError::Json {
            source: e,
            context: format!("Failed to parse session file: {}", path.display()),
        })
    }

    pub async fn append(&self, session_id: &str, turn: Turn) -> Result<(), SessionError> {
        let path = self.session_path(session_id)?;
        let _guard = self.write_lock.lock().await;

        let mut turns = Self::read_turns(&path).await?;
        turns.push(turn);
        trim_history(&mut turns, self.max_turns);

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| SessionError::Io {
                source: e,
                context: format!("Failed to create sessions directory: {}", self.dir.display()),
            })?;

        let content = serde_json::to_string_pretty(&turns).map_err(|e| SessionError::Json {
            source: e,
            context: "Failed to serialize session history".to_string(),
        })?;

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, content)
            .await
            .map_err(|e| SessionError::Io {
                source: e,
                context: format!("Failed to write session file: {}", tmp_path.display()),
            })?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| SessionError::Io {
                source: e,
                context: format!("Failed to replace session file: {}", path.display()),
            })?;

        Ok(())
    }

    /// Remove a session's history; returns whether anything was removed
    pub async fn clear(&self, session_id: &str) -> Result<bool, SessionError> {
        let path = self.session_path(session_id)?;
        let _guard = self.write_lock.lock().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SessionError::Io {
                source: e,
                context: format!("Failed to delete session file: {}", path.display()),
            }),
        }
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        if session_id.is_empty() {
            return Ok(Vec::new());
        }
        let path = self.session_path(session_id)?;
        Self::read_turns(&path).await
    }
}
