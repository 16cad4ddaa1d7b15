//! Query expansion
//!
//! A user question is rewritten into a handful of related phrasings (synonyms,
//! abbreviations, names resolved from earlier turns) so that lexical and
//! semantic search each get several shots at the relevant passages.
//!
//! The generation itself is an external call that may fail or stall. The
//! `QueryExpander` bounds it with a timeout and always falls back to the
//! original question, so expansion can only ever add recall.

mod openai;

pub use openai::OpenAiExpansionService;

use crate::session::Turn;
use ahash::{HashSet, HashSetExt};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExpansionError {
    #[error("Missing API key: environment variable {0} is not set")]
    MissingApiKey(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Expansion API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed expansion output: {0}")]
    Malformed(String),

    #[error("Expansion timed out after {0:?}")]
    Timeout(Duration),
}

/// Generates alternate phrasings for a question
#[async_trait]
pub trait ExpansionService: Send + Sync {
    /// `history` is ordered oldest first and already windowed by the caller
    async fn expand(&self, query: &str, history: &[Turn]) -> Result<Vec<String>, ExpansionError>;
}

/// Returns the same variants for every query
///
/// Useful offline and for reproducing a fixed expansion in tests.
pub struct StaticExpansionService {
    variants: Vec<String>,
}

impl StaticExpansionService {
    pub fn new(variants: Vec<String>) -> Self {
        Self { variants }
    }
}

#[async_trait]
impl ExpansionService for StaticExpansionService {
    async fn expand(&self, _query: &str, _history: &[Turn]) -> Result<Vec<String>, ExpansionError> {
        Ok(self.variants.clone())
    }
}

/// Ordered, distinct query strings derived from one question
///
/// The original question is always first.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQueries {
    pub queries: Vec<String>,
    /// Set when generation failed and only the original question is searched
    pub degraded: bool,
}

impl ExpandedQueries {
    pub fn single(query: &str, degraded: bool) -> Self {
        Self {
            queries: vec![query.to_string()],
            degraded,
        }
    }

    pub fn original(&self) -> &str {
        &self.queries[0]
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}

/// Merge generated variants behind the original question
///
/// Blank entries are skipped, case-insensitive duplicates keep their first
/// appearance, and the result is capped at `max_queries` (never below one).
pub fn merge_variants(original: &str, variants: &[String], max_queries: usize) -> Vec<String> {
    let max_queries = max_queries.max(1);
    let mut seen = HashSet::with_capacity(variants.len() + 1);
    let mut queries = Vec::with_capacity(max_queries);

    for candidate in std::iter::once(original).chain(variants.iter().map(String::as_str)) {
        if queries.len() >= max_queries {
            break;
        }
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            queries.push(trimmed.to_string());
        }
    }

    queries
}

/// Bounded, failure-tolerant wrapper around an `ExpansionService`
#[derive(Clone)]
pub struct QueryExpander {
    service: Option<Arc<dyn ExpansionService>>,
    max_queries: usize,
    history_turns: usize,
    timeout: Duration,
}

impl QueryExpander {
    pub fn new(
        service: Arc<dyn ExpansionService>,
        max_queries: usize,
        history_turns: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            service: Some(service),
            max_queries,
            history_turns,
            timeout,
        }
    }

    /// Expander that always searches the question as asked
    pub fn disabled() -> Self {
        Self {
            service: None,
            max_queries: 1,
            history_turns: 0,
            timeout: Duration::ZERO,
        }
    }

    /// Expand a question using the most recent turns of `history`
    ///
    /// Never fails: errors, timeouts, and empty output all yield the original
    /// question alone with `degraded` set.
    pub async fn expand(&self, query: &str, history: &[Turn]) -> ExpandedQueries {
        let Some(service) = &self.service else {
            return ExpandedQueries::single(query, false);
        };

        let window = &history[history.len().saturating_sub(self.history_turns)..];

        let outcome = match tokio::time::timeout(self.timeout, service.expand(query, window)).await {
            Ok(result) => result,
            Err(_) => Err(ExpansionError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(variants) if variants.iter().any(|v| !v.trim().is_empty()) => {
                let queries = merge_variants(query, &variants, self.max_queries);
                tracing::debug!("Query expansions: {:?}", queries);
                ExpandedQueries {
                    queries,
                    degraded: false,
                }
            }
            Ok(_) => {
                tracing::warn!("Query expansion returned no variants, using original query");
                ExpandedQueries::single(query, true)
            }
            Err(e) => {
                tracing::warn!("Query expansion failed: {}, using original query", e);
                ExpandedQueries::single(query, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    struct FailingService;

    #[async_trait]
    impl ExpansionService for FailingService {
        async fn expand(&self, _: &str, _: &[Turn]) -> Result<Vec<String>, ExpansionError> {
            Err(ExpansionError::Http("connection refused".to_string()))
        }
    }

    struct SlowService;

    #[async_trait]
    impl ExpansionService for SlowService {
        async fn expand(&self, _: &str, _: &[Turn]) -> Result<Vec<String>, ExpansionError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec!["too late".to_string()])
        }
    }

    /// Records how many turns it was shown
    struct RecordingService(Mutex<Option<usize>>);

    #[async_trait]
    impl ExpansionService for RecordingService {
        async fn expand(&self, _: &str, history: &[Turn]) -> Result<Vec<String>, ExpansionError> {
            if let Ok(mut seen) = self.0.lock() {
                *seen = Some(history.len());
            }
            Ok(vec!["variant".to_string()])
        }
    }

    #[test]
    fn test_merge_keeps_original_first_and_dedups() {
        let merged = merge_variants(
            "PW for router",
            &strings(&["password", " pw FOR router ", "", "Password", "credentials"]),
            5,
        );
        assert_eq!(merged, strings(&["PW for router", "password", "credentials"]));
    }

    #[test]
    fn test_merge_caps_length() {
        let merged = merge_variants("q", &strings(&["a", "b", "c", "d", "e", "f"]), 5);
        assert_eq!(merged, strings(&["q", "a", "b", "c", "d"]));
        assert_eq!(merge_variants("q", &strings(&["a"]), 0), strings(&["q"]));
    }

    #[tokio::test]
    async fn test_expand_success() {
        let expander = QueryExpander::new(
            Arc::new(StaticExpansionService::new(strings(&["invoice", "billing"]))),
            5,
            10,
            Duration::from_secs(1),
        );
        let expanded = expander.expand("receipt", &[]).await;
        assert!(!expanded.degraded);
        assert_eq!(expanded.queries, strings(&["receipt", "invoice", "billing"]));
        assert_eq!(expanded.original(), "receipt");
    }

    #[tokio::test]
    async fn test_expand_failure_falls_back() {
        let expander =
            QueryExpander::new(Arc::new(FailingService), 5, 10, Duration::from_secs(1));
        let expanded = expander.expand("receipt", &[]).await;
        assert!(expanded.degraded);
        assert_eq!(expanded.queries, strings(&["receipt"]));
    }

    #[tokio::test]
    async fn test_expand_empty_output_is_degraded() {
        let expander = QueryExpander::new(
            Arc::new(StaticExpansionService::new(strings(&["", "  "]))),
            5,
            10,
            Duration::from_secs(1),
        );
        let expanded = expander.expand("receipt", &[]).await;
        assert!(expanded.degraded);
        assert_eq!(expanded.len(), 1);
    }

    #[tokio::test]
    async fn test_expand_timeout_falls_back() {
        let expander =
            QueryExpander::new(Arc::new(SlowService), 5, 10, Duration::from_millis(50));
        let expanded = expander.expand("receipt", &[]).await;
        assert!(expanded.degraded);
        assert_eq!(expanded.queries, strings(&["receipt"]));
    }

    #[tokio::test]
    async fn test_history_window() {
        let service = Arc::new(RecordingService(Mutex::new(None)));
        let expander = QueryExpander::new(service.clone(), 5, 10, Duration::from_secs(1));
        let history: Vec<Turn> = (0..14).map(|i| Turn::new(format!("q{i}"), "a")).collect();

        expander.expand("their email", &history).await;
        assert_eq!(*service.0.lock().unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_disabled_is_not_degraded() {
        let expanded = QueryExpander::disabled().expand("receipt", &[]).await;
        assert!(!expanded.degraded);
        assert_eq!(expanded.queries, strings(&["receipt"]));
    }
}
