//! Retrieval pipeline orchestration
//!
//! `Expand -> Search -> Fuse -> Rerank -> Dedup -> Done`
//!
//! Search fans out one lexical and one semantic task per expansion and joins
//! them all before fusion. Lexical search and query embedding are CPU-bound and
//! run on the blocking pool; vector backend calls run as ordinary tasks.

use crate::config::{Config, IndexingConfig, RetrievalConfig};
use crate::corpus::Corpus;
use crate::expansion::QueryExpander;
use crate::index::{
    EmbeddingProvider, ExactBackend, HnswBackend, LexicalIndex, SemanticIndex, VectorBackend,
    VectorBackendKind,
};
use crate::retrieval::{
    deduplicate_by_thread, reciprocal_rank_fusion, Degradation, ExpansionRanking, FusionConfig,
    MetadataReranker, RetrievalError, RetrievalOutcome, RetrievalResult, ScoreBreakdown,
};
use crate::session::SessionStore;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Expand,
    /// `degraded` when expansion failed and only the original query is searched
    Search { degraded: bool },
    Fuse,
    Rerank,
    Dedup,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Expand => write!(f, "expand"),
            Stage::Search { degraded: false } => write!(f, "search"),
            Stage::Search { degraded: true } => write!(f, "search(degraded)"),
            Stage::Fuse => write!(f, "fuse"),
            Stage::Rerank => write!(f, "rerank"),
            Stage::Dedup => write!(f, "dedup"),
            Stage::Done => write!(f, "done"),
        }
    }
}

/// Corpus plus the two indexes built from it
///
/// Swapped as a unit so a request never mixes indexes from different builds.
pub struct IndexSnapshot {
    pub corpus: Arc<Corpus>,
    pub lexical: Arc<LexicalIndex>,
    pub semantic: SemanticIndex,
}

impl IndexSnapshot {
    pub fn new(corpus: Corpus, lexical: LexicalIndex, semantic: SemanticIndex) -> Self {
        Self {
            corpus: Arc::new(corpus),
            lexical: Arc::new(lexical),
            semantic,
        }
    }

    /// Build both indexes over `corpus`
    ///
    /// CPU heavy for large corpora; call from a blocking context.
    pub fn build(
        corpus: Corpus,
        indexing: &IndexingConfig,
        hnsw_ef_search: usize,
    ) -> Result<Self, RetrievalError> {
        let started = Instant::now();
        let lexical = LexicalIndex::build(&corpus)?;

        let backend: Arc<dyn VectorBackend> = match indexing.vector_backend {
            VectorBackendKind::Hnsw => Arc::new(HnswBackend::build(
                &corpus,
                indexing.hnsw_ef_construction,
                indexing.hnsw_m,
                hnsw_ef_search,
            )?),
            VectorBackendKind::Exact => Arc::new(ExactBackend::build(&corpus)?),
        };

        tracing::info!(
            "Index snapshot built: {} chunks, {} backend, {:?}",
            corpus.len(),
            indexing.vector_backend,
            started.elapsed()
        );

        Ok(Self::new(corpus, lexical, SemanticIndex::new(backend)))
    }
}

/// Per-request limits
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub lexical_limit: usize,
    pub semantic_limit: usize,
    pub top_k: usize,
    /// Budget for all searches of one request, measured from fan-out
    pub search_timeout: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        Self {
            lexical_limit: config.lexical_limit,
            semantic_limit: config.semantic_limit,
            top_k: config.top_k,
            search_timeout: Duration::from_millis(config.search_timeout_ms),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

type SearchOutcome = Result<Vec<String>, String>;

fn spawn_lexical(
    index: Arc<LexicalIndex>,
    query: String,
    limit: usize,
) -> JoinHandle<SearchOutcome> {
    tokio::task::spawn_blocking(move || {
        index
            .search(&query, limit)
            .map(|hits| hits.into_iter().map(|hit| hit.chunk_id).collect())
            .map_err(|e| e.to_string())
    })
}

fn spawn_semantic(
    index: SemanticIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    query: String,
    limit: usize,
) -> JoinHandle<SearchOutcome> {
    tokio::spawn(async move {
        let vector = tokio::task::spawn_blocking(move || embedder.embed(&query))
            .await
            .map_err(|e| format!("embedding task failed: {e}"))?
            .map_err(|e| e.to_string())?;

        let hits = index
            .search(&vector, limit)
            .await
            .map_err(|e| e.to_string())?;
        Ok(hits.into_iter().map(|hit| hit.chunk_id).collect())
    })
}

/// Wait for one search until the shared deadline
async fn gather(
    mut handle: JoinHandle<SearchOutcome>,
    deadline: tokio::time::Instant,
) -> SearchOutcome {
    match tokio::time::timeout_at(deadline, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => Err(format!("search task failed: {e}")),
        Err(_) => {
            handle.abort();
            Err("search timed out".to_string())
        }
    }
}

/// Hybrid retrieval over the current index snapshot
pub struct RetrievalPipeline {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    embedder: Arc<dyn EmbeddingProvider>,
    expander: QueryExpander,
    sessions: Arc<dyn SessionStore>,
    fusion: FusionConfig,
    reranker: MetadataReranker,
    settings: PipelineSettings,
}

impl RetrievalPipeline {
    /// Pipeline with default fusion and search settings
    pub fn new(
        snapshot: IndexSnapshot,
        embedder: Arc<dyn EmbeddingProvider>,
        sessions: Arc<dyn SessionStore>,
        expander: QueryExpander,
        reranker: MetadataReranker,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(snapshot)),
            embedder,
            expander,
            sessions,
            fusion: FusionConfig::default(),
            reranker,
            settings: PipelineSettings::default(),
        }
    }

    /// Pipeline configured from the `retrieval` and `rerank` sections
    pub fn from_config(
        config: &Config,
        snapshot: IndexSnapshot,
        embedder: Arc<dyn EmbeddingProvider>,
        sessions: Arc<dyn SessionStore>,
        expander: QueryExpander,
    ) -> Result<Self, RetrievalError> {
        check_dimension(&snapshot, embedder.as_ref())?;

        let reranker = MetadataReranker::from_config(&config.rerank)?;
        let fusion = FusionConfig::new(
            config.retrieval.rrf_k,
            1.0,
            1.0,
            config.retrieval.fusion_candidates,
        )?;

        Ok(Self::new(snapshot, embedder, sessions, expander, reranker)
            .with_fusion(fusion)
            .with_settings(PipelineSettings::from_config(&config.retrieval)))
    }

    pub fn with_fusion(mut self, fusion: FusionConfig) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// The snapshot new requests will search
    pub async fn snapshot(&self) -> Arc<IndexSnapshot> {
        self.snapshot.read().await.clone()
    }

    /// Replace corpus and indexes; in-flight requests finish on the old ones
    pub async fn swap_corpus(&self, snapshot: IndexSnapshot) -> Result<(), RetrievalError> {
        check_dimension(&snapshot, self.embedder.as_ref())?;
        let chunks = snapshot.corpus.len();
        *self.snapshot.write().await = Arc::new(snapshot);
        tracing::info!("Swapped in new index snapshot ({} chunks)", chunks);
        Ok(())
    }

    /// Retrieve up to `top_k` passages (default from settings), one per thread
    ///
    /// Fails only for a blank query or when every lexical and every semantic
    /// search failed. Anything less is reported through `degradation`.
    pub async fn retrieve(
        &self,
        query: &str,
        session_id: &str,
        top_k: Option<usize>,
    ) -> Result<RetrievalOutcome, RetrievalError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        let top_k = top_k.unwrap_or(self.settings.top_k);
        let started = Instant::now();
        let snapshot = self.snapshot().await;
        let mut degradation = Degradation::default();

        let history = if session_id.is_empty() {
            Vec::new()
        } else {
            match self.sessions.get_history(session_id).await {
                Ok(history) => history,
                Err(e) => {
                    tracing::warn!("Failed to read history for session {}: {}", session_id, e);
                    degradation.history = true;
                    Vec::new()
                }
            }
        };

        tracing::debug!("stage={} history_turns={}", Stage::Expand, history.len());
        let expanded = self.expander.expand(query, &history).await;
        degradation.expansion = expanded.degraded;

        let stage = Stage::Search {
            degraded: expanded.degraded,
        };
        tracing::debug!("stage={} queries={:?}", stage, expanded.queries);
        let outcomes = self.search(&snapshot, &expanded.queries).await;
        let rankings = Self::classify(outcomes, &mut degradation)?;

        tracing::debug!("stage={}", Stage::Fuse);
        let fused = reciprocal_rank_fusion(&rankings, &self.fusion);
        let candidate_count = fused.len();

        let mut hydrated = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some(chunk) = snapshot.corpus.get(&candidate.chunk_id) else {
                tracing::warn!("Dropping unknown chunk id from search: {}", candidate.chunk_id);
                continue;
            };
            let breakdown = ScoreBreakdown {
                fused: candidate.fused_score,
                final_score: candidate.fused_score,
                lexical_rank: candidate.lexical_rank,
                semantic_rank: candidate.semantic_rank,
                expansion_hits: candidate.expansion_hits,
                ..ScoreBreakdown::default()
            };
            hydrated.push(RetrievalResult::from_chunk(chunk, breakdown));
        }

        tracing::debug!("stage={} candidates={}", Stage::Rerank, hydrated.len());
        let reranked = self.reranker.rerank(expanded.original(), hydrated);

        tracing::debug!("stage={} top_k={}", Stage::Dedup, top_k);
        let results = deduplicate_by_thread(reranked, top_k);

        tracing::info!(
            "stage={} query={:?} expansions={} candidates={} results={} degraded={} elapsed={:?}",
            Stage::Done,
            query,
            expanded.len(),
            candidate_count,
            results.len(),
            degradation.any(),
            started.elapsed()
        );

        Ok(RetrievalOutcome {
            results,
            expansions: expanded.queries,
            degradation,
        })
    }

    /// Scatter every search for every expansion, then join them in order
    async fn search(
        &self,
        snapshot: &IndexSnapshot,
        queries: &[String],
    ) -> Vec<(SearchOutcome, SearchOutcome)> {
        let deadline = tokio::time::Instant::now() + self.settings.search_timeout;

        let handles: Vec<(JoinHandle<SearchOutcome>, JoinHandle<SearchOutcome>)> = queries
            .iter()
            .map(|query| {
                let lexical = spawn_lexical(
                    snapshot.lexical.clone(),
                    query.clone(),
                    self.settings.lexical_limit,
                );
                let semantic = spawn_semantic(
                    snapshot.semantic.clone(),
                    self.embedder.clone(),
                    query.clone(),
                    self.settings.semantic_limit,
                );
                (lexical, semantic)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(handles.len());
        for (lexical, semantic) in handles {
            let lexical = gather(lexical, deadline).await;
            let semantic = gather(semantic, deadline).await;
            outcomes.push((lexical, semantic));
        }
        outcomes
    }

    /// Turn raw search outcomes into rankings, recording failures
    fn classify(
        outcomes: Vec<(SearchOutcome, SearchOutcome)>,
        degradation: &mut Degradation,
    ) -> Result<Vec<ExpansionRanking>, RetrievalError> {
        let total = outcomes.len();
        let mut lexical_errors = Vec::new();
        let mut semantic_errors = Vec::new();
        let mut rankings = Vec::with_capacity(total);

        for (lexical, semantic) in outcomes {
            let mut ranking = ExpansionRanking::default();
            match lexical {
                Ok(ids) => ranking.lexical = Some(ids),
                Err(e) => {
                    tracing::warn!("Lexical search failed: {}", e);
                    lexical_errors.push(e);
                }
            }
            match semantic {
                Ok(ids) => ranking.semantic = Some(ids),
                Err(e) => {
                    tracing::warn!("Semantic search failed: {}", e);
                    semantic_errors.push(e);
                }
            }
            rankings.push(ranking);
        }

        degradation.lexical = !lexical_errors.is_empty();
        degradation.semantic = !semantic_errors.is_empty();

        let lexical_down = total > 0 && lexical_errors.len() == total;
        let semantic_down = total > 0 && semantic_errors.len() == total;

        if lexical_down && semantic_down {
            return Err(RetrievalError::RetrievalUnavailable {
                lexical: lexical_errors.swap_remove(0),
                semantic: semantic_errors.swap_remove(0),
            });
        }
        if lexical_down {
            tracing::warn!("Lexical search unavailable, continuing with semantic results only");
        } else if semantic_down {
            tracing::warn!("Semantic search unavailable, continuing with lexical results only");
        }

        Ok(rankings)
    }
}

fn check_dimension(
    snapshot: &IndexSnapshot,
    embedder: &dyn EmbeddingProvider,
) -> Result<(), RetrievalError> {
    if snapshot.semantic.dimension() != embedder.dimension() {
        return Err(RetrievalError::DimensionMismatch {
            index: snapshot.semantic.dimension(),
            embedder: embedder.dimension(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Search { degraded: false }.to_string(), "search");
        assert_eq!(Stage::Search { degraded: true }.to_string(), "search(degraded)");
        assert_eq!(Stage::Done.to_string(), "done");
    }

    fn ok(ids: &[&str]) -> SearchOutcome {
        Ok(ids.iter().map(|s| s.to_string()).collect())
    }

    fn down(reason: &str) -> SearchOutcome {
        Err(reason.to_string())
    }

    #[test]
    fn test_both_backends_down_is_fatal() {
        let mut degradation = Degradation::default();
        let result = RetrievalPipeline::classify(
            vec![(down("lex io"), down("vec io")), (down("lex io"), down("vec io"))],
            &mut degradation,
        );

        match result {
            Err(RetrievalError::RetrievalUnavailable { lexical, semantic }) => {
                assert_eq!(lexical, "lex io");
                assert_eq!(semantic, "vec io");
            }
            other => panic!("expected RetrievalUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_one_backend_down_is_degraded() {
        let mut degradation = Degradation::default();
        let rankings = RetrievalPipeline::classify(
            vec![(down("lex io"), ok(&["a"])), (down("lex io"), ok(&["b"]))],
            &mut degradation,
        )
        .unwrap();

        assert!(degradation.lexical);
        assert!(!degradation.semantic);
        assert!(rankings.iter().all(|r| r.lexical.is_none()));
        assert_eq!(rankings[1].semantic, Some(vec!["b".to_string()]));
    }

    #[test]
    fn test_partial_failure_is_degraded() {
        let mut degradation = Degradation::default();
        let rankings = RetrievalPipeline::classify(
            vec![(ok(&["a"]), ok(&[])), (ok(&["a"]), down("timeout"))],
            &mut degradation,
        )
        .unwrap();

        assert!(!degradation.lexical);
        assert!(degradation.semantic);
        assert_eq!(rankings.len(), 2);
    }

    #[test]
    fn test_settings_from_config() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.lexical_limit, 100);
        assert_eq!(settings.semantic_limit, 100);
        assert_eq!(settings.top_k, 10);
        assert_eq!(settings.search_timeout, Duration::from_millis(1500));
    }
}
