//! End-to-end retrieval scenarios over a small in-memory mailbox
//!
//! Embeddings are fixed 3D vectors and the exact cosine backend is used, so
//! every ranking below can be worked out by hand.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mailqa::config::RerankConfig;
use mailqa::corpus::{Chunk, Corpus};
use mailqa::expansion::{
    ExpansionError, ExpansionService, QueryExpander, StaticExpansionService,
};
use mailqa::index::{
    EmbeddingError, EmbeddingProvider, ExactBackend, LexicalIndex, SemanticIndex, VectorBackend,
    VectorHit, VectorIndexError,
};
use mailqa::retrieval::{
    IndexSnapshot, MetadataReranker, PipelineSettings, RetrievalError, RetrievalPipeline,
};
use mailqa::session::{InMemorySessionStore, SessionError, SessionStore, Turn};
use std::sync::Arc;
use std::time::Duration;

const DIM: usize = 3;

/// Embeds every text to the same vector
struct FixedEmbedder(Vec<f32>);

impl EmbeddingProvider for FixedEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(self.0.clone())
    }

    fn dimension(&self) -> usize {
        self.0.len()
    }

    fn model_name(&self) -> &str {
        "fixed"
    }
}

struct DownEmbedder;

impl EmbeddingProvider for DownEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Err(EmbeddingError::Unavailable("model not loaded".to_string()))
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        "down"
    }
}

struct FailingExpansion;

#[async_trait]
impl ExpansionService for FailingExpansion {
    async fn expand(&self, _: &str, _: &[Turn]) -> Result<Vec<String>, ExpansionError> {
        Err(ExpansionError::Malformed("not a list".to_string()))
    }
}

/// Records the history it was given and returns one variant
struct HistoryEcho;

#[async_trait]
impl ExpansionService for HistoryEcho {
    async fn expand(&self, _: &str, history: &[Turn]) -> Result<Vec<String>, ExpansionError> {
        Ok(history.iter().map(|turn| turn.answer.clone()).collect())
    }
}

struct BrokenSessions;

#[async_trait]
impl SessionStore for BrokenSessions {
    async fn get_history(&self, session_id: &str) -> Result<Vec<Turn>, SessionError> {
        Err(SessionError::InvalidSessionId(session_id.to_string()))
    }
}

/// Vector backend that never answers in time
struct StalledBackend;

#[async_trait]
impl VectorBackend for StalledBackend {
    async fn query(&self, _: &[f32], _: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn len(&self) -> usize {
        0
    }
}

/// Vector backend that also reports ids the corpus does not know
struct GhostBackend;

#[async_trait]
impl VectorBackend for GhostBackend {
    async fn query(&self, _: &[f32], _: usize) -> Result<Vec<VectorHit>, VectorIndexError> {
        Ok(vec![
            VectorHit {
                chunk_id: "ghost".to_string(),
                similarity: 0.99,
            },
            VectorHit {
                chunk_id: "C".to_string(),
                similarity: 0.9,
            },
        ])
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn len(&self) -> usize {
        2
    }
}

/// A, B share thread T1; C is alone in T2
fn mailbox() -> Vec<Chunk> {
    vec![
        Chunk::new("A", "m1", "T1", "Your invoice total is $40, due next week")
            .with_subject("Invoice #123")
            .with_sender("billing@store.com")
            .with_embedding(vec![0.8, 0.6, 0.0]),
        Chunk::new("B", "m2", "T1", "Thanks, invoice received")
            .with_subject("Re: Invoice #123")
            .with_sender("me@home.net")
            .with_embedding(vec![0.6, 0.8, 0.0]),
        Chunk::new("C", "m3", "T2", "Meeting with Janesh moved to Thursday afternoon")
            .with_subject("Meeting with Janesh")
            .with_sender("ops@corp.com")
            .with_embedding(vec![1.0, 0.0, 0.0]),
    ]
}

fn snapshot(chunks: Vec<Chunk>) -> IndexSnapshot {
    let corpus = Corpus::new(chunks, DIM).unwrap();
    let lexical = LexicalIndex::build(&corpus).unwrap();
    let semantic = SemanticIndex::new(Arc::new(ExactBackend::build(&corpus).unwrap()));
    IndexSnapshot::new(corpus, lexical, semantic)
}

fn snapshot_with_backend(chunks: Vec<Chunk>, backend: Arc<dyn VectorBackend>) -> IndexSnapshot {
    let corpus = Corpus::new(chunks, DIM).unwrap();
    let lexical = LexicalIndex::build(&corpus).unwrap();
    IndexSnapshot::new(corpus, lexical, SemanticIndex::new(backend))
}

fn reranker() -> MetadataReranker {
    MetadataReranker::from_config(&RerankConfig::default()).unwrap()
}

fn pipeline_with(
    snapshot: IndexSnapshot,
    embedder: Arc<dyn EmbeddingProvider>,
    sessions: Arc<dyn SessionStore>,
    expander: QueryExpander,
) -> RetrievalPipeline {
    RetrievalPipeline::new(snapshot, embedder, sessions, expander, reranker())
}

fn pipeline(expander: QueryExpander) -> RetrievalPipeline {
    pipeline_with(
        snapshot(mailbox()),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(InMemorySessionStore::new(20)),
        expander,
    )
}

fn ids(outcome: &mailqa::retrieval::RetrievalOutcome) -> Vec<&str> {
    outcome.results.iter().map(|r| r.chunk_id.as_str()).collect()
}

#[tokio::test]
async fn test_thread_scenario() {
    let outcome = pipeline(QueryExpander::disabled())
        .retrieve("Janesh meeting", "", None)
        .await
        .unwrap();

    assert_eq!(ids(&outcome), vec!["C", "A"]);
    assert!(!outcome.is_degraded());
    assert_eq!(outcome.expansions, vec!["Janesh meeting"]);

    let c = &outcome.results[0];
    assert!((c.breakdown.fused - 2.0 / 60.0).abs() < 1e-6);
    assert_eq!(c.breakdown.subject_boost, 0.10);
    assert_eq!(c.breakdown.sender_boost, 0.0);
    assert!((c.final_score - 0.1333).abs() < 1e-4);
    assert_eq!(c.breakdown.lexical_rank, Some(0));
    assert_eq!(c.breakdown.semantic_rank, Some(0));

    let a = &outcome.results[1];
    assert!((a.final_score - 1.0 / 61.0).abs() < 1e-6);
    assert_eq!(a.breakdown.lexical_rank, None);
    assert_eq!(a.breakdown.semantic_rank, Some(1));
}

#[tokio::test]
async fn test_year_mention_reorders() {
    let date = |year| Utc.with_ymd_and_hms(year, 3, 1, 9, 0, 0).unwrap();
    let chunks = vec![
        Chunk::new("a", "m1", "t1", "budget review notes")
            .with_date(date(2022))
            .with_embedding(vec![1.0, 0.0, 0.0]),
        Chunk::new("b", "m2", "t2", "budget review notes")
            .with_date(date(2023))
            .with_embedding(vec![1.0, 0.0, 0.0]),
    ];
    let pipeline = pipeline_with(
        snapshot(chunks),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(InMemorySessionStore::new(20)),
        QueryExpander::disabled(),
    );

    let without_year = pipeline.retrieve("budget review", "", None).await.unwrap();
    assert_eq!(ids(&without_year), vec!["a", "b"]);

    let with_year = pipeline.retrieve("budget review 2023", "", None).await.unwrap();
    assert_eq!(ids(&with_year), vec!["b", "a"]);
    assert_eq!(with_year.results[0].breakdown.year_boost, 0.15);
}

#[tokio::test]
async fn test_spam_is_demoted_not_removed() {
    let chunks = vec![
        Chunk::new("promo", "m1", "t1", "flight itinerary confirmation flight")
            .with_subject("Order confirmed: flight itinerary")
            .with_sender("no-reply@airline.com")
            .with_embedding(vec![1.0, 0.0, 0.0]),
        Chunk::new("note", "m2", "t2", "lunch plans")
            .with_sender("friend@mail.com")
            .with_embedding(vec![0.0, 1.0, 0.0]),
    ];
    let pipeline = pipeline_with(
        snapshot(chunks),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(InMemorySessionStore::new(20)),
        QueryExpander::disabled(),
    );

    let outcome = pipeline.retrieve("flight itinerary", "", None).await.unwrap();
    // promo has the stronger fused score and a subject match, but -0.30 outweighs both
    assert_eq!(ids(&outcome), vec!["note", "promo"]);

    let promo = &outcome.results[1];
    assert_eq!(promo.breakdown.spam_penalty, 0.30);
    assert_eq!(promo.breakdown.subject_boost, 0.10);
    assert!(promo.breakdown.fused > outcome.results[0].breakdown.fused);
}

#[tokio::test]
async fn test_expansion_failure_falls_back_to_original() {
    let expander = QueryExpander::new(
        Arc::new(FailingExpansion),
        5,
        10,
        Duration::from_millis(500),
    );
    let degraded = pipeline(expander)
        .retrieve("Janesh meeting", "", None)
        .await
        .unwrap();
    let plain = pipeline(QueryExpander::disabled())
        .retrieve("Janesh meeting", "", None)
        .await
        .unwrap();

    assert!(degraded.degradation.expansion);
    assert_eq!(degraded.expansions, vec!["Janesh meeting"]);
    assert_eq!(degraded.results, plain.results);
}

#[tokio::test]
async fn test_expansions_sum_scores() {
    let expander = QueryExpander::new(
        Arc::new(StaticExpansionService::new(vec![
            "invoice".to_string(),
            "INVOICE".to_string(),
        ])),
        5,
        10,
        Duration::from_millis(500),
    );
    let outcome = pipeline(expander)
        .retrieve("Janesh meeting", "", None)
        .await
        .unwrap();

    assert_eq!(outcome.expansions, vec!["Janesh meeting", "invoice"]);
    let c = outcome.results.iter().find(|r| r.chunk_id == "C").unwrap();
    // semantic rank 0 under both expansions, lexical rank 0 under the original
    assert!((c.breakdown.fused - 3.0 / 60.0).abs() < 1e-6);
    assert_eq!(c.breakdown.expansion_hits, 2);

    let threads: Vec<&str> = outcome.results.iter().map(|r| r.thread_id.as_str()).collect();
    assert_eq!(threads.len(), 2);
    assert_ne!(threads[0], threads[1]);
}

#[tokio::test]
async fn test_history_reaches_expander() {
    let sessions = Arc::new(InMemorySessionStore::new(20));
    sessions
        .append("s1", Turn::new("who did I meet?", "invoice"))
        .await;

    let expander = QueryExpander::new(Arc::new(HistoryEcho), 5, 10, Duration::from_millis(500));
    let pipeline = pipeline_with(
        snapshot(mailbox()),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        sessions,
        expander,
    );

    let outcome = pipeline.retrieve("their email", "s1", None).await.unwrap();
    assert_eq!(outcome.expansions, vec!["their email", "invoice"]);
    assert!(!outcome.is_degraded());
}

#[tokio::test]
async fn test_unreadable_history_is_degraded_not_fatal() {
    let pipeline = pipeline_with(
        snapshot(mailbox()),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(BrokenSessions),
        QueryExpander::disabled(),
    );

    let outcome = pipeline.retrieve("Janesh meeting", "s1", None).await.unwrap();
    assert!(outcome.degradation.history);
    assert_eq!(ids(&outcome), vec!["C", "A"]);
}

#[tokio::test]
async fn test_idempotent() {
    let pipeline = pipeline(QueryExpander::new(
        Arc::new(StaticExpansionService::new(vec!["invoice due".to_string()])),
        5,
        10,
        Duration::from_millis(500),
    ));

    let first = pipeline.retrieve("Janesh invoice", "", None).await.unwrap();
    let second = pipeline.retrieve("Janesh invoice", "", None).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_semantic_down_uses_lexical_only() {
    let pipeline = pipeline_with(
        snapshot(mailbox()),
        Arc::new(DownEmbedder),
        Arc::new(InMemorySessionStore::new(20)),
        QueryExpander::disabled(),
    );

    let outcome = pipeline.retrieve("invoice", "", None).await.unwrap();
    assert!(outcome.degradation.semantic);
    assert!(!outcome.degradation.lexical);
    // A and B both match "invoice" lexically but share a thread
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].thread_id, "T1");
    assert_eq!(outcome.results[0].breakdown.semantic_rank, None);
}

#[tokio::test]
async fn test_semantic_timeout_is_degraded() {
    let pipeline = pipeline_with(
        snapshot_with_backend(mailbox(), Arc::new(StalledBackend)),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(InMemorySessionStore::new(20)),
        QueryExpander::disabled(),
    )
    .with_settings(PipelineSettings {
        search_timeout: Duration::from_millis(200),
        ..PipelineSettings::default()
    });

    let outcome = pipeline.retrieve("Janesh meeting", "", None).await.unwrap();
    assert!(outcome.degradation.semantic);
    assert_eq!(ids(&outcome), vec!["C"]);
}

#[tokio::test]
async fn test_unknown_backend_ids_are_dropped() {
    let pipeline = pipeline_with(
        snapshot_with_backend(mailbox(), Arc::new(GhostBackend)),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(InMemorySessionStore::new(20)),
        QueryExpander::disabled(),
    );

    let outcome = pipeline.retrieve("Janesh meeting", "", None).await.unwrap();
    assert_eq!(ids(&outcome), vec!["C"]);
    assert_eq!(outcome.results[0].breakdown.semantic_rank, Some(1));
}

#[tokio::test]
async fn test_top_k_and_empty_results() {
    let pipeline = pipeline(QueryExpander::disabled());

    let one = pipeline.retrieve("Janesh meeting", "", Some(1)).await.unwrap();
    assert_eq!(ids(&one), vec!["C"]);

    let empty = pipeline_with(
        snapshot(Vec::new()),
        Arc::new(FixedEmbedder(vec![1.0, 0.0, 0.0])),
        Arc::new(InMemorySessionStore::new(20)),
        QueryExpander::disabled(),
    );
    let outcome = empty.retrieve("anything at all", "", None).await.unwrap();
    assert!(outcome.results.is_empty());
    assert!(!outcome.is_degraded());
}

#[tokio::test]
async fn test_blank_query_is_rejected() {
    let result = pipeline(QueryExpander::disabled())
        .retrieve("   ", "", None)
        .await;
    assert!(matches!(result, Err(RetrievalError::InvalidQuery(_))));
}

#[tokio::test]
async fn test_swap_corpus() {
    let pipeline = pipeline(QueryExpander::disabled());
    let held = pipeline.snapshot().await;

    let replacement = vec![Chunk::new("Z", "m9", "T9", "Janesh sent the meeting notes")
        .with_embedding(vec![1.0, 0.0, 0.0])];
    pipeline.swap_corpus(snapshot(replacement)).await.unwrap();

    let outcome = pipeline.retrieve("Janesh meeting", "", None).await.unwrap();
    assert_eq!(ids(&outcome), vec!["Z"]);
    // a snapshot taken before the swap still sees the old corpus
    assert_eq!(held.corpus.len(), 3);

    let wrong_dim = {
        let chunks = vec![Chunk::new("Y", "m8", "T8", "text").with_embedding(vec![1.0, 0.0])];
        let corpus = Corpus::new(chunks, 2).unwrap();
        let lexical = LexicalIndex::build(&corpus).unwrap();
        let semantic = SemanticIndex::new(Arc::new(ExactBackend::build(&corpus).unwrap()));
        IndexSnapshot::new(corpus, lexical, semantic)
    };
    assert!(matches!(
        pipeline.swap_corpus(wrong_dim).await,
        Err(RetrievalError::DimensionMismatch { .. })
    ));
}
