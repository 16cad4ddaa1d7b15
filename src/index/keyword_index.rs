/// Tantivy keyword index for BM25 search over chunk text
use crate::corpus::Corpus;
use tantivy::collector::TopDocs;
use tantivy::indexer::NoMergePolicy;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, Value, INDEXED, STORED,
};
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use thiserror::Error;

/// Analyzer name registered on every lexical index
const TOKENIZER_NAME: &str = "mail_whitespace";

/// Writer memory budget
const WRITER_HEAP_BYTES: usize = 50_000_000;

/// Extra hits fetched past `limit` so score ties at the cutoff can be ordered by chunk id
const TIE_WINDOW: usize = 16;

#[derive(Error, Debug)]
pub enum LexicalIndexError {
    #[error("Index initialization failed: {0}")]
    InitializationError(String),

    #[error("Insert failed: {0}")]
    InsertError(String),

    #[error("Search failed: {0}")]
    SearchError(String),

    #[error("Tantivy error: {0}")]
    TantivyError(#[from] tantivy::TantivyError),
}

/// Chunk id with its BM25 score
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub chunk_id: String,
    pub score: f32,
}

/// Split text the same way the index does: lowercase, whitespace separated.
///
/// No stemming and no stopword removal.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// In-memory BM25 index over the full corpus
///
/// Built in one commit on a single writer thread, so document ordinals follow
/// corpus order and results are reproducible across builds.
pub struct LexicalIndex {
    reader: IndexReader,
    ordinal_field: Field,
    text_field: Field,
    chunk_ids: Vec<String>,
}

impl LexicalIndex {
    /// Build the index from every chunk in the corpus
    pub fn build(corpus: &Corpus) -> Result<Self, LexicalIndexError> {
        let mut schema_builder = Schema::builder();

        let ordinal_field = schema_builder.add_u64_field("ordinal", INDEXED | STORED);
        let text_options = TextOptions::default().set_indexing_options(
            TextFieldIndexing::default()
                .set_tokenizer(TOKENIZER_NAME)
                .set_index_option(IndexRecordOption::WithFreqs),
        );
        let text_field = schema_builder.add_text_field("text", text_options);

        let schema = schema_builder.build();
        let index = Index::create_in_ram(schema);

        let analyzer = TextAnalyzer::builder(WhitespaceTokenizer::default())
            .filter(LowerCaser)
            .build();
        index.tokenizers().register(TOKENIZER_NAME, analyzer);

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;
        // keep segments in insertion order
        writer.set_merge_policy(Box::new(NoMergePolicy));

        let mut chunk_ids = Vec::with_capacity(corpus.len());
        for (ordinal, chunk) in corpus.iter().enumerate() {
            writer
                .add_document(doc!(
                    ordinal_field => ordinal as u64,
                    text_field => chunk.text.as_str(),
                ))
                .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;
            chunk_ids.push(chunk.chunk_id.clone());
        }

        writer
            .commit()
            .map_err(|e| LexicalIndexError::InsertError(e.to_string()))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| LexicalIndexError::InitializationError(e.to_string()))?;

        tracing::info!("Lexical index built over {} chunks", chunk_ids.len());

        Ok(Self {
            reader,
            ordinal_field,
            text_field,
            chunk_ids,
        })
    }

    /// Rank chunks by descending BM25 score for a free-text query
    ///
    /// Every query token is an optional term, so a chunk matching any token is
    /// a hit. Equal scores are ordered by chunk id.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>, LexicalIndexError> {
        let mut terms = tokenize(query);
        terms.sort();
        terms.dedup();

        if terms.is_empty() || limit == 0 || self.chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let clauses: Vec<(Occur, Box<dyn Query>)> = terms
            .iter()
            .map(|term| {
                let term_query: Box<dyn Query> = Box::new(TermQuery::new(
                    Term::from_field_text(self.text_field, term),
                    IndexRecordOption::WithFreqs,
                ));
                (Occur::Should, term_query)
            })
            .collect();
        let query = BooleanQuery::new(clauses);

        // Tantivy cuts ties at the limit by doc address. Widen the window until
        // the boundary score ends inside it, then order by chunk id ourselves.
        let searcher = self.reader.searcher();
        let total = self.chunk_ids.len();
        let mut fetch = limit.saturating_add(TIE_WINDOW).min(total);
        let top_docs = loop {
            let docs = searcher
                .search(&query, &TopDocs::with_limit(fetch))
                .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;
            if docs.len() < fetch || fetch >= total || docs[fetch - 1].0 < docs[limit - 1].0 {
                break docs;
            }
            fetch = fetch.saturating_mul(2).min(total);
        };

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let retrieved: TantivyDocument = searcher
                .doc(doc_address)
                .map_err(|e| LexicalIndexError::SearchError(e.to_string()))?;

            let ordinal = retrieved
                .get_first(self.ordinal_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    LexicalIndexError::SearchError("Missing or invalid ordinal field".to_string())
                })?;

            let chunk_id = self.chunk_ids.get(ordinal as usize).ok_or_else(|| {
                LexicalIndexError::SearchError(format!("Unknown document ordinal {ordinal}"))
            })?;

            hits.push(LexicalHit {
                chunk_id: chunk_id.clone(),
                score,
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);

        Ok(hits)
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.chunk_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunk_ids.is_empty()
    }
}
