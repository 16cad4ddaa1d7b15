//! Metadata reranking
//!
//! Soft, additive adjustments on top of the fused score. Nothing is ever
//! removed here: a spam-looking chunk only loses rank, and can still surface
//! when its lexical and semantic evidence is strong enough.

use crate::config::RerankConfig;
use crate::retrieval::RetrievalResult;
use chrono::Datelike;
use regex::{Regex, RegexBuilder};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Invalid spam pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },
}

/// Words that are capitalized in questions without naming anyone
const NON_NAMES: &[&str] = &[
    "what", "when", "where", "which", "who", "whom", "whose", "why", "how", "did", "does", "do",
    "is", "are", "was", "were", "can", "could", "should", "would", "will", "has", "have", "had",
    "the", "and", "for", "from", "about", "with", "any", "all", "tell", "show", "find", "list",
    "give", "email", "emails", "mail", "message", "messages", "thread", "meeting", "january",
    "february", "march", "april", "may", "june", "july", "august", "september", "october",
    "november", "december", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday",
    "sunday",
];

/// Common words excluded from subject overlap
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "from", "with", "about", "what", "when", "where", "which", "who", "whom",
    "why", "how", "did", "does", "was", "were", "are", "has", "have", "had", "any", "all", "that",
    "this", "these", "those", "there", "their", "they", "them", "his", "her", "our", "your",
    "you", "can", "could", "should", "would", "will", "not", "but", "get", "got", "tell", "show",
    "find", "into", "onto", "over", "than", "then", "out",
];

/// Four-digit 19xx/20xx token
fn parse_year(token: &str) -> Option<i32> {
    let is_year = token.len() == 4
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token.starts_with("19") || token.starts_with("20"));
    if is_year {
        token.parse().ok()
    } else {
        None
    }
}

fn normalize_token(token: &str) -> String {
    token
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

fn token_set(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = text
        .split_whitespace()
        .map(normalize_token)
        .filter(|t| !t.is_empty())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}

fn is_name_like(word: &str) -> bool {
    word.chars().count() >= 3
        && word.chars().next().is_some_and(char::is_uppercase)
        && word.chars().all(char::is_alphabetic)
        && !NON_NAMES.contains(&word.to_lowercase().as_str())
}

/// Capitalized words that look like person names, lowercased
///
/// A sentence-initial word is capitalized anyway, so it only counts when the
/// next word is also capitalized ("Janesh Rahlan") or it recurs capitalized
/// later in the question.
fn extract_names(query: &str) -> Vec<String> {
    let mut words: Vec<(&str, bool)> = Vec::new();
    let mut sentence_start = true;
    for raw in query.split_whitespace() {
        let word = raw.trim_matches(|c: char| !c.is_alphanumeric());
        if !word.is_empty() {
            words.push((word, sentence_start));
        }
        sentence_start = raw.ends_with(['.', '?', '!']);
    }

    let capitalized = |word: &str| word.chars().next().is_some_and(char::is_uppercase);
    words
        .iter()
        .enumerate()
        .filter(|(i, (word, initial))| {
            if !is_name_like(word) {
                return false;
            }
            if !initial {
                return true;
            }
            let next_capitalized = words
                .get(i + 1)
                .is_some_and(|(next, initial)| !initial && capitalized(*next));
            let recurs = words
                .iter()
                .any(|(other, initial)| !initial && *other == *word);
            next_capitalized || recurs
        })
        .map(|(_, (word, _))| word.to_lowercase())
        .collect()
}

/// Lowercased words of an address's display name and local part
///
/// `"Janesh Rahlan <jr@acme.io>"` gives `janesh`, `rahlan`, `jr`. The domain
/// is left out so company names never pass for people.
fn address_words(address: &str) -> Vec<String> {
    let (display, email) = match (address.find('<'), address.rfind('>')) {
        (Some(open), Some(close)) if open < close => (&address[..open], &address[open + 1..close]),
        _ if address.contains('@') => ("", address),
        _ => (address, ""),
    };
    let local = email.split('@').next().unwrap_or_default();

    display
        .split(|c: char| !c.is_alphanumeric())
        .chain(local.split(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Structured hints pulled from the original question
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySignals {
    /// Lowercased content words, three characters or longer
    pub keywords: Vec<String>,
    /// Lowercased capitalized words that look like person names
    pub names: Vec<String>,
    pub years: Vec<i32>,
}

impl QuerySignals {
    pub fn from_query(query: &str) -> Self {
        let keywords: Vec<String> = token_set(query)
            .into_iter()
            .filter(|t| t.chars().count() >= 3 && !STOPWORDS.contains(&t.as_str()))
            .collect();

        let mut names = extract_names(query);
        names.sort();
        names.dedup();

        let mut years: Vec<i32> = query
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter_map(parse_year)
            .collect();
        years.sort_unstable();
        years.dedup();

        Self {
            keywords,
            names,
            years,
        }
    }
}

/// Adjustments that applied to one result
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Adjustment {
    pub subject_boost: f32,
    pub sender_boost: f32,
    pub year_boost: f32,
    pub spam_penalty: f32,
}

impl Adjustment {
    pub fn total(&self) -> f32 {
        self.subject_boost + self.sender_boost + self.year_boost - self.spam_penalty
    }
}

/// Rescores fused results using subject, sender, date and spam signals
#[derive(Debug, Clone)]
pub struct MetadataReranker {
    subject_boost: f32,
    sender_boost: f32,
    year_boost: f32,
    spam_penalty: f32,
    spam_subject: Vec<Regex>,
    spam_sender: Vec<Regex>,
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<Regex>, RerankError> {
    patterns
        .iter()
        .map(|pattern| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .map_err(|source| RerankError::InvalidPattern {
                    pattern: pattern.clone(),
                    source,
                })
        })
        .collect()
}

impl MetadataReranker {
    pub fn from_config(config: &RerankConfig) -> Result<Self, RerankError> {
        Ok(Self {
            subject_boost: config.subject_boost,
            sender_boost: config.sender_boost,
            year_boost: config.year_boost,
            spam_penalty: config.spam_penalty,
            spam_subject: compile_patterns(&config.spam_subject_patterns)?,
            spam_sender: compile_patterns(&config.spam_sender_patterns)?,
        })
    }

    /// Whether a result looks like automated or promotional mail
    pub fn is_spam(&self, result: &RetrievalResult) -> bool {
        self.spam_subject.iter().any(|re| re.is_match(&result.subject))
            || self.spam_sender.iter().any(|re| re.is_match(&result.sender))
    }

    /// Adjustments for one result; each condition applies at most once
    pub fn adjust(&self, signals: &QuerySignals, result: &RetrievalResult) -> Adjustment {
        let mut adjustment = Adjustment::default();

        if !signals.keywords.is_empty() {
            let subject_tokens = token_set(&result.subject);
            if signals
                .keywords
                .iter()
                .any(|k| subject_tokens.binary_search(k).is_ok())
            {
                adjustment.subject_boost = self.subject_boost;
            }
        }

        if !signals.names.is_empty() {
            let words: Vec<String> = std::iter::once(&result.sender)
                .chain(result.recipients.iter())
                .flat_map(|address| address_words(address))
                .collect();
            if signals.names.iter().any(|name| words.contains(name)) {
                adjustment.sender_boost = self.sender_boost;
            }
        }

        if signals.years.contains(&result.date.year()) {
            adjustment.year_boost = self.year_boost;
        }

        if self.is_spam(result) {
            adjustment.spam_penalty = self.spam_penalty;
        }

        adjustment
    }

    /// Apply adjustments and sort by final score descending, ties by chunk id
    ///
    /// `results` arrive carrying only their fused score. The returned list has
    /// the same length.
    pub fn rerank(&self, query: &str, mut results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let signals = QuerySignals::from_query(query);
        tracing::debug!(
            "Rerank signals: keywords={:?} names={:?} years={:?}",
            signals.keywords,
            signals.names,
            signals.years
        );

        for result in &mut results {
            let adjustment = self.adjust(&signals, result);
            let breakdown = &mut result.breakdown;
            breakdown.subject_boost = adjustment.subject_boost;
            breakdown.sender_boost = adjustment.sender_boost;
            breakdown.year_boost = adjustment.year_boost;
            breakdown.spam_penalty = adjustment.spam_penalty;
            breakdown.final_score = breakdown.fused + adjustment.total();
            result.final_score = breakdown.final_score;
        }

        results.sort_by(|a, b| {
            b.final_score
                .total_cmp(&a.final_score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results
    }
}
