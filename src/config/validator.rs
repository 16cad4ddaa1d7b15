use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{MailQaError, Result, ValidationError};
use crate::index::FastEmbedProvider;

/// Configuration validator
///
/// Collects every problem before failing so a broken config file can be fixed
/// in one pass.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_expansion(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_rerank(config, &mut errors);
        Self::validate_indexing(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(MailQaError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked when the corpus is loaded; paths may still hold `~`
        if config.storage.corpus_file.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.corpus_file",
                "Corpus file path cannot be empty",
            ));
        }

        if config.storage.sessions_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.sessions_dir",
                "Sessions directory cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        match FastEmbedProvider::resolve(&config.embedding.model) {
            None => errors.push(ValidationError::new(
                "embedding.model",
                format!("Unsupported embedding model '{}'", config.embedding.model),
            )),
            Some((_, dim)) if dim != config.indexing.vector_dim => {
                errors.push(ValidationError::new(
                    "indexing.vector_dim",
                    format!(
                        "Model '{}' produces {}D vectors, but vector_dim is {}",
                        config.embedding.model, dim, config.indexing.vector_dim
                    ),
                ))
            }
            Some(_) => {}
        }
    }

    fn validate_expansion(config: &Config, errors: &mut Vec<ValidationError>) {
        let expansion = &config.expansion;

        // The API key is only looked up when the expander is built; a missing
        // key degrades to unexpanded search rather than refusing to start.
        if expansion.enabled && expansion.base_url.is_empty() {
            errors.push(ValidationError::new(
                "expansion.base_url",
                "Base URL cannot be empty when expansion is enabled",
            ));
        }

        if !(0.0..=2.0).contains(&expansion.temperature) {
            errors.push(ValidationError::new(
                "expansion.temperature",
                format!(
                    "Temperature must be between 0.0 and 2.0, got {}",
                    expansion.temperature
                ),
            ));
        }

        if expansion.max_variants == 0 {
            errors.push(ValidationError::new(
                "expansion.max_variants",
                "Must allow at least the original query",
            ));
        }

        if expansion.enabled && expansion.timeout_ms == 0 {
            errors.push(ValidationError::new(
                "expansion.timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if !(retrieval.rrf_k.is_finite() && retrieval.rrf_k > 0.0) {
            errors.push(ValidationError::new(
                "retrieval.rrf_k",
                format!("RRF k must be positive, got {}", retrieval.rrf_k),
            ));
        }

        for (path, value) in [
            ("retrieval.lexical_limit", retrieval.lexical_limit),
            ("retrieval.semantic_limit", retrieval.semantic_limit),
            ("retrieval.fusion_candidates", retrieval.fusion_candidates),
            ("retrieval.top_k", retrieval.top_k),
        ] {
            if value == 0 {
                errors.push(ValidationError::new(path, "Must be greater than 0"));
            }
        }

        if retrieval.search_timeout_ms == 0 {
            errors.push(ValidationError::new(
                "retrieval.search_timeout_ms",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_rerank(config: &Config, errors: &mut Vec<ValidationError>) {
        let rerank = &config.rerank;

        for (path, value) in [
            ("rerank.subject_boost", rerank.subject_boost),
            ("rerank.sender_boost", rerank.sender_boost),
            ("rerank.year_boost", rerank.year_boost),
            ("rerank.spam_penalty", rerank.spam_penalty),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                errors.push(ValidationError::new(
                    path,
                    format!("Must be a non-negative number, got {}", value),
                ));
            }
        }

        for (path, patterns) in [
            ("rerank.spam_subject_patterns", &rerank.spam_subject_patterns),
            ("rerank.spam_sender_patterns", &rerank.spam_sender_patterns),
        ] {
            for pattern in patterns {
                if let Err(e) = regex::Regex::new(pattern) {
                    errors.push(ValidationError::new(
                        path,
                        format!("Invalid pattern '{}': {}", pattern, e),
                    ));
                }
            }
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.indexing.vector_dim == 0 {
            errors.push(ValidationError::new(
                "indexing.vector_dim",
                "Vector dimension must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }
    }
}
