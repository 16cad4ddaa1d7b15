//! Configuration management for mailqa
//!
//! Settings live in a single TOML file. Named profiles can override a few
//! commonly toggled values, and `MAILQA_SECTION__KEY` environment variables
//! take precedence over both.

use crate::error::{MailQaError, Result};
use crate::index::VectorBackendKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// JSONL file with one pre-embedded chunk per line
    pub corpus_file: PathBuf,
    pub sessions_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// fastembed model used for query embeddings
    pub model: String,
}

/// LLM query expansion over an OpenAI-compatible endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    pub enabled: bool,
    pub base_url: String,
    pub api_key_env: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_ms: u64,
    /// Upper bound on queries searched, original included
    pub max_variants: usize,
    pub history_turns: usize,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 100,
            timeout_ms: 800,
            max_variants: 5,
            history_turns: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub lexical_limit: usize,
    pub semantic_limit: usize,
    pub rrf_k: f32,
    pub fusion_candidates: usize,
    pub top_k: usize,
    pub search_timeout_ms: u64,
    pub hnsw_ef_search: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            lexical_limit: 100,
            semantic_limit: 100,
            rrf_k: 60.0,
            fusion_candidates: 200,
            top_k: 10,
            search_timeout_ms: 1500,
            hnsw_ef_search: 64,
        }
    }
}

/// Soft score adjustments applied after fusion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub subject_boost: f32,
    pub sender_boost: f32,
    pub year_boost: f32,
    pub spam_penalty: f32,
    /// Case-insensitive regexes matched against the subject
    pub spam_subject_patterns: Vec<String>,
    /// Case-insensitive regexes matched against the sender address
    pub spam_sender_patterns: Vec<String>,
}

impl Default for RerankConfig {
    fn default() -> Self {
        let subject = [
            r"order confirmed",
            r"order #",
            r"automatic reply:",
            r"out of office",
            r"nightly wrap",
            r"your event lineup",
            r"top suggestions",
            r"recommendations for you",
            r"alert:",
            r"newsletter",
        ];
        let sender = [r"no-reply", r"noreply", r"donotreply", r"notifications@", r"alerts@"];

        Self {
            subject_boost: 0.10,
            sender_boost: 0.15,
            year_boost: 0.15,
            spam_penalty: 0.30,
            spam_subject_patterns: subject.iter().map(|p| p.to_string()).collect(),
            spam_sender_patterns: sender.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub vector_dim: usize,
    #[serde(default)]
    pub vector_backend: VectorBackendKind,
    pub hnsw_ef_construction: usize,
    pub hnsw_m: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_backend: Option<VectorBackendKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MailQaError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MailQaError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;
        config.finalize(None)
    }

    /// Save configuration to a file, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MailQaError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| MailQaError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        if !path.exists() {
            return Err(MailQaError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| MailQaError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;
        config.finalize(Some(profile))
    }

    /// Apply `profile`, then `MAILQA_*` environment overrides, then validate
    ///
    /// Environment variables always win over both the file and the profile.
    pub fn finalize(self, profile: Option<&str>) -> Result<Self> {
        self.finalize_with(profile, std::env::vars())
    }

    fn finalize_with<I>(mut self, profile: Option<&str>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if let Some(profile) = profile {
            self.apply_profile(profile)?;
        }
        self.apply_overrides(vars);
        ConfigValidator::validate(&self)?;
        Ok(self)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| MailQaError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(enabled) = overrides.expansion_enabled {
            self.expansion.enabled = enabled;
        }
        if let Some(model) = overrides.expansion_model {
            self.expansion.model = model;
        }
        if let Some(backend) = overrides.vector_backend {
            self.indexing.vector_backend = backend;
        }
        if let Some(top_k) = overrides.top_k {
            self.retrieval.top_k = top_k;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: MAILQA_SECTION__KEY=value
    fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("MAILQA_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__CORPUS_FILE" => self.storage.corpus_file = PathBuf::from(value),
            "STORAGE__SESSIONS_DIR" => self.storage.sessions_dir = PathBuf::from(value),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EXPANSION__ENABLED" => self.expansion.enabled = parse_env(path, value)?,
            "EXPANSION__BASE_URL" => self.expansion.base_url = value.to_string(),
            "EXPANSION__MODEL" => self.expansion.model = value.to_string(),
            "EXPANSION__TIMEOUT_MS" => self.expansion.timeout_ms = parse_env(path, value)?,
            "RETRIEVAL__TOP_K" => self.retrieval.top_k = parse_env(path, value)?,
            "RETRIEVAL__SEARCH_TIMEOUT_MS" => {
                self.retrieval.search_timeout_ms = parse_env(path, value)?
            }
            "INDEXING__VECTOR_BACKEND" => {
                self.indexing.vector_backend = match value.to_ascii_lowercase().as_str() {
                    "hnsw" => VectorBackendKind::Hnsw,
                    "exact" => VectorBackendKind::Exact,
                    other => {
                        return Err(MailQaError::InvalidConfigValue {
                            path: path.to_string(),
                            message: format!("Unknown vector backend '{}'", other),
                        })
                    }
                }
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| MailQaError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("mailqa").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| MailQaError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".mailqa"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| MailQaError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.mailqa");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                corpus_file: data_dir.join("chunks.jsonl"),
                sessions_dir: data_dir.join("sessions"),
                data_dir,
            },
            embedding: EmbeddingConfig {
                model: "all-MiniLM-L6-v2".to_string(),
            },
            expansion: ExpansionConfig::default(),
            retrieval: RetrievalConfig::default(),
            rerank: RerankConfig::default(),
            indexing: IndexingConfig {
                vector_dim: 384,
                vector_backend: VectorBackendKind::default(),
                hnsw_ef_construction: 200,
                hnsw_m: 16,
            },
            profiles: HashMap::new(),
        }
    }
}
