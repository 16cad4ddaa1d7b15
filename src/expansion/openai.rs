//! OpenAI-compatible chat completions backend for query expansion

use super::{ExpansionError, ExpansionService};
use crate::config::ExpansionConfig;
use crate::session::Turn;
use async_trait::async_trait;

/// Characters of each prior message included in the prompt
const CONTEXT_CHARS: usize = 200;

/// Asks a chat model for comma-separated related search terms
///
/// Works with any provider exposing `/v1/chat/completions` (OpenAI, Groq,
/// OpenRouter, Ollama).
pub struct OpenAiExpansionService {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiExpansionService {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature,
            max_tokens,
        }
    }

    /// Build from config, reading the API key from the configured variable
    pub fn from_config(config: &ExpansionConfig) -> Result<Self, ExpansionError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| ExpansionError::MissingApiKey(config.api_key_env.clone()))?;

        Ok(Self::new(
            config.base_url.clone(),
            api_key,
            config.model.clone(),
            config.temperature,
            config.max_tokens,
        ))
    }

    fn build_prompt(query: &str, history: &[Turn]) -> String {
        let mut context = String::new();
        if !history.is_empty() {
            context.push_str("\n\nRecent conversation context:\n");
            for turn in history {
                context.push_str(&format!("User: {}\n", truncate_chars(&turn.question)));
                context.push_str(&format!("Assistant: {}\n", truncate_chars(&turn.answer)));
            }
        }

        let with_context = if context.is_empty() {
            ""
        } else {
            " and conversation context"
        };

        format!(
            "Given this search query{with_context}, generate 3-5 related search terms including:\n\
             - Synonyms\n\
             - Common abbreviations\n\
             - Alternative phrasings\n\
             - Related terms\n\
             - Specific names, dates, or entities mentioned in context\n\
             {context}\n\
             Current query: \"{query}\"\n\n\
             If the query contains vague references like \"that conversation\", \"they\", \
             \"their email\", use the conversation context to identify the specific subject, \
             person, or topic being referenced.\n\n\
             Return ONLY a comma-separated list of search terms, nothing else.\n\
             Example: \"password, PW, pw:, credentials, login info\""
        )
    }
}

fn truncate_chars(text: &str) -> String {
    if text.chars().count() <= CONTEXT_CHARS {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(CONTEXT_CHARS).collect();
        format!("{prefix}...")
    }
}

/// Split a model reply into search terms
pub fn parse_terms(content: &str) -> Result<Vec<String>, ExpansionError> {
    let terms: Vec<String> = content
        .split([',', '\n'])
        .map(|term| term.trim().trim_matches(|c: char| c == '"' || c == '\'').trim())
        .filter(|term| !term.is_empty())
        .map(str::to_string)
        .collect();

    if terms.is_empty() {
        return Err(ExpansionError::Malformed(format!(
            "no terms in reply {content:?}"
        )));
    }
    Ok(terms)
}

#[async_trait]
impl ExpansionService for OpenAiExpansionService {
    async fn expand(&self, query: &str, history: &[Turn]) -> Result<Vec<String>, ExpansionError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "model": self.model,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "messages": [
                { "role": "user", "content": Self::build_prompt(query, history) }
            ],
        });

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExpansionError::Http(e.to_string()))?;

        let status = resp.status();
        let resp_body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ExpansionError::Malformed(e.to_string()))?;

        if !status.is_success() {
            return Err(ExpansionError::Api {
                status: status.as_u16(),
                body: resp_body.to_string(),
            });
        }

        let content = resp_body["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ExpansionError::Malformed("missing choices[0].message.content".to_string())
            })?;

        parse_terms(content)
    }
}
