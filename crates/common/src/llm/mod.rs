//! Chat-completions client used to turn a conversation into a search query

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::retry::{classify_http_error, with_retry};
use async_trait::async_trait;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::debug;

const SYSTEM_PROMPT: &str = "Given the conversation below, rewrite the user's latest message \
as a single self-contained search query. Resolve pronouns and references using earlier turns. \
Reply with the query only, no explanation and no quotes.";

/// Speaker of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Produces a standalone search query from a multi-turn conversation
#[async_trait]
pub trait QueryReformulator: Send + Sync {
    /// `history` ends with the current utterance
    async fn reformulate(&self, history: &[ChatTurn]) -> Result<String>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// OpenAI-compatible reformulation client
pub struct LlmReformulator {
    config: LlmConfig,
    client: reqwest::Client,
}

impl LlmReformulator {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { config, client })
    }

    async fn call_llm(&self, history: &[ChatTurn]) -> Result<String> {
        let mut messages = vec![ChatMessage {
            role: ChatRole::System.as_str(),
            content: SYSTEM_PROMPT,
        }];
        messages.extend(history.iter().map(|t| ChatMessage {
            role: t.role.as_str(),
            content: &t.content,
        }));

        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
        };

        let mut builder = self.client.post(&self.config.endpoint).json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| classify_http_error("llm", e))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream("llm", format!("{}: {}", status, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Reformulation {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        let chat: ChatResponse = response.json().await.map_err(|e| AppError::Reformulation {
            message: format!("Failed to parse LLM response: {}", e),
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Reformulation {
                message: "LLM returned no choices".to_string(),
            })
    }
}

#[async_trait]
impl QueryReformulator for LlmReformulator {
    async fn reformulate(&self, history: &[ChatTurn]) -> Result<String> {
        let raw =
            with_retry(&self.config.retry, "llm.reformulate", || self.call_llm(history)).await?;

        let query = clean_query(&raw);
        if query.is_empty() {
            return Err(AppError::Reformulation {
                message: "LLM returned an empty query".to_string(),
            });
        }

        debug!(query = %query, "Reformulated query");
        Ok(query)
    }
}

/// Strip the wrapping models like to add: a "Query:" prefix, quotes, whitespace runs
pub fn clean_query(raw: &str) -> String {
    static PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    static SPACES: OnceLock<Option<Regex>> = OnceLock::new();

    let prefix = PREFIX.get_or_init(|| Regex::new(r"(?i)^\s*(search\s+)?query\s*:\s*").ok());
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").ok());

    let mut text = raw.trim().to_string();
    if let Some(re) = prefix {
        text = re.replace(&text, "").into_owned();
    }
    let text = text
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();

    match spaces {
        Some(re) => re.replace_all(text, " ").into_owned(),
        None => text.to_string(),
    }
}
