//! Chat-completion clients.
//!
//! [`ChatModel`] is the seam the conversational chain talks to. Two remote
//! backends are provided, selected by `llm.provider`:
//!
//! | Provider | Endpoint | Roles |
//! |----------|----------|-------|
//! | `gemini` | `models/{model}:generateContent` | `user` / `model`, system as `systemInstruction` |
//! | `openai` | `/chat/completions` | `system` / `user` / `assistant` |
//!
//! Both send the configured temperature and output-token cap and retry
//! transient failures up to `llm.max_retries` times.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::models::{ChatMessage, Role};
use crate::provider::{
    base_url, http_client, post_json_with_retry, require_key, GEMINI_BASE_URL, OPENAI_BASE_URL,
};

/// A single prompt: optional system instruction plus the ordered turns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<ChatMessage>,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Return the model's reply text for `request`.
    async fn complete(&self, request: &LlmRequest) -> Result<String>;
}

/// Build the configured chat model.
pub fn create_chat_model(config: &LlmConfig) -> Result<Box<dyn ChatModel>> {
    match config.provider.as_str() {
        "gemini" => Ok(Box::new(GeminiChat::new(config.clone())?)),
        "openai" => Ok(Box::new(OpenAiChat::new(config.clone())?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}

// ============ Gemini ============

pub struct GeminiChat {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiChat {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = require_key(config.api_key.as_ref(), "GOOGLE_API_KEY")?;
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn body(&self, request: &LlmRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Ai => "model",
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_tokens,
            },
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

#[async_trait]
impl ChatModel for GeminiChat {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let model = self.config.model.trim_start_matches("models/");
        let url = format!(
            "{}/models/{}:generateContent",
            base_url(self.config.url.as_deref(), GEMINI_BASE_URL),
            model
        );

        let json = post_json_with_retry(
            &self.client,
            "Gemini",
            &url,
            &[("x-goog-api-key", self.api_key.clone())],
            &self.body(request),
            self.config.max_retries,
        )
        .await?;

        parse_gemini_reply(&json)
    }
}

fn parse_gemini_reply(json: &Value) -> Result<String> {
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| {
            let reason = json["promptFeedback"]["blockReason"]
                .as_str()
                .or_else(|| json["candidates"][0]["finishReason"].as_str())
                .unwrap_or("no candidates");
            anyhow::anyhow!("Invalid Gemini response: {}", reason)
        })?;

    Ok(parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join(""))
}

// ============ OpenAI-compatible ============

pub struct OpenAiChat {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let api_key = require_key(config.api_key.as_ref(), "OPENAI_API_KEY")?;
        let client = http_client(config.timeout_secs)?;
        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    fn body(&self, request: &LlmRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        for m in &request.messages {
            let role = match m.role {
                Role::User => "user",
                Role::Ai => "assistant",
            };
            messages.push(json!({ "role": role, "content": m.content }));
        }

        json!({
            "model": self.config.model,
            "messages": messages,
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_tokens,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    async fn complete(&self, request: &LlmRequest) -> Result<String> {
        let url = format!(
            "{}/chat/completions",
            base_url(self.config.url.as_deref(), OPENAI_BASE_URL)
        );

        let json = post_json_with_retry(
            &self.client,
            "OpenAI",
            &url,
            &[("Authorization", format!("Bearer {}", self.api_key))],
            &self.body(request),
            self.config.max_retries,
        )
        .await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
    }
}
