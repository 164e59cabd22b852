//! History-aware retrieval chain.
//!
//! ```text
//! input + history ──▶ reformulate ──▶ standalone query ──▶ retriever (top-k)
//!                                                              │
//!              answer ◀── model ◀── persona + context + history + input
//! ```
//!
//! With no history the input is searched as-is; the reformulation call is
//! only worth making when there are earlier turns to resolve references
//! against.

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::index::Retriever;
use crate::llm::{ChatModel, LlmRequest};
use crate::models::{ChatMessage, RetrievedDocument};

pub const CONTEXTUALIZE_PROMPT: &str =
    "Given a chat history and the latest user question, reformulate a standalone question.";

pub const TUTOR_PERSONA: &str = "You are SciTutor, an AI science tutor for NCERT Science curriculum for Class 9 and 10. \
Answer science-related questions clearly and concisely. \
Context for this interaction:\n";

/// Result of one chain invocation.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub answer: String,
    /// Passages the answer was conditioned on.
    pub context: Vec<RetrievedDocument>,
}

pub struct ConversationalChain {
    llm: Arc<dyn ChatModel>,
    retriever: Arc<dyn Retriever>,
    k: usize,
}

impl ConversationalChain {
    pub fn new(llm: Arc<dyn ChatModel>, retriever: Arc<dyn Retriever>, k: usize) -> Self {
        Self { llm, retriever, k }
    }

    /// Answer `input` given the prior `history`. Provider failures propagate.
    pub async fn invoke(&self, input: &str, history: &[ChatMessage]) -> Result<ChainOutput> {
        let query = self.standalone_query(input, history).await?;
        debug!(query = %query, "retrieving");

        let context = self.retriever.retrieve(&query, self.k).await?;

        let request = LlmRequest {
            system: Some(answer_system_prompt(&context)),
            messages: with_input(history, input),
        };
        let answer = self.llm.complete(&request).await?;

        Ok(ChainOutput { answer, context })
    }

    async fn standalone_query(&self, input: &str, history: &[ChatMessage]) -> Result<String> {
        if history.is_empty() {
            return Ok(input.to_string());
        }

        let request = LlmRequest {
            system: Some(CONTEXTUALIZE_PROMPT.to_string()),
            messages: with_input(history, input),
        };
        let reformulated = self.llm.complete(&request).await?;
        let reformulated = reformulated.trim();

        if reformulated.is_empty() {
            Ok(input.to_string())
        } else {
            Ok(reformulated.to_string())
        }
    }
}

fn with_input(history: &[ChatMessage], input: &str) -> Vec<ChatMessage> {
    let mut messages = history.to_vec();
    messages.push(ChatMessage::user(input));
    messages
}

fn answer_system_prompt(context: &[RetrievedDocument]) -> String {
    let joined = context
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("{}{}", TUTOR_PERSONA, joined)
}
