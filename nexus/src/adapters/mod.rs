//! One adapter per model backend behind [`ProviderAdapter`].

mod gemini;
pub mod http;
mod huggingface;
mod mcp;
mod ollama;
mod openai_compat;

#[cfg(test)]
pub(crate) mod scripted;

use std::sync::Arc;

use serde::Serialize;

pub use gemini::GeminiAdapter;
pub use huggingface::HuggingFaceAdapter;
pub use mcp::McpAdapter;
pub use ollama::OllamaAdapter;
pub use openai_compat::OpenAiCompatAdapter;

use crate::error::ProviderError;
use crate::provider::{ProviderConfig, ProviderId};
use crate::session::{ChatMessage, ConversationContext};

/// Cap for chat replies, in characters.
pub const MAX_CHAT_CHARS: usize = 100_000;
/// Cap for system-visible text such as command output and listings.
pub const MAX_SYSTEM_CHARS: usize = 2_000;
pub const TRUNCATION_MARKER: &str = "\n[truncated]";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ModelDescriptor {
    pub id: String,
    pub display_name: String,
    pub provider: ProviderId,
}

impl ModelDescriptor {
    pub fn new(provider: ProviderId, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider,
        }
    }
}

#[async_trait::async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send `message` with `context` as prior history. Returns the assistant reply.
    async fn send(
        &self,
        context: &ConversationContext,
        message: &str,
        model: &str,
        config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError>;

    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError>;

    /// Cheap reachability check. Never errors.
    async fn health_check(&self, config: &ProviderConfig) -> bool;
}

/// Built-in adapter for a provider.
pub fn adapter_for(id: ProviderId) -> Arc<dyn ProviderAdapter> {
    match id {
        ProviderId::Gemini => Arc::new(GeminiAdapter::new()),
        ProviderId::Groq | ProviderId::ChatGpt => Arc::new(OpenAiCompatAdapter::new()),
        ProviderId::HuggingFace => Arc::new(HuggingFaceAdapter::new()),
        ProviderId::Ollama => Arc::new(OllamaAdapter::new()),
        ProviderId::Mcp => Arc::new(McpAdapter::new()),
    }
}

/// Truncate to `max_chars` characters, marking the cut.
pub fn cap_content(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
    }
}

/// Turn extracted text into the assistant reply: blank is a contract defect.
pub(crate) fn assistant_reply(text: &str) -> Result<ChatMessage, ProviderError> {
    if text.trim().is_empty() {
        return Err(ProviderError::MalformedResponse(
            "provider returned empty content".into(),
        ));
    }
    Ok(ChatMessage::assistant(cap_content(text, MAX_CHAT_CHARS)))
}
