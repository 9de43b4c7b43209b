use serde_json::{Value, json};

use super::http::{Auth, HttpTransport, require_str};
use super::{ModelDescriptor, ProviderAdapter, assistant_reply};
use crate::error::ProviderError;
use crate::provider::ProviderConfig;
use crate::session::{ChatMessage, ConversationContext, Role};

/// OpenAI-style `/chat/completions` backends (Groq, ChatGPT).
pub struct OpenAiCompatAdapter {
    http: HttpTransport,
}

impl Default for OpenAiCompatAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OpenAiCompatAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpTransport::new(),
        }
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

pub(crate) fn build_body(
    context: &ConversationContext,
    message: &str,
    model: &str,
    max_tokens: u32,
) -> Value {
    let mut messages: Vec<Value> = context
        .iter()
        .map(|m| json!({"role": role_name(m.role), "content": m.content}))
        .collect();
    messages.push(json!({"role": "user", "content": message}));
    json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": false,
    })
}

#[async_trait::async_trait]
impl ProviderAdapter for OpenAiCompatAdapter {
    async fn send(
        &self,
        context: &ConversationContext,
        message: &str,
        model: &str,
        config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError> {
        let url = format!("{}/chat/completions", config.base_url);
        let body = build_body(context, message, model, config.max_tokens);
        let resp = self
            .http
            .post_json(
                &url,
                Auth::Bearer(config.auth_key.expose()),
                &body,
                config.timeout,
            )
            .await?;
        let text = require_str(&resp, &["choices", "0", "message", "content"])?;
        assistant_reply(text)
    }

    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let url = format!("{}/models", config.base_url);
        let resp = self
            .http
            .get_json(&url, Auth::Bearer(config.auth_key.expose()), config.timeout)
            .await?;
        let data = resp
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::MalformedResponse("missing field data".into()))?;
        let mut models: Vec<ModelDescriptor> = data
            .iter()
            .filter_map(|m| m.get("id").and_then(Value::as_str))
            .map(|id| ModelDescriptor::new(config.id, id))
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn health_check(&self, config: &ProviderConfig) -> bool {
        self.list_models(config).await.is_ok()
    }
}
