use serde_json::{Value, json};

use super::http::{Auth, HttpTransport, require_str};
use super::{ModelDescriptor, ProviderAdapter, assistant_reply};
use crate::error::ProviderError;
use crate::provider::ProviderConfig;
use crate::session::{ChatMessage, ConversationContext, Role};

/// Local Ollama daemon. Keyless.
pub struct OllamaAdapter {
    http: HttpTransport,
}

impl Default for OllamaAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl OllamaAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpTransport::new(),
        }
    }
}

fn build_body(context: &ConversationContext, message: &str, model: &str, max_tokens: u32) -> Value {
    let mut messages: Vec<Value> = context
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::System => "system",
            };
            json!({"role": role, "content": m.content})
        })
        .collect();
    messages.push(json!({"role": "user", "content": message}));
    json!({
        "model": model,
        "messages": messages,
        "stream": false,
        "options": {"num_predict": max_tokens},
    })
}

#[async_trait::async_trait]
impl ProviderAdapter for OllamaAdapter {
    async fn send(
        &self,
        context: &ConversationContext,
        message: &str,
        model: &str,
        config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError> {
        let url = format!("{}/api/chat", config.base_url);
        let body = build_body(context, message, model, config.max_tokens);
        let resp = self
            .http
            .post_json(&url, Auth::None, &body, config.timeout)
            .await?;
        if let Some(err) = resp.get("error").and_then(Value::as_str) {
            return Err(ProviderError::MalformedResponse(format!("ollama: {err}")));
        }
        assistant_reply(require_str(&resp, &["message", "content"])?)
    }

    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let url = format!("{}/api/tags", config.base_url);
        let resp = self.http.get_json(&url, Auth::None, config.timeout).await?;
        let models = resp
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::MalformedResponse("missing field models".into()))?;
        Ok(models
            .iter()
            .filter_map(|m| m.get("name").and_then(Value::as_str))
            .map(|name| ModelDescriptor::new(config.id, name))
            .collect())
    }

    async fn health_check(&self, config: &ProviderConfig) -> bool {
        self.list_models(config).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::super::http::testing::{json_response, serve};
    use super::*;
    use crate::provider::ProviderId;
    use crate::session::ContextBudget;

    #[tokio::test]
    async fn chat_and_tags() {
        let base = serve(vec![
            json_response(
                200,
                r#"{"model":"llama3.2","message":{"role":"assistant","content":"hey"},"done":true}"#,
            ),
            json_response(200, r#"{"models":[{"name":"llama3.2:latest"},{"name":"qwen2.5"}]}"#),
            json_response(200, r#"{"error":"model 'nope' not found"}"#),
        ])
        .await;
        let config = ProviderConfig::new(ProviderId::Ollama, "").with_base_url(base);
        let adapter = OllamaAdapter::new();
        let ctx = ConversationContext::new(ContextBudget::default());

        let reply = adapter.send(&ctx, "hi", "llama3.2", &config).await.unwrap();
        assert_eq!(reply.content, "hey");

        let models = adapter.list_models(&config).await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "llama3.2:latest");

        let e = adapter.send(&ctx, "hi", "nope", &config).await.unwrap_err();
        assert!(e.to_string().contains("not found"));
    }

    #[test]
    fn request_disables_streaming() {
        let ctx = ConversationContext::new(ContextBudget::default());
        let body = build_body(&ctx, "hi", "llama3.2", 64);
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_predict"], 64);
    }
}
