use serde_json::{Value, json};

use super::http::{Auth, HttpTransport};
use super::{ModelDescriptor, ProviderAdapter, assistant_reply};
use crate::error::ProviderError;
use crate::provider::ProviderConfig;
use crate::session::{ChatMessage, ConversationContext, Role};

/// Text-generation models known to work with the serverless Inference API.
const CURATED_MODELS: &[(&str, &str)] = &[
    ("mistralai/Mistral-7B-Instruct-v0.3", "Mistral 7B Instruct"),
    ("HuggingFaceH4/zephyr-7b-beta", "Zephyr 7B"),
    ("google/gemma-2-2b-it", "Gemma 2 2B"),
    ("microsoft/Phi-3-mini-4k-instruct", "Phi-3 Mini"),
    ("meta-llama/Llama-3.2-3B-Instruct", "Llama 3.2 3B"),
];

/// Hugging Face serverless Inference API (`/models/{model}`).
pub struct HuggingFaceAdapter {
    http: HttpTransport,
}

impl Default for HuggingFaceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl HuggingFaceAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpTransport::new(),
        }
    }
}

/// The text-generation task takes one prompt string.
fn render_prompt(context: &ConversationContext, message: &str) -> String {
    let mut prompt = String::new();
    for m in context.iter() {
        let label = match m.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        prompt.push_str(&format!("{label}: {}\n", m.content));
    }
    prompt.push_str(&format!("User: {message}\nAssistant:"));
    prompt
}

fn extract_text(resp: &Value) -> Result<&str, ProviderError> {
    if let Some(err) = resp.get("error").and_then(Value::as_str) {
        return Err(ProviderError::MalformedResponse(format!("huggingface: {err}")));
    }
    let first = match resp {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    first
        .and_then(|v| v.get("generated_text"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::MalformedResponse("missing field generated_text".into()))
}

#[async_trait::async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    async fn send(
        &self,
        context: &ConversationContext,
        message: &str,
        model: &str,
        config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError> {
        let url = format!("{}/models/{model}", config.base_url);
        let body = json!({
            "inputs": render_prompt(context, message),
            "parameters": {
                "max_new_tokens": config.max_tokens,
                "return_full_text": false,
            },
        });
        let resp = self
            .http
            .post_json(
                &url,
                Auth::Bearer(config.auth_key.expose()),
                &body,
                config.timeout,
            )
            .await?;
        assistant_reply(extract_text(&resp)?.trim())
    }

    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError> {
        Ok(CURATED_MODELS
            .iter()
            .map(|&(id, name)| ModelDescriptor {
                id: id.to_string(),
                display_name: name.to_string(),
                provider: config.id,
            })
            .collect())
    }

    async fn health_check(&self, config: &ProviderConfig) -> bool {
        let url = format!("{}/models/{}", config.base_url, config.default_model);
        self.http
            .get_json(&url, Auth::Bearer(config.auth_key.expose()), config.timeout)
            .await
            .is_ok()
    }
}
