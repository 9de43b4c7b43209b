use serde_json::{Value, json};

use super::http::{Auth, HttpTransport};
use super::{ModelDescriptor, ProviderAdapter, assistant_reply};
use crate::error::ProviderError;
use crate::provider::ProviderConfig;
use crate::session::{ChatMessage, ConversationContext, Role};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Generative Language API (`generateContent`).
pub struct GeminiAdapter {
    http: HttpTransport,
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpTransport::new(),
        }
    }
}

/// Gemini has no system role in `contents`: system text goes to `systemInstruction`,
/// assistant turns are `model`.
fn build_body(context: &ConversationContext, message: &str, max_tokens: u32) -> Value {
    let mut system = Vec::new();
    let mut contents = Vec::new();
    for m in context.iter() {
        match m.role {
            Role::System => system.push(json!({"text": m.content})),
            Role::User => contents.push(json!({"role": "user", "parts": [{"text": m.content}]})),
            Role::Assistant => {
                contents.push(json!({"role": "model", "parts": [{"text": m.content}]}))
            }
        }
    }
    contents.push(json!({"role": "user", "parts": [{"text": message}]}));

    let mut body = json!({
        "contents": contents,
        "generationConfig": {"maxOutputTokens": max_tokens},
    });
    if !system.is_empty() {
        body["systemInstruction"] = json!({"parts": system});
    }
    body
}

fn extract_text(resp: &Value) -> Result<String, ProviderError> {
    let parts = resp
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            let reason = resp
                .pointer("/promptFeedback/blockReason")
                .and_then(Value::as_str)
                .map(|r| format!("prompt blocked: {r}"))
                .unwrap_or_else(|| "missing field candidates.0.content.parts".into());
            ProviderError::MalformedResponse(reason)
        })?;
    Ok(parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(""))
}

#[async_trait::async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn send(
        &self,
        context: &ConversationContext,
        message: &str,
        model: &str,
        config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{model}:generateContent",
            config.base_url
        );
        let body = build_body(context, message, config.max_tokens);
        let resp = self
            .http
            .post_json(
                &url,
                Auth::Header(API_KEY_HEADER, config.auth_key.expose()),
                &body,
                config.timeout,
            )
            .await?;
        assistant_reply(&extract_text(&resp)?)
    }

    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError> {
        let url = format!("{}/v1beta/models", config.base_url);
        let resp = self
            .http
            .get_json(
                &url,
                Auth::Header(API_KEY_HEADER, config.auth_key.expose()),
                config.timeout,
            )
            .await?;
        let models = resp
            .get("models")
            .and_then(Value::as_array)
            .ok_or_else(|| ProviderError::MalformedResponse("missing field models".into()))?;
        Ok(models
            .iter()
            .filter(|m| {
                m.get("supportedGenerationMethods")
                    .and_then(Value::as_array)
                    .is_none_or(|methods| methods.iter().any(|x| x == "generateContent"))
            })
            .filter_map(|m| {
                let name = m.get("name").and_then(Value::as_str)?;
                let id = name.strip_prefix("models/").unwrap_or(name);
                let mut descriptor = ModelDescriptor::new(config.id, id);
                if let Some(display) = m.get("displayName").and_then(Value::as_str) {
                    descriptor.display_name = display.to_string();
                }
                Some(descriptor)
            })
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

    #[test]
    fn system_messages_become_instruction() {
        let mut ctx = ConversationContext::new(ContextBudget::default());
        ctx.push(ChatMessage::system("answer in French"));
        ctx.push(ChatMessage::user("hi"));
        ctx.push(ChatMessage::assistant("salut"));
        let body = build_body(&ctx, "ça va?", 128);
        assert_eq!(
            body["systemInstruction"]["parts"][0]["text"],
            "answer in French"
        );
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 128);
    }

    #[test]
    fn joins_text_parts() {
        let resp = json!({"candidates":[{"content":{"parts":[{"text":"a"},{"text":"b"}]}}]});
        assert_eq!(extract_text(&resp).unwrap(), "ab");
    }

    #[test]
    fn block_reason_is_reported() {
        let resp = json!({"promptFeedback":{"blockReason":"SAFETY"}});
        let e = extract_text(&resp).unwrap_err();
        assert!(e.to_string().contains("SAFETY"));
    }

    #[tokio::test]
    async fn lists_generate_content_models() {
        let base = serve(vec![json_response(
            200,
            r#"{"models":[
                {"name":"models/gemini-2.0-flash","displayName":"Gemini 2.0 Flash","supportedGenerationMethods":["generateContent"]},
                {"name":"models/embedding-001","supportedGenerationMethods":["embedContent"]}
            ]}"#,
        )])
        .await;
        let config = ProviderConfig::new(ProviderId::Gemini, format!("AIza{}", "k".repeat(35)))
            .with_base_url(base);
        let models = GeminiAdapter::new().list_models(&config).await.unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gemini-2.0-flash");
        assert_eq!(models[0].display_name, "Gemini 2.0 Flash");
    }
}
