use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::{Value, json};

use super::http::{Auth, HttpTransport, require_str};
use super::{ModelDescriptor, ProviderAdapter, assistant_reply};
use crate::error::ProviderError;
use crate::provider::ProviderConfig;
use crate::session::{ChatMessage, ConversationContext, Role};

/// JSON-RPC error code MCP servers use for rejected credentials.
const UNAUTHORIZED: i64 = -32001;

/// MCP server reached over HTTP, asked for completions via `sampling/createMessage`.
pub struct McpAdapter {
    http: HttpTransport,
    next_id: AtomicU64,
}

impl Default for McpAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl McpAdapter {
    pub fn new() -> Self {
        Self {
            http: HttpTransport::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(
        &self,
        config: &ProviderConfig,
        method: &str,
        params: Value,
    ) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let resp = self
            .http
            .post_json(
                &config.base_url,
                Auth::Bearer(config.auth_key.expose()),
                &request,
                config.timeout,
            )
            .await?;
        into_result(resp)
    }
}

fn into_result(mut resp: Value) -> Result<Value, ProviderError> {
    if let Some(err) = resp.get("error") {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(if code == UNAUTHORIZED {
            ProviderError::AuthError {
                status: 401,
                message,
            }
        } else {
            ProviderError::MalformedResponse(format!("json-rpc error {code}: {message}"))
        });
    }
    match resp.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ProviderError::MalformedResponse(
            "json-rpc response has neither result nor error".into(),
        )),
    }
}

fn sampling_params(
    context: &ConversationContext,
    message: &str,
    model: &str,
    max_tokens: u32,
) -> Value {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for m in context.iter() {
        let role = match m.role {
            Role::System => {
                system.push(m.content.as_str());
                continue;
            }
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(json!({"role": role, "content": {"type": "text", "text": m.content}}));
    }
    messages.push(json!({"role": "user", "content": {"type": "text", "text": message}}));

    let mut params = json!({
        "messages": messages,
        "maxTokens": max_tokens,
        "modelPreferences": {"hints": [{"name": model}]},
    });
    if !system.is_empty() {
        params["systemPrompt"] = json!(system.join("\n"));
    }
    params
}

#[async_trait::async_trait]
impl ProviderAdapter for McpAdapter {
    async fn send(
        &self,
        context: &ConversationContext,
        message: &str,
        model: &str,
        config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError> {
        let params = sampling_params(context, message, model, config.max_tokens);
        let result = self.call(config, "sampling/createMessage", params).await?;
        assistant_reply(require_str(&result, &["content", "text"])?)
    }

    /// The server picks the model; only the configured hint is known.
    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError> {
        Ok(vec![ModelDescriptor::new(
            config.id,
            config.default_model.clone(),
        )])
    }

    async fn health_check(&self, config: &ProviderConfig) -> bool {
        self.call(config, "ping", json!({})).await.is_ok()
    }
}
