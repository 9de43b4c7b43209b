use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SwitchError;
use crate::provider::{ProviderId, ProviderRegistry};
use crate::security;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Rough token estimate: four characters per token, rounded up.
    pub fn estimated_tokens(&self) -> usize {
        self.content.chars().count().div_ceil(4)
    }
}

/// Upper bound on the conversation kept for a provider call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextBudget {
    Messages(usize),
    Tokens(usize),
}

impl Default for ContextBudget {
    fn default() -> Self {
        ContextBudget::Messages(50)
    }
}

/// Ordered chat history, trimmed from the front after every insertion.
#[derive(Clone, Debug, PartialEq)]
pub struct ConversationContext {
    messages: VecDeque<ChatMessage>,
    budget: ContextBudget,
}

impl ConversationContext {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            messages: VecDeque::new(),
            budget,
        }
    }

    pub fn budget(&self) -> ContextBudget {
        self.budget
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ChatMessage> + ExactSizeIterator {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.back()
    }

    /// The last `n` messages, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().skip(self.messages.len().saturating_sub(n))
    }

    pub fn estimated_tokens(&self) -> usize {
        self.messages.iter().map(ChatMessage::estimated_tokens).sum()
    }

    pub fn within_budget(&self) -> bool {
        match self.budget {
            ContextBudget::Messages(max) => self.messages.len() <= max,
            ContextBudget::Tokens(max) => self.estimated_tokens() <= max,
        }
    }

    /// Append and evict oldest-first until the budget holds again. A single message
    /// larger than a token budget evicts everything, itself included.
    pub fn push(&mut self, message: ChatMessage) -> usize {
        self.messages.push_back(message);
        let mut evicted = 0;
        while !self.within_budget() {
            if self.messages.pop_front().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn to_vec(&self) -> Vec<ChatMessage> {
        self.messages.iter().cloned().collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveModelState {
    pub provider_id: ProviderId,
    pub model_name: String,
    pub switched_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Switching,
    Active,
}

/// Active provider/model plus the conversation. Owned by the router.
pub struct ModelSession {
    active: Option<ActiveModelState>,
    phase: SessionPhase,
    context: ConversationContext,
}

impl ModelSession {
    pub fn new(budget: ContextBudget) -> Self {
        Self {
            active: None,
            phase: SessionPhase::Idle,
            context: ConversationContext::new(budget),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn current(&self) -> Option<&ActiveModelState> {
        self.active.as_ref()
    }

    pub fn history(&self) -> &ConversationContext {
        &self.context
    }

    /// Activate `provider_id`/`model`. On rejection nothing changes.
    pub fn switch(
        &mut self,
        registry: &ProviderRegistry,
        provider_id: ProviderId,
        model: &str,
    ) -> Result<ActiveModelState, SwitchError> {
        let previous = self.phase;
        self.phase = SessionPhase::Switching;
        match Self::resolve(registry, provider_id, model) {
            Ok(state) => {
                tracing::info!(
                    provider = %state.provider_id,
                    model = %state.model_name,
                    "active model switched"
                );
                self.active = Some(state.clone());
                self.phase = SessionPhase::Active;
                Ok(state)
            }
            Err(e) => {
                tracing::warn!(provider = %provider_id, "switch rejected: {e}");
                self.phase = previous;
                Err(e)
            }
        }
    }

    fn resolve(
        registry: &ProviderRegistry,
        provider_id: ProviderId,
        model: &str,
    ) -> Result<ActiveModelState, SwitchError> {
        let entry = registry
            .get(provider_id)
            .ok_or_else(|| SwitchError::NotRegistered(provider_id.to_string()))?;
        if !security::validate_api_key(entry.config.auth_key.expose(), provider_id.as_str()) {
            return Err(SwitchError::InvalidKey(provider_id.to_string()));
        }
        let model = model.trim();
        let model_name = if model.is_empty() {
            entry.config.default_model.clone()
        } else {
            if !is_valid_model_name(model) {
                return Err(SwitchError::InvalidModel(model.to_string()));
            }
            model.to_string()
        };
        Ok(ActiveModelState {
            provider_id,
            model_name,
            switched_at: Utc::now(),
        })
    }

    pub fn append(&mut self, message: ChatMessage) {
        let evicted = self.context.push(message);
        if evicted > 0 {
            tracing::debug!(evicted, "context trimmed to budget");
        }
    }

    pub fn clear(&mut self) {
        self.context.clear();
    }

    /// Re-apply persisted history through the budget.
    pub fn restore(&mut self, messages: impl IntoIterator<Item = ChatMessage>) {
        for message in messages {
            self.context.push(message);
        }
    }
}

/// Non-empty, only `[A-Za-z0-9._:/-]`, and every `/`-separated segment is a plain
/// name (no empty, `.` or `..` segments). Model names are spliced into request paths.
pub fn is_valid_model_name(model: &str) -> bool {
    !model.is_empty()
        && model.len() <= 200
        && model
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'))
        && model
            .split('/')
            .all(|segment| !matches!(segment, "" | "." | ".."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderConfig;

    fn registry_with_groq() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry
            .register_default(ProviderConfig::new(
                ProviderId::Groq,
                format!("gsk_{}", "a".repeat(52)),
            ))
            .unwrap();
        registry
    }

    #[test]
    fn message_budget_evicts_oldest_first() {
        let mut ctx = ConversationContext::new(ContextBudget::Messages(3));
        for i in 0..5 {
            ctx.push(ChatMessage::user(format!("m{i}")));
            assert!(ctx.len() <= 3);
        }
        let kept: Vec<_> = ctx.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(kept, ["m2", "m3", "m4"]);
    }

    #[test]
    fn token_budget_holds_after_every_push() {
        let mut ctx = ConversationContext::new(ContextBudget::Tokens(10));
        for len in [4, 12, 30, 1, 8, 41, 3] {
            ctx.push(ChatMessage::assistant("x".repeat(len)));
            assert!(ctx.within_budget(), "over budget after {len}");
        }
    }

    #[test]
    fn oversized_message_empties_token_context() {
        let mut ctx = ConversationContext::new(ContextBudget::Tokens(5));
        ctx.push(ChatMessage::user("hi"));
        let evicted = ctx.push(ChatMessage::user("y".repeat(100)));
        assert_eq!(evicted, 2);
        assert!(ctx.is_empty());
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(ChatMessage::user("").estimated_tokens(), 0);
        assert_eq!(ChatMessage::user("abc").estimated_tokens(), 1);
        assert_eq!(ChatMessage::user("abcde").estimated_tokens(), 2);
    }

    #[test]
    fn tail_returns_last_n_in_order() {
        let mut ctx = ConversationContext::new(ContextBudget::Messages(10));
        for i in 0..4 {
            ctx.push(ChatMessage::user(i.to_string()));
        }
        let tail: Vec<_> = ctx.tail(2).map(|m| m.content.clone()).collect();
        assert_eq!(tail, ["2", "3"]);
        assert_eq!(ctx.tail(100).count(), 4);
    }

    #[test]
    fn switch_to_registered_provider() {
        let registry = registry_with_groq();
        let mut session = ModelSession::new(ContextBudget::default());
        assert_eq!(session.phase(), SessionPhase::Idle);

        let state = session.switch(&registry, ProviderId::Groq, "").unwrap();
        assert_eq!(state.provider_id, ProviderId::Groq);
        assert_eq!(state.model_name, ProviderId::Groq.default_model());
        assert_eq!(session.phase(), SessionPhase::Active);
        assert_eq!(session.current(), Some(&state));
    }

    #[test]
    fn switch_to_unregistered_leaves_state_unchanged() {
        let registry = registry_with_groq();
        let mut session = ModelSession::new(ContextBudget::default());
        session
            .switch(&registry, ProviderId::Groq, "llama-3.1-8b-instant")
            .unwrap();
        let before = session.current().cloned();

        let err = session
            .switch(&registry, ProviderId::Gemini, "")
            .unwrap_err();
        assert_eq!(err, SwitchError::NotRegistered("gemini".into()));
        assert_eq!(session.current().cloned(), before);
        assert_eq!(session.phase(), SessionPhase::Active);
    }

    #[test]
    fn failed_first_switch_stays_idle() {
        let registry = ProviderRegistry::new();
        let mut session = ModelSession::new(ContextBudget::default());
        assert!(session.switch(&registry, ProviderId::Groq, "").is_err());
        assert_eq!(session.phase(), SessionPhase::Idle);
        assert!(session.current().is_none());
    }

    #[test]
    fn invalid_model_name_rejected() {
        let registry = registry_with_groq();
        let mut session = ModelSession::new(ContextBudget::default());
        for bad in ["llama 3", "model;rm", "../../x$", "m\u{200B}"] {
            assert!(matches!(
                session.switch(&registry, ProviderId::Groq, bad),
                Err(SwitchError::InvalidModel(_))
            ));
        }
        assert!(session.current().is_none());
        assert!(is_valid_model_name("meta-llama/Llama-3.1-8B:free"));
    }

    #[test]
    fn model_names_cannot_walk_the_request_path() {
        for bad in [
            "../../v1beta/files",
            "..",
            "a/../b",
            "/v1/models",
            "a//b",
            "a/./b",
            "models/",
        ] {
            assert!(!is_valid_model_name(bad), "accepted {bad:?}");
        }
        let registry = registry_with_groq();
        let mut session = ModelSession::new(ContextBudget::default());
        assert!(matches!(
            session.switch(&registry, ProviderId::Groq, "../../v1beta/files"),
            Err(SwitchError::InvalidModel(_))
        ));
        assert!(is_valid_model_name("llama3.2"));
        assert!(is_valid_model_name("gemini-1.5-pro..exp"));
    }

    #[test]
    fn restore_respects_budget() {
        let mut session = ModelSession::new(ContextBudget::Messages(2));
        session.restore((0..5).map(|i| ChatMessage::user(i.to_string())));
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history().last().unwrap().content, "4");
        session.clear();
        assert!(session.history().is_empty());
    }

    #[test]
    fn message_serializes_with_lowercase_role() {
        let json = serde_json::to_value(ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "hi");
    }
}
