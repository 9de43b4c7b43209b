//! Line dispatch: sanitize, then either a slash command or a chat turn.

mod command;
mod handlers;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use command::Command;
pub use handlers::{COMMANDS, CommandSpec, Handler};

use crate::config::NexusConfig;
use crate::error::GatewayError;
use crate::gateway::{ChatRequest, Gateway};
use crate::provider::{ProviderId, ProviderRegistry};
use crate::security::{self, SafeExecutor};
use crate::session::{ChatMessage, ModelSession};
use crate::store::HistoryStore;

/// What the terminal should show for one dispatched line.
#[derive(Clone, Debug, PartialEq)]
pub enum DisplayResult {
    Info(String),
    Success(String),
    /// Single-line failure description.
    Error(String),
    Reply {
        provider: String,
        model: String,
        content: String,
        elapsed: Duration,
    },
    Exit,
    Empty,
}

impl DisplayResult {
    pub fn is_error(&self) -> bool {
        matches!(self, DisplayResult::Error(_))
    }
}

impl fmt::Display for DisplayResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayResult::Info(s) | DisplayResult::Success(s) => f.write_str(s),
            DisplayResult::Error(s) => write!(f, "error: {s}"),
            DisplayResult::Reply { content, .. } => f.write_str(content),
            DisplayResult::Exit | DisplayResult::Empty => Ok(()),
        }
    }
}

const DEGRADED_HINT: &str = "no provider is active. Set GEMINI_API_KEY, GROQ_API_KEY, OPENAI_API_KEY, HUGGINGFACE_TOKEN or OLLAMA_HOST, or use /key <provider> <key>";

/// Owns the registry, the session and the executor. All mutation goes through `&mut self`.
pub struct Router {
    registry: ProviderRegistry,
    session: ModelSession,
    gateway: Gateway,
    executor: SafeExecutor,
    config: NexusConfig,
    data_dir: Option<PathBuf>,
    history: Option<HistoryStore>,
    fallback: Option<ProviderId>,
    cancel: CancellationToken,
}

impl Router {
    pub fn new(registry: ProviderRegistry, config: NexusConfig, executor: SafeExecutor) -> Self {
        let fallback = config
            .fallback_provider
            .as_deref()
            .and_then(|name| match name.parse::<ProviderId>() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!("ignoring fallback_provider: {e}");
                    None
                }
            });
        Self {
            session: ModelSession::new(config.context_budget),
            gateway: Gateway::new(config.retry.clone()),
            registry,
            executor,
            config,
            data_dir: None,
            history: None,
            fallback,
            cancel: CancellationToken::new(),
        }
    }

    /// Persist preferences (and, with `keep_history`, the conversation) under `dir`.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>, keep_history: bool) -> Self {
        let dir = dir.into();
        self.history = keep_history.then(|| HistoryStore::new(&dir));
        self.data_dir = Some(dir);
        self
    }

    pub fn with_fallback(mut self, fallback: Option<ProviderId>) -> Self {
        if fallback.is_some() {
            self.fallback = fallback;
        }
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn session(&self) -> &ModelSession {
        &self.session
    }

    pub fn fallback(&self) -> Option<ProviderId> {
        self.fallback
    }

    /// Load persisted history into the session. Returns the number of messages kept.
    pub fn restore_history(&mut self) -> usize {
        let Some(store) = &self.history else {
            return 0;
        };
        match store.load() {
            Ok(messages) => {
                self.session.restore(messages);
                self.session.history().len()
            }
            Err(e) => {
                tracing::warn!("cannot restore history from {}: {e}", store.path().display());
                0
            }
        }
    }

    /// Pick the startup provider: `requested`, then the saved default, then the
    /// first registered one. With nothing registered the session stays idle.
    pub fn activate_initial(
        &mut self,
        requested: Option<ProviderId>,
        model: Option<&str>,
    ) -> DisplayResult {
        if self.registry.is_empty() {
            tracing::warn!("no valid provider credentials; commands-only mode");
            return DisplayResult::Error(DEGRADED_HINT.to_string());
        }
        let saved = self
            .config
            .default_provider
            .as_deref()
            .and_then(|name| name.parse::<ProviderId>().ok());
        let mut candidates: Vec<ProviderId> = requested.into_iter().chain(saved).collect();
        candidates.extend(self.registry.ids());

        let mut note = None;
        if let Some(id) = requested
            && !self.registry.contains(id)
        {
            note = Some(format!("{id} is not configured; "));
        }
        for id in candidates {
            if !self.registry.contains(id) {
                continue;
            }
            let model = if Some(id) == requested { model } else { None };
            let model = model
                .map(str::to_string)
                .or_else(|| self.config.default_models.get(id.as_str()).cloned())
                .unwrap_or_default();
            if let Ok(state) = self.session.switch(&self.registry, id, &model) {
                return DisplayResult::Info(format!(
                    "{}using {} ({})",
                    note.unwrap_or_default(),
                    state.provider_id,
                    state.model_name
                ));
            }
        }
        DisplayResult::Error(DEGRADED_HINT.to_string())
    }

    /// Dispatch one line with no way to interrupt it.
    pub async fn dispatch(&mut self, line: &str) -> DisplayResult {
        self.dispatch_with(line, CancellationToken::new()).await
    }

    /// Dispatch one line. Cancelling `cancel` aborts an in-flight provider request.
    pub async fn dispatch_with(&mut self, line: &str, cancel: CancellationToken) -> DisplayResult {
        let line = line.trim();
        if line.is_empty() {
            return DisplayResult::Empty;
        }
        if let Err(e) = security::sanitize(line) {
            return DisplayResult::Error(e.to_string());
        }
        self.cancel = cancel;
        match Command::parse(line) {
            Some(cmd) => match handlers::find(&cmd.name) {
                Some(spec) => (spec.handler)(self, &cmd).await,
                None => DisplayResult::Error(handlers::unknown_command(&cmd.name)),
            },
            None => self.chat(line).await,
        }
    }

    async fn chat(&mut self, text: &str) -> DisplayResult {
        let Some(active) = self.session.current().cloned() else {
            return DisplayResult::Error(DEGRADED_HINT.to_string());
        };
        let Some(primary) = self.registry.get(active.provider_id) else {
            return DisplayResult::Error(format!("{} is no longer configured", active.provider_id));
        };
        let fallback = self.fallback.and_then(|id| self.registry.get(id));
        let request = ChatRequest {
            context: self.session.history(),
            message: text,
            model: &active.model_name,
        };
        let result = self
            .gateway
            .execute(primary, fallback, &request, &self.cancel)
            .await;

        match result {
            Ok(done) => {
                self.session.append(ChatMessage::user(text));
                self.session.append(done.message.clone());
                self.persist_history();
                DisplayResult::Reply {
                    provider: done.provider.to_string(),
                    model: done.model,
                    content: done.message.content,
                    elapsed: done.elapsed,
                }
            }
            Err(GatewayError::Cancelled) => DisplayResult::Info("request cancelled".into()),
            Err(e) => DisplayResult::Error(e.to_string()),
        }
    }

    fn persist_history(&self) {
        if let Some(store) = &self.history
            && let Err(e) = store.save(self.session.history())
        {
            tracing::warn!("cannot save history: {e}");
        }
    }

    fn save_config(&self) {
        if let Some(dir) = &self.data_dir
            && let Err(e) = self.config.save(dir)
        {
            tracing::warn!("cannot save config: {e}");
        }
    }
}
