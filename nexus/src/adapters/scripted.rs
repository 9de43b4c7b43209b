//! In-process adapter that replays a fixed script of outcomes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::{ModelDescriptor, ProviderAdapter, assistant_reply};
use crate::error::ProviderError;
use crate::provider::ProviderConfig;
use crate::session::{ChatMessage, ConversationContext};

#[derive(Clone, Debug)]
pub enum Step {
    Reply(String),
    Fail(ProviderError),
    /// Never completes on its own; only a deadline or cancellation ends it.
    Hang,
}

pub struct ScriptedAdapter {
    script: Mutex<VecDeque<Step>>,
    /// Returned once the script runs out.
    fallback_step: Step,
    delay: Duration,
    calls: AtomicUsize,
    healthy: bool,
}

impl ScriptedAdapter {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback_step: Step::Fail(ProviderError::NetworkError("script exhausted".into())),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            healthy: true,
        }
    }

    /// Every call yields `step`.
    pub fn always(step: Step) -> Self {
        let mut adapter = Self::new([]);
        adapter.fallback_step = step;
        adapter
    }

    pub fn replying(text: &str) -> Self {
        Self::always(Step::Reply(text.to_string()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for ScriptedAdapter {
    async fn send(
        &self,
        _context: &ConversationContext,
        _message: &str,
        _model: &str,
        _config: &ProviderConfig,
    ) -> Result<ChatMessage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback_step.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match step {
            Step::Reply(text) => assistant_reply(&text),
            Step::Fail(e) => Err(e),
            Step::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn list_models(
        &self,
        config: &ProviderConfig,
    ) -> Result<Vec<ModelDescriptor>, ProviderError> {
        Ok(vec![ModelDescriptor::new(
            config.id,
            config.default_model.clone(),
        )])
    }

    async fn health_check(&self, _config: &ProviderConfig) -> bool {
        self.healthy
    }
}
