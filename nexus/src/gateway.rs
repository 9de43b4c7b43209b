use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{GatewayError, ProviderError};
use crate::provider::{ProviderEntry, ProviderId};
use crate::session::{ChatMessage, ConversationContext};

/// Bounded exponential backoff between attempts on the same provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts on the primary provider, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 500,
            factor: 2.0,
            max_delay_ms: 4_000,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay after failed attempt number `attempt` (1-based):
    /// `min(base * factor^(attempt-1), max)`, raised to a provider's `Retry-After`
    /// but still capped.
    pub fn delay_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let exp = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay_ms as f64 * self.factor.max(1.0).powi(exp);
        let mut delay_ms = scaled.min(self.max_delay_ms as f64) as u64;
        if let ProviderError::RateLimited {
            retry_after: Some(wait),
            ..
        } = error
        {
            delay_ms = delay_ms.max(wait.as_millis() as u64);
        }
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// One chat turn to send: prior history plus the new user message.
pub struct ChatRequest<'a> {
    pub context: &'a ConversationContext,
    pub message: &'a str,
    /// Model for the primary provider. The fallback uses its own default model.
    pub model: &'a str,
}

/// A successful reply and who produced it.
#[derive(Clone, Debug)]
pub struct Completion {
    pub message: ChatMessage,
    pub provider: ProviderId,
    pub model: String,
    pub attempts: u32,
    pub used_fallback: bool,
    pub elapsed: Duration,
}

enum Failure {
    Cancelled,
    Provider { error: ProviderError, attempts: u32 },
}

/// Deadline, retries and fallback around adapter calls.
pub struct Gateway {
    policy: RetryPolicy,
}

impl Gateway {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Try `primary` up to the policy's attempt count, then `fallback` once.
    pub async fn execute(
        &self,
        primary: &ProviderEntry,
        fallback: Option<&ProviderEntry>,
        request: &ChatRequest<'_>,
        cancel: &CancellationToken,
    ) -> Result<Completion, GatewayError> {
        let start = Instant::now();
        let primary_id = primary.config.id;

        let (error, attempts) = match self
            .run(primary, request, request.model, self.policy.attempts(), cancel)
            .await
        {
            Ok((message, attempts)) => {
                return Ok(Completion {
                    message,
                    provider: primary_id,
                    model: request.model.to_string(),
                    attempts,
                    used_fallback: false,
                    elapsed: start.elapsed(),
                });
            }
            Err(Failure::Cancelled) => return Err(GatewayError::Cancelled),
            Err(Failure::Provider { error, attempts }) => (error, attempts),
        };

        let fallback = fallback.filter(|f| f.config.id != primary_id);
        let Some(fallback) = fallback else {
            return Err(GatewayError::Exhausted {
                provider: primary_id.to_string(),
                attempts,
                source: error,
                fallback: None,
            });
        };

        tracing::warn!(
            primary = %primary_id,
            fallback = %fallback.config.id,
            "primary exhausted ({error}); trying fallback"
        );
        let model = fallback.config.default_model.as_str();
        match self.run(fallback, request, model, 1, cancel).await {
            Ok((message, _)) => Ok(Completion {
                message,
                provider: fallback.config.id,
                model: model.to_string(),
                attempts: attempts + 1,
                used_fallback: true,
                elapsed: start.elapsed(),
            }),
            Err(Failure::Cancelled) => Err(GatewayError::Cancelled),
            Err(Failure::Provider {
                error: fallback_error,
                ..
            }) => Err(GatewayError::Exhausted {
                provider: primary_id.to_string(),
                attempts,
                source: error,
                fallback: Some((fallback.config.id.to_string(), fallback_error)),
            }),
        }
    }

    async fn run(
        &self,
        entry: &ProviderEntry,
        request: &ChatRequest<'_>,
        model: &str,
        max_attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<(ChatMessage, u32), Failure> {
        let provider = entry.config.id;
        let mut attempt = 1;
        loop {
            tracing::debug!(%provider, model, attempt, "provider attempt");
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failure::Cancelled),
                result = self.attempt(entry, request, model) => result,
            };
            let error = match result {
                Ok(message) => return Ok((message, attempt)),
                Err(e) => e,
            };
            if !error.is_retryable() || attempt >= max_attempts {
                tracing::warn!(%provider, attempt, kind = error.kind(), "provider failed: {error}");
                return Err(Failure::Provider {
                    error,
                    attempts: attempt,
                });
            }
            let delay = self.policy.delay_after(attempt, &error);
            tracing::warn!(
                %provider,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after {error}"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Failure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Local rate limit, then the adapter call under the provider's deadline.
    async fn attempt(
        &self,
        entry: &ProviderEntry,
        request: &ChatRequest<'_>,
        model: &str,
    ) -> Result<ChatMessage, ProviderError> {
        let config = &entry.config;
        if let Err(wait) = entry.limiter.try_acquire() {
            return Err(ProviderError::RateLimited {
                scope: format!("local limit for {}", config.id),
                retry_after: Some(wait),
            });
        }
        let call = entry
            .adapter
            .send(request.context, request.message, model, config);
        match tokio::time::timeout(config.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(config.timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::adapters::scripted::{ScriptedAdapter, Step};
    use crate::provider::{ProviderConfig, ProviderRegistry};
    use crate::session::ContextBudget;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay_ms: 5,
            factor: 2.0,
            max_delay_ms: 20,
        }
    }

    fn groq_config() -> ProviderConfig {
        ProviderConfig::new(ProviderId::Groq, format!("gsk_{}", "a".repeat(52)))
            .with_timeout(Duration::from_millis(50))
    }

    fn gemini_config() -> ProviderConfig {
        ProviderConfig::new(ProviderId::Gemini, format!("AIza{}", "b".repeat(35)))
            .with_timeout(Duration::from_millis(50))
    }

    fn registry(
        entries: Vec<(ProviderConfig, Arc<ScriptedAdapter>)>,
    ) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (config, adapter) in entries {
            registry.register(config, adapter).unwrap();
        }
        registry
    }

    fn request(ctx: &ConversationContext) -> ChatRequest<'_> {
        ChatRequest {
            context: ctx,
            message: "hello",
            model: "llama-3.3-70b-versatile",
        }
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        let e = ProviderError::Timeout(Duration::from_secs(1));
        assert_eq!(policy.delay_after(1, &e), Duration::from_millis(500));
        assert_eq!(policy.delay_after(2, &e), Duration::from_millis(1000));
        assert_eq!(policy.delay_after(3, &e), Duration::from_millis(2000));
        assert_eq!(policy.delay_after(10, &e), Duration::from_millis(4000));
    }

    #[test]
    fn retry_after_raises_delay_within_cap() {
        let policy = RetryPolicy::default();
        let limited = |secs| ProviderError::RateLimited {
            scope: "groq".into(),
            retry_after: Some(Duration::from_secs(secs)),
        };
        assert_eq!(policy.delay_after(1, &limited(2)), Duration::from_secs(2));
        assert_eq!(policy.delay_after(1, &limited(60)), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn success_on_first_attempt() {
        let adapter = Arc::new(ScriptedAdapter::replying("hi"));
        let registry = registry(vec![(groq_config(), adapter.clone())]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let done = Gateway::new(fast_policy(2))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                None,
                &request(&ctx),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(done.message.content, "hi");
        assert_eq!(done.attempts, 1);
        assert!(!done.used_fallback);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let adapter = Arc::new(ScriptedAdapter::new([
            Step::Fail(ProviderError::NetworkError("reset".into())),
            Step::Reply("second time".into()),
        ]));
        let registry = registry(vec![(groq_config(), adapter.clone())]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let done = Gateway::new(fast_policy(3))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                None,
                &request(&ctx),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(done.attempts, 2);
        assert_eq!(adapter.calls(), 2);
    }

    #[tokio::test]
    async fn timeouts_exhaust_attempts_then_fallback() {
        let primary = Arc::new(ScriptedAdapter::always(Step::Hang));
        let backup = Arc::new(ScriptedAdapter::replying("from gemini"));
        let registry = registry(vec![
            (groq_config(), primary.clone()),
            (gemini_config(), backup.clone()),
        ]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let done = Gateway::new(fast_policy(3))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                registry.get(ProviderId::Gemini),
                &request(&ctx),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(primary.calls(), 3);
        assert_eq!(backup.calls(), 1);
        assert!(done.used_fallback);
        assert_eq!(done.provider, ProviderId::Gemini);
        assert_eq!(done.model, ProviderId::Gemini.default_model());
    }

    #[tokio::test]
    async fn timeouts_without_fallback_fail() {
        let primary = Arc::new(ScriptedAdapter::always(Step::Hang));
        let registry = registry(vec![(groq_config(), primary.clone())]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let err = Gateway::new(fast_policy(2))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                None,
                &request(&ctx),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(primary.calls(), 2);
        match &err {
            GatewayError::Exhausted {
                attempts,
                source,
                fallback,
                ..
            } => {
                assert_eq!(*attempts, 2);
                assert!(matches!(source, ProviderError::Timeout(_)));
                assert!(fallback.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("timeout"));
    }

    #[tokio::test]
    async fn auth_error_is_never_retried() {
        let primary = Arc::new(ScriptedAdapter::always(Step::Fail(
            ProviderError::AuthError {
                status: 401,
                message: "invalid key".into(),
            },
        )));
        let registry = registry(vec![(groq_config(), primary.clone())]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let err = Gateway::new(fast_policy(5))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                None,
                &request(&ctx),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(primary.calls(), 1);
        assert!(matches!(
            err,
            GatewayError::Exhausted {
                attempts: 1,
                source: ProviderError::AuthError { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn both_failing_reports_primary_and_fallback() {
        let primary = Arc::new(ScriptedAdapter::always(Step::Fail(
            ProviderError::MalformedResponse("no choices".into()),
        )));
        let backup = Arc::new(ScriptedAdapter::always(Step::Fail(
            ProviderError::NetworkError("down".into()),
        )));
        let registry = registry(vec![
            (groq_config(), primary.clone()),
            (gemini_config(), backup.clone()),
        ]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let err = Gateway::new(fast_policy(2))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                registry.get(ProviderId::Gemini),
                &request(&ctx),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(backup.calls(), 1);
        let GatewayError::Exhausted {
            provider,
            source,
            fallback,
            ..
        } = err
        else {
            panic!("expected exhausted");
        };
        assert_eq!(provider, "groq");
        assert!(matches!(source, ProviderError::MalformedResponse(_)));
        let (fb_provider, fb_error) = fallback.unwrap();
        assert_eq!(fb_provider, "gemini");
        assert!(matches!(fb_error, ProviderError::NetworkError(_)));
    }

    #[tokio::test]
    async fn empty_bucket_fails_locally_without_calling_adapter() {
        let adapter = Arc::new(ScriptedAdapter::replying("ok"));
        let mut config = groq_config();
        config.rate_limit = 1;
        let registry = registry(vec![(config, adapter.clone())]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let gateway = Gateway::new(fast_policy(1));
        let entry = registry.get(ProviderId::Groq).unwrap();
        let cancel = CancellationToken::new();

        gateway
            .execute(entry, None, &request(&ctx), &cancel)
            .await
            .unwrap();
        let err = gateway
            .execute(entry, None, &request(&ctx), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Exhausted {
                source: ProviderError::RateLimited { .. },
                ..
            }
        ));
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test]
    async fn cancellation_interrupts_in_flight_call() {
        let adapter = Arc::new(ScriptedAdapter::always(Step::Hang));
        let mut config = groq_config();
        config.timeout = Duration::from_secs(60);
        let registry = registry(vec![(config, adapter.clone())]);
        let ctx = ConversationContext::new(ContextBudget::default());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = Gateway::new(fast_policy(3))
            .execute(
                registry.get(ProviderId::Groq).unwrap(),
                None,
                &request(&ctx),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
        assert_eq!(adapter.calls(), 1);
    }
}
