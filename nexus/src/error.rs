use std::time::Duration;

/// Input or command rejected before any external call is made.
///
/// Never retried: the caller shows `reason` and discards the input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecurityError {
    #[error("input is not valid UTF-8 text")]
    NotText,
    #[error("input too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },
    #[error("blocked pattern: {0}")]
    BlockedPattern(String),
    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),
    #[error("shell operator not allowed: {0}")]
    ShellOperator(String),
    #[error("wildcard not allowed: {0}")]
    Wildcard(String),
    #[error("path escapes working directory: {0}")]
    PathEscape(String),
    #[error("invalid arguments for {command}: {reason}")]
    InvalidArgs { command: String, reason: String },
    #[error("command timed out after {0}s")]
    Timeout(u64),
    #[error("failed to spawn {command}: {reason}")]
    Spawn { command: String, reason: String },
}

/// Malformed credential or configuration. The provider is left unregistered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("invalid API key for {provider}: {reason}")]
    InvalidKey { provider: String, reason: String },
    #[error("base URL for {provider} is not an allowed domain: {url}")]
    DomainNotAllowed { provider: String, url: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Errors from a single provider call, classified for the retry controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("authentication rejected by provider (status {status}): {message}")]
    AuthError { status: u16, message: String },
    #[error("rate limited by {scope}")]
    RateLimited {
        scope: String,
        retry_after: Option<Duration>,
    },
    #[error("timeout after {}s", .0.as_secs_f64())]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("request blocked: {0}")]
    Blocked(String),
    #[error("response too large: {size} bytes (max {max})")]
    ResponseTooLarge { size: u64, max: u64 },
}

impl ProviderError {
    /// Transient failures worth another attempt. Auth and contract defects are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Timeout(_)
                | ProviderError::RateLimited { .. }
                | ProviderError::NetworkError(_)
        )
    }

    /// Short machine-friendly name of the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::AuthError { .. } => "auth",
            ProviderError::RateLimited { .. } => "rate_limited",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::MalformedResponse(_) => "malformed_response",
            ProviderError::NetworkError(_) => "network",
            ProviderError::Blocked(_) => "blocked",
            ProviderError::ResponseTooLarge { .. } => "response_too_large",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout(Duration::ZERO)
        } else if e.is_decode() || e.is_body() {
            ProviderError::MalformedResponse(e.to_string())
        } else {
            ProviderError::NetworkError(e.to_string())
        }
    }
}

/// All retries (and the fallback, if any) were exhausted for one request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("{provider} failed after {attempts} attempt(s): {source}")]
    Exhausted {
        provider: String,
        attempts: u32,
        #[source]
        source: ProviderError,
        fallback: Option<(String, ProviderError)>,
    },
    #[error("request cancelled")]
    Cancelled,
}

/// Rejected `/switch`. The previous active state is kept.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwitchError {
    #[error("unknown provider: {0}")]
    UnknownProvider(String),
    #[error("provider {0} is not configured (missing or invalid credentials)")]
    NotRegistered(String),
    #[error("API key for {0} failed validation")]
    InvalidKey(String),
    #[error("invalid model name: {0:?}")]
    InvalidModel(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classes() {
        assert!(ProviderError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(
            ProviderError::RateLimited {
                scope: "groq".into(),
                retry_after: None
            }
            .is_retryable()
        );
        assert!(ProviderError::NetworkError("reset".into()).is_retryable());

        assert!(
            !ProviderError::AuthError {
                status: 401,
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(!ProviderError::MalformedResponse("empty".into()).is_retryable());
        assert!(!ProviderError::Blocked("evil.com".into()).is_retryable());
        assert!(
            !ProviderError::ResponseTooLarge {
                size: 15_000_000,
                max: 10_000_000
            }
            .is_retryable()
        );
    }

    #[test]
    fn timeout_display_mentions_timeout() {
        let e = ProviderError::Timeout(Duration::from_millis(1500));
        assert_eq!(e.to_string(), "timeout after 1.5s");
    }

    #[test]
    fn gateway_error_summarises_primary() {
        let e = GatewayError::Exhausted {
            provider: "groq".into(),
            attempts: 2,
            source: ProviderError::Timeout(Duration::from_secs(30)),
            fallback: None,
        };
        let msg = e.to_string();
        assert!(msg.contains("groq"));
        assert!(msg.contains("2 attempt"));
        assert!(msg.contains("timeout"));
    }

    #[test]
    fn security_error_names_pattern() {
        let e = SecurityError::BlockedPattern("rm -rf".into());
        assert_eq!(e.to_string(), "blocked pattern: rm -rf");
    }
}
