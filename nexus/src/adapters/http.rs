//! Shared HTTP transport for the adapters.
//!
//! - Every URL is checked against the domain allowlist before a request is built.
//! - No redirect following.
//! - Bodies are size-capped before parsing: a declared `Content-Length` over the cap
//!   is rejected unread, otherwise the body is read chunk by chunk and abandoned as
//!   soon as it crosses the cap.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, RETRY_AFTER};
use serde_json::Value;

use crate::error::ProviderError;
use crate::security;

/// Largest accepted response body.
pub const MAX_RESPONSE_BYTES: u64 = 10_000_000;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const ERROR_SNIPPET_CHARS: usize = 200;

/// How a request authenticates.
#[derive(Clone, Copy, Debug)]
pub enum Auth<'a> {
    None,
    Bearer(&'a str),
    Header(&'static str, &'a str),
}

pub struct HttpTransport {
    client: reqwest::Client,
    max_body: u64,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("http client builder failed ({e}); using defaults");
                reqwest::Client::new()
            });
        Self {
            client,
            max_body: MAX_RESPONSE_BYTES,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_body(mut self, max_body: u64) -> Self {
        self.max_body = max_body;
        self
    }

    pub async fn post_json(
        &self,
        url: &str,
        auth: Auth<'_>,
        body: &Value,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        check_url(url)?;
        let request = self.client.post(url).json(body);
        self.execute(request, url, auth, timeout).await
    }

    pub async fn get_json(
        &self,
        url: &str,
        auth: Auth<'_>,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        check_url(url)?;
        let request = self.client.get(url);
        self.execute(request, url, auth, timeout).await
    }

    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        auth: Auth<'_>,
        timeout: Duration,
    ) -> Result<Value, ProviderError> {
        let request = match auth {
            Auth::None => request,
            Auth::Bearer(token) => request.header(AUTHORIZATION, format!("Bearer {token}")),
            Auth::Header(name, value) => request.header(name, value),
        };
        tracing::debug!(url, "provider request");
        let resp = request
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest(e, timeout))?;

        let status = resp.status();
        let retry_after = retry_after(resp.headers());
        let body = read_capped(resp, self.max_body, timeout).await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            let snippet: String = text.trim().chars().take(ERROR_SNIPPET_CHARS).collect();
            return Err(classify_status(
                status.as_u16(),
                retry_after,
                &snippet,
                host_of(url),
            ));
        }
        parse_json(&body)
    }
}

fn check_url(url: &str) -> Result<(), ProviderError> {
    if security::validate_domain(url) {
        Ok(())
    } else {
        tracing::warn!(url, "request to non-allowlisted domain blocked");
        Err(ProviderError::Blocked(format!(
            "{} is not an allowed domain",
            host_of(url)
        )))
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    rest.split(['/', '?', '#']).next().unwrap_or(rest)
}

fn map_reqwest(e: reqwest::Error, timeout: Duration) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        e.into()
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Map a non-2xx status onto the provider error taxonomy.
pub(crate) fn classify_status(
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
    scope: &str,
) -> ProviderError {
    match status {
        401 | 403 => ProviderError::AuthError {
            status,
            message: body.to_string(),
        },
        429 => ProviderError::RateLimited {
            scope: scope.to_string(),
            retry_after,
        },
        408 | 504 => ProviderError::Timeout(Duration::ZERO),
        500..=599 => ProviderError::NetworkError(format!("HTTP {status}: {body}")),
        _ => ProviderError::MalformedResponse(format!("unexpected HTTP {status}: {body}")),
    }
}

async fn read_capped(
    mut resp: reqwest::Response,
    max: u64,
    timeout: Duration,
) -> Result<Vec<u8>, ProviderError> {
    if let Some(declared) = resp.content_length()
        && declared > max
    {
        return Err(ProviderError::ResponseTooLarge {
            size: declared,
            max,
        });
    }
    let mut body = Vec::new();
    while let Some(chunk) = resp.chunk().await.map_err(|e| map_reqwest(e, timeout))? {
        let size = body.len() as u64 + chunk.len() as u64;
        if size > max {
            return Err(ProviderError::ResponseTooLarge { size, max });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

fn parse_json(body: &[u8]) -> Result<Value, ProviderError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ProviderError::MalformedResponse("empty response body".into()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ProviderError::MalformedResponse(format!("invalid JSON: {e}")))
}

/// Walk `path` (object keys or array indices) into `value`.
pub(crate) fn pointer<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| match key.parse::<usize>() {
        Ok(i) => v.get(i),
        Err(_) => v.get(*key),
    })
}

/// String at `path`, or `MalformedResponse` naming what was missing.
pub(crate) fn require_str<'a>(value: &'a Value, path: &[&str]) -> Result<&'a str, ProviderError> {
    pointer(value, path).and_then(Value::as_str).ok_or_else(|| {
        ProviderError::MalformedResponse(format!("missing field {}", path.join(".")))
    })
}
