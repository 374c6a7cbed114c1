//! Shared HTTP plumbing for the external service adapters.
//!
//! One pooled client is built at startup and handed to every adapter. Only
//! the method, path and status of each request are logged; bodies, tokens and
//! recipient addresses never are.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::config::HttpConfig;
use crate::error::AppError;

/// Longest upstream error text carried into an `ExternalService` error.
const MAX_ERROR_MESSAGE_CHARS: usize = 200;

/// Builds the process-wide HTTP client.
pub fn build_http_client(config: &HttpConfig) -> Result<Arc<Client>, AppError> {
    let mut headers = HeaderMap::new();
    let agent = HeaderValue::from_str(&config.user_agent)
        .map_err(|e| AppError::Config(format!("Invalid http.user_agent: {e}")))?;
    headers.insert(USER_AGENT, agent);

    let client = Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {e}")))?;

    Ok(Arc::new(client))
}

/// Appends path segments to a base URL, keeping any path prefix the base has.
/// Segments are percent-encoded.
pub(crate) fn endpoint_url(base: &Url, segments: &[&str]) -> Result<Url, AppError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::Config(format!("URL cannot be used as a base: {base}")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Parses a configured base URL.
pub(crate) fn parse_base_url(name: &str, value: &str) -> Result<Url, AppError> {
    Url::parse(value).map_err(|e| AppError::Config(format!("Invalid {name} '{value}': {e}")))
}

/// Common error shapes returned by the upstream APIs.
#[derive(Debug, Deserialize)]
struct UpstreamError {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    errors: Vec<UpstreamErrorItem>,
}

#[derive(Debug, Deserialize)]
struct UpstreamErrorItem {
    #[serde(default)]
    message: Option<String>,
}

/// Maps a non-success response to the matching [`AppError`].
pub(crate) async fn error_from_response(service: &'static str, response: Response) -> AppError {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        return AppError::RateLimited {
            service,
            retry_after_secs: retry_after,
        };
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("Unable to read error body"));

    let message = serde_json::from_str::<UpstreamError>(&body)
        .ok()
        .and_then(|e| {
            e.message
                .or(e.error)
                .or_else(|| e.errors.into_iter().find_map(|item| item.message))
        })
        .unwrap_or_else(|| {
            format!(
                "HTTP {} - {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown error")
            )
        });

    AppError::ExternalService {
        service,
        status: status.as_u16(),
        message: truncate(&message, MAX_ERROR_MESSAGE_CHARS),
    }
}

/// Maps a transport failure (DNS, connect, timeout) to a retryable error.
pub(crate) fn connection_error(service: &'static str, e: reqwest::Error) -> AppError {
    AppError::ConnectionFailed(format!("{service} request failed: {e}"))
}

/// Redacts an identifier for logging (shows first 8 chars).
pub(crate) fn redact_id(id: &str) -> String {
    if id.chars().count() > 8 {
        format!("{}...", id.chars().take(8).collect::<String>())
    } else {
        id.to_string()
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}
