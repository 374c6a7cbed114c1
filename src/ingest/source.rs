//! Retrieval of uploaded lead sources.

use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::Client;
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::http::{connection_error, endpoint_url, error_from_response, redact_id};

const SERVICE: &str = "lead source";

/// Reads the raw bytes of an uploaded lead source by storage key.
pub trait SpreadsheetSource: Send + Sync {
    fn fetch<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, AppError>> + Send + 'a>>;
}

/// Rejects keys that could escape the storage root.
fn validate_key(key: &str) -> Result<(), AppError> {
    if key.trim().is_empty() {
        return Err(AppError::InvalidRequest("Lead source key is empty".to_string()));
    }
    let escapes = Path::new(key)
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(AppError::InvalidRequest(format!(
            "Lead source key '{key}' must be a relative path without '..'"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Local Directory
// ─────────────────────────────────────────────────────────────────────────────

/// Lead sources stored under a local directory.
#[derive(Debug, Clone)]
pub struct LocalSpreadsheetSource {
    root: PathBuf,
}

impl LocalSpreadsheetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SpreadsheetSource for LocalSpreadsheetSource {
    fn fetch<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, AppError>> + Send + 'a>> {
        Box::pin(async move {
            validate_key(key)?;
            let path = self.root.join(key);
            tokio::fs::read(&path).await.map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    AppError::NotFound(format!("lead source {}", redact_id(key)))
                }
                _ => AppError::Internal(format!("Failed to read lead source: {e}")),
            })
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// Lead sources served over HTTP, downloaded with a size cap.
#[derive(Debug, Clone)]
pub struct HttpSpreadsheetSource {
    client: Arc<Client>,
    base_url: Url,
    max_bytes: u64,
}

impl HttpSpreadsheetSource {
    pub fn new(client: Arc<Client>, base_url: Url, max_bytes: u64) -> Self {
        Self {
            client,
            base_url,
            max_bytes,
        }
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>, AppError> {
        validate_key(key)?;
        let segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
        let url = endpoint_url(&self.base_url, &segments)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| connection_error(SERVICE, e))?;

        let status = response.status();
        info!("[INGEST] GET source {} -> {}", redact_id(key), status.as_u16());

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("lead source {}", redact_id(key))));
        }
        if !status.is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }

        if response.content_length().is_some_and(|len| len > self.max_bytes) {
            return Err(AppError::SourceTooLarge {
                limit: self.max_bytes,
            });
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| {
                AppError::ConnectionFailed(format!("Error reading lead source stream: {e}"))
            })?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(AppError::SourceTooLarge {
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body)
    }
}

impl SpreadsheetSource for HttpSpreadsheetSource {
    fn fetch<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<u8>, AppError>> + Send + 'a>> {
        Box::pin(self.download(key))
    }
}
