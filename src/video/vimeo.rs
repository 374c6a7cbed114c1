//! Vimeo API client for result publishing and per-project folders.
//!
//! Videos are created with the pull approach: Vimeo fetches the rendered
//! artifact from its public URL, so no video bytes pass through this process.
//!
//! # Security
//!
//! - The access token is held as a `SecretString` and never logged
//! - Only method, path and status codes are logged

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::header::ACCEPT;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::http::{connection_error, endpoint_url, error_from_response, redact_id};
use crate::project::FolderProvisioner;
use crate::tracker::{PublishRequest, ResultPublisher};

const SERVICE: &str = "video host";

/// Media type Vimeo expects in the Accept header.
const VIMEO_ACCEPT: &str = "application/vnd.vimeo.*+json";

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct PullUpload<'a> {
    approach: &'a str,
    link: String,
}

#[derive(Debug, Serialize)]
struct Privacy<'a> {
    view: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateVideoRequest<'a> {
    upload: PullUpload<'a>,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    folder_uri: Option<&'a str>,
    privacy: Privacy<'a>,
}

/// Video created by a pull upload.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedVideo {
    pub uri: String,
    /// Public page of the video; absent if the host did not assign one.
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateFolderRequest<'a> {
    name: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatedFolder {
    pub uri: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// Vimeo API client.
pub struct VimeoClient {
    client: Arc<Client>,
    api_base: Url,
    token: SecretString,
    /// Public base the rendered artifacts are served from.
    artifact_base: Url,
}

impl VimeoClient {
    pub fn new(client: Arc<Client>, api_base: Url, token: SecretString, artifact_base: Url) -> Self {
        Self {
            client,
            api_base,
            token,
            artifact_base,
        }
    }

    /// Public URL Vimeo pulls an artifact from.
    pub fn artifact_url(&self, result_ref: &str) -> Result<Url, AppError> {
        let segments: Vec<&str> = result_ref.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() || segments.contains(&"..") {
            return Err(AppError::InvalidRequest(format!(
                "Result reference '{result_ref}' is not a valid artifact path"
            )));
        }
        endpoint_url(&self.artifact_base, &segments)
    }

    /// Creates an unlisted video pulled from the artifact and returns its link.
    ///
    /// # Errors
    ///
    /// - `AppError::ExternalService` - API error, or a response without a link
    /// - `AppError::RateLimited` - Rate limit exceeded
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn create_video(&self, request: &PublishRequest) -> Result<String, AppError> {
        let url = endpoint_url(&self.api_base, &["me", "videos"])?;

        let body = CreateVideoRequest {
            upload: PullUpload {
                approach: "pull",
                link: self.artifact_url(&request.result_ref)?.to_string(),
            },
            name: &request.title,
            folder_uri: request.folder_uri.as_deref(),
            privacy: Privacy { view: "unlisted" },
        };

        info!("[VIDEO] POST /me/videos (lead {})", redact_id(&request.lead_id));

        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .header(ACCEPT, VIMEO_ACCEPT)
            .json(&body)
            .send()
            .await
            .map_err(|e| connection_error(SERVICE, e))?;

        let status = response.status();
        info!("[VIDEO] POST /me/videos -> {}", status.as_u16());

        if !status.is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }

        let video: CreatedVideo = response.json().await.map_err(|e| AppError::ExternalService {
            service: SERVICE,
            status: status.as_u16(),
            message: format!("Failed to parse video response: {e}"),
        })?;

        match video.link {
            Some(link) if !link.trim().is_empty() => Ok(link),
            _ => Err(AppError::ExternalService {
                service: SERVICE,
                status: status.as_u16(),
                message: format!("Video {} was created without a link", video.uri),
            }),
        }
    }

    /// Creates a folder and returns its URI.
    pub async fn create_folder(&self, name: &str) -> Result<String, AppError> {
        let url = endpoint_url(&self.api_base, &["me", "projects"])?;

        info!("[VIDEO] POST /me/projects");

        let response = self
            .client
            .post(url)
            .bearer_auth(self.token.expose_secret())
            .header(ACCEPT, VIMEO_ACCEPT)
            .json(&CreateFolderRequest { name })
            .send()
            .await
            .map_err(|e| connection_error(SERVICE, e))?;

        let status = response.status();
        info!("[VIDEO] POST /me/projects -> {}", status.as_u16());

        if !status.is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }

        let folder: CreatedFolder = response.json().await.map_err(|e| AppError::ExternalService {
            service: SERVICE,
            status: status.as_u16(),
            message: format!("Failed to parse folder response: {e}"),
        })?;

        Ok(folder.uri)
    }
}

impl ResultPublisher for VimeoClient {
    fn publish<'a>(
        &'a self,
        request: &'a PublishRequest,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(self.create_video(request))
    }
}

impl FolderProvisioner for VimeoClient {
    fn provision_folder<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>> {
        Box::pin(self.create_folder(name))
    }
}
