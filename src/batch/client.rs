//! External batch scheduler client.
//!
//! Submits one array job per project: the scheduler starts `size` parallel
//! tasks and hands each its array index, which matches a lead's ordinal.
//!
//! # Security
//!
//! - The bearer token is held as a `SecretString` and never logged
//! - Only method, path and status codes are logged

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::error::AppError;
use crate::http::{connection_error, endpoint_url, error_from_response, redact_id};

const SERVICE: &str = "batch scheduler";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Queue placement for submitted jobs.
#[derive(Debug, Clone)]
pub struct BatchJobSettings {
    pub job_name_prefix: String,
    pub job_queue: String,
    pub job_definition: String,
    pub share_identifier: String,
}

/// Parameters every array task receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobParameters {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArrayProperties {
    pub size: u32,
}

/// Request body for `POST /v1/submitjob`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    pub job_name: String,
    pub job_queue: String,
    pub job_definition: String,
    pub share_identifier: String,
    pub parameters: JobParameters,
    pub array_properties: ArrayProperties,
}

/// Scheduler acknowledgement of a submitted job.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubmittedJob {
    pub job_id: String,
    pub job_name: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// BatchScheduler Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Fire-and-forget submission of per-lead work. Failures are returned to the
/// caller and never retried here.
pub trait BatchScheduler: Send + Sync {
    fn submit<'a>(
        &'a self,
        project_id: &'a str,
        task_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<SubmittedJob, AppError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Client
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP batch scheduler client.
pub struct HttpBatchClient {
    client: Arc<Client>,
    endpoint: Url,
    token: Option<SecretString>,
    settings: BatchJobSettings,
}

impl HttpBatchClient {
    pub fn new(
        client: Arc<Client>,
        endpoint: Url,
        token: Option<SecretString>,
        settings: BatchJobSettings,
    ) -> Self {
        Self {
            client,
            endpoint,
            token,
            settings,
        }
    }

    /// Builds the submission body for a project.
    pub fn build_request(&self, project_id: &str, task_count: u32) -> SubmitJobRequest {
        SubmitJobRequest {
            job_name: format!("{}-{}", self.settings.job_name_prefix, project_id),
            job_queue: self.settings.job_queue.clone(),
            job_definition: self.settings.job_definition.clone(),
            share_identifier: self.settings.share_identifier.clone(),
            parameters: JobParameters {
                project_id: project_id.to_string(),
            },
            array_properties: ArrayProperties { size: task_count },
        }
    }

    /// Submits an array job with `task_count` tasks for the project.
    ///
    /// # Errors
    ///
    /// - `AppError::RateLimited` - Scheduler throttled the request
    /// - `AppError::ExternalService` - Scheduler rejected the request
    /// - `AppError::ConnectionFailed` - Network error
    pub async fn submit_job(
        &self,
        project_id: &str,
        task_count: u32,
    ) -> Result<SubmittedJob, AppError> {
        let url = endpoint_url(&self.endpoint, &["v1", "submitjob"])?;
        let body = self.build_request(project_id, task_count);

        info!(
            "[BATCH] POST /v1/submitjob (project {}, {} tasks)",
            redact_id(project_id),
            task_count
        );

        let mut request = self.client.post(url).json(&body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| connection_error(SERVICE, e))?;

        let status = response.status();
        info!("[BATCH] POST /v1/submitjob -> {}", status.as_u16());

        if !status.is_success() {
            return Err(error_from_response(SERVICE, response).await);
        }

        response.json::<SubmittedJob>().await.map_err(|e| AppError::ExternalService {
            service: SERVICE,
            status: status.as_u16(),
            message: format!("Failed to parse submission response: {e}"),
        })
    }
}

impl BatchScheduler for HttpBatchClient {
    fn submit<'a>(
        &'a self,
        project_id: &'a str,
        task_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<SubmittedJob, AppError>> + Send + 'a>> {
        Box::pin(self.submit_job(project_id, task_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> BatchJobSettings {
        BatchJobSettings {
            job_name_prefix: "leadflow".to_string(),
            job_queue: "render-queue".to_string(),
            job_definition: "render-def".to_string(),
            share_identifier: "share".to_string(),
        }
    }

    fn create_test_client(mock_url: &str, token: Option<&str>) -> HttpBatchClient {
        HttpBatchClient::new(
            Arc::new(Client::new()),
            Url::parse(mock_url).unwrap(),
            token.map(|t| SecretString::from(t.to_string())),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_submit_job_success() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), Some("batch_token"));

        let expected_body = serde_json::json!({
            "jobName": "leadflow-p-1",
            "jobQueue": "render-queue",
            "jobDefinition": "render-def",
            "shareIdentifier": "share",
            "parameters": { "projectId": "p-1" },
            "arrayProperties": { "size": 3 }
        });

        Mock::given(method("POST"))
            .and(path("/v1/submitjob"))
            .and(header("Authorization", "Bearer batch_token"))
            .and(body_json(&expected_body))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobId": "job-123",
                "jobName": "leadflow-p-1",
                "jobArn": "arn:ignored"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let job = client.submit("p-1", 3).await.unwrap();
        assert_eq!(
            job,
            SubmittedJob {
                job_id: "job-123".to_string(),
                job_name: "leadflow-p-1".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_submit_without_token_sends_no_auth() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), None);

        Mock::given(method("POST"))
            .and(path("/v1/submitjob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jobId": "job-1",
                "jobName": "leadflow-p"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        client.submit("p", 1).await.unwrap();

        let received = mock_server.received_requests().await.unwrap();
        assert!(received[0].headers.get("authorization").is_none());
    }

    #[tokio::test]
    async fn test_submit_rejected_is_not_retryable() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), None);

        Mock::given(method("POST"))
            .and(path("/v1/submitjob"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"message": "unknown job queue"})),
            )
            .mount(&mock_server)
            .await;

        let err = client.submit("p", 2).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unknown job queue"));
    }

    #[tokio::test]
    async fn test_submit_throttled_is_retryable() {
        let mock_server = MockServer::start().await;
        let client = create_test_client(&mock_server.uri(), None);

        Mock::given(method("POST"))
            .and(path("/v1/submitjob"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "5"))
            .mount(&mock_server)
            .await;

        let err = client.submit("p", 2).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::RateLimited {
                retry_after_secs: Some(5),
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_unreachable_scheduler_is_connection_failure() {
        // Nothing listens on the discard port
        let client = create_test_client("http://127.0.0.1:9", None);
        let err = client.submit("p", 1).await.unwrap_err();
        assert!(matches!(err, AppError::ConnectionFailed(_)));
    }
}
