//! Report delivery over the SendGrid v3 mail API.
//!
//! # Security
//!
//! - The API key is held as a `SecretString` and never logged
//! - Recipient addresses and report contents are never logged

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::{info, warn};
use url::Url;

use crate::error::AppError;
use crate::http::{connection_error, endpoint_url, error_from_response, redact_id};
use crate::notify::report::REPORT_FILE_NAME;

const SERVICE: &str = "mail";

/// Body text sent with every report.
const REPORT_BODY: &str =
    "Hello, please find attached a CSV with the links to the processed lead videos.";

/// A rendered report addressed to a project's recipient.
#[derive(Debug, Clone)]
pub struct ReportEmail {
    pub project_id: String,
    pub recipient: String,
    pub csv: Vec<u8>,
}

/// Delivers completion reports.
pub trait Notifier: Send + Sync {
    fn send_report<'a>(
        &'a self,
        email: &'a ReportEmail,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// SendGrid Payload
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MailAddress<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct Personalization<'a> {
    to: Vec<MailAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct MailContent<'a> {
    #[serde(rename = "type")]
    content_type: &'a str,
    value: &'a str,
}

#[derive(Debug, Serialize)]
struct MailAttachment<'a> {
    content: String,
    filename: &'a str,
    #[serde(rename = "type")]
    content_type: &'a str,
    disposition: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMailRequest<'a> {
    personalizations: Vec<Personalization<'a>>,
    from: MailAddress<'a>,
    subject: &'a str,
    content: Vec<MailContent<'a>>,
    attachments: Vec<MailAttachment<'a>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// SendGrid Client
// ─────────────────────────────────────────────────────────────────────────────

/// SendGrid v3 mail client.
pub struct SendGridNotifier {
    client: Arc<Client>,
    api_base: Url,
    api_key: SecretString,
    from: String,
    subject: String,
}

impl SendGridNotifier {
    pub fn new(
        client: Arc<Client>,
        api_base: Url,
        api_key: SecretString,
        from: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            client,
            api_base,
            api_key,
            from: from.into(),
            subject: subject.into(),
        }
    }

    /// Sends the report as a CSV attachment.
    ///
    /// Only `202 Accepted` counts as delivered; any other success status is
    /// treated as a retryable upstream failure.
    pub async fn send(&self, email: &ReportEmail) -> Result<(), AppError> {
        let url = endpoint_url(&self.api_base, &["v3", "mail", "send"])?;

        let body = SendMailRequest {
            personalizations: vec![Personalization {
                to: vec![MailAddress {
                    email: &email.recipient,
                }],
            }],
            from: MailAddress { email: &self.from },
            subject: &self.subject,
            content: vec![MailContent {
                content_type: "text/plain",
                value: REPORT_BODY,
            }],
            attachments: vec![MailAttachment {
                content: BASE64.encode(&email.csv),
                filename: REPORT_FILE_NAME,
                content_type: "text/csv",
                disposition: "attachment",
            }],
        };

        info!(
            "[NOTIFY] POST /v3/mail/send (project {}, {} byte report)",
            redact_id(&email.project_id),
            email.csv.len()
        );

        let response = self
            .client
            .post(url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| connection_error(SERVICE, e))?;

        let status = response.status();
        info!("[NOTIFY] POST /v3/mail/send -> {}", status.as_u16());

        if status == StatusCode::ACCEPTED {
            return Ok(());
        }
        if status.is_success() {
            warn!(
                "[NOTIFY] Mail API answered {} instead of 202 for project {}",
                status.as_u16(),
                redact_id(&email.project_id)
            );
            return Err(AppError::ExternalService {
                service: SERVICE,
                status: 502,
                message: format!("Unexpected status {}", status.as_u16()),
            });
        }

        Err(error_from_response(SERVICE, response).await)
    }
}

impl Notifier for SendGridNotifier {
    fn send_report<'a>(
        &'a self,
        email: &'a ReportEmail,
    ) -> Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'a>> {
        Box::pin(self.send(email))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_notifier(mock_url: &str) -> SendGridNotifier {
        SendGridNotifier::new(
            Arc::new(Client::new()),
            Url::parse(mock_url).unwrap(),
            SecretString::from("SG.test_key".to_string()),
            "reports@example.com",
            "Processed Leads",
        )
    }

    fn email() -> ReportEmail {
        ReportEmail {
            project_id: "p-1".to_string(),
            recipient: "owner@example.com".to_string(),
            csv: b"lead_id,title,outcome_link\n".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_send_report_success() {
        let mock_server = MockServer::start().await;
        let notifier = create_test_notifier(&mock_server.uri());

        let expected = serde_json::json!({
            "personalizations": [{ "to": [{ "email": "owner@example.com" }] }],
            "from": { "email": "reports@example.com" },
            "subject": "Processed Leads",
            "attachments": [{
                "content": BASE64.encode(b"lead_id,title,outcome_link\n"),
                "filename": "processed_leads.csv",
                "type": "text/csv",
                "disposition": "attachment"
            }]
        });

        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("Authorization", "Bearer SG.test_key"))
            .and(body_partial_json(&expected))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        notifier.send_report(&email()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_202_success_is_not_delivered() {
        let mock_server = MockServer::start().await;
        let notifier = create_test_notifier(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&mock_server)
            .await;

        let err = notifier.send_report(&email()).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_rejected_address_is_permanent() {
        let mock_server = MockServer::start().await;
        let notifier = create_test_notifier(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "errors": [{ "message": "Does not contain a valid address.", "field": "personalizations.0.to.0.email" }]
            })))
            .mount(&mock_server)
            .await;

        let err = notifier.send_report(&email()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("valid address"));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mock_server = MockServer::start().await;
        let notifier = create_test_notifier(&mock_server.uri());

        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let err = notifier.send_report(&email()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
