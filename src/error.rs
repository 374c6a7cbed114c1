use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for callers.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "api_key",
    "apikey",
    "access_token",
    "authorization:",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for an ingress response.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// Response body returned to the synchronous ingress caller.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub title: String,
    pub message: String,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Storage ───────────────────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ── Data / Messages ───────────────────────────────────────────────────────
    #[error("Unknown lead: {0}")]
    UnknownLead(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Already in progress: {0}")]
    InProgress(String),

    // ── Lead Source ───────────────────────────────────────────────────────────
    #[error("Lead source is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid lead source: {0}")]
    CsvInvalid(String),

    #[error("Lead source exceeds {limit} bytes")]
    SourceTooLarge { limit: u64 },

    // ── External Services ─────────────────────────────────────────────────────
    #[error("{service} returned HTTP {status}: {message}")]
    ExternalService {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {service}")]
    RateLimited {
        service: &'static str,
        retry_after_secs: Option<u64>,
    },

    // ── Network ───────────────────────────────────────────────────────────────
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether redelivering the message that produced this error can succeed.
    ///
    /// Transient failures (store, network, throttling, upstream 5xx) are
    /// retried by the transport. Data errors and client-side rejections are
    /// permanent and the message is discarded.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Storage(_)
            | AppError::ConnectionFailed(_)
            | AppError::RateLimited { .. }
            | AppError::InProgress(_)
            | AppError::Internal(_) => true,

            AppError::ExternalService { status, .. } => *status >= 500,

            AppError::NotFound(_)
            | AppError::UnknownLead(_)
            | AppError::MalformedMessage(_)
            | AppError::InvalidRequest(_)
            | AppError::NotUtf8
            | AppError::CsvInvalid(_)
            | AppError::SourceTooLarge { .. }
            | AppError::Config(_) => false,
        }
    }

    /// Converts the error into a response for the ingress caller.
    /// Never leaks API keys, tokens, or authorization headers.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            AppError::InvalidRequest(msg) => ErrorResponse {
                status: 400,
                title: "Invalid Request".into(),
                message: sanitize_message(msg, "The request was rejected."),
            },

            AppError::NotFound(msg) => ErrorResponse {
                status: 404,
                title: "Not Found".into(),
                message: sanitize_message(msg, "The requested record does not exist."),
            },

            AppError::InProgress(_) => ErrorResponse {
                status: 409,
                title: "In Progress".into(),
                message: "Another handler is working on this record. Please retry.".into(),
            },

            AppError::RateLimited {
                retry_after_secs, ..
            } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorResponse {
                    status: 429,
                    title: "Too Many Requests".into(),
                    message: format!("An upstream service is limiting requests. {}", wait_msg),
                }
            }

            AppError::ExternalService { service, .. } => ErrorResponse {
                status: 502,
                title: "Upstream Error".into(),
                message: format!("{} could not complete the request.", service),
            },

            AppError::ConnectionFailed(_) => ErrorResponse {
                status: 503,
                title: "Service Unavailable".into(),
                message: "An upstream service could not be reached. Please retry.".into(),
            },

            _ => ErrorResponse {
                status: 500,
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_variants() -> Vec<AppError> {
        vec![
            AppError::Storage("database is locked".into()),
            AppError::NotFound("project p-1".into()),
            AppError::UnknownLead("lead-1".into()),
            AppError::MalformedMessage("missing leadId".into()),
            AppError::InvalidRequest("bad extension".into()),
            AppError::InProgress("lead-1".into()),
            AppError::NotUtf8,
            AppError::CsvInvalid("unterminated quote".into()),
            AppError::SourceTooLarge { limit: 10 },
            AppError::ExternalService {
                service: "mail",
                status: 503,
                message: "unavailable".into(),
            },
            AppError::RateLimited {
                service: "batch",
                retry_after_secs: Some(30),
            },
            AppError::ConnectionFailed("timeout".into()),
            AppError::Config("missing endpoint".into()),
            AppError::Internal("join error".into()),
        ]
    }

    #[test]
    fn all_variants_have_nonempty_response() {
        for variant in all_variants() {
            let response = variant.to_response();
            assert!(!response.title.trim().is_empty(), "Empty title for {:?}", variant);
            assert!(!response.message.trim().is_empty(), "Empty message for {:?}", variant);
            assert!(response.status >= 400, "Non-error status for {:?}", variant);
        }
    }

    #[test]
    fn transient_errors_are_retryable() {
        let transient = vec![
            AppError::Storage("busy".into()),
            AppError::ConnectionFailed("reset".into()),
            AppError::InProgress("lead publish".into()),
            AppError::RateLimited {
                service: "mail",
                retry_after_secs: None,
            },
            AppError::ExternalService {
                service: "video host",
                status: 502,
                message: "bad gateway".into(),
            },
        ];

        for variant in transient {
            assert!(variant.is_retryable(), "{:?} should be retryable", variant);
        }
    }

    #[test]
    fn data_errors_are_not_retryable() {
        let permanent = vec![
            AppError::UnknownLead("lead-x".into()),
            AppError::MalformedMessage("not json".into()),
            AppError::InvalidRequest("no recipient".into()),
            AppError::NotUtf8,
            AppError::ExternalService {
                service: "mail",
                status: 400,
                message: "invalid address".into(),
            },
        ];

        for variant in permanent {
            assert!(!variant.is_retryable(), "{:?} should not be retryable", variant);
        }
    }

    #[test]
    fn invalid_request_maps_to_400_with_message() {
        let response = AppError::InvalidRequest("unsupported video type .avi".into()).to_response();
        assert_eq!(response.status, 400);
        assert!(response.message.contains(".avi"));
    }

    #[test]
    fn rate_limited_mentions_retry_time() {
        let response = AppError::RateLimited {
            service: "batch",
            retry_after_secs: Some(30),
        }
        .to_response();
        assert_eq!(response.status, 429);
        assert!(response.message.contains("30"));
    }

    #[test]
    fn response_serializes_with_required_fields() {
        let json = serde_json::to_value(AppError::NotUtf8.to_response()).unwrap();
        assert!(json.get("status").is_some());
        assert!(json.get("title").is_some());
        assert!(json.get("message").is_some());
    }

    #[test]
    fn no_secret_leakage_in_response() {
        let test_cases: Vec<(&str, AppError)> = vec![
            ("InvalidRequest", AppError::InvalidRequest("Bearer abc123".into())),
            ("NotFound", AppError::NotFound("api_key=SG.secret".into())),
            ("ConnectionFailed", AppError::ConnectionFailed("access_token=xyz".into())),
            ("Internal", AppError::Internal("Authorization: Bearer t".into())),
        ];

        for (label, variant) in test_cases {
            let response = variant.to_response();
            let output_lower = format!("{} {}", response.title, response.message).to_ascii_lowercase();

            for pattern in SENSITIVE_PATTERNS {
                assert!(
                    !output_lower.contains(pattern),
                    "{} response contains sensitive pattern",
                    label
                );
            }
        }
    }
}
