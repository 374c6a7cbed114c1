//! Configuration for leadflow.
//!
//! Loaded from a TOML file; every section has defaults so a minimal file only
//! names the endpoints. Secrets may be supplied through the environment
//! instead of the file.

use std::fmt;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::AppError;

/// Environment variable overriding `batch.token`.
pub const ENV_BATCH_TOKEN: &str = "LEADFLOW_BATCH_TOKEN";
/// Environment variable overriding `video_host.token`.
pub const ENV_VIDEO_TOKEN: &str = "LEADFLOW_VIDEO_TOKEN";
/// Environment variable overriding `mail.api_key`.
pub const ENV_MAIL_API_KEY: &str = "LEADFLOW_MAIL_API_KEY";

// ============================================================================
// Secret
// ============================================================================

/// A credential read from config or the environment. Never printed.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Hands the value to a client as a [`SecretString`].
    pub fn to_secret_string(&self) -> SecretString {
        SecretString::from(self.0.clone())
    }

    fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub video_host: VideoHostConfig,
    #[serde(default)]
    pub mail: MailConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// SQLite location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("leadflow.db"),
        }
    }
}

/// Lead source parsing and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Field separator; must be a single ASCII character
    pub delimiter: char,
    /// Leading fields that must be non-empty for a row to become a lead
    pub min_fields: usize,
    /// Download cap for remote lead sources
    pub max_source_bytes: u64,
    /// Prefix under which each lead's rendered artifact is deposited
    pub result_prefix: String,
    /// Directory holding uploaded sources (used when no base URL is set)
    pub source_dir: PathBuf,
    /// Fetch sources over HTTP from this base instead of `source_dir`
    pub source_base_url: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            delimiter: ',',
            min_fields: 2,
            max_source_bytes: 50 * 1024 * 1024,
            result_prefix: "results".to_string(),
            source_dir: PathBuf::from("uploads"),
            source_base_url: None,
        }
    }
}

/// External batch scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub endpoint: String,
    pub job_name_prefix: String,
    pub job_queue: String,
    pub job_definition: String,
    pub share_identifier: String,
    pub token: Option<Secret>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            job_name_prefix: "leadflow".to_string(),
            job_queue: "leadflow-queue".to_string(),
            job_definition: "leadflow-render".to_string(),
            share_identifier: "leadflow".to_string(),
            token: None,
        }
    }
}

/// Video host used for result publishing. Disabled when `api_base` is unset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoHostConfig {
    pub api_base: Option<String>,
    pub token: Option<Secret>,
    /// Public base the host pulls rendered artifacts from
    pub artifact_base_url: String,
}

impl Default for VideoHostConfig {
    fn default() -> Self {
        Self {
            api_base: None,
            token: None,
            artifact_base_url: "http://127.0.0.1:9000".to_string(),
        }
    }
}

/// Report delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub api_base: String,
    pub api_key: Option<Secret>,
    pub from: String,
    pub subject: String,
    /// When set, every delivered report is also written to `<dir>/<project>.csv`
    pub archive_dir: Option<PathBuf>,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.sendgrid.com".to_string(),
            api_key: None,
            from: "reports@leadflow.local".to_string(),
            subject: "Processed Leads".to_string(),
            archive_dir: None,
        }
    }
}

/// Completion tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Age after which a held notification claim may be taken over
    pub claim_lease_secs: u64,
    /// Idle time after which an incomplete project is reported as stalled
    pub stall_after_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            claim_lease_secs: 300,
            stall_after_secs: 6 * 60 * 60,
        }
    }
}

/// Message worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub max_concurrent: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { max_concurrent: 8 }
    }
}

/// Shared HTTP client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            user_agent: format!("leadflow/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Loads configuration from a TOML file, applies environment secrets and
    /// validates the result.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file '{}': {e}", path.display()))
        })?;
        let mut config = Self::from_toml(&content).map_err(|e| match e {
            AppError::Config(msg) => {
                AppError::Config(format!("Failed to parse config file '{}': {msg}", path.display()))
            }
            other => other,
        })?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parses TOML without touching the environment or validating.
    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        toml::from_str(content).map_err(|e| AppError::Config(e.to_string()))
    }

    /// Overrides secrets from the environment. `lookup` is injected so tests
    /// need not mutate process state.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|v| !v.trim().is_empty()).map(Secret::new);

        if let Some(token) = read(ENV_BATCH_TOKEN) {
            self.batch.token = Some(token);
        }
        if let Some(token) = read(ENV_VIDEO_TOKEN) {
            self.video_host.token = Some(token);
        }
        if let Some(key) = read(ENV_MAIL_API_KEY) {
            self.mail.api_key = Some(key);
        }
    }

    /// Validates every field and reports all problems together.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors: Vec<String> = Vec::new();

        if self.database.path.as_os_str().is_empty() {
            errors.push("database.path must not be empty".to_string());
        }

        // Ingest
        if !self.ingest.delimiter.is_ascii() {
            errors.push("ingest.delimiter must be a single ASCII character".to_string());
        }
        // Label and title are read from the first two columns
        if self.ingest.min_fields < 2 {
            errors.push("ingest.min_fields must be at least 2".to_string());
        }
        if self.ingest.max_source_bytes == 0 {
            errors.push("ingest.max_source_bytes must be positive".to_string());
        }
        if let Some(base) = &self.ingest.source_base_url {
            check_url(&mut errors, "ingest.source_base_url", base);
        } else if self.ingest.source_dir.as_os_str().is_empty() {
            errors.push("ingest.source_dir must be set when no source_base_url is given".to_string());
        }

        // Batch
        check_url(&mut errors, "batch.endpoint", &self.batch.endpoint);
        for (name, value) in [
            ("batch.job_name_prefix", &self.batch.job_name_prefix),
            ("batch.job_queue", &self.batch.job_queue),
            ("batch.job_definition", &self.batch.job_definition),
        ] {
            if value.trim().is_empty() {
                errors.push(format!("{name} must not be empty"));
            }
        }
        if self.batch.token.as_ref().is_some_and(Secret::is_blank) {
            errors.push("batch.token must not be blank".to_string());
        }

        // Video host
        if let Some(base) = &self.video_host.api_base {
            check_url(&mut errors, "video_host.api_base", base);
            check_url(
                &mut errors,
                "video_host.artifact_base_url",
                &self.video_host.artifact_base_url,
            );
            if self.video_host.token.is_none() {
                errors.push(format!(
                    "video_host.token (or {ENV_VIDEO_TOKEN}) is required when video_host.api_base is set"
                ));
            }
        }

        // Mail
        check_url(&mut errors, "mail.api_base", &self.mail.api_base);
        if !self.mail.from.contains('@') {
            errors.push("mail.from must be an email address".to_string());
        }
        if self.mail.subject.trim().is_empty() {
            errors.push("mail.subject must not be empty".to_string());
        }

        // Tracker / worker / http
        if self.tracker.claim_lease_secs == 0 {
            errors.push("tracker.claim_lease_secs must be positive".to_string());
        }
        if self.tracker.stall_after_secs == 0 {
            errors.push("tracker.stall_after_secs must be positive".to_string());
        }
        if self.worker.max_concurrent == 0 {
            errors.push("worker.max_concurrent must be positive".to_string());
        }
        if self.http.timeout_secs == 0 {
            errors.push("http.timeout_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn check_url(errors: &mut Vec<String>, name: &str, value: &str) {
    match Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(format!("{name} must be http(s), got scheme '{}'", url.scheme())),
        Err(e) => errors.push(format!("{name} is not a valid URL: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        Config::default().validate().expect("defaults should validate");
    }

    #[test]
    fn test_minimal_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [batch]
            endpoint = "https://batch.internal"

            [ingest]
            delimiter = ";"
            "#,
        )
        .unwrap();

        assert_eq!(config.batch.endpoint, "https://batch.internal");
        assert_eq!(config.batch.job_queue, "leadflow-queue");
        assert_eq!(config.ingest.delimiter, ';');
        assert_eq!(config.ingest.min_fields, 2);
        assert_eq!(config.mail.subject, "Processed Leads");
        assert_eq!(config.logging.format, LogFormat::Text);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = Config::default();
        config.ingest.min_fields = 0;
        config.batch.endpoint = "not a url".to_string();
        config.worker.max_concurrent = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ingest.min_fields"));
        assert!(err.contains("batch.endpoint"));
        assert!(err.contains("worker.max_concurrent"));
    }

    #[test]
    fn test_min_fields_must_cover_label_and_title() {
        let mut config = Config::default();
        config.ingest.min_fields = 1;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("ingest.min_fields must be at least 2"));

        config.ingest.min_fields = 2;
        config.validate().unwrap();
    }

    #[test]
    fn test_video_host_requires_token() {
        let mut config = Config::default();
        config.video_host.api_base = Some("https://api.vimeo.com".to_string());

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("video_host.token"));

        config.video_host.token = Some(Secret::new("tok"));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_secrets() {
        let env: HashMap<&str, &str> = [
            (ENV_BATCH_TOKEN, "batch-secret"),
            (ENV_MAIL_API_KEY, "SG.key"),
            (ENV_VIDEO_TOKEN, "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.batch.token, Some(Secret::new("batch-secret")));
        assert_eq!(config.mail.api_key, Some(Secret::new("SG.key")));
        // Blank values are ignored
        assert!(config.video_host.token.is_none());
    }

    #[test]
    fn test_secrets_are_redacted_in_debug() {
        let mut config = Config::default();
        config.mail.api_key = Some(Secret::new("SG.super-secret"));

        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("leadflow.toml");
        std::fs::write(&path, "[worker]\nmax_concurrent = 3\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.worker.max_concurrent, 3);

        let missing = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(missing, AppError::Config(_)));
    }
}
