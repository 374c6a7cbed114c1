//! Process-wide state and component wiring.
//!
//! One database handle and one pooled HTTP client are created at startup and
//! shared by every component built from here.

use std::sync::Arc;

use reqwest::Client;

use crate::batch::{BatchJobSettings, BatchScheduler, HttpBatchClient};
use crate::config::Config;
use crate::error::AppError;
use crate::http::{build_http_client, parse_base_url};
use crate::ingest::{
    HttpSpreadsheetSource, IngestOptions, Ingestor, LocalSpreadsheetSource, RowParseOptions,
    SpreadsheetSource,
};
use crate::notify::{Aggregator, ReportArchive, SendGridNotifier};
use crate::project::{FolderProvisioner, ProjectRegistrar};
use crate::storage::{Database, RecordStore, SqliteStore};
use crate::tracker::{CompletionTracker, PassthroughPublisher, ResultPublisher, Watchdog};
use crate::video::VimeoClient;
use crate::worker::{Dispatcher, HandlerLimiter};

// ─────────────────────────────────────────────────────────────────────────────
// Application State
// ─────────────────────────────────────────────────────────────────────────────

pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub store: Arc<SqliteStore>,
    /// Shared connection pool for every outbound API.
    pub http: Arc<Client>,
}

impl AppState {
    /// Opens the database (running migrations) and builds the HTTP client.
    pub async fn init(config: Config) -> Result<Self, AppError> {
        let db = Arc::new(Database::init(config.database.path.clone()).await?);
        let http = build_http_client(&config.http)?;
        Ok(Self {
            store: Arc::new(SqliteStore::new(db.clone())),
            db,
            http,
            config,
        })
    }

    fn record_store(&self) -> Arc<dyn RecordStore> {
        self.store.clone()
    }

    /// The video host client, when one is configured.
    pub fn video_client(&self) -> Result<Option<Arc<VimeoClient>>, AppError> {
        let video = &self.config.video_host;
        let Some(api_base) = &video.api_base else {
            return Ok(None);
        };
        let token = video.token.as_ref().ok_or_else(|| {
            AppError::Config("video_host.token is required when api_base is set".to_string())
        })?;
        Ok(Some(Arc::new(VimeoClient::new(
            self.http.clone(),
            parse_base_url("video_host.api_base", api_base)?,
            token.to_secret_string(),
            parse_base_url("video_host.artifact_base_url", &video.artifact_base_url)?,
        ))))
    }

    pub fn registrar(&self) -> Result<ProjectRegistrar, AppError> {
        let folders = self
            .video_client()?
            .map(|client| client as Arc<dyn FolderProvisioner>);
        Ok(ProjectRegistrar::new(self.record_store(), folders))
    }

    pub fn watchdog(&self) -> Result<Watchdog, AppError> {
        let stall_after = i64::try_from(self.config.tracker.stall_after_secs)
            .map_err(|_| AppError::Config("tracker.stall_after_secs is too large".to_string()))?;
        Ok(Watchdog::new(self.record_store(), stall_after))
    }

    /// Builds the aggregator. Requires a mail API key.
    pub fn aggregator(&self) -> Result<Arc<Aggregator>, AppError> {
        let mail = &self.config.mail;
        let api_key = mail.api_key.as_ref().ok_or_else(|| {
            AppError::Config("mail.api_key (or LEADFLOW_MAIL_API_KEY) is required".to_string())
        })?;
        let notifier = SendGridNotifier::new(
            self.http.clone(),
            parse_base_url("mail.api_base", &mail.api_base)?,
            api_key.to_secret_string(),
            mail.from.clone(),
            mail.subject.clone(),
        );
        let archive = mail.archive_dir.clone().map(ReportArchive::new);
        let lease = i64::try_from(self.config.tracker.claim_lease_secs)
            .map_err(|_| AppError::Config("tracker.claim_lease_secs is too large".to_string()))?;

        Ok(Arc::new(Aggregator::new(
            self.record_store(),
            Arc::new(notifier),
            archive,
            lease,
        )))
    }

    fn spreadsheet_source(&self) -> Result<Arc<dyn SpreadsheetSource>, AppError> {
        let ingest = &self.config.ingest;
        let source: Arc<dyn SpreadsheetSource> = match &ingest.source_base_url {
            Some(base) => Arc::new(HttpSpreadsheetSource::new(
                self.http.clone(),
                parse_base_url("ingest.source_base_url", base)?,
                ingest.max_source_bytes,
            )),
            None => Arc::new(LocalSpreadsheetSource::new(ingest.source_dir.clone())),
        };
        Ok(source)
    }

    fn batch_scheduler(&self) -> Result<Arc<dyn BatchScheduler>, AppError> {
        let batch = &self.config.batch;
        Ok(Arc::new(HttpBatchClient::new(
            self.http.clone(),
            parse_base_url("batch.endpoint", &batch.endpoint)?,
            batch.token.as_ref().map(|t| t.to_secret_string()),
            BatchJobSettings {
                job_name_prefix: batch.job_name_prefix.clone(),
                job_queue: batch.job_queue.clone(),
                job_definition: batch.job_definition.clone(),
                share_identifier: batch.share_identifier.clone(),
            },
        )))
    }

    pub fn ingestor(&self, aggregator: Arc<Aggregator>) -> Result<Ingestor, AppError> {
        let ingest = &self.config.ingest;
        let delimiter = u8::try_from(ingest.delimiter).map_err(|_| {
            AppError::Config("ingest.delimiter must be a single ASCII character".to_string())
        })?;
        let options = IngestOptions {
            parse: RowParseOptions {
                delimiter,
                min_fields: ingest.min_fields,
            },
            result_prefix: ingest.result_prefix.clone(),
        };
        Ok(Ingestor::new(
            self.record_store(),
            self.spreadsheet_source()?,
            self.batch_scheduler()?,
            aggregator,
            options,
        ))
    }

    pub fn tracker(&self, aggregator: Arc<Aggregator>) -> Result<CompletionTracker, AppError> {
        let publisher: Arc<dyn ResultPublisher> = match self.video_client()? {
            Some(client) => client as Arc<dyn ResultPublisher>,
            None => Arc::new(PassthroughPublisher),
        };
        let lease = i64::try_from(self.config.tracker.claim_lease_secs)
            .map_err(|_| AppError::Config("tracker.claim_lease_secs is too large".to_string()))?;
        Ok(
            CompletionTracker::new(self.record_store(), publisher, aggregator)
                .with_publish_lease(lease),
        )
    }

    /// Wires the full message pipeline.
    pub fn dispatcher(&self) -> Result<Dispatcher, AppError> {
        let aggregator = self.aggregator()?;
        Ok(Dispatcher::new(
            Arc::new(self.ingestor(aggregator.clone())?),
            Arc::new(self.tracker(aggregator)?),
            HandlerLimiter::new(self.config.worker.max_concurrent)?,
        ))
    }
}
