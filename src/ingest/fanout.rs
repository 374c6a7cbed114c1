//! Ingestion and fan-out of a lead source.
//!
//! Turns one uploaded source into lead records, records the project's totals
//! and only then submits the per-lead batch job. Every step is safe to repeat
//! when the ingest message is redelivered.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::batch::BatchScheduler;
use crate::error::AppError;
use crate::http::redact_id;
use crate::ingest::rows::{parse_rows, ParsedSource, RowParseOptions, SourceRow};
use crate::ingest::source::SpreadsheetSource;
use crate::notify::{Aggregator, Finalization};
use crate::storage::database::current_timestamp;
use crate::storage::{LeadRow, RecordStore};

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

/// Instruction to ingest a registered project's lead source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub project_id: String,
    pub recipient: String,
    pub template_video_key: String,
    pub spreadsheet_key: String,
}

/// JSON handed to the external processor for one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPayload {
    pub lead_id: String,
    pub project_id: String,
    pub recipient: String,
    pub label: String,
    pub title: String,
    pub template_video_key: String,
    pub result_target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<String>,
}

/// Summary of one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub project_id: String,
    /// Rows seen, skipped ones included.
    pub total_rows: i64,
    pub skipped_rows: i64,
    /// Leads written by this attempt (zero on a full redelivery).
    pub leads_inserted: usize,
    pub batch_job_id: Option<String>,
    /// The project had already been ingested and submitted.
    pub duplicate: bool,
    pub finalization: Finalization,
}

/// Settings for turning rows into leads.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub parse: RowParseOptions,
    /// Prefix for each lead's artifact location.
    pub result_prefix: String,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            parse: RowParseOptions::default(),
            result_prefix: "results".to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestor
// ─────────────────────────────────────────────────────────────────────────────

/// Fans a lead source out into leads and one batch submission.
pub struct Ingestor {
    store: Arc<dyn RecordStore>,
    source: Arc<dyn SpreadsheetSource>,
    scheduler: Arc<dyn BatchScheduler>,
    aggregator: Arc<Aggregator>,
    options: IngestOptions,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn RecordStore>,
        source: Arc<dyn SpreadsheetSource>,
        scheduler: Arc<dyn BatchScheduler>,
        aggregator: Arc<Aggregator>,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            source,
            scheduler,
            aggregator,
            options,
        }
    }

    /// Ingests one project's lead source.
    ///
    /// Order matters: leads, then totals, then submission. The external job
    /// can therefore never report against a project whose total is unknown.
    pub async fn ingest(&self, request: &IngestRequest) -> Result<IngestReport, AppError> {
        let project = self.store.get_project(&request.project_id).await?;
        let pid = redact_id(&project.id);

        if let (Some(total), Some(job_id)) = (project.total_lead_count, &project.batch_job_id) {
            info!(project_id = %pid, "[INGEST] Already ingested, acknowledging redelivery");
            return Ok(IngestReport {
                project_id: project.id.clone(),
                total_rows: total,
                skipped_rows: project.skipped_lead_count,
                leads_inserted: 0,
                batch_job_id: Some(job_id.clone()),
                duplicate: true,
                finalization: Finalization::NotClaimed,
            });
        }

        let bytes = self.source.fetch(&request.spreadsheet_key).await?;
        let options = self.options.parse;
        let parsed = tokio::task::spawn_blocking(move || parse_rows(&bytes, &options))
            .await
            .map_err(|e| AppError::Internal(format!("Row parsing task failed: {e}")))??;

        info!(
            project_id = %pid,
            rows = parsed.total_rows,
            skipped = parsed.skipped_rows,
            "[INGEST] Lead source parsed"
        );

        let leads = self.build_leads(request, &parsed)?;
        let leads_inserted = self.store.insert_leads(&leads).await?;

        let recorded = self
            .store
            .record_ingestion(&project.id, parsed.total_rows, parsed.skipped_rows)
            .await?;

        let mut report = IngestReport {
            project_id: project.id.clone(),
            total_rows: parsed.total_rows,
            skipped_rows: parsed.skipped_rows,
            leads_inserted,
            batch_job_id: None,
            duplicate: false,
            finalization: Finalization::NotClaimed,
        };

        if parsed.rows.is_empty() {
            warn!(
                project_id = %pid,
                rows = parsed.total_rows,
                "[INGEST] No valid rows, nothing to submit"
            );
        } else {
            let task_count = u32::try_from(parsed.total_rows).map_err(|_| {
                AppError::InvalidRequest(format!("Too many rows: {}", parsed.total_rows))
            })?;
            let job = self.scheduler.submit(&project.id, task_count).await?;
            self.store.record_batch_job(&project.id, &job.job_id).await?;

            info!(
                project_id = %pid,
                job_id = %redact_id(&job.job_id),
                tasks = task_count,
                "[INGEST] Batch job submitted"
            );
            report.batch_job_id = Some(job.job_id);
        }

        // Nothing will ever report back for a project with no valid rows
        if recorded.is_complete() {
            report.finalization = self.aggregator.finalize(&project.id).await?;
        }

        Ok(report)
    }

    fn build_leads(
        &self,
        request: &IngestRequest,
        parsed: &ParsedSource,
    ) -> Result<Vec<LeadRow>, AppError> {
        let now = current_timestamp();
        parsed
            .rows
            .iter()
            .map(|row| self.build_lead(request, row, now))
            .collect()
    }

    fn build_lead(
        &self,
        request: &IngestRequest,
        row: &SourceRow,
        now: i64,
    ) -> Result<LeadRow, AppError> {
        let lead_id = Uuid::new_v4().to_string();
        let result_target = format!(
            "{}/{}/{}.mp4",
            self.options.result_prefix.trim_end_matches('/'),
            request.project_id,
            lead_id
        );

        let payload = LeadPayload {
            lead_id: lead_id.clone(),
            project_id: request.project_id.clone(),
            recipient: request.recipient.clone(),
            label: row.label.clone(),
            title: row.title.clone(),
            template_video_key: request.template_video_key.clone(),
            result_target: result_target.clone(),
            extra: row.extra.clone(),
        };
        let processing_payload = serde_json::to_string(&payload)
            .map_err(|e| AppError::Internal(format!("Failed to serialize lead payload: {e}")))?;

        Ok(LeadRow {
            id: lead_id,
            project_id: request.project_id.clone(),
            ordinal_index: row.ordinal_index,
            label: row.label.clone(),
            title: row.title.clone(),
            result_target,
            processing_payload,
            outcome: None,
            outcome_link: None,
            processed: false,
            created_at: now,
            updated_at: now,
        })
    }
}
