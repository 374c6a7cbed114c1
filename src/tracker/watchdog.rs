//! Stall detection for projects whose leads stopped reporting, and recovery
//! for complete projects whose report never went out.
//!
//! The watchdog never forces a project complete, because a late completion
//! event is still a valid one. A complete project left undelivered (a
//! permanently rejected send, or a crash while the claim was held) is offered
//! to the aggregator again.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::AppError;
use crate::http::redact_id;
use crate::notify::{Aggregator, Finalization};
use crate::storage::database::current_timestamp;
use crate::storage::{ProjectRow, RecordStore};

/// A project that has not progressed within the stall window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StalledProject {
    pub project_id: String,
    pub total_lead_count: i64,
    pub processed_lead_count: i64,
    pub skipped_lead_count: i64,
    pub idle_secs: i64,
}

impl StalledProject {
    /// Leads still waiting for a completion event.
    pub fn outstanding(&self) -> i64 {
        self.total_lead_count - self.processed_lead_count - self.skipped_lead_count
    }

    fn from_row(project: ProjectRow, now: i64) -> Self {
        Self {
            project_id: project.id,
            total_lead_count: project.total_lead_count.unwrap_or(0),
            processed_lead_count: project.processed_lead_count,
            skipped_lead_count: project.skipped_lead_count,
            idle_secs: now - project.updated_at,
        }
    }
}

/// Result of re-offering one undelivered project to the aggregator.
#[derive(Debug)]
pub struct Redelivery {
    pub project_id: String,
    pub result: Result<Finalization, AppError>,
}

/// Scans for projects with outstanding leads and no recent progress.
pub struct Watchdog {
    store: Arc<dyn RecordStore>,
    stall_after_secs: i64,
    aggregator: Option<Arc<Aggregator>>,
}

impl Watchdog {
    pub fn new(store: Arc<dyn RecordStore>, stall_after_secs: i64) -> Self {
        Self {
            store,
            stall_after_secs,
            aggregator: None,
        }
    }

    /// Enables [`Watchdog::redeliver`].
    pub fn with_aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Lists stalled projects and logs each one at warn level.
    pub async fn scan(&self) -> Result<Vec<StalledProject>, AppError> {
        let now = current_timestamp();
        let idle_since = now - self.stall_after_secs;

        let stalled: Vec<StalledProject> = self
            .store
            .list_stalled_projects(idle_since)
            .await?
            .into_iter()
            .map(|project| StalledProject::from_row(project, now))
            .collect();

        for project in &stalled {
            warn!(
                project_id = %redact_id(&project.project_id),
                total = project.total_lead_count,
                processed = project.processed_lead_count,
                skipped = project.skipped_lead_count,
                outstanding = project.outstanding(),
                idle_secs = project.idle_secs,
                "[TRACKER] Project stalled"
            );
        }

        info!("[TRACKER] Watchdog scan found {} stalled project(s)", stalled.len());
        Ok(stalled)
    }

    /// Re-runs finalization for complete projects idle past the stall window
    /// whose report is not delivered.
    ///
    /// One project failing does not stop the sweep; each result is returned.
    pub async fn redeliver(&self) -> Result<Vec<Redelivery>, AppError> {
        let aggregator = self.aggregator.as_ref().ok_or_else(|| {
            AppError::Config("report redelivery needs a configured mailer".to_string())
        })?;
        let idle_since = current_timestamp() - self.stall_after_secs;

        let mut results = Vec::new();
        for project in self.store.list_undelivered_projects(idle_since).await? {
            warn!(
                project_id = %redact_id(&project.id),
                state = project.notification_state.as_str(),
                "[TRACKER] Complete project has no delivered report, retrying"
            );
            let result = aggregator.finalize(&project.id).await;
            if let Err(e) = &result {
                error!(
                    project_id = %redact_id(&project.id),
                    "[TRACKER] Redelivery failed: {}",
                    e
                );
            }
            results.push(Redelivery {
                project_id: project.id,
                result,
            });
        }

        info!("[TRACKER] Redelivery sweep covered {} project(s)", results.len());
        Ok(results)
    }
}
