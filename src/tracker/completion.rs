//! Per-lead completion tracking.
//!
//! Each completion event records one lead's outcome and counts it on the
//! project exactly once, no matter how often the transport redelivers it.
//! The event that completes a project hands it to the [`Aggregator`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::http::redact_id;
use crate::notify::{Aggregator, Finalization};
use crate::storage::{
    LeadOutcome, LeadRow, NotificationState, OutcomeRecord, PublishClaim, RecordStore,
};
use crate::tracker::publisher::{PublishRequest, ResultPublisher};

/// Outcome link recorded for a lead whose processing failed.
pub const FAILURE_MARKER: &str = "Failed to Process";

/// Seconds a publish lease is honoured before another handler may take it.
pub const DEFAULT_PUBLISH_LEASE_SECS: i64 = 300;

/// Report from the external processor about one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub lead_id: String,
    pub success: bool,
    /// Artifact reference; required when `success` is true.
    #[serde(default)]
    pub result_ref: Option<String>,
    /// Echoed recipient. The project's stored recipient is authoritative.
    #[serde(default)]
    pub recipient: Option<String>,
    /// Folder to publish into; falls back to the project's folder.
    #[serde(default)]
    pub folder_uri: Option<String>,
}

/// What handling one completion event did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The outcome was recorded and counted by this event.
    Recorded {
        project_id: String,
        processed_lead_count: i64,
        total_lead_count: Option<i64>,
        finalization: Finalization,
    },
    /// The lead already had an outcome; nothing was counted.
    Duplicate {
        project_id: String,
        finalization: Finalization,
    },
}

/// Applies completion events to the record store.
pub struct CompletionTracker {
    store: Arc<dyn RecordStore>,
    publisher: Arc<dyn ResultPublisher>,
    aggregator: Arc<Aggregator>,
    publish_lease_secs: i64,
}

impl CompletionTracker {
    pub fn new(
        store: Arc<dyn RecordStore>,
        publisher: Arc<dyn ResultPublisher>,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            store,
            publisher,
            aggregator,
            publish_lease_secs: DEFAULT_PUBLISH_LEASE_SECS,
        }
    }

    pub fn with_publish_lease(mut self, lease_secs: i64) -> Self {
        self.publish_lease_secs = lease_secs;
        self
    }

    /// Handles one completion event.
    ///
    /// # Errors
    ///
    /// - `AppError::UnknownLead` - no such lead (permanent, discard)
    /// - `AppError::MalformedMessage` - success without a result reference
    /// - `AppError::InProgress` - another handler is publishing this lead
    /// - transient store, publish or delivery failures (retry by redelivery)
    pub async fn handle(&self, event: &CompletionEvent) -> Result<CompletionOutcome, AppError> {
        let result_ref = match (event.success, event.result_ref.as_deref()) {
            (true, Some(r)) if !r.trim().is_empty() => Some(r),
            (true, _) => {
                return Err(AppError::MalformedMessage(format!(
                    "Successful completion for lead {} has no resultRef",
                    redact_id(&event.lead_id)
                )))
            }
            (false, _) => None,
        };

        let lead = self
            .store
            .get_lead(&event.lead_id)
            .await?
            .ok_or_else(|| AppError::UnknownLead(redact_id(&event.lead_id)))?;

        if lead.processed {
            info!(
                lead_id = %redact_id(&lead.id),
                project_id = %redact_id(&lead.project_id),
                "[TRACKER] Duplicate completion ignored"
            );
            return self.duplicate(lead.project_id).await;
        }

        let (outcome, link) = match result_ref {
            Some(result_ref) => {
                let token = Uuid::new_v4().to_string();
                match self
                    .store
                    .try_claim_publish(&lead.id, &token, self.publish_lease_secs)
                    .await?
                {
                    PublishClaim::Acquired => {
                        self.publish(&lead, event, result_ref, &token).await?
                    }
                    PublishClaim::AlreadyPublished(link) => {
                        info!(
                            lead_id = %redact_id(&lead.id),
                            "[TRACKER] Reusing link from an earlier publish"
                        );
                        (LeadOutcome::Succeeded, link)
                    }
                    PublishClaim::Processed => return self.duplicate(lead.project_id).await,
                    PublishClaim::HeldElsewhere => {
                        return Err(AppError::InProgress(format!(
                            "lead {} is being published",
                            redact_id(&lead.id)
                        )))
                    }
                }
            }
            None => (LeadOutcome::Failed, FAILURE_MARKER.to_string()),
        };

        match self
            .store
            .record_lead_outcome(&lead.id, outcome, &link)
            .await?
        {
            OutcomeRecord::Recorded(project) => {
                info!(
                    lead_id = %redact_id(&lead.id),
                    project_id = %redact_id(&project.id),
                    outcome = outcome.as_str(),
                    processed = project.processed_lead_count,
                    skipped = project.skipped_lead_count,
                    total = ?project.total_lead_count,
                    "[TRACKER] Lead outcome recorded"
                );

                let finalization = if project.is_complete() {
                    info!(project_id = %redact_id(&project.id), "[TRACKER] Project complete");
                    self.aggregator.finalize(&project.id).await?
                } else {
                    Finalization::NotClaimed
                };

                Ok(CompletionOutcome::Recorded {
                    project_id: project.id,
                    processed_lead_count: project.processed_lead_count,
                    total_lead_count: project.total_lead_count,
                    finalization,
                })
            }
            OutcomeRecord::AlreadyProcessed { project_id } => {
                // A concurrent delivery of the same event won the record
                warn!(
                    lead_id = %redact_id(&lead.id),
                    "[TRACKER] Lost outcome race to a concurrent duplicate"
                );
                self.duplicate(project_id).await
            }
            OutcomeRecord::UnknownLead => Err(AppError::UnknownLead(redact_id(&lead.id))),
        }
    }

    /// Publishes a produced artifact under the lead's publish lease.
    ///
    /// The resulting link is stored before the outcome, so a redelivery after
    /// a failed record reuses it instead of publishing again. Permanent
    /// publish failures are recorded as a failed outcome so the project can
    /// still complete.
    async fn publish(
        &self,
        lead: &LeadRow,
        event: &CompletionEvent,
        result_ref: &str,
        token: &str,
    ) -> Result<(LeadOutcome, String), AppError> {
        let folder_uri = match &event.folder_uri {
            Some(folder) => Some(folder.clone()),
            None => match self.store.get_project(&lead.project_id).await {
                Ok(project) => project.folder_uri,
                Err(e) => {
                    self.release_publish(lead, token).await;
                    return Err(e);
                }
            },
        };

        let request = PublishRequest {
            lead_id: lead.id.clone(),
            title: lead.title.clone(),
            result_ref: result_ref.to_string(),
            folder_uri,
        };

        match self.publisher.publish(&request).await {
            Ok(link) => {
                if !self.store.record_published_link(&lead.id, &link).await? {
                    warn!(
                        lead_id = %redact_id(&lead.id),
                        "[TRACKER] Published link was already stored"
                    );
                }
                Ok((LeadOutcome::Succeeded, link))
            }
            Err(e) if e.is_retryable() => {
                self.release_publish(lead, token).await;
                Err(e)
            }
            Err(e) => {
                error!(
                    lead_id = %redact_id(&lead.id),
                    "[TRACKER] Publishing failed permanently, recording failure: {}",
                    e
                );
                Ok((LeadOutcome::Failed, FAILURE_MARKER.to_string()))
            }
        }
    }

    async fn release_publish(&self, lead: &LeadRow, token: &str) {
        if let Err(e) = self.store.release_publish_claim(&lead.id, token).await {
            // The lease expires on its own
            warn!(
                lead_id = %redact_id(&lead.id),
                "[TRACKER] Failed to release publish lease: {}",
                e
            );
        }
    }

    /// Handles an event for an already processed lead. If its project is
    /// complete but the report is not yet delivered, the claim is retried;
    /// this is how a redelivered event recovers a failed delivery.
    async fn duplicate(&self, project_id: String) -> Result<CompletionOutcome, AppError> {
        let project = self.store.get_project(&project_id).await?;

        let finalization = if project.is_complete()
            && project.notification_state != NotificationState::Delivered
        {
            self.aggregator.finalize(&project_id).await?
        } else {
            Finalization::NotClaimed
        };

        Ok(CompletionOutcome::Duplicate {
            project_id,
            finalization,
        })
    }
}
