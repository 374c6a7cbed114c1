//! Exactly-once report delivery for completed projects.
//!
//! Delivery is gated by the project's notification claim. The claim is taken
//! with a conditional update, held while the report is built and sent, then
//! either committed as delivered or released for a later retry.

use std::sync::Arc;

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::http::redact_id;
use crate::notify::mailer::{Notifier, ReportEmail};
use crate::notify::report::{render_report, ReportArchive};
use crate::storage::RecordStore;

/// What happened when a project was offered for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalization {
    /// This caller won the claim and delivered the report.
    Delivered { lead_count: usize },
    /// Not complete yet, already delivered, or another worker holds the claim.
    NotClaimed,
}

/// Builds and delivers a project's report at most once per successful claim.
pub struct Aggregator {
    store: Arc<dyn RecordStore>,
    notifier: Arc<dyn Notifier>,
    archive: Option<ReportArchive>,
    claim_lease_secs: i64,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn RecordStore>,
        notifier: Arc<dyn Notifier>,
        archive: Option<ReportArchive>,
        claim_lease_secs: i64,
    ) -> Self {
        Self {
            store,
            notifier,
            archive,
            claim_lease_secs,
        }
    }

    /// Delivers the project's report if this caller wins the claim.
    ///
    /// On delivery failure the claim is released and the error returned, so
    /// the message that got here is redelivered and tries again.
    pub async fn finalize(&self, project_id: &str) -> Result<Finalization, AppError> {
        let claim_token = Uuid::new_v4().to_string();

        let claimed = self
            .store
            .try_claim_notification(project_id, &claim_token, self.claim_lease_secs)
            .await?;
        if !claimed {
            return Ok(Finalization::NotClaimed);
        }

        info!(project_id = %redact_id(project_id), "[NOTIFY] Claimed report delivery");

        match self.deliver(project_id).await {
            Ok(lead_count) => {
                let committed = self.store.mark_delivered(project_id, &claim_token).await?;
                if !committed {
                    warn!(
                        project_id = %redact_id(project_id),
                        "[NOTIFY] Claim expired during delivery; report may be sent twice"
                    );
                }
                info!(
                    project_id = %redact_id(project_id),
                    lead_count,
                    "[NOTIFY] Report delivered"
                );
                Ok(Finalization::Delivered { lead_count })
            }
            Err(e) => {
                error!(
                    project_id = %redact_id(project_id),
                    retryable = e.is_retryable(),
                    "[NOTIFY] Report delivery failed: {}",
                    e
                );
                if let Err(release_err) = self.store.release_claim(project_id, &claim_token).await {
                    // The lease expiry will free the claim instead
                    warn!(
                        project_id = %redact_id(project_id),
                        "[NOTIFY] Failed to release claim: {}",
                        release_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn deliver(&self, project_id: &str) -> Result<usize, AppError> {
        let project = self.store.get_project(project_id).await?;
        let leads = self.store.list_leads(project_id).await?;
        let csv = render_report(&leads)?;

        if let Some(archive) = &self.archive {
            let path = archive.store(project_id, csv.clone()).await?;
            info!(
                project_id = %redact_id(project_id),
                "[NOTIFY] Report archived to {}",
                path.display()
            );
        }

        let email = ReportEmail {
            project_id: project.id,
            recipient: project.recipient,
            csv,
        };
        self.notifier.send_report(&email).await?;

        Ok(leads.len())
    }
}
