//! Record store seam used by the pipeline stages.
//!
//! Stages depend on [`RecordStore`] rather than on SQLite directly so tests
//! can inject failures around the real store.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::AppError;
use crate::storage::database::Database;
use crate::storage::leads::{self, LeadOutcome, LeadRow, OutcomeRecord, PublishClaim};
use crate::storage::projects::{self, ProjectRow};

/// Boxed future returned by every [`RecordStore`] method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AppError>> + Send + 'a>>;

/// Persistent project and lead records.
pub trait RecordStore: Send + Sync {
    fn save_project(&self, project: &ProjectRow) -> StoreFuture<'_, ()>;

    fn get_project(&self, project_id: &str) -> StoreFuture<'_, ProjectRow>;

    fn record_ingestion(
        &self,
        project_id: &str,
        total_lead_count: i64,
        skipped_lead_count: i64,
    ) -> StoreFuture<'_, ProjectRow>;

    fn record_batch_job(&self, project_id: &str, batch_job_id: &str) -> StoreFuture<'_, ()>;

    fn insert_leads(&self, leads: &[LeadRow]) -> StoreFuture<'_, usize>;

    fn get_lead(&self, lead_id: &str) -> StoreFuture<'_, Option<LeadRow>>;

    fn list_leads(&self, project_id: &str) -> StoreFuture<'_, Vec<LeadRow>>;

    fn try_claim_publish(
        &self,
        lead_id: &str,
        token: &str,
        lease_secs: i64,
    ) -> StoreFuture<'_, PublishClaim>;

    fn record_published_link(&self, lead_id: &str, link: &str) -> StoreFuture<'_, bool>;

    fn release_publish_claim(&self, lead_id: &str, token: &str) -> StoreFuture<'_, ()>;

    fn record_lead_outcome(
        &self,
        lead_id: &str,
        outcome: LeadOutcome,
        outcome_link: &str,
    ) -> StoreFuture<'_, OutcomeRecord>;

    fn try_claim_notification(
        &self,
        project_id: &str,
        claim_token: &str,
        lease_secs: i64,
    ) -> StoreFuture<'_, bool>;

    fn mark_delivered(&self, project_id: &str, claim_token: &str) -> StoreFuture<'_, bool>;

    fn release_claim(&self, project_id: &str, claim_token: &str) -> StoreFuture<'_, ()>;

    fn list_stalled_projects(&self, idle_since: i64) -> StoreFuture<'_, Vec<ProjectRow>>;

    fn list_undelivered_projects(&self, idle_since: i64) -> StoreFuture<'_, Vec<ProjectRow>>;
}

/// Real implementation of RecordStore using the SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db: Arc<Database>,
}

impl SqliteStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl RecordStore for SqliteStore {
    fn save_project(&self, project: &ProjectRow) -> StoreFuture<'_, ()> {
        let project = project.clone();
        Box::pin(async move { projects::save_project(&self.db, &project).await })
    }

    fn get_project(&self, project_id: &str) -> StoreFuture<'_, ProjectRow> {
        let project_id = project_id.to_string();
        Box::pin(async move { projects::get_project(&self.db, &project_id).await })
    }

    fn record_ingestion(
        &self,
        project_id: &str,
        total_lead_count: i64,
        skipped_lead_count: i64,
    ) -> StoreFuture<'_, ProjectRow> {
        let project_id = project_id.to_string();
        Box::pin(async move {
            projects::record_ingestion(&self.db, &project_id, total_lead_count, skipped_lead_count)
                .await
        })
    }

    fn record_batch_job(&self, project_id: &str, batch_job_id: &str) -> StoreFuture<'_, ()> {
        let project_id = project_id.to_string();
        let batch_job_id = batch_job_id.to_string();
        Box::pin(async move {
            projects::record_batch_job(&self.db, &project_id, &batch_job_id).await
        })
    }

    fn insert_leads(&self, leads: &[LeadRow]) -> StoreFuture<'_, usize> {
        let leads = leads.to_vec();
        Box::pin(async move { leads::insert_leads(&self.db, &leads).await })
    }

    fn get_lead(&self, lead_id: &str) -> StoreFuture<'_, Option<LeadRow>> {
        let lead_id = lead_id.to_string();
        Box::pin(async move { leads::get_lead(&self.db, &lead_id).await })
    }

    fn list_leads(&self, project_id: &str) -> StoreFuture<'_, Vec<LeadRow>> {
        let project_id = project_id.to_string();
        Box::pin(async move { leads::list_leads_for_project(&self.db, &project_id).await })
    }

    fn try_claim_publish(
        &self,
        lead_id: &str,
        token: &str,
        lease_secs: i64,
    ) -> StoreFuture<'_, PublishClaim> {
        let lead_id = lead_id.to_string();
        let token = token.to_string();
        Box::pin(async move {
            leads::try_claim_publish(&self.db, &lead_id, &token, lease_secs).await
        })
    }

    fn record_published_link(&self, lead_id: &str, link: &str) -> StoreFuture<'_, bool> {
        let lead_id = lead_id.to_string();
        let link = link.to_string();
        Box::pin(async move { leads::record_published_link(&self.db, &lead_id, &link).await })
    }

    fn release_publish_claim(&self, lead_id: &str, token: &str) -> StoreFuture<'_, ()> {
        let lead_id = lead_id.to_string();
        let token = token.to_string();
        Box::pin(async move { leads::release_publish_claim(&self.db, &lead_id, &token).await })
    }

    fn record_lead_outcome(
        &self,
        lead_id: &str,
        outcome: LeadOutcome,
        outcome_link: &str,
    ) -> StoreFuture<'_, OutcomeRecord> {
        let lead_id = lead_id.to_string();
        let outcome_link = outcome_link.to_string();
        Box::pin(async move {
            leads::record_lead_outcome(&self.db, &lead_id, outcome, &outcome_link).await
        })
    }

    fn try_claim_notification(
        &self,
        project_id: &str,
        claim_token: &str,
        lease_secs: i64,
    ) -> StoreFuture<'_, bool> {
        let project_id = project_id.to_string();
        let claim_token = claim_token.to_string();
        Box::pin(async move {
            projects::try_claim_notification(&self.db, &project_id, &claim_token, lease_secs).await
        })
    }

    fn mark_delivered(&self, project_id: &str, claim_token: &str) -> StoreFuture<'_, bool> {
        let project_id = project_id.to_string();
        let claim_token = claim_token.to_string();
        Box::pin(async move { projects::mark_delivered(&self.db, &project_id, &claim_token).await })
    }

    fn release_claim(&self, project_id: &str, claim_token: &str) -> StoreFuture<'_, ()> {
        let project_id = project_id.to_string();
        let claim_token = claim_token.to_string();
        Box::pin(async move { projects::release_claim(&self.db, &project_id, &claim_token).await })
    }

    fn list_stalled_projects(&self, idle_since: i64) -> StoreFuture<'_, Vec<ProjectRow>> {
        Box::pin(async move { projects::list_stalled_projects(&self.db, idle_since).await })
    }

    fn list_undelivered_projects(&self, idle_since: i64) -> StoreFuture<'_, Vec<ProjectRow>> {
        Box::pin(async move { projects::list_undelivered_projects(&self.db, idle_since).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_delegates_to_sqlite() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::init(temp_dir.path().join("store.db")).await.unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(SqliteStore::new(Arc::new(db)));

        store
            .save_project(&ProjectRow::new("p", "a@b.c", "t.mp4", "s.csv", None))
            .await
            .unwrap();
        store.record_ingestion("p", 0, 0).await.unwrap();
        store.record_batch_job("p", "job-1").await.unwrap();

        let project = store.get_project("p").await.unwrap();
        assert_eq!(project.batch_job_id.as_deref(), Some("job-1"));
        assert!(store.list_leads("p").await.unwrap().is_empty());
        assert!(store.get_lead("nope").await.unwrap().is_none());
    }
}
