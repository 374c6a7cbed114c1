//! Project persistence for SQLite.
//!
//! A project owns the aggregate counters for one ingested lead source and the
//! notification claim that guards report delivery. Every mutation that can
//! race across workers is a single conditional statement.

use rusqlite::{OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::database::{current_timestamp, Database};

// ─────────────────────────────────────────────────────────────────────────────
// NotificationState Enum
// ─────────────────────────────────────────────────────────────────────────────

/// Delivery state of a project's completion report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationState {
    /// Report not yet claimed by any worker.
    Pending,
    /// A worker holds the claim and is delivering the report.
    Claimed,
    /// Report delivered. Terminal.
    Delivered,
}

impl NotificationState {
    /// Converts the state to its string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationState::Pending => "Pending",
            NotificationState::Claimed => "Claimed",
            NotificationState::Delivered => "Delivered",
        }
    }

    /// Parses a string into a NotificationState.
    /// Returns `Pending` for unknown strings.
    pub fn from_str(s: &str) -> Self {
        match s {
            "Claimed" => NotificationState::Claimed,
            "Delivered" => NotificationState::Delivered,
            _ => NotificationState::Pending,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// One project: a lead source uploaded for a single recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub id: String,
    pub recipient: String,
    pub template_video_key: String,
    pub spreadsheet_key: String,
    /// Video host folder the published results land in.
    pub folder_uri: Option<String>,
    /// Rows seen by ingestion, skipped ones included. `None` until recorded.
    pub total_lead_count: Option<i64>,
    pub skipped_lead_count: i64,
    pub processed_lead_count: i64,
    pub batch_job_id: Option<String>,
    pub notification_state: NotificationState,
    pub claim_token: Option<String>,
    pub claimed_at: Option<i64>,
    pub delivered_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProjectRow {
    /// Builds a fresh project with zero counters and no recorded total.
    pub fn new(
        id: impl Into<String>,
        recipient: impl Into<String>,
        template_video_key: impl Into<String>,
        spreadsheet_key: impl Into<String>,
        folder_uri: Option<String>,
    ) -> Self {
        let now = current_timestamp();
        Self {
            id: id.into(),
            recipient: recipient.into(),
            template_video_key: template_video_key.into(),
            spreadsheet_key: spreadsheet_key.into(),
            folder_uri,
            total_lead_count: None,
            skipped_lead_count: 0,
            processed_lead_count: 0,
            batch_job_id: None,
            notification_state: NotificationState::Pending,
            claim_token: None,
            claimed_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// True once every recorded row is either processed or skipped.
    /// A project whose total is not yet recorded is never complete.
    pub fn is_complete(&self) -> bool {
        match self.total_lead_count {
            Some(total) => self.processed_lead_count + self.skipped_lead_count >= total,
            None => false,
        }
    }
}

/// Column list shared by every query that materializes a [`ProjectRow`].
pub(crate) const PROJECT_COLUMNS: &str = "id, recipient, template_video_key, spreadsheet_key, \
     folder_uri, total_lead_count, skipped_lead_count, processed_lead_count, batch_job_id, \
     notification_state, claim_token, claimed_at, delivered_at, created_at, updated_at";

/// Maps a row selected with [`PROJECT_COLUMNS`].
pub(crate) fn project_from_row(row: &Row<'_>) -> rusqlite::Result<ProjectRow> {
    let state: String = row.get(9)?;
    Ok(ProjectRow {
        id: row.get(0)?,
        recipient: row.get(1)?,
        template_video_key: row.get(2)?,
        spreadsheet_key: row.get(3)?,
        folder_uri: row.get(4)?,
        total_lead_count: row.get(5)?,
        skipped_lead_count: row.get(6)?,
        processed_lead_count: row.get(7)?,
        batch_job_id: row.get(8)?,
        notification_state: NotificationState::from_str(&state),
        claim_token: row.get(10)?,
        claimed_at: row.get(11)?,
        delivered_at: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Saves a new project.
pub async fn save_project(db: &Database, project: &ProjectRow) -> Result<(), AppError> {
    let project = project.clone();

    db.call("Save project", move |conn| {
        conn.execute(
            r#"
            INSERT INTO projects (id, recipient, template_video_key, spreadsheet_key, folder_uri,
                                  total_lead_count, skipped_lead_count, processed_lead_count,
                                  batch_job_id, notification_state, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            rusqlite::params![
                project.id,
                project.recipient,
                project.template_video_key,
                project.spreadsheet_key,
                project.folder_uri,
                project.total_lead_count,
                project.skipped_lead_count,
                project.processed_lead_count,
                project.batch_job_id,
                project.notification_state.as_str(),
                project.created_at,
                project.updated_at,
            ],
        )
        .map_err(|e| AppError::Storage(format!("Failed to insert project: {e}")))?;

        Ok(())
    })
    .await
}

/// Gets a project by id. Missing projects are `NotFound`.
pub async fn get_project(db: &Database, project_id: &str) -> Result<ProjectRow, AppError> {
    let project_id = project_id.to_string();

    db.call("Get project", move |conn| {
        conn.query_row(
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            [&project_id],
            project_from_row,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("Failed to query project: {e}")))?
        .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))
    })
    .await
}

/// Records the ingestion totals for a project.
///
/// Rewriting the same values on redelivery is harmless: the lead source is
/// immutable, so every attempt computes the same counts.
pub async fn record_ingestion(
    db: &Database,
    project_id: &str,
    total_lead_count: i64,
    skipped_lead_count: i64,
) -> Result<ProjectRow, AppError> {
    let project_id = project_id.to_string();
    let updated_at = current_timestamp();

    db.call("Record ingestion", move |conn| {
        conn.query_row(
            &format!(
                "UPDATE projects
                 SET total_lead_count = ?2, skipped_lead_count = ?3, updated_at = ?4
                 WHERE id = ?1
                 RETURNING {PROJECT_COLUMNS}"
            ),
            rusqlite::params![project_id, total_lead_count, skipped_lead_count, updated_at],
            project_from_row,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("Failed to record ingestion totals: {e}")))?
        .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))
    })
    .await
}

/// Records the external batch job submitted for a project.
pub async fn record_batch_job(
    db: &Database,
    project_id: &str,
    batch_job_id: &str,
) -> Result<(), AppError> {
    let project_id = project_id.to_string();
    let batch_job_id = batch_job_id.to_string();
    let updated_at = current_timestamp();

    db.call("Record batch job", move |conn| {
        let changed = conn
            .execute(
                "UPDATE projects SET batch_job_id = ?2, updated_at = ?3 WHERE id = ?1",
                rusqlite::params![project_id, batch_job_id, updated_at],
            )
            .map_err(|e| AppError::Storage(format!("Failed to record batch job: {e}")))?;

        if changed == 0 {
            return Err(AppError::NotFound(format!("project {project_id}")));
        }
        Ok(())
    })
    .await
}

/// Attempts to take the notification claim for a complete project.
///
/// Succeeds for exactly one caller: the project must be complete and either
/// unclaimed or holding a claim older than the lease. Returns whether this
/// caller now holds the claim under `claim_token`.
pub async fn try_claim_notification(
    db: &Database,
    project_id: &str,
    claim_token: &str,
    lease_secs: i64,
) -> Result<bool, AppError> {
    let project_id = project_id.to_string();
    let claim_token = claim_token.to_string();
    let now = current_timestamp();
    let stale_before = now - lease_secs;

    db.call("Claim notification", move |conn| {
        let changed = conn
            .execute(
                r#"
                UPDATE projects
                SET notification_state = 'Claimed', claim_token = ?2, claimed_at = ?3, updated_at = ?3
                WHERE id = ?1
                  AND total_lead_count IS NOT NULL
                  AND processed_lead_count + skipped_lead_count >= total_lead_count
                  AND (notification_state = 'Pending'
                       OR (notification_state = 'Claimed' AND claimed_at <= ?4))
                "#,
                rusqlite::params![project_id, claim_token, now, stale_before],
            )
            .map_err(|e| AppError::Storage(format!("Failed to claim notification: {e}")))?;

        Ok(changed == 1)
    })
    .await
}

/// Marks the report delivered. Only the current claim holder can do this.
/// Returns false when the claim was lost to a stale-lease takeover.
pub async fn mark_delivered(
    db: &Database,
    project_id: &str,
    claim_token: &str,
) -> Result<bool, AppError> {
    let project_id = project_id.to_string();
    let claim_token = claim_token.to_string();
    let now = current_timestamp();

    db.call("Mark delivered", move |conn| {
        let changed = conn
            .execute(
                r#"
                UPDATE projects
                SET notification_state = 'Delivered', delivered_at = ?3, claim_token = NULL, updated_at = ?3
                WHERE id = ?1 AND notification_state = 'Claimed' AND claim_token = ?2
                "#,
                rusqlite::params![project_id, claim_token, now],
            )
            .map_err(|e| AppError::Storage(format!("Failed to mark delivered: {e}")))?;

        Ok(changed == 1)
    })
    .await
}

/// Releases a held claim back to `Pending` so a redelivered event can retry.
pub async fn release_claim(
    db: &Database,
    project_id: &str,
    claim_token: &str,
) -> Result<(), AppError> {
    let project_id = project_id.to_string();
    let claim_token = claim_token.to_string();
    let now = current_timestamp();

    db.call("Release claim", move |conn| {
        conn.execute(
            r#"
            UPDATE projects
            SET notification_state = 'Pending', claim_token = NULL, claimed_at = NULL, updated_at = ?3
            WHERE id = ?1 AND notification_state = 'Claimed' AND claim_token = ?2
            "#,
            rusqlite::params![project_id, claim_token, now],
        )
        .map_err(|e| AppError::Storage(format!("Failed to release claim: {e}")))?;

        Ok(())
    })
    .await
}

/// Lists projects with a recorded total that are still incomplete and have
/// not progressed since `idle_since` (unix seconds).
pub async fn list_stalled_projects(
    db: &Database,
    idle_since: i64,
) -> Result<Vec<ProjectRow>, AppError> {
    db.call("List stalled projects", move |conn| {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects
                 WHERE total_lead_count IS NOT NULL
                   AND processed_lead_count + skipped_lead_count < total_lead_count
                   AND updated_at <= ?1
                 ORDER BY updated_at ASC"
            ))
            .map_err(|e| AppError::Storage(format!("Failed to prepare stalled query: {e}")))?;

        let rows = stmt
            .query_map([idle_since], project_from_row)
            .map_err(|e| AppError::Storage(format!("Failed to query stalled projects: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("Failed to read stalled projects: {e}")))?;

        Ok(rows)
    })
    .await
}

/// Lists complete projects whose report has not been delivered and whose
/// last change is at or before `idle_since`.
pub async fn list_undelivered_projects(
    db: &Database,
    idle_since: i64,
) -> Result<Vec<ProjectRow>, AppError> {
    db.call("List undelivered projects", move |conn| {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROJECT_COLUMNS} FROM projects
                 WHERE total_lead_count IS NOT NULL
                   AND processed_lead_count + skipped_lead_count >= total_lead_count
                   AND notification_state != 'Delivered'
                   AND updated_at <= ?1
                 ORDER BY updated_at ASC"
            ))
            .map_err(|e| AppError::Storage(format!("Failed to prepare undelivered query: {e}")))?;

        let rows = stmt
            .query_map([idle_since], project_from_row)
            .map_err(|e| AppError::Storage(format!("Failed to query undelivered projects: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("Failed to read undelivered projects: {e}")))?;

        Ok(rows)
    })
    .await
}
