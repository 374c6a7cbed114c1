//! Lead persistence for SQLite.
//!
//! Leads are written once by ingestion and updated once by the completion
//! tracker. Recording an outcome and counting it on the project happen in one
//! immediate transaction, guarded by the lead's `processed` flag.

use rusqlite::{OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::storage::database::{current_timestamp, Database};
use crate::storage::projects::{project_from_row, ProjectRow, PROJECT_COLUMNS};

// ─────────────────────────────────────────────────────────────────────────────
// LeadOutcome Enum
// ─────────────────────────────────────────────────────────────────────────────

/// Result of a lead's external processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadOutcome {
    Succeeded,
    Failed,
}

impl LeadOutcome {
    /// Converts the outcome to its string representation for database storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadOutcome::Succeeded => "Succeeded",
            LeadOutcome::Failed => "Failed",
        }
    }

    /// Parses a stored outcome. Anything but `Succeeded` reads as `Failed`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "Succeeded" => LeadOutcome::Succeeded,
            _ => LeadOutcome::Failed,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// One lead derived from one source row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRow {
    pub id: String,
    pub project_id: String,
    /// Position of the source row (header excluded), 0-based.
    pub ordinal_index: i64,
    pub label: String,
    pub title: String,
    /// Where the external processor deposits the rendered artifact.
    pub result_target: String,
    /// JSON document handed to the external processor.
    pub processing_payload: String,
    pub outcome: Option<LeadOutcome>,
    pub outcome_link: Option<String>,
    pub processed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Result of applying one completion event to the store.
#[derive(Debug, Clone)]
pub enum OutcomeRecord {
    /// This call recorded the outcome and counted it. Carries the project as
    /// it stands right after the increment.
    Recorded(ProjectRow),
    /// The lead already carried an outcome; nothing changed.
    AlreadyProcessed { project_id: String },
    /// No lead with that id exists.
    UnknownLead,
}

/// Result of asking to publish a lead's artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishClaim {
    /// The caller holds the publish lease and must publish.
    Acquired,
    /// An earlier attempt already published; reuse its link.
    AlreadyPublished(String),
    /// The lead already carries an outcome.
    Processed,
    /// Another handler holds a live lease.
    HeldElsewhere,
}

const LEAD_COLUMNS: &str = "id, project_id, ordinal_index, label, title, result_target, \
     processing_payload, outcome, outcome_link, processed, created_at, updated_at";

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<LeadRow> {
    let outcome: Option<String> = row.get(7)?;
    Ok(LeadRow {
        id: row.get(0)?,
        project_id: row.get(1)?,
        ordinal_index: row.get(2)?,
        label: row.get(3)?,
        title: row.get(4)?,
        result_target: row.get(5)?,
        processing_payload: row.get(6)?,
        outcome: outcome.as_deref().map(LeadOutcome::from_str),
        outcome_link: row.get(8)?,
        processed: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Storage Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Inserts leads in one transaction.
///
/// A lead whose `(project_id, ordinal_index)` already exists is left alone,
/// so a redelivered ingestion never duplicates rows. Returns how many rows
/// were newly inserted.
pub async fn insert_leads(db: &Database, leads: &[LeadRow]) -> Result<usize, AppError> {
    let leads = leads.to_vec();

    db.call("Insert leads", move |conn| {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("Failed to start lead transaction: {e}")))?;

        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    r#"
                    INSERT INTO leads (id, project_id, ordinal_index, label, title, result_target,
                                       processing_payload, outcome, outcome_link, processed,
                                       created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                    ON CONFLICT(project_id, ordinal_index) DO NOTHING
                    "#,
                )
                .map_err(|e| AppError::Storage(format!("Failed to prepare lead insert: {e}")))?;

            for lead in &leads {
                inserted += stmt
                    .execute(rusqlite::params![
                        lead.id,
                        lead.project_id,
                        lead.ordinal_index,
                        lead.label,
                        lead.title,
                        lead.result_target,
                        lead.processing_payload,
                        lead.outcome.map(|o| o.as_str()),
                        lead.outcome_link,
                        lead.processed,
                        lead.created_at,
                        lead.updated_at,
                    ])
                    .map_err(|e| AppError::Storage(format!("Failed to insert lead: {e}")))?;
            }
        }

        tx.commit()
            .map_err(|e| AppError::Storage(format!("Failed to commit leads: {e}")))?;

        Ok(inserted)
    })
    .await
}

/// Gets a lead by id.
pub async fn get_lead(db: &Database, lead_id: &str) -> Result<Option<LeadRow>, AppError> {
    let lead_id = lead_id.to_string();

    db.call("Get lead", move |conn| {
        conn.query_row(
            &format!("SELECT {LEAD_COLUMNS} FROM leads WHERE id = ?1"),
            [&lead_id],
            lead_from_row,
        )
        .optional()
        .map_err(|e| AppError::Storage(format!("Failed to query lead: {e}")))
    })
    .await
}

/// Lists every lead of a project in ordinal order.
pub async fn list_leads_for_project(
    db: &Database,
    project_id: &str,
) -> Result<Vec<LeadRow>, AppError> {
    let project_id = project_id.to_string();

    db.call("List leads", move |conn| {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {LEAD_COLUMNS} FROM leads WHERE project_id = ?1 ORDER BY ordinal_index ASC"
            ))
            .map_err(|e| AppError::Storage(format!("Failed to prepare lead query: {e}")))?;

        let leads = stmt
            .query_map([&project_id], lead_from_row)
            .map_err(|e| AppError::Storage(format!("Failed to query leads: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AppError::Storage(format!("Failed to read leads: {e}")))?;

        Ok(leads)
    })
    .await
}

/// Records a lead's outcome and counts it on its project, exactly once.
///
/// The conditional update on `processed = 0` is the idempotency guard; the
/// project increment only runs when that update changed a row. Both happen
/// inside one immediate transaction, so either both land or neither does.
pub async fn record_lead_outcome(
    db: &Database,
    lead_id: &str,
    outcome: LeadOutcome,
    outcome_link: &str,
) -> Result<OutcomeRecord, AppError> {
    let lead_id = lead_id.to_string();
    let outcome_link = outcome_link.to_string();
    let now = current_timestamp();

    db.call("Record lead outcome", move |conn| {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("Failed to start outcome transaction: {e}")))?;

        let claimed: Option<String> = tx
            .query_row(
                r#"
                UPDATE leads
                SET processed = 1, outcome = ?2, outcome_link = ?3, updated_at = ?4
                WHERE id = ?1 AND processed = 0
                RETURNING project_id
                "#,
                rusqlite::params![lead_id, outcome.as_str(), outcome_link, now],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("Failed to record lead outcome: {e}")))?;

        let Some(project_id) = claimed else {
            let existing: Option<String> = tx
                .query_row(
                    "SELECT project_id FROM leads WHERE id = ?1",
                    [&lead_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| AppError::Storage(format!("Failed to query lead: {e}")))?;

            return Ok(match existing {
                Some(project_id) => OutcomeRecord::AlreadyProcessed { project_id },
                None => OutcomeRecord::UnknownLead,
            });
        };

        let project = tx
            .query_row(
                &format!(
                    "UPDATE projects
                     SET processed_lead_count = processed_lead_count + 1, updated_at = ?2
                     WHERE id = ?1
                     RETURNING {PROJECT_COLUMNS}"
                ),
                rusqlite::params![project_id, now],
                project_from_row,
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("Failed to increment processed count: {e}")))?
            .ok_or_else(|| AppError::NotFound(format!("project {project_id}")))?;

        tx.commit()
            .map_err(|e| AppError::Storage(format!("Failed to commit outcome: {e}")))?;

        Ok(OutcomeRecord::Recorded(project))
    })
    .await
}

/// Takes the publish lease on an unprocessed lead.
///
/// A lease older than `lease_secs` is treated as abandoned and taken over.
/// Returns `AppError::UnknownLead` when the lead does not exist.
pub async fn try_claim_publish(
    db: &Database,
    lead_id: &str,
    token: &str,
    lease_secs: i64,
) -> Result<PublishClaim, AppError> {
    let lead_id = lead_id.to_string();
    let token = token.to_string();
    let now = current_timestamp();

    db.call("Claim publish", move |conn| {
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| AppError::Storage(format!("Failed to start publish claim: {e}")))?;

        let state: Option<(bool, Option<String>, Option<String>, Option<i64>)> = tx
            .query_row(
                "SELECT processed, published_link, publish_token, publish_claimed_at
                 FROM leads WHERE id = ?1",
                [&lead_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .map_err(|e| AppError::Storage(format!("Failed to query publish state: {e}")))?;

        let Some((processed, published_link, holder, claimed_at)) = state else {
            return Err(AppError::UnknownLead(lead_id));
        };

        if processed {
            return Ok(PublishClaim::Processed);
        }
        if let Some(link) = published_link {
            return Ok(PublishClaim::AlreadyPublished(link));
        }
        let live = holder.is_some() && claimed_at.is_some_and(|at| at > now - lease_secs);
        if live {
            return Ok(PublishClaim::HeldElsewhere);
        }

        tx.execute(
            "UPDATE leads SET publish_token = ?2, publish_claimed_at = ?3 WHERE id = ?1",
            rusqlite::params![lead_id, token, now],
        )
        .map_err(|e| AppError::Storage(format!("Failed to claim publish: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Storage(format!("Failed to commit publish claim: {e}")))?;

        Ok(PublishClaim::Acquired)
    })
    .await
}

/// Stores the link produced by a publish and drops the lease.
///
/// Only the first link for an unprocessed lead is kept. Returns whether
/// this call stored it.
pub async fn record_published_link(
    db: &Database,
    lead_id: &str,
    link: &str,
) -> Result<bool, AppError> {
    let lead_id = lead_id.to_string();
    let link = link.to_string();

    db.call("Record published link", move |conn| {
        let changed = conn
            .execute(
                "UPDATE leads
                 SET published_link = ?2, publish_token = NULL, publish_claimed_at = NULL
                 WHERE id = ?1 AND processed = 0 AND published_link IS NULL",
                rusqlite::params![lead_id, link],
            )
            .map_err(|e| AppError::Storage(format!("Failed to record published link: {e}")))?;
        Ok(changed == 1)
    })
    .await
}

/// Drops a publish lease held under `token`, so a redelivery can publish
/// without waiting for it to expire.
pub async fn release_publish_claim(
    db: &Database,
    lead_id: &str,
    token: &str,
) -> Result<(), AppError> {
    let lead_id = lead_id.to_string();
    let token = token.to_string();

    db.call("Release publish claim", move |conn| {
        conn.execute(
            "UPDATE leads SET publish_token = NULL, publish_claimed_at = NULL
             WHERE id = ?1 AND publish_token = ?2",
            rusqlite::params![lead_id, token],
        )
        .map_err(|e| AppError::Storage(format!("Failed to release publish claim: {e}")))?;
        Ok(())
    })
    .await
}
