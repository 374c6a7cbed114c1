//! SQLite storage for projects and leads.
//!
//! The schema version lives in `PRAGMA user_version`; each migration step runs
//! once, inside a transaction, when the stored version is older.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;

use crate::error::AppError;

const SCHEMA_VERSION: i32 = 1;

/// V1 schema: projects, leads and their indexes.
const V1_SCHEMA: &str = r#"
-- Projects (one per uploaded lead source)
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY NOT NULL,
    recipient TEXT NOT NULL,
    template_video_key TEXT NOT NULL,
    spreadsheet_key TEXT NOT NULL,
    folder_uri TEXT,
    total_lead_count INTEGER,
    skipped_lead_count INTEGER NOT NULL DEFAULT 0,
    processed_lead_count INTEGER NOT NULL DEFAULT 0,
    batch_job_id TEXT,
    notification_state TEXT NOT NULL DEFAULT 'Pending',
    claim_token TEXT,
    claimed_at INTEGER,
    delivered_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_notification_state ON projects(notification_state);

-- Leads (one per valid source row)
CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY NOT NULL,
    project_id TEXT NOT NULL,
    ordinal_index INTEGER NOT NULL,
    label TEXT NOT NULL,
    title TEXT NOT NULL,
    result_target TEXT NOT NULL,
    processing_payload TEXT NOT NULL,
    outcome TEXT,
    outcome_link TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    publish_token TEXT,
    publish_claimed_at INTEGER,
    published_link TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leads_project_id ON leads(project_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_leads_project_ordinal ON leads(project_id, ordinal_index);
"#;

/// Handle to the leadflow database file.
///
/// Holds only the path: every operation opens its own connection on the
/// blocking pool, so concurrent workers never share a connection.
#[derive(Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and brings its
    /// schema up to date.
    pub async fn init(db_path: PathBuf) -> Result<Self, AppError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::Storage(format!(
                        "Cannot create database directory '{}': {e}",
                        parent.display()
                    ))
                })?;
            }
            let mut conn = open_connection(&path)?;
            run_migrations(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Migration task failed: {e}")))??;

        Ok(Self { db_path })
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Runs `f` against a fresh, configured connection on the blocking pool.
    ///
    /// `task` names the operation in the join-error message.
    pub(crate) async fn call<T, F>(&self, task: &'static str, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
    {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = open_connection(&db_path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("{task} task failed: {e}")))?
    }

    /// Confirms the file opens and carries the expected schema version.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let version = self.call("Health check", |conn| schema_version(conn)).await?;
        if version != SCHEMA_VERSION {
            return Err(AppError::Storage(format!(
                "Schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }
}

/// Opens a connection with a 10s busy timeout and WAL journaling.
///
/// The busy timeout makes concurrent writers queue on the database lock
/// instead of failing immediately.
fn open_connection(path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path).map_err(|e| {
        AppError::Storage(format!("Failed to open database '{}': {e}", path.display()))
    })?;

    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| AppError::Storage(format!("Failed to set busy timeout: {e}")))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Storage(format!("Failed to enable WAL: {e}")))?;

    Ok(conn)
}

/// Unix time in seconds.
pub(crate) fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn schema_version(conn: &Connection) -> Result<i32, AppError> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| AppError::Storage(format!("Failed to read schema version: {e}")))
}

fn run_migrations(conn: &mut Connection) -> Result<(), AppError> {
    let from = schema_version(conn)?;
    if from >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| AppError::Storage(format!("Failed to begin migration: {e}")))?;

    if from < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| AppError::Storage(format!("Schema v1 failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::Storage(format!("Failed to record schema version: {e}")))?;
    tx.commit()
        .map_err(|e| AppError::Storage(format!("Failed to commit migration: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;
    use tempfile::TempDir;

    async fn fresh() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let db = Database::init(dir.path().join("leadflow.db")).await.unwrap();
        (dir, db)
    }

    fn insert_project(conn: &Connection, id: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO projects (id, recipient, template_video_key, spreadsheet_key, created_at, updated_at)
             VALUES (?1, 'a@b.c', 't.mp4', 's.csv', 0, 0)",
            params![id],
        )
    }

    fn insert_lead(conn: &Connection, id: &str, ordinal: i64) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO leads (id, project_id, ordinal_index, label, title, result_target, processing_payload, created_at, updated_at)
             VALUES (?1, 'p', ?2, 'l', 't', 'r', '{}', 0, 0)",
            params![id, ordinal],
        )
    }

    #[tokio::test]
    async fn new_project_defaults_to_pending_without_total() {
        let (_dir, db) = fresh().await;
        db.health_check().await.unwrap();

        let (state, total, processed): (String, Option<i64>, i64) = db
            .call("Defaults", |conn| {
                insert_project(conn, "p").map_err(|e| AppError::Storage(e.to_string()))?;
                conn.query_row(
                    "SELECT notification_state, total_lead_count, processed_lead_count FROM projects WHERE id = 'p'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map_err(|e| AppError::Storage(e.to_string()))
            })
            .await
            .unwrap();

        assert_eq!(state, "Pending");
        assert_eq!(total, None);
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn ordinal_is_unique_per_project() {
        let (_dir, db) = fresh().await;

        let second = db
            .call("Ordinals", |conn| {
                insert_lead(conn, "a", 0).map_err(|e| AppError::Storage(e.to_string()))?;
                Ok(insert_lead(conn, "b", 0).is_err())
            })
            .await
            .unwrap();

        assert!(second, "a second lead at the same ordinal must be rejected");
    }

    #[tokio::test]
    async fn reopening_keeps_data_and_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("leadflow.db");

        let first = Database::init(path.clone()).await.unwrap();
        first
            .call("Seed", |conn| {
                insert_project(conn, "kept").map_err(|e| AppError::Storage(e.to_string()))
            })
            .await
            .unwrap();

        let second = Database::init(path.clone()).await.unwrap();
        second.health_check().await.unwrap();
        let count: i64 = second
            .call("Count", |conn| {
                conn.query_row("SELECT COUNT(*) FROM projects", [], |row| row.get(0))
                    .map_err(|e| AppError::Storage(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn connections_use_wal() {
        let (_dir, db) = fresh().await;
        let mode: String = db
            .call("Journal mode", |conn| {
                conn.pragma_query_value(None, "journal_mode", |row| row.get(0))
                    .map_err(|e| AppError::Storage(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn call_propagates_closure_errors() {
        let (_dir, db) = fresh().await;
        let result: Result<(), AppError> = db
            .call("Failing", |_| Err(AppError::NotFound("nothing".into())))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }
}
