//! Completion report rendering and archiving.

use std::io::Write;
use std::path::{Path, PathBuf};

use csv::Writer;
use tempfile::NamedTempFile;

use crate::error::AppError;
use crate::storage::LeadRow;

/// Attachment name used when the report is mailed.
pub const REPORT_FILE_NAME: &str = "processed_leads.csv";

/// Header row of every report.
pub const REPORT_HEADER: [&str; 3] = ["lead_id", "title", "outcome_link"];

/// Renders the per-lead report as CSV. Leads without an outcome render an
/// empty link.
pub fn render_report(leads: &[LeadRow]) -> Result<Vec<u8>, AppError> {
    let mut writer = Writer::from_writer(Vec::new());

    writer
        .write_record(REPORT_HEADER)
        .map_err(|e| AppError::Internal(format!("Failed to write report header: {e}")))?;

    for lead in leads {
        writer
            .write_record([
                lead.id.as_str(),
                lead.title.as_str(),
                lead.outcome_link.as_deref().unwrap_or(""),
            ])
            .map_err(|e| AppError::Internal(format!("Failed to write report row: {e}")))?;
    }

    writer
        .into_inner()
        .map_err(|e| AppError::Internal(format!("Failed to flush report: {}", e.error())))
}

/// Writes delivered reports to `<dir>/<project_id>.csv`.
///
/// Each write goes to a temporary file in the same directory and is then
/// renamed over the destination, so readers never see a partial report.
#[derive(Debug, Clone)]
pub struct ReportArchive {
    dir: PathBuf,
}

impl ReportArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Destination path for a project's report.
    pub fn path_for(&self, project_id: &str) -> Result<PathBuf, AppError> {
        let file_name = format!("{project_id}.csv");
        let is_plain = Path::new(&file_name)
            .file_name()
            .is_some_and(|name| name == file_name.as_str());
        if !is_plain || project_id.is_empty() {
            return Err(AppError::InvalidRequest(format!(
                "Project id '{project_id}' cannot name an archive file"
            )));
        }
        Ok(self.dir.join(file_name))
    }

    /// Archives a report on the blocking pool and returns its final path.
    pub async fn store(&self, project_id: &str, report: Vec<u8>) -> Result<PathBuf, AppError> {
        let final_path = self.path_for(project_id)?;
        let dir = self.dir.clone();

        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&dir).map_err(|e| {
                AppError::Internal(format!("Failed to create archive directory: {e}"))
            })?;

            let mut temp_file = NamedTempFile::new_in(&dir)
                .map_err(|e| AppError::Internal(format!("Failed to create temporary file: {e}")))?;

            temp_file
                .write_all(&report)
                .and_then(|_| temp_file.as_file().sync_all())
                .map_err(|e| AppError::Internal(format!("Failed to write report: {e}")))?;

            temp_file.persist(&final_path).map_err(|e| {
                AppError::Internal(format!(
                    "Failed to persist report to {}: {}",
                    final_path.display(),
                    e.error
                ))
            })?;

            Ok::<_, AppError>(final_path)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Archive report task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LeadOutcome;
    use tempfile::TempDir;

    fn lead(id: &str, title: &str, link: Option<&str>) -> LeadRow {
        LeadRow {
            id: id.to_string(),
            project_id: "p".to_string(),
            ordinal_index: 0,
            label: "label".to_string(),
            title: title.to_string(),
            result_target: String::new(),
            processing_payload: "{}".to_string(),
            outcome: link.map(|_| LeadOutcome::Succeeded),
            outcome_link: link.map(str::to_string),
            processed: link.is_some(),
            created_at: 0,
            updated_at: 0,
        }
    }

    #[test]
    fn test_report_has_header_and_rows() {
        let report = render_report(&[
            lead("l1", "Hello Acme", Some("https://vimeo.com/1")),
            lead("l2", "Pending, still", None),
        ])
        .unwrap();

        let text = String::from_utf8(report).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "lead_id,title,outcome_link");
        assert_eq!(lines[1], "l1,Hello Acme,https://vimeo.com/1");
        // Embedded delimiter is quoted, missing outcome is empty
        assert_eq!(lines[2], "l2,\"Pending, still\",");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn test_empty_report_is_header_only() {
        let text = String::from_utf8(render_report(&[]).unwrap()).unwrap();
        assert_eq!(text, "lead_id,title,outcome_link\n");
    }

    #[tokio::test]
    async fn test_archive_writes_and_replaces() {
        let dir = TempDir::new().unwrap();
        let archive = ReportArchive::new(dir.path().join("reports"));

        let path = archive.store("p-1", b"first\n".to_vec()).await.unwrap();
        assert_eq!(path, dir.path().join("reports").join("p-1.csv"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\n");

        archive.store("p-1", b"second\n".to_vec()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");

        // Only the final file remains
        let entries = std::fs::read_dir(dir.path().join("reports")).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_archive_rejects_path_like_ids() {
        let archive = ReportArchive::new("/tmp/reports");
        assert!(archive.path_for("../escape").is_err());
        assert!(archive.path_for("a/b").is_err());
        assert!(archive.path_for("").is_err());
        assert!(archive.path_for("9f1c-uuid").is_ok());
    }
}
