//! Project registration.
//!
//! Validates an incoming project, assigns storage keys for its two uploads,
//! optionally provisions a folder on the video host, and persists the project
//! before handing back the ingest message.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::http::redact_id;
use crate::ingest::IngestRequest;
use crate::storage::{ProjectRow, RecordStore};

/// Accepted template video extensions and their media types.
const VIDEO_TYPES: &[(&str, &str)] = &[
    (".mp4", "video/mp4"),
    (".webm", "video/webm"),
    (".mkv", "video/x-matroska"),
];

/// Accepted lead source extensions and their media types.
const SOURCE_TYPES: &[(&str, &str)] = &[(".csv", "text/csv")];

/// Creates a per-project folder on the video host, returning its URI.
pub trait FolderProvisioner: Send + Sync {
    fn provision_folder<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String, AppError>> + Send + 'a>>;
}

/// A project as submitted by the uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProjectRequest {
    pub recipient: String,
    pub template_video_name: String,
    pub spreadsheet_name: String,
}

/// A stored upload's key and media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSlot {
    pub key: String,
    pub media_type: &'static str,
}

/// Result of a successful registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub template_video: UploadSlot,
    pub spreadsheet: UploadSlot,
    pub folder_uri: Option<String>,
    /// Message to publish once both uploads are in place.
    pub ingest: IngestRequest,
}

/// Matches a file name's extension against an accepted list.
fn media_type_for(name: &str, accepted: &[(&str, &'static str)]) -> Option<(String, &'static str)> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    let ext = format!(".{ext}");
    accepted
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, media_type)| (ext.clone(), *media_type))
}

fn upload_slot(
    name: &str,
    accepted: &[(&str, &'static str)],
    what: &str,
) -> Result<UploadSlot, AppError> {
    let (ext, media_type) = media_type_for(name, accepted).ok_or_else(|| {
        let allowed: Vec<&str> = accepted.iter().map(|(e, _)| *e).collect();
        AppError::InvalidRequest(format!(
            "Unsupported {what} file '{name}', expected one of: {}",
            allowed.join(", ")
        ))
    })?;
    Ok(UploadSlot {
        key: format!("{}{ext}", Uuid::new_v4()),
        media_type,
    })
}

fn validate_recipient(recipient: &str) -> Result<(), AppError> {
    let recipient = recipient.trim();
    if recipient.is_empty() {
        return Err(AppError::InvalidRequest("Recipient is required".to_string()));
    }
    match recipient.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(AppError::InvalidRequest(
            "Recipient must be an email address".to_string(),
        )),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registrar
// ─────────────────────────────────────────────────────────────────────────────

pub struct ProjectRegistrar {
    store: Arc<dyn RecordStore>,
    folders: Option<Arc<dyn FolderProvisioner>>,
}

impl ProjectRegistrar {
    pub fn new(store: Arc<dyn RecordStore>, folders: Option<Arc<dyn FolderProvisioner>>) -> Self {
        Self { store, folders }
    }

    /// Registers a new project.
    ///
    /// The project row is written before the ingest message is returned, so a
    /// consumer of that message always finds it.
    pub async fn register(&self, request: &NewProjectRequest) -> Result<Registration, AppError> {
        validate_recipient(&request.recipient)?;
        let template_video = upload_slot(&request.template_video_name, VIDEO_TYPES, "video")?;
        let spreadsheet = upload_slot(&request.spreadsheet_name, SOURCE_TYPES, "lead source")?;

        let project_id = Uuid::new_v4().to_string();
        let folder_uri = match &self.folders {
            Some(folders) => Some(folders.provision_folder(&project_id).await?),
            None => None,
        };

        let recipient = request.recipient.trim().to_string();
        let project = ProjectRow::new(
            project_id.clone(),
            recipient.clone(),
            template_video.key.clone(),
            spreadsheet.key.clone(),
            folder_uri.clone(),
        );
        self.store.save_project(&project).await?;

        info!(
            project_id = %redact_id(&project_id),
            has_folder = folder_uri.is_some(),
            "[INGEST] Project registered"
        );

        let ingest = IngestRequest {
            project_id,
            recipient,
            template_video_key: template_video.key.clone(),
            spreadsheet_key: spreadsheet.key.clone(),
        };

        Ok(Registration {
            template_video,
            spreadsheet,
            folder_uri,
            ingest,
        })
    }
}
