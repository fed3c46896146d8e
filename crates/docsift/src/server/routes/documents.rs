//! Document upload endpoint

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::resources::ArtifactKind;
use crate::server::state::AppState;
use crate::types::{FileKind, OptionOverrides, ProcessingOptions, TaskStatus};

/// Response from a document submission
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub file_name: String,
}

struct Upload {
    file_name: String,
    content_type: String,
    data: bytes::Bytes,
}

/// POST /api/documents - Upload one document for async processing
///
/// Multipart fields: `file` (required) and `options` (optional JSON).
pub async fn submit_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let mut upload = None;
    let mut options = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::InvalidOptions(format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        if name == "options" {
            let data = field.bytes().await.map_err(|e| {
                Error::InvalidOptions(format!("Failed to read options: {}", e))
            })?;
            options = Some(parse_options(&data, state.orchestrator().default_options())?);
            continue;
        }

        if name != "file" {
            tracing::debug!("Ignoring multipart field {}", name);
            continue;
        }

        let file_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| Error::InvalidOptions("file field has no file name".to_string()))?;
        // Fail fast before buffering the body
        FileKind::from_file_name(&file_name)?;

        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| FileKind::mime_for(&file_name));
        let data = field.bytes().await.map_err(|e| {
            Error::InvalidOptions(format!("Failed to read file {}: {}", file_name, e))
        })?;

        upload = Some(Upload {
            file_name,
            content_type,
            data,
        });
    }

    let upload = upload.ok_or_else(|| Error::InvalidOptions("No file provided".to_string()))?;
    if let Some(options) = &options {
        options.validate()?;
    }

    let task_id = Uuid::new_v4();
    let path = store_upload(&state, task_id, &upload).await?;

    let orchestrator = state.orchestrator();
    let registry = orchestrator.resources().temp_files();
    let session = task_id.to_string();
    registry.register(&path, ArtifactKind::Upload, &session);

    if let Err(e) = orchestrator.submit_with_id(task_id, &path, &upload.file_name, &upload.content_type, options) {
        registry.cleanup_by_session(&session).await;
        return Err(e);
    }

    tracing::info!(
        "[{}] Accepted upload {} ({} bytes)",
        task_id,
        upload.file_name,
        upload.data.len()
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            task_id,
            status: TaskStatus::Pending,
            file_name: upload.file_name,
        }),
    ))
}

/// Client options over the server's defaults
fn parse_options(data: &[u8], defaults: &ProcessingOptions) -> Result<ProcessingOptions> {
    let overrides = serde_json::from_slice::<OptionOverrides>(data)
        .map_err(|e| Error::InvalidOptions(e.to_string()))?;
    Ok(overrides.resolve(defaults))
}

/// Write the upload under the upload dir, named by task id so client names never
/// become paths
async fn store_upload(state: &AppState, task_id: Uuid, upload: &Upload) -> Result<std::path::PathBuf> {
    let dir = state.upload_dir();
    tokio::fs::create_dir_all(dir).await?;

    let extension = std::path::Path::new(&upload.file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_lowercase();
    let path = dir.join(format!("{}.{}", task_id, extension));
    tokio::fs::write(&path, &upload.data).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_options_keep_configured_length() {
        let defaults = ProcessingOptions {
            max_summary_length: 450,
            ..ProcessingOptions::default()
        };
        let options = parse_options(br#"{"generateSummary":true}"#, &defaults).unwrap();
        assert_eq!(options.max_summary_length, 450);
        assert!(options.generate_summary);
    }

    #[test]
    fn test_malformed_options_rejected() {
        let err = parse_options(b"{not json", &ProcessingOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }
}
