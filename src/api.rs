use std::collections::HashMap;

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Path, Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use tokio::fs;
use tracing::error;

use crate::{
    artifact_store, cleanup,
    models::{ConvertOptions, SubmitAcceptedResponse, TaskState},
    scheduler::SubmitError,
    AppState,
};

pub async fn healthz() -> impl IntoResponse {
    Json(json!({ "ok": true, "timestamp": Utc::now() }))
}

/// Background sweep hook: every request except the explicit cleanup route
/// may claim the daily gate; the sweep itself runs detached.
pub async fn sweep_on_request(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() != "/cleanup" {
        cleanup::maybe_spawn_sweep(&state).await;
    }
    next.run(request).await
}

pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut file: Option<(String, Bytes)> = None;
    let mut fields: HashMap<String, String> = HashMap::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "MALFORMED_UPLOAD",
                    &format!("Failed to read upload: {err}"),
                );
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            let file_name = field.file_name().unwrap_or_default().to_string();
            match field.bytes().await {
                Ok(bytes) => file = Some((file_name, bytes)),
                Err(err) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "MALFORMED_UPLOAD",
                        &format!("Failed to read uploaded file: {err}"),
                    );
                }
            }
        } else if !name.is_empty() {
            match field.text().await {
                Ok(value) => {
                    fields.insert(name, value);
                }
                Err(err) => {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "MALFORMED_UPLOAD",
                        &format!("Failed to read field {name}: {err}"),
                    );
                }
            }
        }
    }

    let Some((raw_name, bytes)) = file else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "MISSING_FILE",
            "Request must include a file field.",
        );
    };
    let Some(file_name) = sanitize_filename(&raw_name) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_FILENAME",
            "Uploaded file name is empty or invalid.",
        );
    };
    if !file_name.to_ascii_lowercase().ends_with(".pdf") {
        return error_response(
            StatusCode::BAD_REQUEST,
            "UNSUPPORTED_FILE_TYPE",
            "Only PDF uploads are supported.",
        );
    }

    let options = match ConvertOptions::from_fields(&fields) {
        Ok(options) => options,
        Err(err) => {
            return error_response(StatusCode::BAD_REQUEST, "INVALID_OPTIONS", &err.to_string());
        }
    };

    let input_path = state.config.upload_root.join(&file_name);
    if let Err(err) = fs::write(&input_path, &bytes).await {
        error!("Failed to store upload {}: {err}", input_path.display());
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "UPLOAD_WRITE_FAILED",
            "Failed to store the uploaded file.",
        );
    }

    match state.scheduler.submit(&input_path, options).await {
        Ok(task_id) => {
            let response = SubmitAcceptedResponse {
                status_url: format!("/status/{task_id}"),
                task_id,
                status: TaskState::Queued,
                message: "Conversion task queued.".to_string(),
            };
            (StatusCode::ACCEPTED, Json(response)).into_response()
        }
        Err(SubmitError::QueueUnavailable) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_UNAVAILABLE",
            "Conversion queue is unavailable.",
        ),
        Err(err) => {
            error!("Failed to submit conversion task: {err}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SUBMISSION_FAILED",
                &err.to_string(),
            )
        }
    }
}

pub async fn status(State(state): State<AppState>, Path(task_id): Path<String>) -> Response {
    match state.tasks.get(&task_id).await {
        Some(task) => (StatusCode::OK, Json(task.to_response())).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            "TASK_NOT_FOUND",
            "Conversion task not found.",
        ),
    }
}

pub async fn download(State(state): State<AppState>, Path(file_name): Path<String>) -> Response {
    let Some(path) = artifact_store::resolve_archive(&state.config.output_root, &file_name) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_ARCHIVE_NAME",
            "Archive names must be bare .zip file names.",
        );
    };

    let bytes = match fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return error_response(
                StatusCode::NOT_FOUND,
                "ARCHIVE_NOT_FOUND",
                "Archive not found.",
            );
        }
        Err(err) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ARCHIVE_READ_FAILED",
                &format!("Failed to read archive: {err}"),
            );
        }
    };

    let content_disposition = format!("attachment; filename=\"{file_name}\"");
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(header::CONTENT_DISPOSITION, content_disposition)
        .body(Body::from(bytes))
        .unwrap_or_else(|_| {
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "RESPONSE_BUILD_FAILED",
                "Failed to build download response.",
            )
        })
}

pub async fn trigger_cleanup(State(state): State<AppState>) -> Response {
    match cleanup::sweep_all(&state.config).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "message": "Cleanup completed.",
                "uploadsRemoved": summary.uploads_removed,
                "outputsRemoved": summary.outputs_removed,
            })),
        )
            .into_response(),
        Err(err) => {
            error!("On-demand cleanup failed: {err:#}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "CLEANUP_FAILED",
                "Cleanup failed.",
            )
        }
    }
}

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        })),
    )
        .into_response()
}

/// Reduces an uploaded file name to a safe basename: path components are
/// dropped, anything outside `[A-Za-z0-9._-]` becomes `_`, and leading
/// dots are stripped.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::sanitize_filename;

    #[test]
    fn sanitize_keeps_plain_names() {
        assert_eq!(
            sanitize_filename("report-2025_final.pdf").as_deref(),
            Some("report-2025_final.pdf")
        );
    }

    #[test]
    fn sanitize_drops_path_components() {
        assert_eq!(
            sanitize_filename("../../etc/passwd.pdf").as_deref(),
            Some("passwd.pdf")
        );
        assert_eq!(
            sanitize_filename("C:\\uploads\\doc.pdf").as_deref(),
            Some("doc.pdf")
        );
    }

    #[test]
    fn sanitize_replaces_unexpected_characters() {
        assert_eq!(
            sanitize_filename("my report (v2).pdf").as_deref(),
            Some("my_report__v2_.pdf")
        );
    }

    #[test]
    fn sanitize_strips_leading_dots() {
        assert_eq!(sanitize_filename("..hidden.pdf").as_deref(), Some("hidden.pdf"));
        assert_eq!(sanitize_filename("..."), None);
        assert_eq!(sanitize_filename(""), None);
    }
}
