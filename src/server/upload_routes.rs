//! Uploader-facing routes: upload, status lookup, own uploads.

use std::io;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header::CONTENT_LENGTH, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use serde::Serialize;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::identity::UserIdentity;
use super::state::{GuardedUploadIntake, GuardedUploadStore, ServerState};
use super::ErrorResponse;
use crate::uploads::{IntakeError, IntakeRequest, MediaType, UploadRecord, UploadStatus};

const MY_UPLOADS_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: String,
    pub stored_filename: String,
    pub status: UploadStatus,
    pub size_bytes: u64,
}

/// Public view of an upload; omits who uploaded and who decided.
#[derive(Debug, Serialize)]
pub struct UploadStatusView {
    pub id: String,
    pub original_filename: String,
    pub media_type: MediaType,
    pub status: UploadStatus,
    pub created_at: i64,
    pub decided_at: Option<i64>,
}

impl From<UploadRecord> for UploadStatusView {
    fn from(record: UploadRecord) -> Self {
        Self {
            id: record.id,
            original_filename: record.original_filename,
            media_type: record.media_type,
            status: record.status,
            created_at: record.created_at,
            decided_at: record.decided_at,
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = match &self {
            IntakeError::InvalidFilename(_)
            | IntakeError::UnsupportedType { .. }
            | IntakeError::Interrupted(_) => StatusCode::BAD_REQUEST,
            IntakeError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            IntakeError::StorageWriteFailed(_) | IntakeError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

/// POST /upload - multipart with a `media_type` field followed by a `file` field.
///
/// The file is streamed straight to the pending area, so `media_type` has to
/// arrive first.
async fn upload(
    user: UserIdentity,
    State(intake): State<GuardedUploadIntake>,
    mut multipart: Multipart,
) -> Response {
    let mut media_type: Option<MediaType> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                warn!("Malformed multipart upload from {}: {}", user.email, e);
                return error_response(StatusCode::BAD_REQUEST, "Malformed multipart body");
            }
        };

        match field.name().unwrap_or("") {
            "media_type" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(_) => {
                        return error_response(StatusCode::BAD_REQUEST, "Unreadable media_type")
                    }
                };
                match MediaType::parse(&value) {
                    Some(parsed) => media_type = Some(parsed),
                    None => {
                        return error_response(
                            StatusCode::BAD_REQUEST,
                            format!("Unknown media type: {}", value),
                        )
                    }
                }
            }
            "file" => {
                let Some(media_type) = media_type else {
                    return error_response(
                        StatusCode::BAD_REQUEST,
                        "media_type must be sent before file",
                    );
                };
                let original_filename = field.file_name().unwrap_or("").to_string();
                let declared_size = field
                    .headers()
                    .get(CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                debug!(
                    "{} uploading '{}' as {}",
                    user.email, original_filename, media_type
                );

                let request = IntakeRequest {
                    media_type,
                    original_filename,
                    uploader_email: user.email.clone(),
                    declared_size,
                };
                let body = StreamReader::new(
                    field.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
                );
                tokio::pin!(body);

                return match intake.accept(request, body).await {
                    Ok(receipt) => (
                        StatusCode::CREATED,
                        Json(UploadResponse {
                            id: receipt.record.id,
                            stored_filename: receipt.record.stored_filename,
                            status: receipt.record.status,
                            size_bytes: receipt.record.size_bytes,
                        }),
                    )
                        .into_response(),
                    Err(e) => e.into_response(),
                };
            }
            _ => {}
        }
    }

    error_response(StatusCode::BAD_REQUEST, "No file provided")
}

/// GET /status/{id}
async fn get_status(State(store): State<GuardedUploadStore>, Path(id): Path<String>) -> Response {
    match store.get(&id) {
        Ok(Some(record)) => Json(UploadStatusView::from(record)).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Upload not found"),
        Err(e) => {
            warn!("Failed to get upload {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get upload")
        }
    }
}

/// GET /my-uploads
async fn get_my_uploads(user: UserIdentity, State(store): State<GuardedUploadStore>) -> Response {
    match store.list_by_uploader(&user.email, MY_UPLOADS_LIMIT) {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            warn!("Failed to list uploads for {}: {}", user.email, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list uploads")
        }
    }
}

pub fn upload_routes() -> Router<ServerState> {
    // Size limits are enforced while streaming by the intake.
    let upload_route = Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::disable());

    Router::new()
        .merge(upload_route)
        .route("/status/{id}", get(get_status))
        .route("/my-uploads", get(get_my_uploads))
}
