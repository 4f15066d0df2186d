//! Admin routes: review queue, decisions, media server check.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::identity::AdminIdentity;
use super::state::{GuardedDecisionEngine, GuardedMediaServer, GuardedUploadStore, ServerState};
use super::ErrorResponse;
use crate::media_server::{MediaServerError, MediaServerInfo};
use crate::uploads::{Decision, DecisionError, DecisionOutcome, UploadRecord, UploadStatus};

const PENDING_LIMIT: usize = 1000;
const RECENTLY_DECIDED_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct AdminOverview {
    pub pending: Vec<UploadRecord>,
    pub recent: Vec<UploadRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DenyBody {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub record: UploadRecord,
    /// Only set for approvals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rescan: Option<&'static str>,
}

impl From<DecisionOutcome> for DecisionResponse {
    fn from(outcome: DecisionOutcome) -> Self {
        Self {
            record: outcome.record,
            rescan: outcome.publish.map(|p| p.rescan.as_str()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MediaServerStatus {
    Connected(MediaServerInfo),
    Disabled,
    Error { message: String },
}

impl IntoResponse for DecisionError {
    fn into_response(self) -> Response {
        let status = match &self {
            DecisionError::RecordNotFound(_) => StatusCode::NOT_FOUND,
            DecisionError::StaleStatus { .. } => StatusCode::CONFLICT,
            DecisionError::LibraryPublish { .. } => StatusCode::SERVICE_UNAVAILABLE,
            DecisionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match &self {
            DecisionError::LibraryPublish { .. } => {
                format!("{}; the upload is still pending and can be approved again", self)
            }
            _ => self.to_string(),
        };
        (status, Json(ErrorResponse { error })).into_response()
    }
}

/// GET /admin/uploads
async fn get_overview(_admin: AdminIdentity, State(store): State<GuardedUploadStore>) -> Response {
    let pending = store.list_by_status(UploadStatus::Pending, PENDING_LIMIT);
    let recent = store.list_recently_decided(RECENTLY_DECIDED_LIMIT);
    match (pending, recent) {
        (Ok(pending), Ok(recent)) => Json(AdminOverview { pending, recent }).into_response(),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to load admin overview: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to load uploads".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// POST /admin/uploads/{id}/approve
async fn approve(
    admin: AdminIdentity,
    State(decisions): State<GuardedDecisionEngine>,
    Path(id): Path<String>,
) -> Response {
    match decisions.decide(&id, Decision::Approve, &admin.email).await {
        Ok(outcome) => Json(DecisionResponse::from(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /admin/uploads/{id}/deny - optional JSON body `{"notes": "..."}`
async fn deny(
    admin: AdminIdentity,
    State(decisions): State<GuardedDecisionEngine>,
    Path(id): Path<String>,
    body: Option<Json<DenyBody>>,
) -> Response {
    let notes = body.and_then(|Json(body)| body.notes);
    match decisions
        .decide(&id, Decision::Deny { notes }, &admin.email)
        .await
    {
        Ok(outcome) => Json(DecisionResponse::from(outcome)).into_response(),
        Err(e) => e.into_response(),
    }
}

/// GET /admin/media-server
async fn get_media_server(
    _admin: AdminIdentity,
    State(media_server): State<GuardedMediaServer>,
) -> Json<MediaServerStatus> {
    let status = match media_server.server_info().await {
        Ok(info) => MediaServerStatus::Connected(info),
        Err(MediaServerError::Disabled) => MediaServerStatus::Disabled,
        Err(e) => MediaServerStatus::Error {
            message: e.to_string(),
        },
    };
    Json(status)
}

pub fn admin_routes() -> Router<ServerState> {
    Router::new()
        .route("/uploads", get(get_overview))
        .route("/uploads/{id}/approve", post(approve))
        .route("/uploads/{id}/deny", post(deny))
        .route("/media-server", get(get_media_server))
}
