//! Admin decisions on pending uploads.
//!
//! Approve: claim the record (pending -> approved) with a guarded update, move
//! the file into the library, then notify. If the move fails the claim is
//! undone (approved -> pending) so the admin can retry. Deny only updates the
//! record; the file stays in the pending area.
//!
//! Each decision runs to completion on its own task, so a caller that goes
//! away mid-approval never leaves a claimed record without its file.

use std::sync::Arc;

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::models::{Decision, StatusChange, UploadRecord, UploadStatus};
use super::publisher::{LibraryPublisher, PublishError, PublishReport};
use super::store::{TransitionOutcome, UploadStore};
use crate::notifications::{DeliveryReport, NotificationEvent, NotificationOutcome, NotifierDispatch};
use crate::server::metrics;

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Upload {0} not found")]
    RecordNotFound(String),

    #[error("Upload {id} has already been {actual}")]
    StaleStatus { id: String, actual: UploadStatus },

    #[error("Upload {id} could not be published: {source}")]
    LibraryPublish {
        id: String,
        #[source]
        source: PublishError,
    },

    #[error("Upload database error: {0}")]
    Store(anyhow::Error),
}

impl DecisionError {
    fn label(&self) -> &'static str {
        match self {
            Self::RecordNotFound(_) => "not_found",
            Self::StaleStatus { .. } => "stale",
            Self::LibraryPublish { .. } => "publish_failed",
            Self::Store(_) => "store_failed",
        }
    }
}

/// A committed decision.
#[derive(Debug)]
pub struct DecisionOutcome {
    pub record: UploadRecord,
    /// Present for approvals.
    pub publish: Option<PublishReport>,
    pub notification: JoinHandle<DeliveryReport>,
}

pub struct DecisionEngine {
    store: Arc<dyn UploadStore>,
    publisher: Arc<LibraryPublisher>,
    notifier: Arc<NotifierDispatch>,
}

impl DecisionEngine {
    pub fn new(
        store: Arc<dyn UploadStore>,
        publisher: Arc<LibraryPublisher>,
        notifier: Arc<NotifierDispatch>,
    ) -> Self {
        Self {
            store,
            publisher,
            notifier,
        }
    }

    /// Apply `decision` to upload `id`.
    ///
    /// The work is spawned and awaited, so dropping the returned future does
    /// not interrupt a move in progress or skip the revert of a failed one.
    pub async fn decide(
        self: &Arc<Self>,
        id: &str,
        decision: Decision,
        admin_email: &str,
    ) -> Result<DecisionOutcome, DecisionError> {
        let engine = self.clone();
        let id = id.to_string();
        let admin_email = admin_email.to_string();
        tokio::spawn(async move { engine.run(&id, decision, &admin_email).await })
            .await
            .unwrap_or_else(|e| {
                Err(DecisionError::Store(
                    anyhow::Error::new(e).context("Decision task did not complete"),
                ))
            })
    }

    async fn run(
        &self,
        id: &str,
        decision: Decision,
        admin_email: &str,
    ) -> Result<DecisionOutcome, DecisionError> {
        let result = match &decision {
            Decision::Approve => self.approve(id, admin_email).await,
            Decision::Deny { .. } => self.deny(id, &decision, admin_email),
        };
        match &result {
            Ok(_) => metrics::record_decision(decision.as_str(), "applied"),
            Err(e) => {
                metrics::record_decision(decision.as_str(), e.label());
                warn!(
                    "Could not {} upload {} for {}: {}",
                    decision.as_str(),
                    id,
                    admin_email,
                    e
                );
            }
        }
        result
    }

    /// Apply `change` if the record is still pending.
    fn claim(&self, id: &str, change: &StatusChange) -> Result<UploadRecord, DecisionError> {
        match self
            .store
            .transition(id, UploadStatus::Pending, change)
            .map_err(DecisionError::Store)?
        {
            TransitionOutcome::Applied(record) => Ok(record),
            TransitionOutcome::Stale { actual } => Err(DecisionError::StaleStatus {
                id: id.to_string(),
                actual,
            }),
            TransitionOutcome::NotFound => Err(DecisionError::RecordNotFound(id.to_string())),
        }
    }

    async fn approve(&self, id: &str, admin_email: &str) -> Result<DecisionOutcome, DecisionError> {
        let record = self.claim(id, &StatusChange::decide(&Decision::Approve, admin_email))?;

        match self.publisher.publish(&record).await {
            Ok(report) => {
                info!(
                    "Upload {} approved by {}, library rescan {}",
                    record.id,
                    admin_email,
                    report.rescan.as_str()
                );
                let notification = self
                    .notifier
                    .dispatch(NotificationEvent::new(record.clone(), NotificationOutcome::Approved));
                Ok(DecisionOutcome {
                    record,
                    publish: Some(report),
                    notification,
                })
            }
            Err(publish_error) => {
                let reverted = self.revert_claim(&record);
                let _ = self.notifier.dispatch(
                    NotificationEvent::new(reverted, NotificationOutcome::ApprovalFailed)
                        .with_detail(publish_error.to_string()),
                );
                Err(DecisionError::LibraryPublish {
                    id: id.to_string(),
                    source: publish_error,
                })
            }
        }
    }

    /// Undo an approval claim after a failed publish. Returns the record as
    /// it now stands (or as it was claimed, if the revert itself failed).
    fn revert_claim(&self, record: &UploadRecord) -> UploadRecord {
        match self
            .store
            .transition(&record.id, UploadStatus::Approved, &StatusChange::RevertToPending)
        {
            Ok(TransitionOutcome::Applied(reverted)) => {
                info!("Upload {} returned to pending after failed publish", record.id);
                reverted
            }
            Ok(other) => {
                error!(
                    "Upload {} changed while being published, not reverting: {:?}",
                    record.id, other
                );
                record.clone()
            }
            Err(e) => {
                error!(
                    "Failed to return upload {} to pending, it stays approved without a library file: {}",
                    record.id, e
                );
                record.clone()
            }
        }
    }

    fn deny(
        &self,
        id: &str,
        decision: &Decision,
        admin_email: &str,
    ) -> Result<DecisionOutcome, DecisionError> {
        let record = self.claim(id, &StatusChange::decide(decision, admin_email))?;
        info!("Upload {} denied by {}", record.id, admin_email);
        let notification = self
            .notifier
            .dispatch(NotificationEvent::new(record.clone(), NotificationOutcome::Denied));
        Ok(DecisionOutcome {
            record,
            publish: None,
            notification,
        })
    }
}
