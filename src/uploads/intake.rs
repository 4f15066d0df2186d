//! Upload intake: stream a client file into the pending area and record it.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::layout::{sanitize_filename, LayoutError, StorageLayout};
use super::models::{MediaType, UploadRecord};
use super::store::UploadStore;
use crate::notifications::{DeliveryReport, NotificationEvent, NotificationOutcome, NotifierDispatch};
use crate::server::metrics;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Attempts at claiming a free pending name before giving up.
const MAX_CLAIM_ATTEMPTS: usize = 16;

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File too large: limit is {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error("Unsupported file type '.{extension}' for {filename}")]
    UnsupportedType { filename: String, extension: String },

    #[error("Upload stream ended early: {0}")]
    Interrupted(io::Error),

    #[error("Failed to store upload: {0}")]
    StorageWriteFailed(io::Error),

    #[error("Upload database error: {0}")]
    Store(anyhow::Error),
}

impl IntakeError {
    fn label(&self) -> &'static str {
        match self {
            Self::InvalidFilename(_) => "invalid_filename",
            Self::PayloadTooLarge { .. } => "too_large",
            Self::UnsupportedType { .. } => "unsupported_type",
            Self::Interrupted(_) => "interrupted",
            Self::StorageWriteFailed(_) => "storage_failed",
            Self::Store(_) => "store_failed",
        }
    }
}

impl From<LayoutError> for IntakeError {
    fn from(err: LayoutError) -> Self {
        Self::InvalidFilename(err.to_string())
    }
}

/// Metadata accompanying an upload body.
#[derive(Debug, Clone)]
pub struct IntakeRequest {
    pub media_type: MediaType,
    pub original_filename: String,
    pub uploader_email: String,
    /// Size announced by the client, if any. Checked before writing.
    pub declared_size: Option<u64>,
}

/// Returned by a successful intake.
#[derive(Debug)]
pub struct IntakeReceipt {
    pub record: UploadRecord,
    /// Background delivery of the "received" notification.
    pub notification: JoinHandle<DeliveryReport>,
}

pub struct UploadIntake {
    layout: Arc<StorageLayout>,
    store: Arc<dyn UploadStore>,
    notifier: Arc<NotifierDispatch>,
    max_size_bytes: Option<u64>,
}

/// Removes a partially written file unless committed.
struct PartialFile {
    path: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(
                        "Failed to remove partial upload {}: {}",
                        self.path.display(),
                        e
                    );
                }
            }
        }
    }
}

impl UploadIntake {
    pub fn new(
        layout: Arc<StorageLayout>,
        store: Arc<dyn UploadStore>,
        notifier: Arc<NotifierDispatch>,
        max_size_bytes: Option<u64>,
    ) -> Self {
        Self {
            layout,
            store,
            notifier,
            max_size_bytes,
        }
    }

    pub fn max_size_bytes(&self) -> Option<u64> {
        self.max_size_bytes
    }

    /// Store `body` under a fresh pending name and create its record.
    ///
    /// On any error nothing is left behind: no file in the pending area and
    /// no record. The "received" notification is only dispatched once the
    /// record is committed.
    pub async fn accept<R>(&self, request: IntakeRequest, body: R) -> Result<IntakeReceipt, IntakeError>
    where
        R: AsyncRead + Unpin,
    {
        match self.store_upload(&request, body).await {
            Ok(record) => {
                metrics::record_intake("accepted");
                metrics::record_upload_bytes(record.media_type, record.size_bytes);
                info!(
                    "Accepted upload {} ({}, {}) from {} as {}",
                    record.id,
                    record.media_type,
                    record.display_size(),
                    record.uploader_email,
                    record.stored_filename
                );
                let notification = self
                    .notifier
                    .dispatch(NotificationEvent::new(record.clone(), NotificationOutcome::Received));
                Ok(IntakeReceipt {
                    record,
                    notification,
                })
            }
            Err(e) => {
                metrics::record_intake(e.label());
                warn!(
                    "Rejected upload '{}' from {}: {}",
                    request.original_filename, request.uploader_email, e
                );
                Err(e)
            }
        }
    }

    async fn store_upload<R>(&self, request: &IntakeRequest, body: R) -> Result<UploadRecord, IntakeError>
    where
        R: AsyncRead + Unpin,
    {
        let sanitized = sanitize_filename(&request.original_filename)?;
        if !self.layout.is_allowed_extension(&sanitized) {
            let extension = Path::new(&sanitized)
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(IntakeError::UnsupportedType {
                filename: sanitized,
                extension,
            });
        }
        if let (Some(limit), Some(declared)) = (self.max_size_bytes, request.declared_size) {
            if declared > limit {
                return Err(IntakeError::PayloadTooLarge { limit });
            }
        }

        let (stored_filename, file, path) = self.claim_pending_file(request.media_type, &sanitized).await?;
        let partial = PartialFile::new(path);

        let size_bytes = self.copy_body(body, file).await?;

        let record = UploadRecord::new_pending(
            request.media_type,
            request.original_filename.trim(),
            stored_filename,
            request.uploader_email.as_str(),
            size_bytes,
        );
        self.store.create(&record).map_err(IntakeError::Store)?;
        partial.commit();
        Ok(record)
    }

    /// Pick a free name and create the file exclusively. A concurrent intake
    /// racing for the same name loses the `create_new` and tries the next one.
    async fn claim_pending_file(
        &self,
        media_type: MediaType,
        sanitized: &str,
    ) -> Result<(String, fs::File, PathBuf), IntakeError> {
        for _ in 0..MAX_CLAIM_ATTEMPTS {
            let name = self.layout.next_free_filename(media_type, sanitized)?;
            let path = self.layout.pending_path_for(media_type, &name)?;
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => return Ok((name, file, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(IntakeError::StorageWriteFailed(e)),
            }
        }
        Err(IntakeError::StorageWriteFailed(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("could not claim a pending name for {}", sanitized),
        )))
    }

    /// Copy the body into `file`, enforcing the size limit on the bytes
    /// actually received. Returns the number of bytes written.
    async fn copy_body<R>(&self, mut body: R, mut file: fs::File) -> Result<u64, IntakeError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written: u64 = 0;
        loop {
            let n = body.read(&mut buffer).await.map_err(IntakeError::Interrupted)?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if let Some(limit) = self.max_size_bytes {
                if written > limit {
                    return Err(IntakeError::PayloadTooLarge { limit });
                }
            }
            file.write_all(&buffer[..n])
                .await
                .map_err(IntakeError::StorageWriteFailed)?;
        }
        file.flush().await.map_err(IntakeError::StorageWriteFailed)?;
        file.sync_all().await.map_err(IntakeError::StorageWriteFailed)?;
        Ok(written)
    }
}
