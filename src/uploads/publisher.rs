//! Moves approved uploads from the pending area into the library and asks the
//! media server to pick them up.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use super::layout::{LayoutError, StorageLayout};
use super::models::{MediaType, UploadRecord};
use crate::media_server::{MediaServer, MediaServerError};
use crate::server::metrics;

/// Why a move into the library failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveFailure {
    DestinationExists,
    SourceMissing,
    DiskFull,
    PermissionDenied,
    Other,
}

impl MoveFailure {
    fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::AlreadyExists => Self::DestinationExists,
            io::ErrorKind::NotFound => Self::SourceMissing,
            io::ErrorKind::StorageFull => Self::DiskFull,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DestinationExists => "destination exists",
            Self::SourceMissing => "source file missing",
            Self::DiskFull => "disk full",
            Self::PermissionDenied => "permission denied",
            Self::Other => "i/o error",
        }
    }
}

impl std::fmt::Display for MoveFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to move {from:?} to {to:?}: {reason} ({detail})")]
    MoveFailed {
        reason: MoveFailure,
        from: PathBuf,
        to: PathBuf,
        detail: String,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

impl PublishError {
    fn move_failed(reason: MoveFailure, from: &Path, to: &Path, detail: impl ToString) -> Self {
        Self::MoveFailed {
            reason,
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            detail: detail.to_string(),
        }
    }

    fn from_io(err: io::Error, from: &Path, to: &Path) -> Self {
        Self::move_failed(MoveFailure::from_io(&err), from, to, err)
    }
}

/// What happened to the library rescan request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RescanOutcome {
    Requested,
    /// No media server configured.
    Skipped,
    Failed(String),
}

impl RescanOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Skipped => "skipped",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub library_path: PathBuf,
    pub rescan: RescanOutcome,
}

/// Filesystem primitives used to place files in the library.
#[async_trait]
pub trait LibraryFs: Send + Sync {
    /// Move `from` to `to` on the same filesystem. Fails with
    /// `AlreadyExists` instead of replacing `to`, and with `CrossesDevices`
    /// when the two paths are on different filesystems.
    async fn rename_no_replace(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Copy `from` into a new file `to` and sync it. Returns the bytes copied.
    async fn copy_new(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

/// The local filesystem.
pub struct LocalFs;

#[async_trait]
impl LibraryFs for LocalFs {
    async fn rename_no_replace(&self, from: &Path, to: &Path) -> io::Result<()> {
        // A hard link never replaces an existing name. Some filesystems
        // (FAT, many network shares) refuse links with EPERM.
        match fs::hard_link(from, to).await {
            Ok(()) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
                ) =>
            {
                if fs::try_exists(to).await? {
                    return Err(io::Error::from(io::ErrorKind::AlreadyExists));
                }
                return fs::rename(from, to).await;
            }
            Err(e) => return Err(e),
        }
        if let Err(e) = fs::remove_file(from).await {
            if let Err(cleanup) = fs::remove_file(to).await {
                warn!("Failed to remove link {}: {}", to.display(), cleanup);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn copy_new(&self, from: &Path, to: &Path) -> io::Result<u64> {
        let mut reader = fs::File::open(from).await?;
        let mut writer = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(to)
            .await?;
        let copied = tokio::io::copy(&mut reader, &mut writer).await?;
        writer.sync_all().await?;
        Ok(copied)
    }
}

pub struct LibraryPublisher {
    layout: Arc<StorageLayout>,
    media_server: Arc<dyn MediaServer>,
    fs: Arc<dyn LibraryFs>,
}

impl LibraryPublisher {
    pub fn new(layout: Arc<StorageLayout>, media_server: Arc<dyn MediaServer>) -> Self {
        Self::with_fs(layout, media_server, Arc::new(LocalFs))
    }

    pub fn with_fs(
        layout: Arc<StorageLayout>,
        media_server: Arc<dyn MediaServer>,
        fs: Arc<dyn LibraryFs>,
    ) -> Self {
        Self {
            layout,
            media_server,
            fs,
        }
    }

    /// Move the record's file into its library bucket, then request a rescan.
    ///
    /// Only the move can fail; a failed rescan is reported in the
    /// [`PublishReport`] and the file stays published.
    pub async fn publish(&self, record: &UploadRecord) -> Result<PublishReport, PublishError> {
        let source = self.layout.pending_path(record)?;
        let destination = self.layout.library_path(record)?;

        if let Err(e) = move_with(self.fs.as_ref(), &source, &destination).await {
            metrics::record_publish("failed");
            return Err(e);
        }
        metrics::record_publish("moved");
        info!(
            "Published upload {} to {}",
            record.id,
            destination.display()
        );

        let rescan = self.request_rescan(record.media_type).await;
        Ok(PublishReport {
            library_path: destination,
            rescan,
        })
    }

    pub async fn request_rescan(&self, media_type: MediaType) -> RescanOutcome {
        let outcome = match self.media_server.refresh(media_type).await {
            Ok(()) => RescanOutcome::Requested,
            Err(MediaServerError::Disabled) => {
                debug!("Media server not configured, skipping rescan");
                RescanOutcome::Skipped
            }
            Err(e) => {
                warn!("Library rescan for {} failed: {}", media_type, e);
                RescanOutcome::Failed(e.to_string())
            }
        };
        metrics::record_rescan(outcome.as_str());
        outcome
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::CrossesDevices
}

fn destination_exists(source: &Path, destination: &Path) -> PublishError {
    PublishError::move_failed(
        MoveFailure::DestinationExists,
        source,
        destination,
        "a file with this name is already in the library",
    )
}

/// Move `source` to `destination` on the local filesystem, never overwriting
/// an existing file.
pub async fn move_file(source: &Path, destination: &Path) -> Result<(), PublishError> {
    move_with(&LocalFs, source, destination).await
}

/// Tries a same-filesystem move first and falls back to [`copy_then_remove`]
/// when the two paths live on different filesystems.
async fn move_with(
    library_fs: &dyn LibraryFs,
    source: &Path,
    destination: &Path,
) -> Result<(), PublishError> {
    if fs::try_exists(destination).await.unwrap_or(false) {
        return Err(destination_exists(source, destination));
    }
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PublishError::from_io(e, source, destination))?;
    }

    match library_fs.rename_no_replace(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!(
                "{} and {} are on different filesystems, copying",
                source.display(),
                destination.display()
            );
            copy_then_remove(library_fs, source, destination).await
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            Err(destination_exists(source, destination))
        }
        Err(e) => Err(PublishError::from_io(e, source, destination)),
    }
}

/// Cross-filesystem move.
///
/// The copy goes to a hidden temporary name next to the destination, is
/// synced and size-checked, then moved into place without replacing
/// anything. The source is removed last; if that fails the destination copy
/// is removed so the file exists in exactly one place.
pub(crate) async fn copy_then_remove(
    library_fs: &dyn LibraryFs,
    source: &Path,
    destination: &Path,
) -> Result<(), PublishError> {
    let file_name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = destination.with_file_name(format!(".{}.partial", file_name));

    let expected = fs::metadata(source)
        .await
        .map_err(|e| PublishError::from_io(e, source, destination))?
        .len();

    // Left over from an interrupted earlier attempt.
    let _ = fs::remove_file(&temp).await;

    match library_fs.copy_new(source, &temp).await {
        Ok(copied) if copied == expected => {}
        Ok(copied) => {
            let _ = fs::remove_file(&temp).await;
            return Err(PublishError::move_failed(
                MoveFailure::Other,
                source,
                destination,
                format!("copied {} of {} bytes", copied, expected),
            ));
        }
        Err(e) => {
            let _ = fs::remove_file(&temp).await;
            return Err(PublishError::from_io(e, source, destination));
        }
    }

    if let Err(e) = library_fs.rename_no_replace(&temp, destination).await {
        let _ = fs::remove_file(&temp).await;
        if e.kind() == io::ErrorKind::AlreadyExists {
            return Err(PublishError::move_failed(
                MoveFailure::DestinationExists,
                source,
                destination,
                "destination appeared during copy",
            ));
        }
        return Err(PublishError::from_io(e, source, destination));
    }

    if let Err(e) = fs::remove_file(source).await {
        warn!(
            "Copied {} but could not remove it, undoing copy: {}",
            source.display(),
            e
        );
        if let Err(cleanup) = fs::remove_file(destination).await {
            warn!(
                "Failed to remove library copy {}: {}",
                destination.display(),
                cleanup
            );
        }
        return Err(PublishError::move_failed(
            MoveFailure::Other,
            source,
            destination,
            format!("source could not be removed: {}", e),
        ));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::{CrossDeviceFs, RacingFs};
    use super::*;
    use crate::media_server::testing::RecordingMediaServer;
    use crate::media_server::DisabledMediaServer;
    use tempfile::TempDir;

    struct Fixture {
        _pending: TempDir,
        _library: TempDir,
        layout: Arc<StorageLayout>,
    }

    async fn fixture() -> Fixture {
        let pending = TempDir::new().unwrap();
        let library = TempDir::new().unwrap();
        let layout = Arc::new(StorageLayout::new(
            pending.path(),
            library.path(),
            &["mkv".to_string()],
        ));
        layout.ensure_dirs().await.unwrap();
        Fixture {
            _pending: pending,
            _library: library,
            layout,
        }
    }

    fn record(name: &str) -> UploadRecord {
        UploadRecord::new_pending(MediaType::Movie, name, name, "ripley@example.com", 5)
    }

    #[tokio::test]
    async fn test_publish_moves_and_requests_rescan() {
        let fx = fixture().await;
        let server = Arc::new(RecordingMediaServer::default());
        let publisher = LibraryPublisher::new(fx.layout.clone(), server.clone());
        let rec = record("Alien.mkv");
        fs::write(fx.layout.pending_path(&rec).unwrap(), b"alien").await.unwrap();

        let report = publisher.publish(&rec).await.unwrap();

        assert_eq!(report.rescan, RescanOutcome::Requested);
        assert_eq!(report.library_path, fx.layout.library_path(&rec).unwrap());
        assert_eq!(fs::read(&report.library_path).await.unwrap(), b"alien");
        assert!(!fx.layout.pending_path(&rec).unwrap().exists());
        assert_eq!(*server.refreshed.lock().unwrap(), vec![MediaType::Movie]);
    }

    #[tokio::test]
    async fn test_existing_destination_is_never_overwritten() {
        let fx = fixture().await;
        let publisher = LibraryPublisher::new(fx.layout.clone(), Arc::new(DisabledMediaServer));
        let rec = record("Alien.mkv");
        fs::write(fx.layout.pending_path(&rec).unwrap(), b"new").await.unwrap();
        fs::write(fx.layout.library_path(&rec).unwrap(), b"old").await.unwrap();

        let err = publisher.publish(&rec).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::MoveFailed {
                reason: MoveFailure::DestinationExists,
                ..
            }
        ));
        assert_eq!(fs::read(fx.layout.library_path(&rec).unwrap()).await.unwrap(), b"old");
        assert_eq!(fs::read(fx.layout.pending_path(&rec).unwrap()).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_source_fails_move() {
        let fx = fixture().await;
        let publisher = LibraryPublisher::new(fx.layout.clone(), Arc::new(DisabledMediaServer));

        let err = publisher.publish(&record("Ghost.mkv")).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::MoveFailed {
                reason: MoveFailure::SourceMissing,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_rescan_failure_is_not_fatal() {
        let fx = fixture().await;
        let server = Arc::new(RecordingMediaServer {
            fail: true,
            ..Default::default()
        });
        let publisher = LibraryPublisher::new(fx.layout.clone(), server);
        let rec = record("Alien.mkv");
        fs::write(fx.layout.pending_path(&rec).unwrap(), b"alien").await.unwrap();

        let report = publisher.publish(&rec).await.unwrap();

        assert!(matches!(report.rescan, RescanOutcome::Failed(_)));
        assert!(report.library_path.exists());
    }

    #[tokio::test]
    async fn test_disabled_media_server_skips_rescan() {
        let fx = fixture().await;
        let publisher = LibraryPublisher::new(fx.layout.clone(), Arc::new(DisabledMediaServer));
        assert_eq!(
            publisher.request_rescan(MediaType::Tv).await,
            RescanOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn test_copy_then_remove_leaves_single_copy() {
        let fx = fixture().await;
        let rec = record("Alien.mkv");
        let source = fx.layout.pending_path(&rec).unwrap();
        let destination = fx.layout.library_path(&rec).unwrap();
        fs::write(&source, vec![7u8; 64 * 1024]).await.unwrap();

        copy_then_remove(&LocalFs, &source, &destination).await.unwrap();

        assert!(!source.exists());
        assert_eq!(fs::read(&destination).await.unwrap().len(), 64 * 1024);
        let leftovers: Vec<_> = std::fs::read_dir(fx.layout.library_dir(MediaType::Movie))
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[tokio::test]
    async fn test_copy_then_remove_refuses_existing_destination() {
        let fx = fixture().await;
        let rec = record("Alien.mkv");
        let source = fx.layout.pending_path(&rec).unwrap();
        let destination = fx.layout.library_path(&rec).unwrap();
        fs::write(&source, b"new").await.unwrap();
        fs::write(&destination, b"old").await.unwrap();

        let err = copy_then_remove(&LocalFs, &source, &destination).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::MoveFailed {
                reason: MoveFailure::DestinationExists,
                ..
            }
        ));
        assert!(source.exists());
        assert_eq!(fs::read(&destination).await.unwrap(), b"old");
    }
    #[tokio::test]
    async fn test_cross_device_publish_copies_and_removes_source() {
        let fx = fixture().await;
        let publisher = LibraryPublisher::with_fs(
            fx.layout.clone(),
            Arc::new(DisabledMediaServer),
            Arc::new(CrossDeviceFs::default()),
        );
        let rec = record("Alien.mkv");
        fs::write(fx.layout.pending_path(&rec).unwrap(), b"alien").await.unwrap();

        let report = publisher.publish(&rec).await.unwrap();

        assert_eq!(fs::read(&report.library_path).await.unwrap(), b"alien");
        assert!(!fx.layout.pending_path(&rec).unwrap().exists());
    }

    #[tokio::test]
    async fn test_destination_created_during_move_is_not_replaced() {
        let fx = fixture().await;
        let publisher = LibraryPublisher::with_fs(
            fx.layout.clone(),
            Arc::new(DisabledMediaServer),
            Arc::new(RacingFs::default()),
        );
        let rec = record("Alien.mkv");
        fs::write(fx.layout.pending_path(&rec).unwrap(), b"alien").await.unwrap();

        let err = publisher.publish(&rec).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::MoveFailed {
                reason: MoveFailure::DestinationExists,
                ..
            }
        ));
        assert_eq!(
            fs::read(fx.layout.library_path(&rec).unwrap()).await.unwrap(),
            b"intruder"
        );
        assert_eq!(
            fs::read(fx.layout.pending_path(&rec).unwrap()).await.unwrap(),
            b"alien"
        );
    }

    #[tokio::test]
    async fn test_destination_created_during_copy_is_not_replaced() {
        let fx = fixture().await;
        let rec = record("Alien.mkv");
        let source = fx.layout.pending_path(&rec).unwrap();
        let destination = fx.layout.library_path(&rec).unwrap();
        fs::write(&source, b"alien").await.unwrap();

        let racing = RacingFs { cross_device: true };
        let err = move_with(&racing, &source, &destination).await.unwrap_err();

        assert!(matches!(
            err,
            PublishError::MoveFailed {
                reason: MoveFailure::DestinationExists,
                ..
            }
        ));
        assert_eq!(fs::read(&destination).await.unwrap(), b"intruder");
        assert_eq!(fs::read(&source).await.unwrap(), b"alien");
        let entries: Vec<_> = std::fs::read_dir(fx.layout.library_dir(MediaType::Movie))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["Alien.mkv".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_partial_copy_is_replaced() {
        let fx = fixture().await;
        let rec = record("Alien.mkv");
        let source = fx.layout.pending_path(&rec).unwrap();
        let destination = fx.layout.library_path(&rec).unwrap();
        fs::write(&source, b"alien").await.unwrap();
        fs::write(destination.with_file_name(".Alien.mkv.partial"), b"al")
            .await
            .unwrap();

        copy_then_remove(&LocalFs, &source, &destination).await.unwrap();

        assert_eq!(fs::read(&destination).await.unwrap(), b"alien");
        assert!(!destination.with_file_name(".Alien.mkv.partial").exists());
    }
}
