//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own storage roots and database.

use super::constants::*;
use async_trait::async_trait;
use bozloader::media_server::{MediaServer, MediaServerError, MediaServerInfo};
use bozloader::notifications::NotifierDispatch;
use bozloader::server::{make_app, AdminList, RequestsLoggingLevel, ServerConfig, ServerState};
use bozloader::uploads::{
    DecisionEngine, LibraryPublisher, MediaType, SqliteUploadStore, StorageLayout, UploadIntake,
    UploadStore,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Media server double that remembers every rescan request
#[derive(Default)]
pub struct FakeMediaServer {
    pub refreshed: Mutex<Vec<MediaType>>,
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    async fn refresh(&self, media_type: MediaType) -> Result<(), MediaServerError> {
        self.refreshed.lock().unwrap().push(media_type);
        Ok(())
    }

    async fn server_info(&self) -> Result<MediaServerInfo, MediaServerError> {
        Ok(MediaServerInfo {
            server_name: "Test Plex".to_string(),
            version: "1.0.0".to_string(),
            platform: "Linux".to_string(),
        })
    }
}

/// Test server instance with isolated storage and database
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// Upload store for direct database access in tests
    pub store: Arc<dyn UploadStore>,

    /// Rescans requested by approvals
    pub media_server: Arc<FakeMediaServer>,

    pub pending_root: PathBuf,
    pub library_root: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// Notifications are disabled and the media server is a recording fake.
    ///
    /// # Panics
    ///
    /// Panics if any resource cannot be created or the server doesn't become
    /// ready within timeout.
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pending_root = temp_dir.path().join("pending");
        let library_root = temp_dir.path().join("library");
        let db_path = temp_dir.path().join("uploads.db");

        let layout = Arc::new(StorageLayout::new(
            &pending_root,
            &library_root,
            &["mkv".to_string(), "mp4".to_string()],
        ));
        layout
            .ensure_dirs()
            .await
            .expect("Failed to create storage dirs");

        let store: Arc<dyn UploadStore> =
            Arc::new(SqliteUploadStore::open(&db_path).expect("Failed to open upload store"));
        let media_server = Arc::new(FakeMediaServer::default());
        let notifier = Arc::new(NotifierDispatch::disabled());

        let intake = Arc::new(UploadIntake::new(
            layout.clone(),
            store.clone(),
            notifier.clone(),
            Some(MAX_UPLOAD_BYTES),
        ));
        let publisher = Arc::new(LibraryPublisher::new(layout, media_server.clone()));
        let decisions = Arc::new(DecisionEngine::new(store.clone(), publisher, notifier));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = ServerState {
            config: ServerConfig {
                requests_logging_level: RequestsLoggingLevel::None,
                port,
                metrics_port: 0,
                app_name: "Bozloader".to_string(),
            },
            start_time: Instant::now(),
            hash: "test".to_string(),
            store: store.clone(),
            intake,
            decisions,
            media_server: media_server.clone(),
            admins: AdminList::new(&[ADMIN_EMAIL.to_string()]),
        };
        let app = make_app(state);

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            store,
            media_server,
            pending_root,
            library_root,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }

    pub fn pending_file(&self, media_type: MediaType, name: &str) -> PathBuf {
        self.pending_root.join(media_type.bucket_dir()).join(name)
    }

    pub fn library_file(&self, media_type: MediaType, name: &str) -> PathBuf {
        self.library_root.join(media_type.bucket_dir()).join(name)
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}
