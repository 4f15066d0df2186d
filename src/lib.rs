//! Bozloader library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod media_server;
pub mod notifications;
pub mod server;
pub mod uploads;

// Re-export commonly used types for convenience
pub use server::{make_app, run_server, RequestsLoggingLevel, ServerState};
pub use uploads::{SqliteUploadStore, UploadStore};
