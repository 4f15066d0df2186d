//! Shared constants for end-to-end tests
//!
//! When test identities or payloads change, update only this file.

// ============================================================================
// Test Identities
// ============================================================================

/// Regular uploader
pub const UPLOADER_EMAIL: &str = "uploader@example.com";

/// Another uploader, used to check that listings are per-user
pub const OTHER_UPLOADER_EMAIL: &str = "someone.else@example.com";

/// Configured admin
pub const ADMIN_EMAIL: &str = "admin@example.com";

// ============================================================================
// Test Payloads
// ============================================================================

pub const MOVIE_FILENAME: &str = "Alien (1979).mkv";

pub const MOVIE_STORED_FILENAME: &str = "Alien (1979).mkv";

pub const TV_FILENAME: &str = "Severance S01E01.mp4";

pub const MOVIE_BYTES: &[u8] = b"not really a movie, but close enough";

/// Upload size limit configured on the test server
pub const MAX_UPLOAD_BYTES: u64 = 1024;

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// HTTP request timeout (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Polling interval when waiting for server readiness (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
