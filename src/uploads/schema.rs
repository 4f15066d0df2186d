//! Database schema for upload records.

/// SQL schema for the uploads database.
pub const UPLOADS_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS uploads (
    id TEXT PRIMARY KEY,
    media_type TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    stored_filename TEXT NOT NULL,
    uploader_email TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    size_bytes INTEGER NOT NULL,

    -- Timestamps (Unix milliseconds)
    created_at INTEGER NOT NULL,
    decided_at INTEGER,

    decided_by TEXT,
    notes TEXT
);

CREATE INDEX IF NOT EXISTS idx_uploads_status ON uploads(status);
CREATE INDEX IF NOT EXISTS idx_uploads_uploader ON uploads(uploader_email);
CREATE INDEX IF NOT EXISTS idx_uploads_stored_name ON uploads(media_type, stored_filename);
"#;

/// Current schema version, stored in `PRAGMA user_version`.
pub const UPLOADS_SCHEMA_VERSION: i32 = 1;
