//! SQLite store for upload records.
//!
//! The store is the single source of truth for the upload state machine.
//! Status changes go through [`UploadStore::transition`], a conditional
//! update gated on the status the caller last observed.

use super::models::{MediaType, StatusChange, UploadRecord, UploadStatus};
use super::schema::{UPLOADS_SCHEMA_SQL, UPLOADS_SCHEMA_VERSION};
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// How long a connection waits on a lock held by another process.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of a guarded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The change was applied; carries the record as stored afterwards.
    Applied(UploadRecord),
    /// The stored status no longer matched the expected one.
    Stale { actual: UploadStatus },
    /// No record with that id.
    NotFound,
}

/// Trait for upload record storage.
pub trait UploadStore: Send + Sync {
    /// Persist a new record.
    fn create(&self, record: &UploadRecord) -> Result<()>;

    /// Get a record by ID.
    fn get(&self, id: &str) -> Result<Option<UploadRecord>>;

    /// Apply `change` only if the record's status still equals `expected`.
    ///
    /// This is a single compare-and-set update: of two concurrent callers
    /// expecting the same status, at most one sees `Applied`.
    fn transition(
        &self,
        id: &str,
        expected: UploadStatus,
        change: &StatusChange,
    ) -> Result<TransitionOutcome>;

    /// List records with the given status, newest first.
    fn list_by_status(&self, status: UploadStatus, limit: usize) -> Result<Vec<UploadRecord>>;

    /// List records of one uploader, newest first.
    fn list_by_uploader(&self, uploader_email: &str, limit: usize) -> Result<Vec<UploadRecord>>;

    /// List decided records, most recently decided first.
    fn list_recently_decided(&self, limit: usize) -> Result<Vec<UploadRecord>>;
}

/// SQLite implementation of UploadStore.
pub struct SqliteUploadStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteUploadStore {
    /// Open or create an uploads database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open uploads database: {:?}", path))?;

        // Several worker processes may share the file
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        Self::apply_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::apply_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn apply_schema(conn: &Connection) -> Result<()> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > UPLOADS_SCHEMA_VERSION {
            bail!(
                "Uploads database version {} is newer than supported version {}",
                version,
                UPLOADS_SCHEMA_VERSION
            );
        }
        if version < UPLOADS_SCHEMA_VERSION {
            conn.execute_batch(UPLOADS_SCHEMA_SQL)?;
            conn.pragma_update(None, "user_version", UPLOADS_SCHEMA_VERSION)?;
            info!(
                "Uploads database schema initialized at version {}",
                UPLOADS_SCHEMA_VERSION
            );
        }
        Ok(())
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<UploadRecord> {
        let media_type: String = row.get("media_type")?;
        let status: String = row.get("status")?;
        Ok(UploadRecord {
            id: row.get("id")?,
            media_type: MediaType::parse(&media_type).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    1,
                    rusqlite::types::Type::Text,
                    format!("unknown media type {:?}", media_type).into(),
                )
            })?,
            original_filename: row.get("original_filename")?,
            stored_filename: row.get("stored_filename")?,
            uploader_email: row.get("uploader_email")?,
            status: UploadStatus::parse(&status).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    5,
                    rusqlite::types::Type::Text,
                    format!("unknown status {:?}", status).into(),
                )
            })?,
            size_bytes: row.get::<_, i64>("size_bytes")? as u64,
            created_at: row.get("created_at")?,
            decided_at: row.get("decided_at")?,
            decided_by: row.get("decided_by")?,
            notes: row.get("notes")?,
        })
    }

    fn get_with(conn: &Connection, id: &str) -> Result<Option<UploadRecord>> {
        let record = conn
            .query_row(
                "SELECT * FROM uploads WHERE id = ?1",
                params![id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }
}

impl UploadStore for SqliteUploadStore {
    fn create(&self, record: &UploadRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"
            INSERT INTO uploads (
                id, media_type, original_filename, stored_filename, uploader_email,
                status, size_bytes, created_at, decided_at, decided_by, notes
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                record.id,
                record.media_type.as_str(),
                record.original_filename,
                record.stored_filename,
                record.uploader_email,
                record.status.as_str(),
                record.size_bytes as i64,
                record.created_at,
                record.decided_at,
                record.decided_by,
                record.notes,
            ],
        )
        .with_context(|| format!("Failed to insert upload {}", record.id))?;
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<UploadRecord>> {
        let conn = self.conn.lock().unwrap();
        Self::get_with(&conn, id)
    }

    fn transition(
        &self,
        id: &str,
        expected: UploadStatus,
        change: &StatusChange,
    ) -> Result<TransitionOutcome> {
        let conn = self.conn.lock().unwrap();

        let updated = match change {
            StatusChange::Decide {
                status,
                decided_by,
                decided_at,
                notes,
            } => conn.execute(
                "UPDATE uploads SET status = ?1, decided_at = ?2, decided_by = ?3, notes = ?4
                 WHERE id = ?5 AND status = ?6",
                params![
                    status.as_str(),
                    decided_at,
                    decided_by,
                    notes,
                    id,
                    expected.as_str()
                ],
            )?,
            StatusChange::RevertToPending => conn.execute(
                "UPDATE uploads SET status = ?1, decided_at = NULL, decided_by = NULL, notes = NULL
                 WHERE id = ?2 AND status = ?3",
                params![UploadStatus::Pending.as_str(), id, expected.as_str()],
            )?,
        };

        if updated == 1 {
            let record = Self::get_with(&conn, id)?
                .with_context(|| format!("Upload {} vanished after update", id))?;
            return Ok(TransitionOutcome::Applied(record));
        }

        let actual: Option<String> = conn
            .query_row(
                "SELECT status FROM uploads WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        match actual {
            None => Ok(TransitionOutcome::NotFound),
            Some(s) => match UploadStatus::parse(&s) {
                Some(actual) => Ok(TransitionOutcome::Stale { actual }),
                None => bail!("Upload {} has unknown status {:?}", id, s),
            },
        }
    }

    fn list_by_status(&self, status: UploadStatus, limit: usize) -> Result<Vec<UploadRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM uploads WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![status.as_str(), limit as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn list_by_uploader(&self, uploader_email: &str, limit: usize) -> Result<Vec<UploadRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM uploads WHERE uploader_email = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(params![uploader_email, limit as i64], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn list_recently_decided(&self, limit: usize) -> Result<Vec<UploadRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM uploads WHERE status != ?1 ORDER BY decided_at DESC LIMIT ?2",
        )?;
        let records = stmt
            .query_map(
                params![UploadStatus::Pending.as_str(), limit as i64],
                Self::row_to_record,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}
