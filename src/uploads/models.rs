//! Data models for the upload lifecycle.
//!
//! An upload moves through a small state machine:
//! 1. Intake stores the file in the pending area and creates a `Pending` record
//! 2. An admin approves or denies it
//! 3. Approved files are moved into the library area; denied files stay where they are

use serde::{Deserialize, Serialize};

/// Kind of media an upload contains. Decides which bucket of the pending and
/// library areas the file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Movie => "movie",
            Self::Tv => "tv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" => Some(Self::Movie),
            "tv" | "show" | "shows" => Some(Self::Tv),
            _ => None,
        }
    }

    /// Directory name of this media type's bucket, under both roots.
    pub fn bucket_dir(&self) -> &'static str {
        match self {
            Self::Movie => "movies",
            Self::Tv => "tv",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Movie => "Movie",
            Self::Tv => "TV Show",
        }
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review status of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Stored in the pending area, waiting for an admin.
    Pending,
    /// Moved into the library.
    Approved,
    /// Rejected; the file is retained in the pending area.
    Denied,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Denied)
    }
}

impl std::fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admin decision on a pending upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Deny {
        #[serde(default)]
        notes: Option<String>,
    },
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Deny { .. } => "deny",
        }
    }

    /// Status the record ends up in when the decision commits.
    pub fn target_status(&self) -> UploadStatus {
        match self {
            Self::Approve => UploadStatus::Approved,
            Self::Deny { .. } => UploadStatus::Denied,
        }
    }
}

/// One persisted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: String,
    pub media_type: MediaType,
    pub original_filename: String,
    pub stored_filename: String,
    pub uploader_email: String,
    pub status: UploadStatus,
    pub size_bytes: u64,
    /// Unix milliseconds.
    pub created_at: i64,
    pub decided_at: Option<i64>,
    pub decided_by: Option<String>,
    pub notes: Option<String>,
}

impl UploadRecord {
    /// Build a fresh pending record with a new id.
    pub fn new_pending(
        media_type: MediaType,
        original_filename: impl Into<String>,
        stored_filename: impl Into<String>,
        uploader_email: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            media_type,
            original_filename: original_filename.into(),
            stored_filename: stored_filename.into(),
            uploader_email: uploader_email.into(),
            status: UploadStatus::Pending,
            size_bytes,
            created_at: chrono::Utc::now().timestamp_millis(),
            decided_at: None,
            decided_by: None,
            notes: None,
        }
    }

    /// Size formatted for humans, e.g. "1.86 GiB".
    pub fn display_size(&self) -> String {
        let size = byte_unit::Byte::from_u64(self.size_bytes)
            .get_appropriate_unit(byte_unit::UnitType::Binary);
        format!("{:.2}", size)
    }
}

/// Mutation applied by a guarded status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    /// Record a decision: sets status, `decided_at`, `decided_by` and `notes`.
    Decide {
        status: UploadStatus,
        decided_by: String,
        decided_at: i64,
        notes: Option<String>,
    },
    /// Compensating transition after a failed publish: back to pending with
    /// the decision fields cleared.
    RevertToPending,
}

impl StatusChange {
    pub fn decide(decision: &Decision, decided_by: &str) -> Self {
        let notes = match decision {
            Decision::Approve => None,
            Decision::Deny { notes } => notes.clone().filter(|n| !n.trim().is_empty()),
        };
        Self::Decide {
            status: decision.target_status(),
            decided_by: decided_by.to_string(),
            decided_at: chrono::Utc::now().timestamp_millis(),
            notes,
        }
    }

    pub fn target_status(&self) -> UploadStatus {
        match self {
            Self::Decide { status, .. } => *status,
            Self::RevertToPending => UploadStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_type_parse() {
        assert_eq!(MediaType::parse("movie"), Some(MediaType::Movie));
        assert_eq!(MediaType::parse("Movies"), Some(MediaType::Movie));
        assert_eq!(MediaType::parse("tv"), Some(MediaType::Tv));
        assert_eq!(MediaType::parse(" TV "), Some(MediaType::Tv));
        assert_eq!(MediaType::parse("music"), None);
    }

    #[test]
    fn test_status_parse_and_terminal() {
        for status in [
            UploadStatus::Pending,
            UploadStatus::Approved,
            UploadStatus::Denied,
        ] {
            assert_eq!(UploadStatus::parse(status.as_str()), Some(status));
        }
        assert!(UploadStatus::parse("PENDING").is_none());
        assert!(!UploadStatus::Pending.is_terminal());
        assert!(UploadStatus::Approved.is_terminal());
        assert!(UploadStatus::Denied.is_terminal());
    }

    #[test]
    fn test_decide_drops_blank_notes() {
        let change = StatusChange::decide(
            &Decision::Deny {
                notes: Some("   ".to_string()),
            },
            "admin@example.com",
        );
        match change {
            StatusChange::Decide { status, notes, .. } => {
                assert_eq!(status, UploadStatus::Denied);
                assert!(notes.is_none());
            }
            other => panic!("unexpected change {:?}", other),
        }
    }

    #[test]
    fn test_decision_deserializes_from_tagged_json() {
        let deny: Decision =
            serde_json::from_str(r#"{"decision":"deny","notes":"wrong cut"}"#).unwrap();
        assert_eq!(
            deny,
            Decision::Deny {
                notes: Some("wrong cut".to_string())
            }
        );
        let approve: Decision = serde_json::from_str(r#"{"decision":"approve"}"#).unwrap();
        assert_eq!(approve, Decision::Approve);
    }

    #[test]
    fn test_new_pending_record() {
        let record = UploadRecord::new_pending(
            MediaType::Movie,
            "Alien.mkv",
            "Alien.mkv",
            "ripley@example.com",
            2_000_000_000,
        );
        assert_eq!(record.status, UploadStatus::Pending);
        assert!(record.decided_at.is_none());
        assert!(record.decided_by.is_none());
        assert!(!record.id.is_empty());
        assert!(record.display_size().contains("GiB"));
    }
}
