//! Maps uploads to their physical location.
//!
//! Both the pending root and the library root are split into one bucket per
//! media type (`movies/`, `tv/`). A stored filename is always a single path
//! component inside its bucket.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;

use super::models::{MediaType, UploadRecord};

/// Upper bound on the numeric collision suffix.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

/// Longest stored filename we produce, in bytes.
const MAX_FILENAME_BYTES: usize = 200;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayoutError {
    #[error("Invalid filename {filename:?}: {reason}")]
    InvalidFilename {
        filename: String,
        reason: &'static str,
    },

    #[error("No free name left for {0:?}")]
    NoFreeName(String),
}

impl LayoutError {
    fn invalid(filename: &str, reason: &'static str) -> Self {
        Self::InvalidFilename {
            filename: filename.to_string(),
            reason,
        }
    }
}

/// Pending and library roots plus the extension allow-list.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pending_root: PathBuf,
    library_root: PathBuf,
    allowed_extensions: Vec<String>,
}

impl StorageLayout {
    pub fn new(
        pending_root: impl Into<PathBuf>,
        library_root: impl Into<PathBuf>,
        allowed_extensions: &[String],
    ) -> Self {
        Self {
            pending_root: pending_root.into(),
            library_root: library_root.into(),
            allowed_extensions: allowed_extensions
                .iter()
                .map(|e| normalize_extension(e))
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn pending_root(&self) -> &Path {
        &self.pending_root
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn pending_dir(&self, media_type: MediaType) -> PathBuf {
        self.pending_root.join(media_type.bucket_dir())
    }

    pub fn library_dir(&self, media_type: MediaType) -> PathBuf {
        self.library_root.join(media_type.bucket_dir())
    }

    /// Create every bucket directory under both roots.
    pub async fn ensure_dirs(&self) -> std::io::Result<()> {
        for media_type in [MediaType::Movie, MediaType::Tv] {
            fs::create_dir_all(self.pending_dir(media_type)).await?;
            fs::create_dir_all(self.library_dir(media_type)).await?;
        }
        Ok(())
    }

    /// True if the filename carries one of the allowed extensions.
    pub fn is_allowed_extension(&self, filename: &str) -> bool {
        extension_of(filename)
            .map(|ext| self.allowed_extensions.iter().any(|a| *a == ext))
            .unwrap_or(false)
    }

    /// Sanitize `original_filename` and pick the first candidate the
    /// `is_taken` predicate reports as free.
    pub fn stored_filename<F>(
        &self,
        original_filename: &str,
        is_taken: F,
    ) -> Result<String, LayoutError>
    where
        F: FnMut(&str) -> bool,
    {
        let sanitized = sanitize_filename(original_filename)?;
        if !self.is_allowed_extension(&sanitized) {
            return Err(LayoutError::invalid(
                original_filename,
                "extension is not allowed",
            ));
        }
        resolve_collision(&sanitized, is_taken)
    }

    /// Same as [`Self::stored_filename`], treating a name as taken when it
    /// exists in either the pending or the library bucket on disk.
    pub fn next_free_filename(
        &self,
        media_type: MediaType,
        original_filename: &str,
    ) -> Result<String, LayoutError> {
        let pending_dir = self.pending_dir(media_type);
        let library_dir = self.library_dir(media_type);
        self.stored_filename(original_filename, |candidate| {
            pending_dir.join(candidate).exists() || library_dir.join(candidate).exists()
        })
    }

    pub fn pending_path_for(
        &self,
        media_type: MediaType,
        stored_filename: &str,
    ) -> Result<PathBuf, LayoutError> {
        contained_path(&self.pending_dir(media_type), stored_filename)
    }

    pub fn library_path_for(
        &self,
        media_type: MediaType,
        stored_filename: &str,
    ) -> Result<PathBuf, LayoutError> {
        contained_path(&self.library_dir(media_type), stored_filename)
    }

    pub fn pending_path(&self, record: &UploadRecord) -> Result<PathBuf, LayoutError> {
        self.pending_path_for(record.media_type, &record.stored_filename)
    }

    pub fn library_path(&self, record: &UploadRecord) -> Result<PathBuf, LayoutError> {
        self.library_path_for(record.media_type, &record.stored_filename)
    }
}

/// Join `name` onto `dir`, refusing anything that is not exactly one plain
/// path component.
fn contained_path(dir: &Path, name: &str) -> Result<PathBuf, LayoutError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(dir.join(name)),
        _ => Err(LayoutError::invalid(name, "resolves outside the storage root")),
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .filter(|e| !e.is_empty())
}

/// Turn a client-supplied filename into something safe to store.
///
/// Only the last path segment survives (either separator style), control
/// characters are dropped and characters reserved on common filesystems are
/// replaced with `_`.
pub fn sanitize_filename(filename: &str) -> Result<String, LayoutError> {
    let last_segment = filename
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or_default();

    let cleaned: String = last_segment
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    // Windows refuses trailing dots and spaces
    let cleaned = cleaned.trim().trim_end_matches(&['.', ' '][..]).to_string();

    if cleaned.is_empty() {
        return Err(LayoutError::invalid(filename, "name is empty"));
    }
    if cleaned.starts_with('.') {
        return Err(LayoutError::invalid(filename, "hidden files are not accepted"));
    }
    if extension_of(&cleaned).is_none() {
        return Err(LayoutError::invalid(filename, "name has no extension"));
    }

    Ok(truncate_stem(&cleaned, MAX_FILENAME_BYTES))
}

/// Shorten the stem so the whole name fits in `max_bytes`, keeping the
/// extension intact.
fn truncate_stem(name: &str, max_bytes: usize) -> String {
    if name.len() <= max_bytes {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let budget = max_bytes.saturating_sub(ext.len() + 1);
    let mut end = budget.min(stem.len());
    while !stem.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}.{}", &stem[..end], ext)
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx + 1..]),
        _ => (name, ""),
    }
}

/// Pick `name` if free, else `stem_1.ext`, `stem_2.ext`, ... until the
/// predicate reports a free candidate.
pub fn resolve_collision<F>(name: &str, mut is_taken: F) -> Result<String, LayoutError>
where
    F: FnMut(&str) -> bool,
{
    if !is_taken(name) {
        return Ok(name.to_string());
    }
    let (stem, ext) = split_extension(name);
    for n in 1..=MAX_COLLISION_SUFFIX {
        let candidate = if ext.is_empty() {
            format!("{}_{}", stem, n)
        } else {
            format!("{}_{}.{}", stem, n, ext)
        };
        if !is_taken(&candidate) {
            return Ok(candidate);
        }
    }
    Err(LayoutError::NoFreeName(name.to_string()))
}
