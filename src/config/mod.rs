mod file_config;

pub use file_config::{DiscordConfig, FileConfig, PlexConfig, SmtpConfig, UploadConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;

pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "m4v", "mpg", "mpeg", "ts", "vob", "iso",
];

const DEFAULT_APP_NAME: &str = "Bozloader";
const DEFAULT_APP_URL: &str = "http://localhost:8082";
const DEFAULT_NETWORK_TIMEOUT_SEC: u64 = 10;
const DEFAULT_PLEX_URL: &str = "http://localhost:32400";
const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SMTP_FROM: &str = "noreply@example.com";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub pending_root: Option<PathBuf>,
    pub library_root: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_path: PathBuf,
    pub pending_root: PathBuf,
    pub library_root: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,

    pub app_name: String,
    pub app_url: String,
    pub admin_emails: Vec<String>,
    pub notification_timeout_sec: u64,

    pub upload: UploadSettings,

    // Integrations, enabled only when configured
    pub plex: Option<PlexSettings>,
    pub smtp: Option<SmtpSettings>,
    pub discord_webhook_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    /// `None` means unlimited.
    pub max_size_bytes: Option<u64>,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlexSettings {
    pub url: String,
    pub token: String,
    pub movies_library: String,
    pub tv_library: String,
    pub timeout_sec: u64,
}

#[derive(Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub starttls: bool,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("from", &self.from)
            .field("starttls", &self.starttls)
            .finish()
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| anyhow!("db_path must be specified via --db-path or in config file"))?;
        let pending_root = file
            .pending_root
            .map(PathBuf::from)
            .or_else(|| cli.pending_root.clone())
            .ok_or_else(|| {
                anyhow!("pending_root must be specified via --pending-root or in config file")
            })?;
        let library_root = file
            .library_root
            .map(PathBuf::from)
            .or_else(|| cli.library_root.clone())
            .ok_or_else(|| {
                anyhow!("library_root must be specified via --library-root or in config file")
            })?;

        if pending_root == library_root {
            bail!(
                "pending_root and library_root must differ, both are {:?}",
                pending_root
            );
        }
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let app_name = file.app_name.unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
        let app_url = file.app_url.unwrap_or_else(|| DEFAULT_APP_URL.to_string());
        let admin_emails = file
            .admin_emails
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        let notification_timeout_sec = file
            .notification_timeout_sec
            .unwrap_or(DEFAULT_NETWORK_TIMEOUT_SEC);

        let upload = resolve_upload(file.upload.unwrap_or_default())?;

        // Plex is enabled by its token, SMTP by its host, Discord by its URL.
        let plex = file.plex.and_then(|plex| {
            let token = plex.token.filter(|t| !t.is_empty())?;
            Some(PlexSettings {
                url: plex.url.unwrap_or_else(|| DEFAULT_PLEX_URL.to_string()),
                token,
                movies_library: plex.movies_library.unwrap_or_else(|| "Movies".to_string()),
                tv_library: plex.tv_library.unwrap_or_else(|| "TV Shows".to_string()),
                timeout_sec: plex.timeout_sec.unwrap_or(DEFAULT_NETWORK_TIMEOUT_SEC),
            })
        });
        let smtp = file.smtp.and_then(|smtp| {
            let host = smtp.host.filter(|h| !h.is_empty())?;
            Some(SmtpSettings {
                host,
                port: smtp.port.unwrap_or(DEFAULT_SMTP_PORT),
                username: smtp.username.filter(|u| !u.is_empty()),
                password: smtp.password.filter(|p| !p.is_empty()),
                from: smtp.from.unwrap_or_else(|| DEFAULT_SMTP_FROM.to_string()),
                starttls: smtp.starttls.unwrap_or(true),
            })
        });
        let discord_webhook_url = file
            .discord
            .and_then(|d| d.webhook_url)
            .filter(|u| !u.is_empty());

        Ok(Self {
            db_path,
            pending_root,
            library_root,
            port,
            metrics_port,
            logging_level,
            app_name,
            app_url,
            admin_emails,
            notification_timeout_sec,
            upload,
            plex,
            smtp,
            discord_webhook_url,
        })
    }
}

fn resolve_upload(upload: UploadConfig) -> Result<UploadSettings> {
    let max_size_bytes = match upload.max_size {
        Some(s) => Some(
            byte_unit::Byte::parse_str(&s, true)
                .with_context(|| format!("Invalid upload.max_size: {:?}", s))?
                .as_u64(),
        ),
        None => None,
    };

    let allowed_extensions: Vec<String> = match upload.allowed_extensions {
        Some(list) => list
            .into_iter()
            .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect(),
        None => DEFAULT_ALLOWED_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .collect(),
    };
    if allowed_extensions.is_empty() {
        bail!("upload.allowed_extensions must not be empty");
    }

    Ok(UploadSettings {
        max_size_bytes,
        allowed_extensions,
    })
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
