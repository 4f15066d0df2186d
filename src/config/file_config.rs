use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub pending_root: Option<String>,
    pub library_root: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,

    pub app_name: Option<String>,
    pub app_url: Option<String>,
    pub admin_emails: Option<Vec<String>>,
    pub notification_timeout_sec: Option<u64>,

    // Feature configs
    pub upload: Option<UploadConfig>,
    pub plex: Option<PlexConfig>,
    pub smtp: Option<SmtpConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct UploadConfig {
    /// Human readable limit, e.g. "20 GiB". Unlimited when absent.
    pub max_size: Option<String>,
    pub allowed_extensions: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PlexConfig {
    pub url: Option<String>,
    pub token: Option<String>,
    pub movies_library: Option<String>,
    pub tv_library: Option<String>,
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SmtpConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
    pub starttls: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
