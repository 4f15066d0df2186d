//! Plex Media Server client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::{debug, info};

use super::{MediaServer, MediaServerError, MediaServerInfo};
use crate::config::PlexSettings;
use crate::uploads::MediaType;

const TOKEN_PARAM: &str = "X-Plex-Token";

pub struct PlexClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    movies_library: String,
    tv_library: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    media_container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<SectionDirectory>,
}

#[derive(Debug, Deserialize)]
struct SectionDirectory {
    key: String,
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RootContainer {
    friendly_name: Option<String>,
    version: Option<String>,
    platform: Option<String>,
}

impl PlexClient {
    pub fn new(settings: &PlexSettings) -> Result<Self, MediaServerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_sec))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            token: settings.token.clone(),
            movies_library: settings.movies_library.clone(),
            tv_library: settings.tv_library.clone(),
        })
    }

    fn library_name(&self, media_type: MediaType) -> &str {
        match media_type {
            MediaType::Movie => &self.movies_library,
            MediaType::Tv => &self.tv_library,
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, MediaServerError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .query(&[(TOKEN_PARAM, self.token.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MediaServerError::HttpStatus(status.as_u16()));
        }
        Ok(response)
    }

    /// Find the section key of the library titled `library_name`.
    async fn section_key(&self, library_name: &str) -> Result<String, MediaServerError> {
        let sections: Envelope<SectionsContainer> =
            self.get("/library/sections").await?.json().await?;

        sections
            .media_container
            .directories
            .into_iter()
            .find(|d| d.title == library_name)
            .map(|d| d.key)
            .ok_or_else(|| MediaServerError::SectionNotFound(library_name.to_string()))
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    async fn refresh(&self, media_type: MediaType) -> Result<(), MediaServerError> {
        let library_name = self.library_name(media_type);
        let key = self.section_key(library_name).await?;
        debug!("Resolved Plex library '{}' to section {}", library_name, key);

        self.get(&format!("/library/sections/{}/refresh", key))
            .await?;
        info!(
            "Plex library scan triggered for '{}' (section {})",
            library_name, key
        );
        Ok(())
    }

    async fn server_info(&self) -> Result<MediaServerInfo, MediaServerError> {
        let root: Envelope<RootContainer> = self.get("/").await?.json().await?;
        let root = root.media_container;
        let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "Unknown".to_string());
        Ok(MediaServerInfo {
            server_name: or_unknown(root.friendly_name),
            version: or_unknown(root.version),
            platform: or_unknown(root.platform),
        })
    }
}
