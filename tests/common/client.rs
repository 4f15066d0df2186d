//! HTTP client for end-to-end tests
//!
//! Wraps reqwest and provides methods for every bozloader endpoint. Identity
//! travels in the header the access proxy would set.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use bozloader::server::HEADER_USER_EMAIL;
use reqwest::multipart::{Form, Part};
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client acting as a single identity (or none)
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
    email: Option<String>,
}

impl TestClient {
    /// Creates a client that sends no identity header
    pub fn anonymous(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            email: None,
        }
    }

    /// Creates a client identified as `email`
    pub fn as_user(base_url: String, email: &str) -> Self {
        let mut client = Self::anonymous(base_url);
        client.email = Some(email.to_string());
        client
    }

    /// Creates a client identified as the configured admin
    pub fn admin(base_url: String) -> Self {
        Self::as_user(base_url, ADMIN_EMAIL)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_identity(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.with_identity(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn with_identity(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.email {
            Some(email) => request.header(HEADER_USER_EMAIL, email),
            None => request,
        }
    }

    // ========================================================================
    // Uploader Endpoints
    // ========================================================================

    /// POST /upload
    pub async fn upload(&self, media_type: &str, filename: &str, bytes: &[u8]) -> Response {
        let form = Form::new().text("media_type", media_type.to_string()).part(
            "file",
            Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
        );
        self.post("/upload")
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// POST /upload with the file part before media_type
    pub async fn upload_file_first(&self, media_type: &str, filename: &str, bytes: &[u8]) -> Response {
        let form = Form::new()
            .part(
                "file",
                Part::bytes(bytes.to_vec()).file_name(filename.to_string()),
            )
            .text("media_type", media_type.to_string());
        self.post("/upload")
            .multipart(form)
            .send()
            .await
            .expect("Upload request failed")
    }

    /// Uploads and returns the new upload id, asserting success
    pub async fn upload_ok(&self, media_type: &str, filename: &str, bytes: &[u8]) -> String {
        let response = self.upload(media_type, filename, bytes).await;
        assert_eq!(
            response.status(),
            reqwest::StatusCode::CREATED,
            "Upload failed: {:?}",
            response.text().await
        );
        let body: serde_json::Value = response.json().await.expect("Invalid upload response");
        body["id"].as_str().expect("Missing upload id").to_string()
    }

    /// GET /status/{id}
    pub async fn status(&self, id: &str) -> Response {
        self.get(&format!("/status/{}", id))
            .send()
            .await
            .expect("Status request failed")
    }

    /// GET /my-uploads
    pub async fn my_uploads(&self) -> Response {
        self.get("/my-uploads")
            .send()
            .await
            .expect("My uploads request failed")
    }

    /// GET /health
    pub async fn health(&self) -> Response {
        self.get("/health")
            .send()
            .await
            .expect("Health request failed")
    }

    // ========================================================================
    // Admin Endpoints
    // ========================================================================

    /// GET /admin/uploads
    pub async fn admin_overview(&self) -> Response {
        self.get("/admin/uploads")
            .send()
            .await
            .expect("Admin overview request failed")
    }

    /// POST /admin/uploads/{id}/approve
    pub async fn approve(&self, id: &str) -> Response {
        self.post(&format!("/admin/uploads/{}/approve", id))
            .send()
            .await
            .expect("Approve request failed")
    }

    /// POST /admin/uploads/{id}/deny
    pub async fn deny(&self, id: &str, notes: Option<&str>) -> Response {
        let request = self.post(&format!("/admin/uploads/{}/deny", id));
        let request = match notes {
            Some(notes) => request.json(&json!({ "notes": notes })),
            None => request,
        };
        request.send().await.expect("Deny request failed")
    }

    /// GET /admin/media-server
    pub async fn media_server(&self) -> Response {
        self.get("/admin/media-server")
            .send()
            .await
            .expect("Media server request failed")
    }
}
