mod admin_routes;
pub mod config;
mod http_layers;
mod identity;
pub mod metrics;
pub mod server;
pub mod state;
mod upload_routes;

use serde::Serialize;

pub use config::ServerConfig;
pub use http_layers::*;
pub use identity::{HEADER_PROXY_USER_EMAIL, HEADER_USER_EMAIL};
pub use server::{make_app, run_server};
pub use state::{AdminList, ServerState};

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
