use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;

use crate::media_server::MediaServer;
use crate::uploads::{DecisionEngine, UploadIntake, UploadStore};

use super::ServerConfig;

pub type GuardedUploadStore = Arc<dyn UploadStore>;
pub type GuardedUploadIntake = Arc<UploadIntake>;
pub type GuardedDecisionEngine = Arc<DecisionEngine>;
pub type GuardedMediaServer = Arc<dyn MediaServer>;

/// Lower-cased admin emails.
#[derive(Clone, Debug, Default)]
pub struct AdminList(pub Arc<Vec<String>>);

impl AdminList {
    pub fn new(emails: &[String]) -> Self {
        Self(Arc::new(
            emails.iter().map(|e| e.trim().to_ascii_lowercase()).collect(),
        ))
    }

    pub fn contains(&self, email: &str) -> bool {
        let email = email.trim().to_ascii_lowercase();
        self.0.iter().any(|admin| *admin == email)
    }
}

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub hash: String,
    pub store: GuardedUploadStore,
    pub intake: GuardedUploadIntake,
    pub decisions: GuardedDecisionEngine,
    pub media_server: GuardedMediaServer,
    pub admins: AdminList,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for GuardedUploadStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}

impl FromRef<ServerState> for GuardedUploadIntake {
    fn from_ref(input: &ServerState) -> Self {
        input.intake.clone()
    }
}

impl FromRef<ServerState> for GuardedDecisionEngine {
    fn from_ref(input: &ServerState) -> Self {
        input.decisions.clone()
    }
}

impl FromRef<ServerState> for GuardedMediaServer {
    fn from_ref(input: &ServerState) -> Self {
        input.media_server.clone()
    }
}

impl FromRef<ServerState> for AdminList {
    fn from_ref(input: &ServerState) -> Self {
        input.admins.clone()
    }
}
