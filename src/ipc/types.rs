use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::MirrorConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Process-level mirror settings from the environment. Workspace
    /// overrides are layered on per request.
    pub mirror: MirrorConfig,
}

impl AppState {
    pub fn new(mirror: MirrorConfig) -> Self {
        Self {
            workspace: None,
            db: None,
            mirror,
        }
    }
}
