use crate::db;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::env;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const MIRROR_URL_ENV: &str = "ABSENSI_MIRROR_URL";
pub const MIRROR_TIMEOUT_ENV: &str = "ABSENSI_MIRROR_TIMEOUT_SECS";
pub const MIRROR_SETTINGS_KEY: &str = "setup.mirror";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
pub const MAX_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConfigSource {
    Default,
    Env,
    Workspace,
}

/// Where batches are posted. Env sets the process default; a workspace can
/// override it through `mirror.config.update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
    pub source: ConfigSource,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            source: ConfigSource::Default,
        }
    }
}

impl MirrorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        match lookup(MIRROR_URL_ENV).map(|v| v.trim().to_string()) {
            Some(url) if !url.is_empty() => match validate_url(&url) {
                Ok(()) => {
                    cfg.url = Some(url);
                    cfg.source = ConfigSource::Env;
                }
                Err(e) => warn!("Invalid {MIRROR_URL_ENV} value: {e}"),
            },
            _ => info!("{MIRROR_URL_ENV} not set, mirror sync stays local"),
        }
        if let Some(raw) = lookup(MIRROR_TIMEOUT_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if (1..=MAX_TIMEOUT_SECS).contains(&secs) => cfg.timeout_secs = secs,
                _ => warn!(
                    "Invalid {MIRROR_TIMEOUT_ENV} value {raw:?}, using default: {DEFAULT_TIMEOUT_SECS}"
                ),
            }
        }
        cfg
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Layer the workspace's stored `setup.mirror` object on top of `self`.
    /// An empty stored url switches the mirror off for that workspace.
    pub fn with_workspace_overrides(&self, conn: &Connection) -> Self {
        let stored = match db::settings_get_json(conn, MIRROR_SETTINGS_KEY) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to read mirror settings, using process defaults");
                None
            }
        };
        let mut cfg = self.clone();
        let Some(Value::Object(obj)) = stored else {
            return cfg;
        };
        if let Some(url) = obj.get("url") {
            cfg.url = url
                .as_str()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            cfg.source = ConfigSource::Workspace;
        }
        if let Some(secs) = obj.get("timeoutSecs").and_then(Value::as_u64) {
            if (1..=MAX_TIMEOUT_SECS).contains(&secs) {
                cfg.timeout_secs = secs;
                cfg.source = ConfigSource::Workspace;
            }
        }
        cfg
    }
}

/// Validate and merge `patch` (`{url?, timeoutSecs?}`) into the workspace's
/// stored mirror settings. `url: null` removes the override.
pub fn apply_patch(conn: &Connection, patch: &Map<String, Value>) -> Result<Value, ConfigError> {
    let mut stored = match db::settings_get_json(conn, MIRROR_SETTINGS_KEY)? {
        Some(Value::Object(obj)) => obj,
        _ => Map::new(),
    };

    if let Some(url) = patch.get("url") {
        match url {
            Value::Null => {
                stored.remove("url");
            }
            Value::String(s) => {
                let t = s.trim();
                if !t.is_empty() {
                    validate_url(t).map_err(ConfigError::Invalid)?;
                }
                stored.insert("url".to_string(), json!(t));
            }
            _ => return Err(ConfigError::Invalid("url must be a string or null".to_string())),
        }
    }
    if let Some(secs) = patch.get("timeoutSecs") {
        match secs {
            Value::Null => {
                stored.remove("timeoutSecs");
            }
            v => {
                let n = v
                    .as_u64()
                    .filter(|n| (1..=MAX_TIMEOUT_SECS).contains(n))
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!(
                            "timeoutSecs must be an integer between 1 and {}",
                            MAX_TIMEOUT_SECS
                        ))
                    })?;
                stored.insert("timeoutSecs".to_string(), json!(n));
            }
        }
    }

    let value = Value::Object(stored);
    db::settings_set_json(conn, MIRROR_SETTINGS_KEY, &value)?;
    info!("workspace mirror settings updated");
    Ok(value)
}

fn validate_url(url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("invalid mirror url {url:?}: {e}"))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(format!("mirror url must use http or https, got {url:?}"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(format!("mirror url has no host: {url:?}"));
    }
    Ok(())
}
