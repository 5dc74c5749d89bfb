use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{date_or_today, to_json, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::seed::seed_sample_data;
use crate::store::RecordStore;
use rusqlite::Connection;
use serde_json::json;
use std::path::PathBuf;
use tracing::{error, info};

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let mirror = match state.db.as_ref() {
        Some(conn) => state.mirror.with_workspace_overrides(conn),
        None => state.mirror.clone(),
    };
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "mirrorConfigured": mirror.is_configured(),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            info!(workspace = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => {
            error!(workspace = %path.display(), error = %e, "failed to open workspace");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn workspace_seed(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let today = date_or_today(params)?;
    let report = seed_sample_data(&RecordStore::new(conn), today)?;
    to_json(&report)
}

fn handle_workspace_seed(state: &mut AppState, req: &Request) -> serde_json::Value {
    with_conn(state, req, workspace_seed)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "workspace.seed" => Some(handle_workspace_seed(state, req)),
        _ => None,
    }
}
