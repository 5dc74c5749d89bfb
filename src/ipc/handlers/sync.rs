use crate::config::{self, MirrorConfig};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::helpers::{
    date_or_today, get_opt_date, get_opt_str, get_required_str, to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::mirror::plan::{self, Schedule};
use crate::mirror::MirrorSyncClient;
use crate::store::{AttendanceFilter, RecordStore, Table};
use rusqlite::Connection;
use serde_json::{json, Value};

fn mirror_config_get(conn: &Connection, base: &MirrorConfig) -> Result<Value, HandlerErr> {
    let effective = base.with_workspace_overrides(conn);
    Ok(json!({
        "effective": to_json(&effective)?,
        "process": to_json(base)?,
    }))
}

fn mirror_config_update(
    conn: &Connection,
    base: &MirrorConfig,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let patch = params
        .as_object()
        .ok_or_else(|| HandlerErr::bad_params("params must be an object"))?;
    let stored = config::apply_patch(conn, patch)?;
    let effective = base.with_workspace_overrides(conn);
    Ok(json!({
        "stored": stored,
        "effective": to_json(&effective)?,
    }))
}

fn client_for(conn: &Connection, base: &MirrorConfig) -> MirrorSyncClient {
    MirrorSyncClient::from_config(&base.with_workspace_overrides(conn))
}

fn sync_students(conn: &Connection, base: &MirrorConfig) -> Result<Value, HandlerErr> {
    let store = RecordStore::new(conn);
    let result = plan::sync_students(&store, &client_for(conn, base))?;
    to_json(&result)
}

fn sync_attendance(conn: &Connection, base: &MirrorConfig, params: &Value) -> Result<Value, HandlerErr> {
    let mut filter = AttendanceFilter {
        from: get_opt_date(params, "from")?,
        to: get_opt_date(params, "to")?,
        class_id: get_opt_str(params, "classId")?,
        limit: None,
    };
    if let Some(day) = get_opt_date(params, "date")? {
        filter.from = Some(day);
        filter.to = Some(day);
    }
    let store = RecordStore::new(conn);
    let result = plan::sync_attendance(&store, &client_for(conn, base), &filter)?;
    to_json(&result)
}

fn sync_aggregate(conn: &Connection, base: &MirrorConfig, params: &Value) -> Result<Value, HandlerErr> {
    let month = get_required_str(params, "month")?;
    let class_id = get_opt_str(params, "classId")?;
    let store = RecordStore::new(conn);
    let result = plan::sync_aggregate(&store, &client_for(conn, base), &month, class_id.as_deref())?;
    to_json(&result)
}

fn sync_status(conn: &Connection, base: &MirrorConfig) -> Result<Value, HandlerErr> {
    let store = RecordStore::new(conn);
    Ok(json!({
        "mirrorConfigured": base.with_workspace_overrides(conn).is_configured(),
        "local": {
            "classes": store.count_rows(Table::Classes)?,
            "students": store.count_rows(Table::Students)?,
            "attendance": store.count_rows(Table::Attendance)?,
        },
        "last": plan::last_outcomes(&store),
    }))
}

fn sync_schedule(conn: &Connection, base: &MirrorConfig, params: &Value) -> Result<Value, HandlerErr> {
    let raw = get_required_str(params, "schedule")?;
    let schedule = Schedule::parse(&raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "schedule must be daily, weekly or monthly; got {:?}",
            raw
        ))
    })?;
    let today = date_or_today(params)?;
    let store = RecordStore::new(conn);
    let report = plan::run_schedule(&store, &client_for(conn, base), schedule, today)?;
    let local_only = report.local_only();
    let mut value = to_json(&report)?;
    value["localOnly"] = json!(local_only);
    Ok(value)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let base = state.mirror.clone();
    let resp = match req.method.as_str() {
        // Readable without a workspace: shows the process-level settings.
        "mirror.config.get" if state.db.is_none() => ok(
            &req.id,
            json!({ "effective": base, "process": base }),
        ),
        "mirror.config.get" => with_conn(state, req, |conn, _| mirror_config_get(conn, &base)),
        "mirror.config.update" => {
            with_conn(state, req, |conn, params| mirror_config_update(conn, &base, params))
        }
        "sync.students" => with_conn(state, req, |conn, _| sync_students(conn, &base)),
        "sync.attendance" => with_conn(state, req, |conn, params| sync_attendance(conn, &base, params)),
        "sync.aggregate" => with_conn(state, req, |conn, params| sync_aggregate(conn, &base, params)),
        "sync.status" => with_conn(state, req, |conn, _| sync_status(conn, &base)),
        "sync.schedule" => with_conn(state, req, |conn, params| sync_schedule(conn, &base, params)),
        _ => return None,
    };
    Some(resp)
}
