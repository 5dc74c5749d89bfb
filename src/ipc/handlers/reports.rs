use crate::calc::compute_monthly_aggregate;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{date_or_today, get_opt_str, get_required_str, to_json, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::format_date;
use crate::store::{AttendanceFilter, RecordStore, Table};
use chrono::{DateTime, Local};
use rusqlite::Connection;
use serde_json::{json, Value};

const RECENT_LIMIT: usize = 10;

fn reports_monthly(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let month = get_required_str(params, "month")?;
    let class_id = get_opt_str(params, "classId")?;
    let rows = compute_monthly_aggregate(&RecordStore::new(conn), &month, class_id.as_deref())?;
    Ok(json!({ "month": month.trim(), "rows": to_json(&rows)? }))
}

// Entry time as shown on the dashboard, in local time.
fn clock_time(created_at: &str) -> String {
    DateTime::parse_from_rfc3339(created_at)
        .map(|t| t.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_default()
}

fn dashboard_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let today = date_or_today(params)?;
    let store = RecordStore::new(conn);
    let counts = store.status_counts(today, today, None)?;
    let recent = store.list_attendance(&AttendanceFilter {
        limit: Some(RECENT_LIMIT),
        ..AttendanceFilter::default()
    })?;
    let recent: Vec<Value> = recent
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "studentName": r.student_name,
                "className": r.class.name,
                "date": r.date,
                "status": r.status,
                "time": clock_time(&r.created_at),
            })
        })
        .collect();

    Ok(json!({
        "date": format_date(today),
        "totalStudents": store.count_rows(Table::Students)?,
        "totalClasses": store.count_rows(Table::Classes)?,
        "today": {
            "present": counts.present,
            "sick": counts.sick,
            "excused": counts.excused,
            "absent": counts.absent,
            "recorded": counts.total(),
        },
        "recent": recent,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "reports.monthly" => reports_monthly,
        "dashboard.get" => dashboard_get,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
