use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_opt_date, get_opt_i64, get_opt_str, get_required_str, to_date, to_json, with_conn};
use crate::ipc::types::{AppState, Request};
use crate::model::{format_date, AttendanceStatus};
use crate::store::{AttendanceFilter, AttendanceInput, NoteInput, RecordStore, StoreError};
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::info;

const MAX_BULK_ENTRIES: usize = 1000;

fn parse_status(raw: &str) -> Result<AttendanceStatus, HandlerErr> {
    AttendanceStatus::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!(
            "status must be one of Hadir, Sakit, Izin, Alpha; got {:?}",
            raw
        ))
    })
}

/// Absent `note` keeps what is stored; `null` or a string replaces it.
fn parse_note(params: &Value) -> Result<NoteInput, HandlerErr> {
    match params.get("note") {
        None => Ok(NoteInput::Keep),
        Some(Value::Null) => Ok(NoteInput::Set(None)),
        Some(Value::String(s)) => Ok(NoteInput::Set(Some(s.clone()))),
        Some(_) => Err(HandlerErr::bad_params("note must be a string or null")),
    }
}

fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
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
    if let Some(limit) = get_opt_i64(params, "limit")? {
        if limit <= 0 {
            return Err(HandlerErr::bad_params("limit must be positive"));
        }
        filter.limit = Some(limit as usize);
    }
    let records = RecordStore::new(conn).list_attendance(&filter)?;
    Ok(json!({ "records": to_json(&records)? }))
}

fn attendance_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = AttendanceInput {
        student_id: get_required_str(params, "studentId")?,
        date: to_date(&get_required_str(params, "date")?, "date")?,
        status: parse_status(&get_required_str(params, "status")?)?,
        note: parse_note(params)?,
    };
    let (record, created) = RecordStore::new(conn).upsert_attendance(&input)?;
    Ok(json!({ "record": to_json(&record)?, "created": created }))
}

fn parse_entry(entry: &Value, date: NaiveDate) -> Result<AttendanceInput, HandlerErr> {
    Ok(AttendanceInput {
        student_id: get_required_str(entry, "studentId")?,
        date,
        status: parse_status(&get_required_str(entry, "status")?)?,
        note: parse_note(entry)?,
    })
}

fn entry_error(index: usize, student_id: Option<&str>, e: HandlerErr) -> Value {
    json!({
        "index": index,
        "studentId": student_id,
        "code": e.code,
        "message": e.message,
    })
}

fn attendance_bulk_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = to_date(&get_required_str(params, "date")?, "date")?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?;
    if entries.len() > MAX_BULK_ENTRIES {
        return Err(HandlerErr::bad_params(format!(
            "too many entries: {} (max {})",
            entries.len(),
            MAX_BULK_ENTRIES
        )));
    }

    let store = RecordStore::new(conn);
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::from(StoreError::Db(e)))?;
    let mut created = 0usize;
    let mut updated = 0usize;
    let mut errors = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let student_id = entry.get("studentId").and_then(|v| v.as_str());
        let result = parse_entry(entry, date)
            .and_then(|input| store.upsert_attendance(&input).map_err(HandlerErr::from));
        match result {
            Ok((_, true)) => created += 1,
            Ok((_, false)) => updated += 1,
            Err(e) => errors.push(entry_error(i, student_id, e)),
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(
        date = %format_date(date),
        created,
        updated,
        rejected = errors.len(),
        "bulk attendance recorded"
    );

    Ok(json!({
        "date": format_date(date),
        "created": created,
        "updated": updated,
        "errors": errors,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "attendance.list" => attendance_list,
        "attendance.record" => attendance_record,
        "attendance.bulkRecord" => attendance_bulk_record,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
