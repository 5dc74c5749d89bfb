//! Flat snapshot rows as written to the mirror sheets. Missing optional
//! values become empty strings so every row carries every column.

use super::SnapshotRow;
use crate::calc::MonthlyAggregate;
use crate::model::{AttendanceRecord, Student};
use serde_json::{json, Value};

fn text(v: &Option<String>) -> Value {
    Value::String(v.clone().unwrap_or_default())
}

fn into_row(v: Value) -> SnapshotRow {
    match v {
        Value::Object(map) => map,
        _ => SnapshotRow::new(),
    }
}

pub fn student_row(s: &Student) -> SnapshotRow {
    into_row(json!({
        "id": s.id,
        "registrationNumber": s.registration_number,
        "name": s.name,
        "sex": s.sex.as_str(),
        "className": s.class.name,
        "birthPlace": text(&s.birth_place),
        "birthDate": text(&s.birth_date),
        "address": text(&s.address),
        "phone": text(&s.phone),
        "guardianName": text(&s.guardian_name),
    }))
}

pub fn attendance_row(r: &AttendanceRecord) -> SnapshotRow {
    into_row(json!({
        "id": r.id,
        "date": r.date,
        "registrationNumber": r.registration_number,
        "name": r.student_name,
        "className": r.class.name,
        "status": r.status.as_str(),
        "note": text(&r.note),
        "createdAt": r.created_at,
    }))
}

pub fn aggregate_row(a: &MonthlyAggregate) -> SnapshotRow {
    into_row(json!({
        "month": a.month,
        "className": a.class_name,
        "totalStudents": a.total_students,
        "present": a.present,
        "sick": a.sick,
        "excused": a.excused,
        "absent": a.absent,
        "percentage": a.percentage,
    }))
}
