use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_bool, get_object, get_opt_date, get_opt_str, get_patch_str, get_required_str, to_date,
    to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Sex;
use crate::store::{NewStudent, RecordStore, StudentPatch};
use rusqlite::Connection;
use serde_json::{json, Value};

fn parse_sex(raw: &str) -> Result<Sex, HandlerErr> {
    Sex::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params(format!("sex must be Laki-laki or Perempuan, got {:?}", raw))
    })
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_opt_str(params, "classId")?;
    let store = RecordStore::new(conn);
    if let Some(cid) = class_id.as_deref() {
        // An unknown class is an error, not an empty list.
        store.get_class(cid)?;
    }
    let students = store.list_students(class_id.as_deref())?;
    Ok(json!({ "students": to_json(&students)? }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let student = RecordStore::new(conn).get_student(&student_id)?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = NewStudent {
        registration_number: get_required_str(params, "registrationNumber")?,
        name: get_required_str(params, "name")?,
        sex: parse_sex(&get_required_str(params, "sex")?)?,
        birth_place: get_opt_str(params, "birthPlace")?,
        birth_date: get_opt_date(params, "birthDate")?,
        address: get_opt_str(params, "address")?,
        phone: get_opt_str(params, "phone")?,
        guardian_name: get_opt_str(params, "guardianName")?,
        class_id: get_required_str(params, "classId")?,
    };
    let student = RecordStore::new(conn).create_student(&input)?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let raw = Value::Object(get_object(params, "patch")?.clone());
    let birth_date = match get_patch_str(&raw, "birthDate")? {
        None => None,
        Some(None) => Some(None),
        Some(Some(s)) if s.trim().is_empty() => Some(None),
        Some(Some(s)) => Some(Some(to_date(&s, "birthDate")?)),
    };
    let patch = StudentPatch {
        registration_number: get_opt_str(&raw, "registrationNumber")?,
        name: get_opt_str(&raw, "name")?,
        sex: get_opt_str(&raw, "sex")?.as_deref().map(parse_sex).transpose()?,
        birth_place: get_patch_str(&raw, "birthPlace")?,
        birth_date,
        address: get_patch_str(&raw, "address")?,
        phone: get_patch_str(&raw, "phone")?,
        guardian_name: get_patch_str(&raw, "guardianName")?,
        class_id: get_opt_str(&raw, "classId")?,
    };
    let student = RecordStore::new(conn).update_student(&student_id, &patch)?;
    Ok(json!({ "student": to_json(&student)? }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let force = get_bool(params, "force");
    let removed = RecordStore::new(conn).delete_student(&student_id, force)?;
    Ok(json!({ "ok": true, "removedAttendance": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
