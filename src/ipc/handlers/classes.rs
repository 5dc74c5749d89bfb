use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    get_object, get_opt_i64, get_opt_str, get_patch_str, get_required_str, to_json, with_conn,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{ClassPatch, NewClass, RecordStore};
use rusqlite::Connection;
use serde_json::{json, Value};

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let classes = RecordStore::new(conn).list_classes()?;
    Ok(json!({ "classes": to_json(&classes)? }))
}

fn classes_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let class = RecordStore::new(conn).get_class(&class_id)?;
    Ok(json!({ "class": to_json(&class)? }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let input = NewClass {
        name: get_required_str(params, "name")?,
        grade_level: get_required_str(params, "gradeLevel")?,
        track: get_opt_str(params, "track")?,
        homeroom_teacher: get_opt_str(params, "homeroomTeacher")?,
        capacity: get_opt_i64(params, "capacity")?,
    };
    let class = RecordStore::new(conn).create_class(&input)?;
    Ok(json!({ "class": to_json(&class)? }))
}

fn classes_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let raw = Value::Object(get_object(params, "patch")?.clone());
    let patch = ClassPatch {
        name: get_opt_str(&raw, "name")?,
        grade_level: get_opt_str(&raw, "gradeLevel")?,
        track: get_patch_str(&raw, "track")?,
        homeroom_teacher: get_patch_str(&raw, "homeroomTeacher")?,
        capacity: get_opt_i64(&raw, "capacity")?,
    };
    let class = RecordStore::new(conn).update_class(&class_id, &patch)?;
    Ok(json!({ "class": to_json(&class)? }))
}

fn classes_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    RecordStore::new(conn).delete_class(&class_id)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let handler: fn(&Connection, &Value) -> Result<Value, HandlerErr> = match req.method.as_str() {
        "classes.list" => classes_list,
        "classes.get" => classes_get,
        "classes.create" => classes_create,
        "classes.update" => classes_update,
        "classes.delete" => classes_delete,
        _ => return None,
    };
    Some(with_conn(state, req, handler))
}
