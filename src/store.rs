use crate::model::{
    format_date, AttendanceRecord, AttendanceStatus, Class, ClassRef, Sex, Student,
    DEFAULT_CLASS_CAPACITY,
};
use chrono::{NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Db(_) => "db_query_failed",
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone)]
pub struct NewClass {
    pub name: String,
    pub grade_level: String,
    pub track: Option<String>,
    pub homeroom_teacher: Option<String>,
    pub capacity: Option<i64>,
}

/// Outer `Option` is "field present in the patch", inner is the new value.
#[derive(Debug, Clone, Default)]
pub struct ClassPatch {
    pub name: Option<String>,
    pub grade_level: Option<String>,
    pub track: Option<Option<String>>,
    pub homeroom_teacher: Option<Option<String>>,
    pub capacity: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewStudent {
    pub registration_number: String,
    pub name: String,
    pub sex: Sex,
    pub birth_place: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub guardian_name: Option<String>,
    pub class_id: String,
}

#[derive(Debug, Clone, Default)]
pub struct StudentPatch {
    pub registration_number: Option<String>,
    pub name: Option<String>,
    pub sex: Option<Sex>,
    pub birth_place: Option<Option<String>>,
    pub birth_date: Option<Option<NaiveDate>>,
    pub address: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub guardian_name: Option<Option<String>>,
    pub class_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteInput {
    Keep,
    Set(Option<String>),
}

#[derive(Debug, Clone)]
pub struct AttendanceInput {
    pub student_id: String,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub note: NoteInput,
}

#[derive(Debug, Clone, Default)]
pub struct AttendanceFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub class_id: Option<String>,
    pub limit: Option<usize>,
}

impl AttendanceFilter {
    pub fn day(date: NaiveDate) -> Self {
        Self {
            from: Some(date),
            to: Some(date),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusCounts {
    pub present: i64,
    pub sick: i64,
    pub excused: i64,
    pub absent: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: AttendanceStatus, n: i64) {
        match status {
            AttendanceStatus::Present => self.present += n,
            AttendanceStatus::Sick => self.sick += n,
            AttendanceStatus::Excused => self.excused += n,
            AttendanceStatus::Absent => self.absent += n,
        }
    }

    pub fn total(&self) -> i64 {
        self.present + self.sick + self.excused + self.absent
    }
}

const CLASS_SELECT: &str = "SELECT
       c.id,
       c.name,
       c.grade_level,
       c.track,
       c.homeroom_teacher,
       c.capacity,
       (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
     FROM classes c";

const STUDENT_SELECT: &str = "SELECT
       s.id, s.registration_number, s.name, s.sex, s.birth_place, s.birth_date,
       s.address, s.phone, s.guardian_name, c.id, c.name
     FROM students s
     JOIN classes c ON c.id = s.class_id";

const ATTENDANCE_SELECT: &str = "SELECT
       a.id, a.student_id, s.registration_number, s.name, c.id, c.name,
       a.date, a.status, a.note, a.created_at, a.updated_at
     FROM attendance a
     JOIN students s ON s.id = a.student_id
     JOIN classes c ON c.id = s.class_id";

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn clean_opt(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn require_text(value: &str, field: &str) -> StoreResult<String> {
    let t = value.trim();
    if t.is_empty() {
        return Err(StoreError::Validation(format!("{} must not be empty", field)));
    }
    Ok(t.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn text_column<T>(idx: usize, raw: String, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unexpected stored value {:?}", raw).into(),
        )
    })
}

fn map_class(r: &Row<'_>) -> rusqlite::Result<Class> {
    Ok(Class {
        id: r.get(0)?,
        name: r.get(1)?,
        grade_level: r.get(2)?,
        track: r.get(3)?,
        homeroom_teacher: r.get(4)?,
        capacity: r.get(5)?,
        student_count: r.get(6)?,
    })
}

fn map_student(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        registration_number: r.get(1)?,
        name: r.get(2)?,
        sex: text_column(3, r.get(3)?, Sex::parse)?,
        birth_place: r.get(4)?,
        birth_date: r.get(5)?,
        address: r.get(6)?,
        phone: r.get(7)?,
        guardian_name: r.get(8)?,
        class: ClassRef {
            id: r.get(9)?,
            name: r.get(10)?,
        },
    })
}

fn map_attendance(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    Ok(AttendanceRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        registration_number: r.get(2)?,
        student_name: r.get(3)?,
        class: ClassRef {
            id: r.get(4)?,
            name: r.get(5)?,
        },
        date: r.get(6)?,
        status: text_column(7, r.get(7)?, AttendanceStatus::parse)?,
        note: r.get(8)?,
        created_at: r.get(9)?,
        updated_at: r.get(10)?,
    })
}

/// Typed access to the workspace database. Borrowed per request; the
/// connection itself is owned by the caller.
#[derive(Clone, Copy)]
pub struct RecordStore<'a> {
    conn: &'a Connection,
}

impl<'a> RecordStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    // ---- classes ----

    pub fn class_exists(&self, class_id: &str) -> StoreResult<bool> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    pub fn list_classes(&self) -> StoreResult<Vec<Class>> {
        let sql = format!("{} ORDER BY c.name", CLASS_SELECT);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], map_class)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_class(&self, class_id: &str) -> StoreResult<Class> {
        let sql = format!("{} WHERE c.id = ?", CLASS_SELECT);
        self.conn
            .query_row(&sql, [class_id], map_class)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("class not found: {}", class_id)))
    }

    pub fn find_class_by_name(&self, name: &str) -> StoreResult<Option<Class>> {
        let sql = format!("{} WHERE c.name = ?", CLASS_SELECT);
        Ok(self.conn.query_row(&sql, [name.trim()], map_class).optional()?)
    }

    pub fn create_class(&self, input: &NewClass) -> StoreResult<Class> {
        let name = require_text(&input.name, "name")?;
        let grade_level = require_text(&input.grade_level, "gradeLevel")?;
        let capacity = input.capacity.unwrap_or(DEFAULT_CLASS_CAPACITY);
        if capacity <= 0 {
            return Err(StoreError::Validation(
                "capacity must be a positive integer".to_string(),
            ));
        }
        if self.find_class_by_name(&name)?.is_some() {
            return Err(StoreError::Conflict(format!("class name already exists: {}", name)));
        }

        let class_id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO classes(id, name, grade_level, track, homeroom_teacher, capacity, created_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                params![
                    class_id,
                    name,
                    grade_level,
                    clean_opt(input.track.clone()),
                    clean_opt(input.homeroom_teacher.clone()),
                    capacity,
                    now_timestamp()
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("class name already exists: {}", name))
                } else {
                    StoreError::Db(e)
                }
            })?;
        info!(class_id = %class_id, name = %name, "class created");
        self.get_class(&class_id)
    }

    pub fn update_class(&self, class_id: &str, patch: &ClassPatch) -> StoreResult<Class> {
        let current = self.get_class(class_id)?;
        let name = match &patch.name {
            Some(v) => require_text(v, "name")?,
            None => current.name.clone(),
        };
        let grade_level = match &patch.grade_level {
            Some(v) => require_text(v, "gradeLevel")?,
            None => current.grade_level.clone(),
        };
        let track = match &patch.track {
            Some(v) => clean_opt(v.clone()),
            None => current.track.clone(),
        };
        let homeroom_teacher = match &patch.homeroom_teacher {
            Some(v) => clean_opt(v.clone()),
            None => current.homeroom_teacher.clone(),
        };
        let capacity = patch.capacity.unwrap_or(current.capacity);
        if capacity <= 0 {
            return Err(StoreError::Validation(
                "capacity must be a positive integer".to_string(),
            ));
        }
        if let Some(other) = self.find_class_by_name(&name)? {
            if other.id != class_id {
                return Err(StoreError::Conflict(format!("class name already exists: {}", name)));
            }
        }

        self.conn
            .execute(
                "UPDATE classes
                 SET name = ?, grade_level = ?, track = ?, homeroom_teacher = ?, capacity = ?
                 WHERE id = ?",
                params![name, grade_level, track, homeroom_teacher, capacity, class_id],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("class name already exists: {}", name))
                } else {
                    StoreError::Db(e)
                }
            })?;
        self.get_class(class_id)
    }

    pub fn delete_class(&self, class_id: &str) -> StoreResult<()> {
        let class = self.get_class(class_id)?;
        if class.student_count > 0 {
            return Err(StoreError::Conflict(format!(
                "class {} still has {} students",
                class.name, class.student_count
            )));
        }
        self.conn
            .execute("DELETE FROM classes WHERE id = ?", [class_id])?;
        info!(class_id = %class_id, "class deleted");
        Ok(())
    }

    // ---- students ----

    pub fn student_exists(&self, student_id: &str) -> StoreResult<bool> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    pub fn list_students(&self, class_id: Option<&str>) -> StoreResult<Vec<Student>> {
        let rows = match class_id {
            Some(cid) => {
                let sql = format!("{} WHERE s.class_id = ? ORDER BY s.name, s.id", STUDENT_SELECT);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([cid], map_student)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let sql = format!("{} ORDER BY s.name, s.id", STUDENT_SELECT);
                let mut stmt = self.conn.prepare(&sql)?;
                let rows = stmt
                    .query_map([], map_student)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };
        Ok(rows)
    }

    pub fn get_student(&self, student_id: &str) -> StoreResult<Student> {
        let sql = format!("{} WHERE s.id = ?", STUDENT_SELECT);
        self.conn
            .query_row(&sql, [student_id], map_student)
            .optional()?
            .ok_or_else(|| StoreError::NotFound(format!("student not found: {}", student_id)))
    }

    pub fn find_student_by_registration(&self, registration_number: &str) -> StoreResult<Option<Student>> {
        let sql = format!("{} WHERE s.registration_number = ?", STUDENT_SELECT);
        Ok(self
            .conn
            .query_row(&sql, [registration_number.trim()], map_student)
            .optional()?)
    }

    pub fn create_student(&self, input: &NewStudent) -> StoreResult<Student> {
        let registration_number = require_text(&input.registration_number, "registrationNumber")?;
        let name = require_text(&input.name, "name")?;
        if !self.class_exists(&input.class_id)? {
            return Err(StoreError::NotFound(format!("class not found: {}", input.class_id)));
        }
        if self.find_student_by_registration(&registration_number)?.is_some() {
            return Err(StoreError::Conflict(format!(
                "registration number already exists: {}",
                registration_number
            )));
        }

        let student_id = Uuid::new_v4().to_string();
        self.conn
            .execute(
                "INSERT INTO students(
                   id, registration_number, name, sex, birth_place, birth_date,
                   address, phone, guardian_name, class_id, created_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    student_id,
                    registration_number,
                    name,
                    input.sex.as_str(),
                    clean_opt(input.birth_place.clone()),
                    input.birth_date.map(format_date),
                    clean_opt(input.address.clone()),
                    clean_opt(input.phone.clone()),
                    clean_opt(input.guardian_name.clone()),
                    input.class_id,
                    now_timestamp()
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!(
                        "registration number already exists: {}",
                        registration_number
                    ))
                } else {
                    StoreError::Db(e)
                }
            })?;
        info!(student_id = %student_id, class_id = %input.class_id, "student created");
        self.get_student(&student_id)
    }

    pub fn update_student(&self, student_id: &str, patch: &StudentPatch) -> StoreResult<Student> {
        let current = self.get_student(student_id)?;
        let registration_number = match &patch.registration_number {
            Some(v) => require_text(v, "registrationNumber")?,
            None => current.registration_number.clone(),
        };
        let name = match &patch.name {
            Some(v) => require_text(v, "name")?,
            None => current.name.clone(),
        };
        let sex = patch.sex.unwrap_or(current.sex);
        let class_id = match &patch.class_id {
            Some(cid) => {
                if !self.class_exists(cid)? {
                    return Err(StoreError::NotFound(format!("class not found: {}", cid)));
                }
                cid.clone()
            }
            None => current.class.id.clone(),
        };
        let birth_date = match &patch.birth_date {
            Some(v) => v.map(format_date),
            None => current.birth_date.clone(),
        };
        let pick = |p: &Option<Option<String>>, cur: &Option<String>| match p {
            Some(v) => clean_opt(v.clone()),
            None => cur.clone(),
        };
        let birth_place = pick(&patch.birth_place, &current.birth_place);
        let address = pick(&patch.address, &current.address);
        let phone = pick(&patch.phone, &current.phone);
        let guardian_name = pick(&patch.guardian_name, &current.guardian_name);

        if let Some(other) = self.find_student_by_registration(&registration_number)? {
            if other.id != student_id {
                return Err(StoreError::Conflict(format!(
                    "registration number already exists: {}",
                    registration_number
                )));
            }
        }

        self.conn
            .execute(
                "UPDATE students
                 SET registration_number = ?, name = ?, sex = ?, birth_place = ?, birth_date = ?,
                     address = ?, phone = ?, guardian_name = ?, class_id = ?
                 WHERE id = ?",
                params![
                    registration_number,
                    name,
                    sex.as_str(),
                    birth_place,
                    birth_date,
                    address,
                    phone,
                    guardian_name,
                    class_id,
                    student_id
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!(
                        "registration number already exists: {}",
                        registration_number
                    ))
                } else {
                    StoreError::Db(e)
                }
            })?;
        self.get_student(student_id)
    }

    /// Attendance is never removed implicitly: a student with records can
    /// only be deleted with `force`, which removes the records first.
    pub fn delete_student(&self, student_id: &str, force: bool) -> StoreResult<usize> {
        if !self.student_exists(student_id)? {
            return Err(StoreError::NotFound(format!("student not found: {}", student_id)));
        }
        let record_count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM attendance WHERE student_id = ?",
            [student_id],
            |r| r.get(0),
        )?;
        if record_count > 0 && !force {
            return Err(StoreError::Conflict(format!(
                "student has {} attendance records",
                record_count
            )));
        }

        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute("DELETE FROM attendance WHERE student_id = ?", [student_id])?;
        tx.execute("DELETE FROM students WHERE id = ?", [student_id])?;
        tx.commit()?;
        info!(student_id = %student_id, removed_records = removed, "student deleted");
        Ok(removed)
    }

    // ---- attendance ----

    pub fn get_attendance(&self, student_id: &str, date: NaiveDate) -> StoreResult<Option<AttendanceRecord>> {
        let sql = format!("{} WHERE a.student_id = ? AND a.date = ?", ATTENDANCE_SELECT);
        Ok(self
            .conn
            .query_row(&sql, (student_id, format_date(date)), map_attendance)
            .optional()?)
    }

    pub fn list_attendance(&self, filter: &AttendanceFilter) -> StoreResult<Vec<AttendanceRecord>> {
        let mut sql = format!("{} WHERE 1 = 1", ATTENDANCE_SELECT);
        let mut binds: Vec<Value> = Vec::new();
        if let Some(from) = filter.from {
            sql.push_str(" AND a.date >= ?");
            binds.push(Value::Text(format_date(from)));
        }
        if let Some(to) = filter.to {
            sql.push_str(" AND a.date <= ?");
            binds.push(Value::Text(format_date(to)));
        }
        if let Some(cid) = &filter.class_id {
            sql.push_str(" AND s.class_id = ?");
            binds.push(Value::Text(cid.clone()));
        }
        sql.push_str(" ORDER BY a.created_at DESC, a.rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), map_attendance)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Insert or update the single record for (student, date). Returns the
    /// stored record and whether it was newly created.
    pub fn upsert_attendance(&self, input: &AttendanceInput) -> StoreResult<(AttendanceRecord, bool)> {
        if !self.student_exists(&input.student_id)? {
            return Err(StoreError::NotFound(format!(
                "student not found: {}",
                input.student_id
            )));
        }
        let date = format_date(input.date);
        let existed = self
            .conn
            .query_row(
                "SELECT 1 FROM attendance WHERE student_id = ? AND date = ?",
                (&input.student_id, &date),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();

        let (keep_note, note) = match &input.note {
            NoteInput::Keep => (true, None),
            NoteInput::Set(n) => (false, clean_opt(n.clone())),
        };
        let now = now_timestamp();
        self.conn.execute(
            "INSERT INTO attendance(id, student_id, date, status, note, created_at, updated_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(student_id, date) DO UPDATE SET
               status = excluded.status,
               note = CASE WHEN ?7 THEN attendance.note ELSE excluded.note END,
               updated_at = excluded.updated_at",
            params![
                Uuid::new_v4().to_string(),
                input.student_id,
                date,
                input.status.as_str(),
                note,
                now,
                keep_note
            ],
        )?;
        debug!(
            student_id = %input.student_id,
            date = %date,
            status = %input.status,
            created = !existed,
            "attendance written"
        );

        let record = self.get_attendance(&input.student_id, input.date)?.ok_or_else(|| {
            StoreError::NotFound(format!(
                "attendance for {} on {} vanished after write",
                input.student_id, date
            ))
        })?;
        Ok((record, !existed))
    }

    pub fn status_counts(
        &self,
        from: NaiveDate,
        to: NaiveDate,
        class_id: Option<&str>,
    ) -> StoreResult<StatusCounts> {
        let mut sql = "SELECT a.status, COUNT(*)
             FROM attendance a
             JOIN students s ON s.id = a.student_id
             WHERE a.date >= ? AND a.date <= ?"
            .to_string();
        let mut binds: Vec<Value> = vec![Value::Text(format_date(from)), Value::Text(format_date(to))];
        if let Some(cid) = class_id {
            sql.push_str(" AND s.class_id = ?");
            binds.push(Value::Text(cid.to_string()));
        }
        sql.push_str(" GROUP BY a.status");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(binds), |r| {
                Ok((text_column(0, r.get(0)?, AttendanceStatus::parse)?, r.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut counts = StatusCounts::default();
        for (status, n) in rows {
            counts.add(status, n);
        }
        Ok(counts)
    }

    pub fn count_rows(&self, table: Table) -> StoreResult<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.name());
        Ok(self.conn.query_row(&sql, [], |r| r.get(0))?)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Table {
    Classes,
    Students,
    Attendance,
}

impl Table {
    fn name(self) -> &'static str {
        match self {
            Self::Classes => "classes",
            Self::Students => "students",
            Self::Attendance => "attendance",
        }
    }
}
