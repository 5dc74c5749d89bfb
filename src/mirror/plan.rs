//! Read local data, build snapshot rows and push them through the sync
//! client. Every outcome is remembered in workspace settings so that
//! `sync.status` can report the last result per kind.

use super::rows::{aggregate_row, attendance_row, student_row};
use super::{MirrorSyncClient, SyncKind, SyncResult};
use crate::calc::compute_monthly_aggregate;
use crate::db;
use crate::model::{format_date, MonthKey};
use crate::store::{AttendanceFilter, RecordStore, StoreError, StoreResult};
use chrono::{Datelike, Duration, NaiveDate};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

fn outcome_key(kind: SyncKind) -> String {
    format!("sync.last.{}", kind.action())
}

/// Best effort: a failed write here must not turn a finished sync into an error.
pub fn record_outcome(store: &RecordStore<'_>, result: &SyncResult) {
    let value = match serde_json::to_value(result) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "failed to encode sync outcome");
            return;
        }
    };
    if let Err(e) = db::settings_set_json(store.conn(), &outcome_key(result.kind), &value) {
        warn!(action = result.kind.action(), error = %e, "failed to persist sync outcome");
    }
}

/// Last stored outcome per action (`null` when that kind never ran).
pub fn last_outcomes(store: &RecordStore<'_>) -> Map<String, Value> {
    let mut out = Map::new();
    for kind in SyncKind::ALL {
        let v = match db::settings_get_json(store.conn(), &outcome_key(kind)) {
            Ok(v) => v.unwrap_or(Value::Null),
            Err(e) => {
                warn!(action = kind.action(), error = %e, "failed to read sync outcome");
                Value::Null
            }
        };
        out.insert(kind.action().to_string(), v);
    }
    out
}

pub fn sync_students(store: &RecordStore<'_>, client: &MirrorSyncClient) -> StoreResult<SyncResult> {
    let rows = store.list_students(None)?.iter().map(student_row).collect();
    let result = client.sync_batch(SyncKind::Students, rows, None);
    record_outcome(store, &result);
    Ok(result)
}

pub fn sync_attendance(
    store: &RecordStore<'_>,
    client: &MirrorSyncClient,
    filter: &AttendanceFilter,
) -> StoreResult<SyncResult> {
    let rows = store
        .list_attendance(filter)?
        .iter()
        .map(attendance_row)
        .collect();
    let result = client.sync_batch(SyncKind::Attendance, rows, None);
    record_outcome(store, &result);
    Ok(result)
}

pub fn sync_aggregate(
    store: &RecordStore<'_>,
    client: &MirrorSyncClient,
    month: &str,
    class_id: Option<&str>,
) -> StoreResult<SyncResult> {
    let key = MonthKey::parse(month)
        .ok_or_else(|| StoreError::Validation(format!("month must be YYYY-MM, got {:?}", month)))?;
    let month = key.to_string();
    let aggregates = compute_monthly_aggregate(store, &month, class_id)?;
    let rows = aggregates.iter().map(aggregate_row).collect();
    let result = client.sync_batch(SyncKind::MonthlyAggregate, rows, Some(&month));
    record_outcome(store, &result);
    Ok(result)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Schedule {
    Daily,
    Weekly,
    Monthly,
}

impl Schedule {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleReport {
    pub schedule: Schedule,
    pub date: String,
    pub steps: Vec<SyncResult>,
}

impl ScheduleReport {
    pub fn local_only(&self) -> bool {
        self.steps.iter().any(|s| s.local_only)
    }
}

/// Sunday..=Saturday week containing `day`.
pub fn week_bounds(day: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = day - Duration::days(day.weekday().num_days_from_sunday() as i64);
    (start, start + Duration::days(6))
}

pub fn run_schedule(
    store: &RecordStore<'_>,
    client: &MirrorSyncClient,
    schedule: Schedule,
    today: NaiveDate,
) -> StoreResult<ScheduleReport> {
    let month = MonthKey::of(today);
    let month_text = month.to_string();
    let mut steps = Vec::new();

    match schedule {
        Schedule::Daily => {
            steps.push(sync_attendance(store, client, &AttendanceFilter::day(today))?);
            steps.push(sync_students(store, client)?);
            if today == month.first_day() || today == month.last_day() {
                steps.push(sync_aggregate(store, client, &month_text, None)?);
            }
        }
        Schedule::Weekly => {
            let (from, to) = week_bounds(today);
            let filter = AttendanceFilter {
                from: Some(from),
                to: Some(to),
                ..AttendanceFilter::default()
            };
            steps.push(sync_attendance(store, client, &filter)?);
            steps.push(sync_aggregate(store, client, &month_text, None)?);
        }
        Schedule::Monthly => {
            steps.push(sync_students(store, client)?);
            steps.push(sync_aggregate(store, client, &month_text, None)?);
            let filter = AttendanceFilter {
                from: Some(month.first_day()),
                to: Some(month.last_day()),
                ..AttendanceFilter::default()
            };
            steps.push(sync_attendance(store, client, &filter)?);
        }
    }

    let report = ScheduleReport {
        schedule,
        date: format_date(today),
        steps,
    };
    info!(
        schedule = ?schedule,
        steps = report.steps.len(),
        local_only = report.local_only(),
        "scheduled sync finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::super::sheet::MirrorSheet;
    use super::*;
    use crate::model::{AttendanceStatus, Sex};
    use crate::store::{AttendanceInput, NewClass, NewStudent, NoteInput};
    use rusqlite::Connection;
    use std::sync::Arc;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn fixture(conn: &Connection) {
        db::init_schema(conn).expect("schema");
        let store = RecordStore::new(conn);
        let class = store
            .create_class(&NewClass {
                name: "X IPA 1".to_string(),
                grade_level: "X".to_string(),
                track: Some("IPA".to_string()),
                homeroom_teacher: Some("Ahmad Fauzi".to_string()),
                capacity: None,
            })
            .expect("class");
        for (nis, name) in [("2024001", "Ahmad Rizki"), ("2024007", "Fajar Nugroho")] {
            let s = store
                .create_student(&NewStudent {
                    registration_number: nis.to_string(),
                    name: name.to_string(),
                    sex: Sex::Male,
                    birth_place: None,
                    birth_date: None,
                    address: None,
                    phone: None,
                    guardian_name: None,
                    class_id: class.id.clone(),
                })
                .expect("student");
            for (d, status) in [
                ("2024-05-30", AttendanceStatus::Present),
                ("2024-05-31", AttendanceStatus::Absent),
                ("2024-06-01", AttendanceStatus::Present),
            ] {
                store
                    .upsert_attendance(&AttendanceInput {
                        student_id: s.id.clone(),
                        date: day(d),
                        status,
                        note: NoteInput::Keep,
                    })
                    .expect("mark");
            }
        }
    }

    #[test]
    fn week_starts_on_sunday() {
        // 2024-05-29 is a Wednesday.
        assert_eq!(week_bounds(day("2024-05-29")), (day("2024-05-26"), day("2024-06-01")));
        assert_eq!(week_bounds(day("2024-05-26")), (day("2024-05-26"), day("2024-06-01")));
    }

    #[test]
    fn daily_plan_adds_aggregate_on_month_end() {
        let conn = Connection::open_in_memory().expect("db");
        fixture(&conn);
        let store = RecordStore::new(&conn);
        let sheet = Arc::new(MirrorSheet::new());
        let client = MirrorSyncClient::new(Box::new(sheet.clone()));

        let mid = run_schedule(&store, &client, Schedule::Daily, day("2024-05-30")).expect("daily");
        assert_eq!(mid.steps.len(), 2);
        assert_eq!(mid.steps[0].record_count, 2);

        let end = run_schedule(&store, &client, Schedule::Daily, day("2024-05-31")).expect("daily");
        let kinds: Vec<SyncKind> = end.steps.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![SyncKind::Attendance, SyncKind::Students, SyncKind::MonthlyAggregate]
        );
        let state = sheet.snapshot();
        assert_eq!(state.attendance.len(), 4);
        assert_eq!(state.aggregates.len(), 1);
        assert_eq!(state.aggregates[0].get("percentage"), Some(&serde_json::json!(50.0)));
    }

    #[test]
    fn weekly_and_monthly_plans_cover_their_ranges() {
        let conn = Connection::open_in_memory().expect("db");
        fixture(&conn);
        let store = RecordStore::new(&conn);
        let sheet = Arc::new(MirrorSheet::new());
        let client = MirrorSyncClient::new(Box::new(sheet.clone()));

        let weekly = run_schedule(&store, &client, Schedule::Weekly, day("2024-05-29")).expect("weekly");
        assert_eq!(weekly.steps[0].record_count, 6);
        assert_eq!(weekly.steps[1].month_context.as_deref(), Some("2024-05"));

        let monthly = run_schedule(&store, &client, Schedule::Monthly, day("2024-05-15")).expect("monthly");
        assert_eq!(monthly.steps.len(), 3);
        assert_eq!(monthly.steps[2].record_count, 4);
        assert!(!monthly.local_only());
    }

    #[test]
    fn aggregate_resync_uses_normalised_month() {
        let conn = Connection::open_in_memory().expect("db");
        fixture(&conn);
        let store = RecordStore::new(&conn);
        let sheet = Arc::new(MirrorSheet::new());
        let client = MirrorSyncClient::new(Box::new(sheet.clone()));

        for _ in 0..2 {
            let r = sync_aggregate(&store, &client, " 2024-05 ", None).expect("aggregate");
            assert_eq!(r.month_context.as_deref(), Some("2024-05"));
        }
        assert_eq!(sheet.snapshot().aggregates.len(), 1);

        let err = sync_aggregate(&store, &client, "+024-05", None).expect_err("signed year");
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(sheet.snapshot().aggregates.len(), 1);
    }

    #[test]
    fn outcomes_are_remembered_per_kind() {
        let conn = Connection::open_in_memory().expect("db");
        fixture(&conn);
        let store = RecordStore::new(&conn);
        let client = MirrorSyncClient::new(Box::new(super::super::Unconfigured));

        let before = last_outcomes(&store);
        assert_eq!(before.get("students"), Some(&Value::Null));

        sync_students(&store, &client).expect("sync");
        let after = last_outcomes(&store);
        let students = after.get("students").expect("students outcome");
        assert_eq!(students.get("status"), Some(&serde_json::json!("success-local")));
        assert_eq!(students.get("failure"), Some(&serde_json::json!("not_configured")));
        assert_eq!(after.get("attendance"), Some(&Value::Null));
    }
}
