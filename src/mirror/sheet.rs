//! In-process implementation of the mirror's upsert contract.
//!
//! Mirrors what the spreadsheet automation does with a batch: student rows
//! are fully replaced, attendance rows are upserted by `id`, aggregate rows
//! are replaced per month. Used as the test double for the sync client.

use super::{MirrorError, MirrorTransport, SnapshotRow, SyncKind, SyncRequest, SyncResponse};
use serde_json::Value;
use std::sync::Mutex;

pub const ATTENDANCE_KEY_COLUMN: &str = "id";
pub const AGGREGATE_MONTH_COLUMN: &str = "month";

impl SyncResponse {
    pub fn success(message: impl Into<String>, added: i64, updated: Option<i64>, errors: Vec<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
            added: Some(added),
            updated,
            errors,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            message: message.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Band {
    Green,
    Yellow,
    Blue,
    Red,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormatCondition {
    TextEquals(&'static str),
    AtLeast(f64),
    Between(f64, f64),
    Below(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormatRule {
    pub column: &'static str,
    pub condition: FormatCondition,
    pub band: Band,
}

impl FormatRule {
    pub fn matches(&self, row: &SnapshotRow) -> bool {
        let Some(v) = row.get(self.column) else {
            return false;
        };
        match &self.condition {
            FormatCondition::TextEquals(t) => v.as_str() == Some(*t),
            FormatCondition::AtLeast(min) => v.as_f64().is_some_and(|x| x >= *min),
            FormatCondition::Between(lo, hi) => v.as_f64().is_some_and(|x| x >= *lo && x <= *hi),
            FormatCondition::Below(max) => v.as_f64().is_some_and(|x| x < *max),
        }
    }
}

fn attendance_rules() -> Vec<FormatRule> {
    [
        ("Hadir", Band::Green),
        ("Sakit", Band::Yellow),
        ("Izin", Band::Blue),
        ("Alpha", Band::Red),
    ]
    .into_iter()
    .map(|(text, band)| FormatRule {
        column: "status",
        condition: FormatCondition::TextEquals(text),
        band,
    })
    .collect()
}

fn aggregate_rules() -> Vec<FormatRule> {
    vec![
        FormatRule {
            column: "percentage",
            condition: FormatCondition::AtLeast(90.0),
            band: Band::Green,
        },
        FormatRule {
            column: "percentage",
            condition: FormatCondition::Between(75.0, 89.9),
            band: Band::Yellow,
        },
        FormatRule {
            column: "percentage",
            condition: FormatCondition::Below(75.0),
            band: Band::Red,
        },
    ]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetState {
    pub students: Vec<SnapshotRow>,
    pub attendance: Vec<SnapshotRow>,
    pub aggregates: Vec<SnapshotRow>,
    pub attendance_rules: Vec<FormatRule>,
    pub aggregate_rules: Vec<FormatRule>,
}

impl SheetState {
    pub fn rows(&self, kind: SyncKind) -> &[SnapshotRow] {
        match kind {
            SyncKind::Students => &self.students,
            SyncKind::Attendance => &self.attendance,
            SyncKind::MonthlyAggregate => &self.aggregates,
        }
    }

    /// Band of the first matching conditional-format rule for a row.
    pub fn highlight(&self, kind: SyncKind, index: usize) -> Option<Band> {
        let rules = match kind {
            SyncKind::Students => return None,
            SyncKind::Attendance => &self.attendance_rules,
            SyncKind::MonthlyAggregate => &self.aggregate_rules,
        };
        let row = self.rows(kind).get(index)?;
        rules.iter().find(|r| r.matches(row)).map(|r| r.band)
    }

    fn replace_students(&mut self, rows: &[SnapshotRow]) -> SyncResponse {
        self.students.clear();
        self.students.extend(rows.iter().cloned());
        SyncResponse::success(
            format!("Student data synced: {} records", rows.len()),
            rows.len() as i64,
            None,
            Vec::new(),
        )
    }

    fn upsert_attendance(&mut self, rows: &[SnapshotRow]) -> SyncResponse {
        let mut added = 0;
        let mut updated = 0;
        let mut errors = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            let Some(key) = row
                .get(ATTENDANCE_KEY_COLUMN)
                .and_then(Value::as_str)
                .filter(|k| !k.is_empty())
            else {
                errors.push(format!("Row {}: missing {}", i + 1, ATTENDANCE_KEY_COLUMN));
                continue;
            };
            let existing = self
                .attendance
                .iter()
                .position(|r| r.get(ATTENDANCE_KEY_COLUMN).and_then(Value::as_str) == Some(key));
            match existing {
                Some(pos) => {
                    self.attendance[pos] = row.clone();
                    updated += 1;
                }
                None => {
                    self.attendance.push(row.clone());
                    added += 1;
                }
            }
        }
        self.attendance_rules = attendance_rules();
        SyncResponse::success(
            format!("Sync completed: {} added, {} updated", added, updated),
            added,
            Some(updated),
            errors,
        )
    }

    fn replace_month(&mut self, month: &str, rows: &[SnapshotRow]) -> SyncResponse {
        self.aggregates.retain(|r| {
            !r.get(AGGREGATE_MONTH_COLUMN)
                .and_then(Value::as_str)
                .is_some_and(|m| m.starts_with(month))
        });
        self.aggregates.extend(rows.iter().cloned());
        self.aggregate_rules = aggregate_rules();
        SyncResponse::success(
            format!("Aggregate data synced: {} records", rows.len()),
            rows.len() as i64,
            None,
            Vec::new(),
        )
    }
}

#[derive(Debug, Default)]
pub struct MirrorSheet {
    state: Mutex<SheetState>,
}

impl MirrorSheet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SheetState {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn apply(&self, request: &SyncRequest) -> SyncResponse {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match request.action {
            SyncKind::Students => state.replace_students(&request.rows),
            SyncKind::Attendance => state.upsert_attendance(&request.rows),
            SyncKind::MonthlyAggregate => match request.month_context.as_deref() {
                Some(month) if !month.is_empty() => state.replace_month(month, &request.rows),
                _ => SyncResponse::error("monthContext is required for aggregate rows"),
            },
        }
    }
}

impl MirrorTransport for MirrorSheet {
    fn send(&self, request: &SyncRequest) -> Result<SyncResponse, MirrorError> {
        Ok(self.apply(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> SnapshotRow {
        v.as_object().cloned().expect("object row")
    }

    fn request(action: SyncKind, rows: Vec<SnapshotRow>, month: Option<&str>) -> SyncRequest {
        SyncRequest {
            action,
            rows,
            month_context: month.map(|m| m.to_string()),
        }
    }

    #[test]
    fn rows_without_key_are_reported_not_appended() {
        let sheet = MirrorSheet::new();
        let resp = sheet.apply(&request(
            SyncKind::Attendance,
            vec![row(json!({"status": "Hadir"})), row(json!({"id": "a1", "status": "Hadir"}))],
            None,
        ));
        assert_eq!(resp.added, Some(1));
        assert_eq!(resp.errors, vec!["Row 1: missing id".to_string()]);
        assert_eq!(sheet.snapshot().attendance.len(), 1);
    }

    #[test]
    fn month_delete_removes_every_matching_row() {
        let sheet = MirrorSheet::new();
        sheet.apply(&request(
            SyncKind::MonthlyAggregate,
            vec![
                row(json!({"month": "2024-05", "className": "A"})),
                row(json!({"month": "2024-05", "className": "B"})),
                row(json!({"month": "2024-05", "className": "C"})),
            ],
            Some("2024-05"),
        ));
        sheet.apply(&request(SyncKind::MonthlyAggregate, Vec::new(), Some("2024-05")));
        assert!(sheet.snapshot().aggregates.is_empty());
    }

    #[test]
    fn aggregate_without_month_is_an_error_response() {
        let sheet = MirrorSheet::new();
        let resp = sheet.apply(&request(
            SyncKind::MonthlyAggregate,
            vec![row(json!({"month": "2024-05"}))],
            None,
        ));
        assert_eq!(resp.status, "error");
        assert!(sheet.snapshot().aggregates.is_empty());
    }

    #[test]
    fn formatting_follows_status_and_percentage_bands() {
        let sheet = MirrorSheet::new();
        sheet.apply(&request(
            SyncKind::Attendance,
            vec![
                row(json!({"id": "a1", "status": "Hadir"})),
                row(json!({"id": "a2", "status": "Alpha"})),
            ],
            None,
        ));
        sheet.apply(&request(
            SyncKind::MonthlyAggregate,
            vec![
                row(json!({"month": "2024-05", "percentage": 92.5})),
                row(json!({"month": "2024-05", "percentage": 80.0})),
                row(json!({"month": "2024-05", "percentage": 50.0})),
            ],
            Some("2024-05"),
        ));
        let state = sheet.snapshot();
        assert_eq!(state.highlight(SyncKind::Attendance, 0), Some(Band::Green));
        assert_eq!(state.highlight(SyncKind::Attendance, 1), Some(Band::Red));
        assert_eq!(state.highlight(SyncKind::MonthlyAggregate, 0), Some(Band::Green));
        assert_eq!(state.highlight(SyncKind::MonthlyAggregate, 1), Some(Band::Yellow));
        assert_eq!(state.highlight(SyncKind::MonthlyAggregate, 2), Some(Band::Red));
        assert_eq!(state.highlight(SyncKind::Students, 0), None);
    }
}
