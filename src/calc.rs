use crate::model::MonthKey;
use crate::store::{RecordStore, StatusCounts, StoreError, StoreResult};
use serde::Serialize;

/// One-decimal half-up rounding of `numer / denom * 100`.
///
/// Done in integer tenths so that values like 12.25% land on 12.3 rather
/// than drifting with binary floating point.
pub fn percent_1_decimal(numer: i64, denom: i64) -> f64 {
    if denom <= 0 {
        return 0.0;
    }
    let tenths = (numer * 2000 + denom) / (2 * denom);
    tenths as f64 / 10.0
}

/// Students of one class, produced by [`group_students_by_class`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassGroup {
    pub class_id: String,
    pub class_name: String,
    pub student_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyAggregate {
    pub month: String,
    pub class_id: String,
    pub class_name: String,
    pub total_students: i64,
    pub present: i64,
    pub sick: i64,
    pub excused: i64,
    pub absent: i64,
    pub percentage: f64,
}

impl MonthlyAggregate {
    fn from_counts(month: MonthKey, group: &ClassGroup, counts: StatusCounts) -> Self {
        Self {
            month: month.to_string(),
            class_id: group.class_id.clone(),
            class_name: group.class_name.clone(),
            total_students: group.student_ids.len() as i64,
            present: counts.present,
            sick: counts.sick,
            excused: counts.excused,
            absent: counts.absent,
            percentage: percent_1_decimal(counts.present, counts.total()),
        }
    }

    #[cfg(test)]
    pub fn recorded(&self) -> i64 {
        self.present + self.sick + self.excused + self.absent
    }
}

/// Partition students by class, ordered by class name. Classes without
/// students never appear.
pub fn group_students_by_class(
    store: &RecordStore<'_>,
    class_id: Option<&str>,
) -> StoreResult<Vec<ClassGroup>> {
    let students = store.list_students(class_id)?;
    let mut groups: Vec<ClassGroup> = Vec::new();
    for s in students {
        match groups.iter_mut().find(|g| g.class_id == s.class.id) {
            Some(g) => g.student_ids.push(s.id),
            None => groups.push(ClassGroup {
                class_id: s.class.id,
                class_name: s.class.name,
                student_ids: vec![s.id],
            }),
        }
    }
    groups.sort_by(|a, b| {
        a.class_name
            .cmp(&b.class_name)
            .then_with(|| a.class_id.cmp(&b.class_id))
    });
    Ok(groups)
}

/// Per-class attendance tallies for `month` (`YYYY-MM`), optionally limited
/// to one class. Derived on every call; nothing is cached or persisted.
pub fn compute_monthly_aggregate(
    store: &RecordStore<'_>,
    month: &str,
    class_id: Option<&str>,
) -> StoreResult<Vec<MonthlyAggregate>> {
    let key = MonthKey::parse(month)
        .ok_or_else(|| StoreError::Validation(format!("month must be YYYY-MM, got {:?}", month)))?;
    if let Some(cid) = class_id {
        if !store.class_exists(cid)? {
            return Err(StoreError::NotFound(format!("class not found: {}", cid)));
        }
    }

    let (from, to) = (key.first_day(), key.last_day());
    let groups = group_students_by_class(store, class_id)?;
    let mut out = Vec::with_capacity(groups.len());
    for group in &groups {
        let counts = store.status_counts(from, to, Some(&group.class_id))?;
        out.push(MonthlyAggregate::from_counts(key, group, counts));
    }
    Ok(out)
}
