//! Sample workspace content for demos and first runs. Safe to apply more
//! than once: classes and students are matched by name and registration
//! number, attendance by (student, date).

use crate::model::{AttendanceStatus, Sex};
use crate::store::{AttendanceInput, NewClass, NewStudent, NoteInput, RecordStore, StoreResult};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::info;

struct SampleClass {
    name: &'static str,
    grade_level: &'static str,
    track: &'static str,
    homeroom_teacher: &'static str,
}

struct SampleStudent {
    registration_number: &'static str,
    name: &'static str,
    sex: Sex,
    class_index: usize,
    guardian_name: &'static str,
    status: AttendanceStatus,
    note: &'static str,
}

const CLASSES: [SampleClass; 6] = [
    SampleClass { name: "X IPA 1", grade_level: "X", track: "IPA", homeroom_teacher: "Ahmad Fauzi" },
    SampleClass { name: "X IPS 1", grade_level: "X", track: "IPS", homeroom_teacher: "Siti Rahayu" },
    SampleClass { name: "XI IPA 1", grade_level: "XI", track: "IPA", homeroom_teacher: "Budi Santoso" },
    SampleClass { name: "XI IPS 1", grade_level: "XI", track: "IPS", homeroom_teacher: "Dewi Lestari" },
    SampleClass { name: "XII IPA 1", grade_level: "XII", track: "IPA", homeroom_teacher: "Eko Prasetyo" },
    SampleClass { name: "XII IPS 1", grade_level: "XII", track: "IPS", homeroom_teacher: "Rina Wijaya" },
];

const STUDENTS: [SampleStudent; 8] = [
    SampleStudent { registration_number: "2024001", name: "Ahmad Rizki", sex: Sex::Male, class_index: 0, guardian_name: "Bapak Hidayat", status: AttendanceStatus::Present, note: "" },
    SampleStudent { registration_number: "2024002", name: "Siti Nurhaliza", sex: Sex::Female, class_index: 1, guardian_name: "Ibu Sumarni", status: AttendanceStatus::Present, note: "" },
    SampleStudent { registration_number: "2024003", name: "Budi Santoso", sex: Sex::Male, class_index: 2, guardian_name: "Bapak Sutrisno", status: AttendanceStatus::Sick, note: "Demam" },
    SampleStudent { registration_number: "2024004", name: "Dewi Lestari", sex: Sex::Female, class_index: 3, guardian_name: "Ibu Wijayanti", status: AttendanceStatus::Excused, note: "Ada urusan keluarga" },
    SampleStudent { registration_number: "2024005", name: "Eko Prasetyo", sex: Sex::Male, class_index: 4, guardian_name: "Bapak Widodo", status: AttendanceStatus::Present, note: "" },
    SampleStudent { registration_number: "2024006", name: "Rina Wijaya", sex: Sex::Female, class_index: 5, guardian_name: "Ibu Siti Aminah", status: AttendanceStatus::Present, note: "" },
    SampleStudent { registration_number: "2024007", name: "Fajar Nugroho", sex: Sex::Male, class_index: 0, guardian_name: "Bapak Subagyo", status: AttendanceStatus::Absent, note: "" },
    SampleStudent { registration_number: "2024008", name: "Maya Sari", sex: Sex::Female, class_index: 1, guardian_name: "Ibu Purwanti", status: AttendanceStatus::Present, note: "" },
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedReport {
    pub classes_created: usize,
    pub students_created: usize,
    pub attendance_written: usize,
}

pub fn seed_sample_data(store: &RecordStore<'_>, today: NaiveDate) -> StoreResult<SeedReport> {
    let tx = store.conn().unchecked_transaction()?;
    let mut report = SeedReport::default();

    let mut class_ids = Vec::with_capacity(CLASSES.len());
    for c in &CLASSES {
        let id = match store.find_class_by_name(c.name)? {
            Some(existing) => existing.id,
            None => {
                report.classes_created += 1;
                store
                    .create_class(&NewClass {
                        name: c.name.to_string(),
                        grade_level: c.grade_level.to_string(),
                        track: Some(c.track.to_string()),
                        homeroom_teacher: Some(c.homeroom_teacher.to_string()),
                        capacity: None,
                    })?
                    .id
            }
        };
        class_ids.push(id);
    }

    for s in &STUDENTS {
        let student_id = match store.find_student_by_registration(s.registration_number)? {
            Some(existing) => existing.id,
            None => {
                report.students_created += 1;
                store
                    .create_student(&NewStudent {
                        registration_number: s.registration_number.to_string(),
                        name: s.name.to_string(),
                        sex: s.sex,
                        birth_place: None,
                        birth_date: None,
                        address: None,
                        phone: None,
                        guardian_name: Some(s.guardian_name.to_string()),
                        class_id: class_ids[s.class_index].clone(),
                    })?
                    .id
            }
        };
        store.upsert_attendance(&AttendanceInput {
            student_id,
            date: today,
            status: s.status,
            note: NoteInput::Set(Some(s.note.to_string())),
        })?;
        report.attendance_written += 1;
    }

    tx.commit()?;
    info!(
        classes = report.classes_created,
        students = report.students_created,
        attendance = report.attendance_written,
        "sample data seeded"
    );
    Ok(report)
}
