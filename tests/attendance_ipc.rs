mod test_support;

use serde_json::json;
use test_support::{spawn_sidecar, str_at};

#[test]
fn double_submission_keeps_one_record_with_latest_values() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("absensi-attendance-double");
    let class_id = sc.create_class("X IPA 1");
    let student_id = sc.create_student("2024001", "Ahmad Rizki", &class_id);

    let first = sc.request_ok(
        "attendance.record",
        json!({ "studentId": student_id, "date": "2024-05-01", "status": "Hadir" }),
    );
    assert_eq!(first["created"], json!(true));
    let record_id = str_at(&first, &["record", "id"]);

    let second = sc.request_ok(
        "attendance.record",
        json!({
            "studentId": student_id,
            "date": "2024-05-01T15:30:00.000Z",
            "status": "Sakit",
            "note": "Demam"
        }),
    );
    assert_eq!(second["created"], json!(false));
    assert_eq!(str_at(&second, &["record", "id"]), record_id);

    let listed = sc.request_ok("attendance.list", json!({ "date": "2024-05-01" }));
    let records = listed["records"].as_array().expect("records");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["status"], json!("Sakit"));
    assert_eq!(records[0]["note"], json!("Demam"));
    assert_eq!(records[0]["date"], json!("2024-05-01"));
}

#[test]
fn record_validates_inputs() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("absensi-attendance-validate");
    let class_id = sc.create_class("X IPA 1");
    let student_id = sc.create_student("2024001", "Ahmad Rizki", &class_id);

    assert_eq!(
        sc.request_err(
            "attendance.record",
            json!({ "studentId": student_id, "date": "2024-05-01", "status": "Terlambat" })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.request_err(
            "attendance.record",
            json!({ "studentId": student_id, "date": "05/01/2024", "status": "Hadir" })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.request_err(
            "attendance.record",
            json!({ "studentId": "missing", "date": "2024-05-01", "status": "Hadir" })
        ),
        "not_found"
    );
}

#[test]
fn bulk_record_reports_bad_entries_and_writes_the_rest() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("absensi-attendance-bulk");
    let class_id = sc.create_class("X IPS 1");
    let a = sc.create_student("2024002", "Siti Nurhaliza", &class_id);
    let b = sc.create_student("2024008", "Maya Sari", &class_id);

    sc.request_ok(
        "attendance.record",
        json!({ "studentId": a, "date": "2024-05-02", "status": "Alpha" }),
    );
    let bulk = sc.request_ok(
        "attendance.bulkRecord",
        json!({
            "date": "2024-05-02",
            "entries": [
                { "studentId": a, "status": "Izin", "note": "Ada urusan keluarga" },
                { "studentId": b, "status": "Hadir" },
                { "studentId": "ghost", "status": "Hadir" },
                { "studentId": b, "status": "late" }
            ]
        }),
    );
    assert_eq!(bulk["created"], json!(1));
    assert_eq!(bulk["updated"], json!(1));
    let errors = bulk["errors"].as_array().expect("errors");
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0]["index"], json!(2));
    assert_eq!(errors[0]["code"], json!("not_found"));
    assert_eq!(errors[1]["code"], json!("bad_params"));

    let listed = sc.request_ok(
        "attendance.list",
        json!({ "from": "2024-05-01", "to": "2024-05-31", "classId": class_id }),
    );
    assert_eq!(listed["records"].as_array().map(|r| r.len()), Some(2));
}

#[test]
fn list_is_newest_first_and_limited() {
    let mut sc = spawn_sidecar();
    sc.open_workspace("absensi-attendance-order");
    let class_id = sc.create_class("XII IPA 1");
    let student_id = sc.create_student("2024005", "Eko Prasetyo", &class_id);
    for day in ["2024-05-01", "2024-05-02", "2024-05-03"] {
        sc.request_ok(
            "attendance.record",
            json!({ "studentId": student_id, "date": day, "status": "Hadir" }),
        );
    }

    let listed = sc.request_ok("attendance.list", json!({ "limit": 2 }));
    let dates: Vec<&str> = listed["records"]
        .as_array()
        .expect("records")
        .iter()
        .filter_map(|r| r["date"].as_str())
        .collect();
    assert_eq!(dates, vec!["2024-05-03", "2024-05-02"]);
    assert_eq!(sc.request_err("attendance.list", json!({ "limit": 0 })), "bad_params");
}
