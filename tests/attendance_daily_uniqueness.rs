mod test_support;

use serde_json::json;
use test_support::{create_batch, create_student, request_ok, select_workspace, spawn_sidecar, temp_dir};

const TEACHER: &str = "teacher-1";

#[test]
fn second_mark_for_same_day_is_soft_conflict_not_error() {
    let workspace = temp_dir("tutorbook-daily-uniqueness");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    select_workspace(&mut stdin, &mut reader, &workspace);
    let batch_id = create_batch(&mut stdin, &mut reader, "2", TEACHER, "Morning Maths", 400.0);
    let s1 = create_student(&mut stdin, &mut reader, "3", TEACHER, &batch_id, "Asha");

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.status",
        json!({ "batchId": batch_id.clone(), "date": "2024-03-01" }),
    );
    assert_eq!(
        status.get("status").and_then(|v| v.as_str()),
        Some("not_taken")
    );

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({
            "batchId": batch_id.clone(),
            "date": "2024-03-01",
            "presentStudents": [s1.clone()],
            "teacherId": TEACHER
        }),
    );
    let first_id = marked
        .get("id")
        .and_then(|v| v.as_str())
        .expect("attendance id")
        .to_string();

    // Same calendar day submitted as an ISO datetime: still taken.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.mark",
        json!({
            "batchId": batch_id.clone(),
            "date": "2024-03-01T17:45:00",
            "presentStudents": [],
            "teacherId": TEACHER
        }),
    );
    assert_eq!(
        second.get("alreadyTaken").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        second.get("attendanceId").and_then(|v| v.as_str()),
        Some(first_id.as_str())
    );

    // The losing mark changed nothing.
    let list = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.list",
        json!({ "batchId": batch_id.clone(), "teacherId": TEACHER }),
    );
    let row = list
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .cloned()
        .expect("student row");
    assert_eq!(row.get("totalClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(1));

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.status",
        json!({ "batchId": batch_id, "date": "2024-03-01T09:00:00" }),
    );
    assert_eq!(status.get("status").and_then(|v| v.as_str()), Some("taken"));
    let record = status.get("attendance").expect("attendance record");
    assert_eq!(
        record.get("id").and_then(|v| v.as_str()),
        Some(first_id.as_str())
    );
}

#[test]
fn different_days_produce_independent_records() {
    let workspace = temp_dir("tutorbook-daily-two-days");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    select_workspace(&mut stdin, &mut reader, &workspace);
    let batch_id = create_batch(&mut stdin, &mut reader, "2", TEACHER, "Morning Maths", 400.0);
    let s1 = create_student(&mut stdin, &mut reader, "3", TEACHER, &batch_id, "Asha");

    let day1 = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({
            "batchId": batch_id.clone(),
            "date": "2024-03-01",
            "presentStudents": [s1.clone()],
            "teacherId": TEACHER
        }),
    );
    let day2 = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.mark",
        json!({
            "batchId": batch_id.clone(),
            "date": "2024-03-02",
            "presentStudents": [],
            "teacherId": TEACHER
        }),
    );
    assert!(day1.get("alreadyTaken").is_none());
    assert!(day2.get("alreadyTaken").is_none());
    assert_ne!(
        day1.get("id").and_then(|v| v.as_str()),
        day2.get("id").and_then(|v| v.as_str())
    );

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.list",
        json!({ "batchId": batch_id, "teacherId": TEACHER }),
    );
    let row = list
        .get("students")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .cloned()
        .expect("student row");
    assert_eq!(row.get("totalClasses").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        row.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(50.0)
    );
}
