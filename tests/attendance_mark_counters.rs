mod test_support;

use serde_json::json;
use test_support::{create_batch, create_student, request_ok, select_workspace, spawn_sidecar, temp_dir};

const TEACHER: &str = "teacher-1";

fn student_by_id(list: &serde_json::Value, id: &str) -> serde_json::Value {
    list.get("students")
        .and_then(|v| v.as_array())
        .and_then(|arr| {
            arr.iter()
                .find(|s| s.get("id").and_then(|v| v.as_str()) == Some(id))
        })
        .cloned()
        .expect("student row")
}

#[test]
fn mark_bumps_totals_for_active_students_and_skips_inactive() {
    let workspace = temp_dir("tutorbook-mark-counters");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    select_workspace(&mut stdin, &mut reader, &workspace);
    let batch_id = create_batch(&mut stdin, &mut reader, "2", TEACHER, "Evening Physics", 500.0);
    let s1 = create_student(&mut stdin, &mut reader, "3", TEACHER, &batch_id, "Asha");
    let s2 = create_student(&mut stdin, &mut reader, "4", TEACHER, &batch_id, "Bilal");
    let s3 = create_student(&mut stdin, &mut reader, "5", TEACHER, &batch_id, "Chitra");
    let s4 = create_student(&mut stdin, &mut reader, "6", TEACHER, &batch_id, "Dev");

    // Deactivate Dev before marking; his id still goes into the present list.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.update",
        json!({ "studentId": s4.clone(), "teacherId": TEACHER, "status": "inactive" }),
    );

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.mark",
        json!({
            "batchId": batch_id.clone(),
            "date": "2024-03-01",
            "presentStudents": [s1.clone(), s2.clone(), s4.clone()],
            "teacherId": TEACHER
        }),
    );
    assert_eq!(
        marked.get("date").and_then(|v| v.as_str()),
        Some("2024-03-01")
    );
    let present = marked
        .get("presentStudents")
        .and_then(|v| v.as_array())
        .expect("present set");
    assert_eq!(present.len(), 3);

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "students.list",
        json!({ "batchId": batch_id, "teacherId": TEACHER }),
    );

    let row = student_by_id(&list, &s1);
    assert_eq!(row.get("totalClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        row.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(100.0)
    );

    let row = student_by_id(&list, &s2);
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(1));

    let row = student_by_id(&list, &s3);
    assert_eq!(row.get("totalClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        row.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(0.0)
    );

    // Inactive student untouched even though marked present.
    let row = student_by_id(&list, &s4);
    assert_eq!(row.get("totalClasses").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        row.get("attendancePercentage").and_then(|v| v.as_f64()),
        Some(0.0)
    );
}

#[test]
fn mark_deduplicates_submitted_present_ids() {
    let workspace = temp_dir("tutorbook-mark-dedup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    select_workspace(&mut stdin, &mut reader, &workspace);
    let batch_id = create_batch(&mut stdin, &mut reader, "2", TEACHER, "Evening Physics", 500.0);
    let s1 = create_student(&mut stdin, &mut reader, "3", TEACHER, &batch_id, "Asha");

    let marked = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.mark",
        json!({
            "batchId": batch_id.clone(),
            "date": "2024-03-01",
            "presentStudents": [s1.clone(), s1.clone(), s1.clone()],
            "teacherId": TEACHER
        }),
    );
    let present = marked
        .get("presentStudents")
        .and_then(|v| v.as_array())
        .expect("present set");
    assert_eq!(present.len(), 1);

    let list = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "batchId": batch_id, "teacherId": TEACHER }),
    );
    let row = student_by_id(&list, &s1);
    // A triplicated id still counts one present class.
    assert_eq!(row.get("presentClasses").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(row.get("totalClasses").and_then(|v| v.as_i64()), Some(1));
}
