use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, normalize_day, parse_id_set, require_owned_batch,
    today_day, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StudentRow {
    id: String,
    batch_id: String,
    name: String,
    phone: String,
    parent_phone: Option<String>,
    joining_date: String,
    status: String,
    total_classes: i64,
    present_classes: i64,
    attendance_percentage: f64,
}

fn student_json(s: &StudentRow) -> serde_json::Value {
    json!({
        "id": s.id,
        "batchId": s.batch_id,
        "name": s.name,
        "phone": s.phone,
        "parentPhone": s.parent_phone,
        "joiningDate": s.joining_date,
        "status": s.status,
        "totalClasses": s.total_classes,
        "presentClasses": s.present_classes,
        "attendancePercentage": s.attendance_percentage,
    })
}

fn map_student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        batch_id: r.get(1)?,
        name: r.get(2)?,
        phone: r.get(3)?,
        parent_phone: r.get(4)?,
        joining_date: r.get(5)?,
        status: r.get(6)?,
        total_classes: r.get(7)?,
        present_classes: r.get(8)?,
        attendance_percentage: r.get(9)?,
    })
}

const STUDENT_COLS: &str = "id, batch_id, name, phone, parent_phone, joining_date, status,
                            total_classes, present_classes, attendance_percentage";

fn load_student(conn: &Connection, student_id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS),
        [student_id],
        |r| map_student_row(r),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn validate_student_status(status: &str) -> Result<(), HandlerErr> {
    match status {
        "active" | "inactive" => Ok(()),
        other => Err(HandlerErr::bad_params(format!(
            "status must be active or inactive, got {:?}",
            other
        ))),
    }
}

fn students_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    require_owned_batch(conn, &batch_id, &teacher_id)?;

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM students WHERE batch_id = ? ORDER BY name",
            STUDENT_COLS
        ))
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&batch_id], |r| map_student_row(r))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "students": students.iter().map(student_json).collect::<Vec<_>>(),
    }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let batch_id = get_required_str(params, "batchId")?;
    let name = get_required_str(params, "name")?;
    let phone = get_required_str(params, "phone")?;
    let parent_phone = get_optional_str(params, "parentPhone");
    let joining_date = match get_optional_str(params, "joiningDate") {
        Some(raw) => normalize_day(&raw)?,
        None => today_day(),
    };
    require_owned_batch(conn, &batch_id, &teacher_id)?;

    let student = StudentRow {
        id: Uuid::new_v4().to_string(),
        batch_id,
        name,
        phone,
        parent_phone,
        joining_date,
        status: "active".to_string(),
        total_classes: 0,
        present_classes: 0,
        attendance_percentage: 0.0,
    };
    conn.execute(
        "INSERT INTO students(id, batch_id, name, phone, parent_phone, joining_date, status)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student.id,
            &student.batch_id,
            &student.name,
            &student.phone,
            &student.parent_phone,
            &student.joining_date,
            &student.status,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    Ok(student_json(&student))
}

/// Patch identity fields and status. The attendance counters are owned by
/// the attendance handlers and cannot be written from here.
fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let mut student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    require_owned_batch(conn, &student.batch_id, &teacher_id)?;

    if let Some(v) = params.get("name").and_then(|v| v.as_str()) {
        student.name = v.to_string();
    }
    if let Some(v) = params.get("phone").and_then(|v| v.as_str()) {
        student.phone = v.to_string();
    }
    if let Some(v) = params.get("parentPhone") {
        student.parent_phone = v.as_str().map(|s| s.to_string());
    }
    if let Some(v) = params.get("status").and_then(|v| v.as_str()) {
        validate_student_status(v)?;
        student.status = v.to_string();
    }

    conn.execute(
        "UPDATE students
         SET name = ?, phone = ?, parent_phone = ?, status = ?
         WHERE id = ?",
        (
            &student.name,
            &student.phone,
            &student.parent_phone,
            &student.status,
            &student.id,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "students"))?;

    Ok(student_json(&student))
}

/// Removes the student and their fee rows. Attendance history keeps the id
/// in its present-sets; those rows are a record of past days, not live
/// references.
fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    require_owned_batch(conn, &student.batch_id, &teacher_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute("DELETE FROM fees WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "fees"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "id": student_id }))
}

/// Profile aggregate: the cached counters are trusted as-is (never
/// recomputed here), the last 30 attendance days give the per-day history,
/// and fee totals come from the student's fee rows.
fn students_details(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let student = load_student(conn, &student_id)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))?;
    let batch = require_owned_batch(conn, &student.batch_id, &teacher_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT id, date, present_students
             FROM attendance WHERE batch_id = ?
             ORDER BY date DESC LIMIT 30",
        )
        .map_err(HandlerErr::db_query)?;
    let records = stmt
        .query_map([&student.batch_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut attendance_history = Vec::with_capacity(records.len());
    for (id, date, raw_set) in &records {
        let present = parse_id_set(raw_set)?.contains(&student.id);
        attendance_history.push(json!({
            "id": id,
            "date": date,
            "status": if present { "present" } else { "absent" },
        }));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, student_id, batch_id, month, amount, status, payment_date
             FROM fees WHERE student_id = ? ORDER BY month DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let fees = stmt
        .query_map([&student.id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(3)?,
                r.get::<_, f64>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut total_fees = 0.0;
    let mut fees_paid = 0.0;
    let fee_history: Vec<serde_json::Value> = fees
        .iter()
        .map(|(id, month, amount, status, payment_date)| {
            total_fees += amount;
            if status == "paid" {
                fees_paid += amount;
            }
            json!({
                "id": id,
                "month": month,
                "amount": amount,
                "status": status,
                "paymentDate": payment_date,
            })
        })
        .collect();

    let mut student_value = student_json(&student);
    student_value["batchName"] = json!(batch.batch_name);
    student_value["batchTiming"] = json!(batch.timing);

    Ok(json!({
        "student": student_value,
        "attendance": {
            "totalClasses": student.total_classes,
            "present": student.present_classes,
            "absent": student.total_classes - student.present_classes,
            "percentage": stats::round1(student.attendance_percentage),
        },
        "attendanceHistory": attendance_history,
        "fees": {
            "total": total_fees,
            "paid": fees_paid,
            "remaining": total_fees - fees_paid,
            "history": fee_history,
        },
    }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.list" => Some(handle(state, req, students_list)),
        "students.create" => Some(handle(state, req, students_create)),
        "students.update" => Some(handle(state, req, students_update)),
        "students.delete" => Some(handle(state, req, students_delete)),
        "students.details" => Some(handle(state, req, students_details)),
        _ => None,
    }
}
