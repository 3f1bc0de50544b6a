use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    dedup_sorted, get_required_str, get_required_str_array, is_constraint_violation,
    normalize_day, parse_id_set, require_owned_batch, today_day, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::stats;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct AttendanceRow {
    id: String,
    batch_id: String,
    date: String,
    present_students: String,
    created_by: String,
}

#[derive(Debug, Clone)]
struct StudentCounters {
    id: String,
    total_classes: i64,
    present_classes: i64,
}

fn attendance_row_json(row: &AttendanceRow) -> Result<serde_json::Value, HandlerErr> {
    let mut present: Vec<String> = parse_id_set(&row.present_students)?.into_iter().collect();
    present.sort();
    Ok(json!({
        "id": row.id,
        "batchId": row.batch_id,
        "date": row.date,
        "presentStudents": present,
        "createdBy": row.created_by,
    }))
}

fn map_attendance_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        batch_id: r.get(1)?,
        date: r.get(2)?,
        present_students: r.get(3)?,
        created_by: r.get(4)?,
    })
}

fn load_attendance_by_day(
    conn: &Connection,
    batch_id: &str,
    day: &str,
) -> Result<Option<AttendanceRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, batch_id, date, present_students, created_by
         FROM attendance WHERE batch_id = ? AND date = ?",
        (batch_id, day),
        |r| map_attendance_row(r),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn load_attendance_by_id(
    conn: &Connection,
    attendance_id: &str,
) -> Result<Option<AttendanceRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, batch_id, date, present_students, created_by
         FROM attendance WHERE id = ?",
        [attendance_id],
        |r| map_attendance_row(r),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn list_active_students(
    conn: &Connection,
    batch_id: &str,
) -> Result<Vec<StudentCounters>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, total_classes, present_classes
             FROM students
             WHERE batch_id = ? AND status = 'active'",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map([batch_id], |r| {
        Ok(StudentCounters {
            id: r.get(0)?,
            total_classes: r.get(1)?,
            present_classes: r.get(2)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn already_taken(attendance_id: &str) -> serde_json::Value {
    json!({
        "alreadyTaken": true,
        "attendanceId": attendance_id,
        "message": "Attendance already marked for this date",
    })
}

/// Day-granular existence probe. No ownership check; the response says only
/// whether a record exists for the (batch, day) pair.
fn attendance_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let day = match params.get("date").and_then(|v| v.as_str()) {
        Some(raw) => normalize_day(raw)?,
        None => today_day(),
    };

    match load_attendance_by_day(conn, &batch_id, &day)? {
        Some(row) => Ok(json!({
            "status": "taken",
            "attendance": attendance_row_json(&row)?,
        })),
        None => Ok(json!({ "status": "not_taken" })),
    }
}

/// Mark a batch's attendance for one day. The record insert and the active
/// students' counter bumps commit together; a day that exists already is a
/// soft conflict (success payload with alreadyTaken), never an error.
fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let date_raw = get_required_str(params, "date")?;
    let present_raw = get_required_str_array(params, "presentStudents")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let day = normalize_day(&date_raw)?;

    // Existence first, ownership second: a second marker is redirected to
    // the update flow before any authorization question arises.
    if let Some(existing) = load_attendance_by_day(conn, &batch_id, &day)? {
        return Ok(already_taken(&existing.id));
    }
    require_owned_batch(conn, &batch_id, &teacher_id)?;

    let present_ids = dedup_sorted(present_raw);
    let present_set: HashSet<String> = present_ids.iter().cloned().collect();
    let record_id = Uuid::new_v4().to_string();
    let stored_set = json!(present_ids).to_string();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    match tx.execute(
        "INSERT INTO attendance(id, batch_id, date, present_students, created_by)
         VALUES(?, ?, ?, ?, ?)",
        (&record_id, &batch_id, &day, &stored_set, &teacher_id),
    ) {
        Ok(_) => {}
        Err(e) if is_constraint_violation(&e) => {
            // Lost the race on UNIQUE(batch_id, date): someone else marked
            // this day between our existence check and the insert. Same soft
            // conflict as the up-front check.
            tx.rollback().map_err(HandlerErr::db_tx)?;
            let winner = load_attendance_by_day(conn, &batch_id, &day)?
                .ok_or_else(|| HandlerErr::not_found("attendance record not found"))?;
            return Ok(already_taken(&winner.id));
        }
        Err(e) => return Err(HandlerErr::db_update(e, "attendance")),
    }

    // Inactive students take no part in the tally, even if their id was
    // submitted in the present list.
    for s in list_active_students(&tx, &batch_id)? {
        let c = stats::counters_after_mark(
            s.total_classes,
            s.present_classes,
            present_set.contains(&s.id),
        );
        tx.execute(
            "UPDATE students
             SET total_classes = ?, present_classes = ?, attendance_percentage = ?
             WHERE id = ?",
            (c.total_classes, c.present_classes, c.attendance_percentage, &s.id),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    let row = AttendanceRow {
        id: record_id,
        batch_id,
        date: day,
        present_students: stored_set,
        created_by: teacher_id,
    };
    attendance_row_json(&row)
}

/// Replace a day's present-set. The day already counted toward every active
/// student's total at mark time, so only present<->absent flips move the
/// present count; unchanged students get no write at all.
fn attendance_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let attendance_id = get_required_str(params, "attendanceId")?;
    let present_raw = get_required_str_array(params, "presentStudents")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let record = load_attendance_by_id(conn, &attendance_id)?
        .ok_or_else(|| HandlerErr::not_found("attendance record not found"))?;
    require_owned_batch(conn, &record.batch_id, &teacher_id)?;

    let old_set = parse_id_set(&record.present_students)?;
    let new_ids = dedup_sorted(present_raw);
    let new_set: HashSet<String> = new_ids.iter().cloned().collect();
    let stored_set = json!(new_ids).to_string();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute(
        "UPDATE attendance SET present_students = ? WHERE id = ?",
        (&stored_set, &attendance_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "attendance"))?;

    for s in list_active_students(&tx, &record.batch_id)? {
        let was_present = old_set.contains(&s.id);
        let is_present = new_set.contains(&s.id);
        let Some(c) =
            stats::counters_after_update(s.total_classes, s.present_classes, was_present, is_present)
        else {
            continue;
        };
        tx.execute(
            "UPDATE students
             SET present_classes = ?, attendance_percentage = ?
             WHERE id = ?",
            (c.present_classes, c.attendance_percentage, &s.id),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    let updated = AttendanceRow {
        present_students: stored_set,
        ..record
    };
    Ok(json!({
        "message": "Attendance updated successfully",
        "attendance": attendance_row_json(&updated)?,
    }))
}

/// Audit/recovery path for the denormalized counters: replay the batch's
/// whole attendance log and overwrite each active student's cached values.
/// Never called by the mark/update hot path.
fn attendance_rebuild_counters(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    require_owned_batch(conn, &batch_id, &teacher_id)?;

    let mut stmt = conn
        .prepare("SELECT present_students FROM attendance WHERE batch_id = ? ORDER BY date")
        .map_err(HandlerErr::db_query)?;
    let raw_sets = stmt
        .query_map([&batch_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    let history = raw_sets
        .iter()
        .map(|raw| parse_id_set(raw))
        .collect::<Result<Vec<HashSet<String>>, _>>()?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let students = list_active_students(&tx, &batch_id)?;
    let rebuilt = students.len();
    for s in &students {
        let c = stats::counters_from_history(&s.id, &history);
        tx.execute(
            "UPDATE students
             SET total_classes = ?, present_classes = ?, attendance_percentage = ?
             WHERE id = ?",
            (c.total_classes, c.present_classes, c.attendance_percentage, &s.id),
        )
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    tracing::debug!(batch = %batch_id, students = rebuilt, records = history.len(),
        "rebuilt attendance counters from history");
    Ok(json!({
        "students": rebuilt,
        "records": history.len(),
    }))
}

fn handle_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_status(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_mark(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_mark(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_update(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_rebuild_counters(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match attendance_rebuild_counters(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.status" => Some(handle_status(state, req)),
        "attendance.mark" => Some(handle_mark(state, req)),
        "attendance.update" => Some(handle_update(state, req)),
        "attendance.rebuildCounters" => Some(handle_rebuild_counters(state, req)),
        _ => None,
    }
}
