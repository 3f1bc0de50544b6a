use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_required_f64, get_required_str, is_constraint_violation, now_stamp,
    require_owned_batch, validate_month_key, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct FeeRow {
    id: String,
    student_id: String,
    batch_id: String,
    month: String,
    amount: f64,
    status: String,
    payment_date: Option<String>,
}

fn fee_json(f: &FeeRow) -> serde_json::Value {
    json!({
        "id": f.id,
        "studentId": f.student_id,
        "batchId": f.batch_id,
        "month": f.month,
        "amount": f.amount,
        "status": f.status,
        "paymentDate": f.payment_date,
    })
}

fn map_fee_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<FeeRow> {
    Ok(FeeRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        batch_id: r.get(2)?,
        month: r.get(3)?,
        amount: r.get(4)?,
        status: r.get(5)?,
        payment_date: r.get(6)?,
    })
}

fn load_fee(conn: &Connection, fee_id: &str) -> Result<Option<FeeRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, student_id, batch_id, month, amount, status, payment_date
         FROM fees WHERE id = ?",
        [fee_id],
        |r| map_fee_row(r),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn validate_status(status: &str) -> Result<(), HandlerErr> {
    match status {
        "paid" | "unpaid" => Ok(()),
        other => Err(HandlerErr::bad_params(format!(
            "status must be paid or unpaid, got {:?}",
            other
        ))),
    }
}

fn student_in_batch(
    conn: &Connection,
    student_id: &str,
    batch_id: &str,
) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM students WHERE id = ? AND batch_id = ?",
        (student_id, batch_id),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

/// List fee rows for a teacher, optionally narrowed to one batch and/or one
/// month. Always constrained to batches the teacher owns.
fn fees_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let batch_id = get_optional_str(params, "batchId");
    let month = match get_optional_str(params, "month") {
        Some(m) => Some(validate_month_key(&m)?),
        None => None,
    };

    if let Some(ref bid) = batch_id {
        require_owned_batch(conn, bid, &teacher_id)?;
    }

    let mut sql = String::from(
        "SELECT f.id, f.student_id, f.batch_id, f.month, f.amount, f.status, f.payment_date,
                s.name, s.phone
         FROM fees f
         JOIN batches b ON b.id = f.batch_id
         LEFT JOIN students s ON s.id = f.student_id
         WHERE b.owner_id = ?",
    );
    let mut args: Vec<String> = vec![teacher_id];
    if let Some(bid) = batch_id {
        sql.push_str(" AND f.batch_id = ?");
        args.push(bid);
    }
    if let Some(m) = month {
        sql.push_str(" AND f.month = ?");
        args.push(m);
    }
    sql.push_str(" ORDER BY f.month DESC");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let fees = stmt
        .query_map(rusqlite::params_from_iter(args.iter()), |r| {
            let row = map_fee_row(r)?;
            let name: Option<String> = r.get(7)?;
            let phone: Option<String> = r.get(8)?;
            Ok((row, name, phone))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let fees_json: Vec<serde_json::Value> = fees
        .iter()
        .map(|(row, name, phone)| {
            let mut v = fee_json(row);
            v["studentName"] = json!(name);
            v["studentPhone"] = json!(phone);
            v
        })
        .collect();
    Ok(json!({ "fees": fees_json }))
}

/// Create one fee row. A duplicate (student, month) is a hard conflict, in
/// contrast to attendance's soft one: fee generation is batched and a
/// duplicate must be rejected per-student, not redirected.
fn fees_add(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let batch_id = get_required_str(params, "batchId")?;
    let month = validate_month_key(&get_required_str(params, "month")?)?;
    let amount = get_required_f64(params, "amount")?;
    let status = get_optional_str(params, "status").unwrap_or_else(|| "unpaid".to_string());
    let teacher_id = get_required_str(params, "teacherId")?;
    validate_status(&status)?;

    require_owned_batch(conn, &batch_id, &teacher_id)?;
    if !student_in_batch(conn, &student_id, &batch_id)? {
        return Err(HandlerErr::not_found("student not found in batch"));
    }

    let fee = FeeRow {
        id: Uuid::new_v4().to_string(),
        student_id,
        batch_id,
        month,
        amount,
        payment_date: if status == "paid" {
            Some(now_stamp())
        } else {
            None
        },
        status,
    };
    match conn.execute(
        "INSERT INTO fees(id, student_id, batch_id, month, amount, status, payment_date)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &fee.id,
            &fee.student_id,
            &fee.batch_id,
            &fee.month,
            fee.amount,
            &fee.status,
            &fee.payment_date,
        ),
    ) {
        Ok(_) => Ok(fee_json(&fee)),
        Err(e) if is_constraint_violation(&e) => Err(HandlerErr::conflict(
            "Fee record already exists for this month",
            Some(json!({ "studentId": fee.student_id, "month": fee.month })),
        )),
        Err(e) => Err(HandlerErr::db_update(e, "fees")),
    }
}

/// Patch a fee row. payment_date is stamped the first time status lands on
/// paid and never moved or cleared afterwards, so re-saving a paid record
/// is a no-op for the date.
fn fees_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeId")?;
    let teacher_id = get_required_str(params, "teacherId")?;

    let mut fee = load_fee(conn, &fee_id)?
        .ok_or_else(|| HandlerErr::not_found("fee record not found"))?;
    require_owned_batch(conn, &fee.batch_id, &teacher_id)?;

    if let Some(v) = params.get("amount").and_then(|v| v.as_f64()) {
        fee.amount = v;
    }
    if let Some(v) = params.get("month").and_then(|v| v.as_str()) {
        fee.month = validate_month_key(v)?;
    }
    if let Some(v) = params.get("status").and_then(|v| v.as_str()) {
        validate_status(v)?;
        fee.status = v.to_string();
        if fee.status == "paid" && fee.payment_date.is_none() {
            fee.payment_date = Some(now_stamp());
        }
    }

    match conn.execute(
        "UPDATE fees
         SET month = ?, amount = ?, status = ?, payment_date = ?
         WHERE id = ?",
        (&fee.month, fee.amount, &fee.status, &fee.payment_date, &fee.id),
    ) {
        Ok(_) => Ok(fee_json(&fee)),
        Err(e) if is_constraint_violation(&e) => Err(HandlerErr::conflict(
            "Fee record already exists for this month",
            Some(json!({ "studentId": fee.student_id, "month": fee.month })),
        )),
        Err(e) => Err(HandlerErr::db_update(e, "fees")),
    }
}

/// Bulk convenience: one unpaid fee per active student at the batch's
/// monthly rate. Each student is inserted independently; a duplicate for
/// the month skips that student and never aborts the rest.
fn fees_generate_for_batch(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let month = validate_month_key(&get_required_str(params, "month")?)?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let batch = require_owned_batch(conn, &batch_id, &teacher_id)?;

    let mut stmt = conn
        .prepare("SELECT id FROM students WHERE batch_id = ? AND status = 'active'")
        .map_err(HandlerErr::db_query)?;
    let student_ids = stmt
        .query_map([&batch_id], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut created = 0usize;
    let mut skipped = 0usize;
    for student_id in student_ids {
        let result = conn.execute(
            "INSERT INTO fees(id, student_id, batch_id, month, amount, status, payment_date)
             VALUES(?, ?, ?, ?, ?, 'unpaid', NULL)",
            (
                Uuid::new_v4().to_string(),
                &student_id,
                &batch_id,
                &month,
                batch.monthly_fee,
            ),
        );
        match result {
            Ok(_) => created += 1,
            Err(e) if is_constraint_violation(&e) => skipped += 1,
            Err(e) => return Err(HandlerErr::db_update(e, "fees")),
        }
    }

    Ok(json!({
        "month": month,
        "created": created,
        "skipped": skipped,
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
        "fees.list" => Some(handle(state, req, fees_list)),
        "fees.add" => Some(handle(state, req, fees_add)),
        "fees.update" => Some(handle(state, req, fees_update)),
        "fees.generateForBatch" => Some(handle(state, req, fees_generate_for_batch)),
        _ => None,
    }
}
