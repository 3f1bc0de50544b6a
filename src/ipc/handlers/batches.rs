use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    batch_json, get_required_f64, get_required_str, require_owned_batch, BatchRow, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn batches_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let mut stmt = conn
        .prepare(
            "SELECT id, batch_name, class_level, timing, monthly_fee, owner_id
             FROM batches WHERE owner_id = ? ORDER BY batch_name",
        )
        .map_err(HandlerErr::db_query)?;
    let batches = stmt
        .query_map([&teacher_id], |r| {
            Ok(BatchRow {
                id: r.get(0)?,
                batch_name: r.get(1)?,
                class_level: r.get(2)?,
                timing: r.get(3)?,
                monthly_fee: r.get(4)?,
                owner_id: r.get(5)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "batches": batches.iter().map(batch_json).collect::<Vec<_>>(),
    }))
}

fn batches_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let batch_name = get_required_str(params, "batchName")?;
    let class_level = get_required_str(params, "classLevel")?;
    let timing = get_required_str(params, "timing")?;
    let monthly_fee = get_required_f64(params, "monthlyFee")?;

    let batch = BatchRow {
        id: Uuid::new_v4().to_string(),
        batch_name,
        class_level,
        timing,
        monthly_fee,
        owner_id: teacher_id,
    };
    conn.execute(
        "INSERT INTO batches(id, batch_name, class_level, timing, monthly_fee, owner_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &batch.id,
            &batch.batch_name,
            &batch.class_level,
            &batch.timing,
            batch.monthly_fee,
            &batch.owner_id,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "batches"))?;

    Ok(batch_json(&batch))
}

fn batches_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let mut batch = require_owned_batch(conn, &batch_id, &teacher_id)?;

    if let Some(v) = params.get("batchName").and_then(|v| v.as_str()) {
        batch.batch_name = v.to_string();
    }
    if let Some(v) = params.get("classLevel").and_then(|v| v.as_str()) {
        batch.class_level = v.to_string();
    }
    if let Some(v) = params.get("timing").and_then(|v| v.as_str()) {
        batch.timing = v.to_string();
    }
    if let Some(v) = params.get("monthlyFee").and_then(|v| v.as_f64()) {
        batch.monthly_fee = v;
    }

    conn.execute(
        "UPDATE batches
         SET batch_name = ?, class_level = ?, timing = ?, monthly_fee = ?
         WHERE id = ?",
        (
            &batch.batch_name,
            &batch.class_level,
            &batch.timing,
            batch.monthly_fee,
            &batch.id,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "batches"))?;

    Ok(batch_json(&batch))
}

/// Deleting a batch takes its dependents with it: students, fees, and the
/// attendance log all go in one transaction, so no orphaned references
/// survive.
fn batches_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    require_owned_batch(conn, &batch_id, &teacher_id)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute("DELETE FROM fees WHERE batch_id = ?", [&batch_id])
        .map_err(|e| HandlerErr::db_update(e, "fees"))?;
    tx.execute("DELETE FROM attendance WHERE batch_id = ?", [&batch_id])
        .map_err(|e| HandlerErr::db_update(e, "attendance"))?;
    tx.execute("DELETE FROM students WHERE batch_id = ?", [&batch_id])
        .map_err(|e| HandlerErr::db_update(e, "students"))?;
    tx.execute("DELETE FROM batches WHERE id = ?", [&batch_id])
        .map_err(|e| HandlerErr::db_update(e, "batches"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "id": batch_id }))
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
        "batches.list" => Some(handle(state, req, batches_list)),
        "batches.create" => Some(handle(state, req, batches_create)),
        "batches.update" => Some(handle(state, req, batches_update)),
        "batches.delete" => Some(handle(state, req, batches_delete)),
        _ => None,
    }
}
