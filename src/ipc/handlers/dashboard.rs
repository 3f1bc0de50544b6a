use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    current_month, get_optional_str, get_required_str, validate_month_key, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

/// Teacher-wide summary: batch/student counts plus the month's financial
/// picture. Expected revenue counts only active students; pending is never
/// reported negative (over-collection clamps to zero).
fn dashboard_stats(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let month = match get_optional_str(params, "month") {
        Some(m) => validate_month_key(&m)?,
        None => current_month(),
    };

    let total_batches: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM batches WHERE owner_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let total_students: i64 = conn
        .query_row(
            "SELECT COUNT(*)
             FROM students s JOIN batches b ON b.id = s.batch_id
             WHERE b.owner_id = ?",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let expected: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(b.monthly_fee), 0)
             FROM students s JOIN batches b ON b.id = s.batch_id
             WHERE b.owner_id = ? AND s.status = 'active'",
            [&teacher_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let collected: f64 = conn
        .query_row(
            "SELECT COALESCE(SUM(f.amount), 0)
             FROM fees f JOIN batches b ON b.id = f.batch_id
             WHERE b.owner_id = ? AND f.month = ? AND f.status = 'paid'",
            (&teacher_id, &month),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    let pending = (expected - collected).max(0.0);

    Ok(json!({
        "totalBatches": total_batches,
        "totalStudents": total_students,
        "financials": {
            "month": month,
            "expected": expected,
            "collected": collected,
            "pending": pending,
        },
    }))
}

fn handle_stats(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match dashboard_stats(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.stats" => Some(handle_stats(state, req)),
        _ => None,
    }
}
