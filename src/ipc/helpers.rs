use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::ipc::error::err;

/// Handler-level failure, mapped onto the wire error envelope at the
/// dispatch boundary.
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        HandlerErr {
            code: "not_authorized",
            message: message.into(),
            details: None,
        }
    }

    pub fn conflict(message: impl Into<String>, details: Option<serde_json::Value>) -> Self {
        HandlerErr {
            code: "conflict",
            message: message.into(),
            details,
        }
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_query_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn db_tx(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_tx_failed",
            message: e.to_string(),
            details: None,
        }
    }

    pub fn db_commit(e: rusqlite::Error) -> Self {
        HandlerErr {
            code: "db_commit_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_f64(params: &serde_json::Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_required_str_array(
    params: &serde_json::Value,
    key: &str,
) -> Result<Vec<String>, HandlerErr> {
    let arr = params
        .get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    Ok(arr
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect())
}

/// Normalize any accepted date input to its calendar day (`YYYY-MM-DD`).
/// ISO datetimes have their time-of-day discarded.
pub fn normalize_day(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d.format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Ok(dt.date_naive().format("%Y-%m-%d").to_string());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S") {
        return Ok(dt.date().format("%Y-%m-%d").to_string());
    }
    Err(HandlerErr::bad_params(format!(
        "date must be YYYY-MM-DD or an ISO datetime, got {:?}",
        raw
    )))
}

pub fn today_day() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn now_stamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

pub fn current_month() -> String {
    Local::now().format("%Y-%m").to_string()
}

pub fn validate_month_key(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(HandlerErr::bad_params("month must be YYYY-MM"));
    };
    if y.len() != 4 || y.parse::<i32>().is_err() {
        return Err(HandlerErr::bad_params("month year must be numeric"));
    }
    let month_num = m
        .parse::<u32>()
        .map_err(|_| HandlerErr::bad_params("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month_num) {
        return Err(HandlerErr::bad_params("month must be between 01 and 12"));
    }
    Ok(format!("{}-{:02}", y, month_num))
}

#[derive(Debug, Clone)]
pub struct BatchRow {
    pub id: String,
    pub batch_name: String,
    pub class_level: String,
    pub timing: String,
    pub monthly_fee: f64,
    pub owner_id: String,
}

pub fn load_batch(conn: &Connection, batch_id: &str) -> Result<Option<BatchRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, batch_name, class_level, timing, monthly_fee, owner_id
         FROM batches WHERE id = ?",
        [batch_id],
        |r| {
            Ok(BatchRow {
                id: r.get(0)?,
                batch_name: r.get(1)?,
                class_level: r.get(2)?,
                timing: r.get(3)?,
                monthly_fee: r.get(4)?,
                owner_id: r.get(5)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

/// Ownership gate: resource -> batch -> owning teacher. Every mutating
/// handler goes through here before touching anything.
pub fn require_owned_batch(
    conn: &Connection,
    batch_id: &str,
    teacher_id: &str,
) -> Result<BatchRow, HandlerErr> {
    let batch = load_batch(conn, batch_id)?
        .ok_or_else(|| HandlerErr::not_found("batch not found"))?;
    if batch.owner_id != teacher_id {
        return Err(HandlerErr::not_authorized(
            "not authorized for this batch",
        ));
    }
    Ok(batch)
}

pub fn batch_json(b: &BatchRow) -> serde_json::Value {
    json!({
        "id": b.id,
        "batchName": b.batch_name,
        "classLevel": b.class_level,
        "timing": b.timing,
        "monthlyFee": b.monthly_fee,
        "ownerId": b.owner_id,
    })
}

/// Stored present-sets are JSON arrays of student ids.
pub fn parse_id_set(raw: &str) -> Result<HashSet<String>, HandlerErr> {
    serde_json::from_str::<Vec<String>>(raw)
        .map(|v| v.into_iter().collect())
        .map_err(|e| HandlerErr {
            code: "db_query_failed",
            message: format!("corrupt present-set: {}", e),
            details: None,
        })
}

/// Deduplicate while producing a stable (sorted) order for storage.
pub fn dedup_sorted(ids: Vec<String>) -> Vec<String> {
    ids.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

pub fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
