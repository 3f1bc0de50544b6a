use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("tutorbook.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            batch_name TEXT NOT NULL,
            class_level TEXT NOT NULL,
            timing TEXT NOT NULL,
            monthly_fee REAL NOT NULL,
            owner_id TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_owner ON batches(owner_id)",
        [],
    )?;

    // total_classes/present_classes/attendance_percentage are a denormalized
    // cache over the attendance log. Only the attendance handlers (and the
    // rebuild audit) may write them.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            name TEXT NOT NULL,
            phone TEXT NOT NULL,
            parent_phone TEXT,
            joining_date TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            total_classes INTEGER NOT NULL DEFAULT 0,
            present_classes INTEGER NOT NULL DEFAULT 0,
            attendance_percentage REAL NOT NULL DEFAULT 0,
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch_status ON students(batch_id, status)",
        [],
    )?;

    // date is a normalized YYYY-MM-DD day key. The UNIQUE index is the
    // one-record-per-day guarantee; concurrent markers race on it, not on
    // the application-level existence check.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            date TEXT NOT NULL,
            present_students TEXT NOT NULL,
            created_by TEXT NOT NULL,
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            UNIQUE(batch_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_batch ON attendance(batch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_batch_date ON attendance(batch_id, date)",
        [],
    )?;

    // month is a YYYY-MM key. At most one fee row per (student, month).
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            month TEXT NOT NULL,
            amount REAL NOT NULL,
            status TEXT NOT NULL DEFAULT 'unpaid',
            payment_date TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id),
            UNIQUE(student_id, month)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_batch ON fees(batch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_student ON fees(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_batch_month ON fees(batch_id, month)",
        [],
    )?;

    Ok(conn)
}
