use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_type TEXT NOT NULL DEFAULT 'gurmukhi',
            default_monthly_fee INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;
    // Early workspaces predate class types and the flat fee column.
    ensure_classes_fee_columns(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sections(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            name TEXT NOT NULL,
            monthly_fee INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sections_class ON sections(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS enrollments(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            section_id TEXT NOT NULL,
            student_type TEXT NOT NULL DEFAULT 'paid',
            monthly_fee INTEGER,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(section_id) REFERENCES sections(id),
            UNIQUE(student_id, class_id, section_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_class ON enrollments(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_enrollments_section ON enrollments(section_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rate_periods(
            id TEXT PRIMARY KEY,
            scope_type TEXT NOT NULL,
            scope_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            effective_from TEXT NOT NULL,
            effective_to TEXT,
            created_at TEXT,
            updated_at TEXT,
            UNIQUE(scope_type, scope_id, effective_from)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rate_periods_range
         ON rate_periods(scope_type, scope_id, effective_from, effective_to)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_batches(
            id TEXT PRIMARY KEY,
            month TEXT NOT NULL,
            kind TEXT NOT NULL,
            created_count INTEGER NOT NULL,
            skipped_count INTEGER NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fees(
            id TEXT PRIMARY KEY,
            enrollment_id TEXT NOT NULL,
            fee_type TEXT NOT NULL,
            source TEXT NOT NULL,
            month TEXT,
            amount INTEGER NOT NULL,
            is_locked INTEGER NOT NULL DEFAULT 0,
            batch_id TEXT,
            description TEXT,
            created_at TEXT,
            updated_at TEXT,
            FOREIGN KEY(enrollment_id) REFERENCES enrollments(id),
            FOREIGN KEY(batch_id) REFERENCES fee_batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fees_enrollment_type_month
         ON fees(enrollment_id, fee_type, month)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_fees_monthly
         ON fees(enrollment_id, month) WHERE fee_type = 'monthly'",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS payments(
            id TEXT PRIMARY KEY,
            fee_id TEXT NOT NULL,
            amount_paid INTEGER NOT NULL,
            paid_at TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(fee_id) REFERENCES fees(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_payments_fee ON payments(fee_id)",
        [],
    )?;

    Ok(())
}

fn ensure_classes_fee_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "classes", "class_type")? {
        conn.execute(
            "ALTER TABLE classes ADD COLUMN class_type TEXT NOT NULL DEFAULT 'gurmukhi'",
            [],
        )?;
    }
    if !table_has_column(conn, "classes", "default_monthly_fee")? {
        conn.execute(
            "ALTER TABLE classes ADD COLUMN default_monthly_fee INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
