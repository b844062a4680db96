use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("cgpa.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            admin_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            faculty_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            department TEXT NOT NULL,
            class TEXT NOT NULL,
            section TEXT NOT NULL,
            class_advisor TEXT NOT NULL,
            batch TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            subject_code TEXT PRIMARY KEY,
            subject_name TEXT NOT NULL,
            credits INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            roll_no TEXT NOT NULL,
            register_number TEXT NOT NULL,
            student_name TEXT NOT NULL,
            subject_code TEXT NOT NULL,
            grade TEXT NOT NULL,
            semester TEXT NOT NULL,
            department TEXT NOT NULL,
            year TEXT NOT NULL,
            section TEXT NOT NULL,
            batch TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(roll_no, subject_code, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_semester ON grades(semester)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grades_register ON grades(register_number)",
        [],
    )?;

    // One row per (student, semester): the stored per-semester sums that CGPA
    // queries re-derive from. Re-uploading a semester overwrites the row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS cgpa_calculation(
            roll_no TEXT NOT NULL,
            register_number TEXT NOT NULL,
            student_name TEXT NOT NULL,
            semester TEXT NOT NULL,
            total_score REAL NOT NULL,
            total_credits REAL NOT NULL,
            department TEXT NOT NULL,
            year TEXT NOT NULL,
            section TEXT NOT NULL,
            batch TEXT NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(roll_no, register_number, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cgpa_calculation_register
         ON cgpa_calculation(register_number)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cgpa_calculation_class
         ON cgpa_calculation(department, section, batch)",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(value)
}

pub fn settings_set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
    Ok(())
}
