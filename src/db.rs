use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "projectbook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semesters(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            academic_year TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 0,
            registration_start TEXT,
            registration_end TEXT,
            grading_deadline TEXT,
            created_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programmes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS venues(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            capacity INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS projects(
            id TEXT PRIMARY KEY,
            semester_id TEXT NOT NULL,
            programme_id TEXT,
            venue_id TEXT,
            title TEXT NOT NULL,
            supervisor_name TEXT NOT NULL,
            supervisor_email TEXT NOT NULL,
            moderator_name TEXT,
            moderator_email TEXT,
            created_at TEXT,
            FOREIGN KEY(semester_id) REFERENCES semesters(id),
            FOREIGN KEY(programme_id) REFERENCES programmes(id),
            FOREIGN KEY(venue_id) REFERENCES venues(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_projects_semester ON projects(semester_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            name TEXT NOT NULL,
            matriculation_number TEXT NOT NULL,
            email TEXT,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(project_id) REFERENCES projects(id),
            UNIQUE(project_id, matriculation_number)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_project ON students(project_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grades(
            student_id TEXT PRIMARY KEY,
            supervisor_grade REAL,
            moderator_grade REAL,
            peer_grade REAL,
            final_grade REAL,
            letter_grade TEXT,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS peer_reviews(
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            reviewer_student_id TEXT NOT NULL,
            target_student_id TEXT NOT NULL,
            score REAL NOT NULL,
            submitted_at TEXT,
            FOREIGN KEY(project_id) REFERENCES projects(id),
            FOREIGN KEY(reviewer_student_id) REFERENCES students(id),
            FOREIGN KEY(target_student_id) REFERENCES students(id),
            UNIQUE(reviewer_student_id, target_student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_peer_reviews_target ON peer_reviews(target_student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        None => Ok(None),
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
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
