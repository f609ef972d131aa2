use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "tahfiz.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    // Chapter catalog. verse_count may be NULL: a chapter whose length has
    // not been recorded yet still resolves, it just expands to no verses.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS chapters(
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            verse_count INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            full_name TEXT NOT NULL,
            group_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_group ON students(group_name)",
        [],
    )?;

    // status and progress_percent are written only by the evaluator.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_targets(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            group_name TEXT,
            kind TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            start_chapter INTEGER,
            start_verse INTEGER,
            end_chapter INTEGER,
            end_verse INTEGER,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'not_achieved',
            progress_percent INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    ensure_weekly_targets_updated_at(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_targets_student ON weekly_targets(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_weekly_targets_student_window
         ON weekly_targets(student_id, start_date, end_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS submissions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT,
            kind TEXT NOT NULL,
            date TEXT NOT NULL,
            chapter INTEGER,
            start_verse INTEGER,
            end_verse INTEGER,
            note TEXT,
            created_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student ON submissions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_submissions_student_kind_date
         ON submissions(student_id, kind, date)",
        [],
    )?;

    Ok(conn)
}

fn ensure_weekly_targets_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "weekly_targets", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE weekly_targets ADD COLUMN updated_at TEXT", [])?;
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
