use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "lessond.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    // Several sidecars may share one workspace file.
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'student',
            monthly_token_quota INTEGER NOT NULL DEFAULT 0,
            token_balance INTEGER NOT NULL DEFAULT 0 CHECK(token_balance >= 0),
            token_renewal_date TEXT,
            quota_override INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT
        )",
        [],
    )?;
    // Workspaces created before token metering have no role/quota columns.
    ensure_users_token_columns(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            token_digest TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            grade_level TEXT NOT NULL,
            topic TEXT NOT NULL,
            teaching_strategy TEXT NOT NULL,
            language TEXT NOT NULL,
            generated_plan TEXT NOT NULL,
            gpt_plan TEXT NOT NULL,
            date_created TEXT NOT NULL,
            date_modified TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_user_created ON lessons(user_id, date_created)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS presentations(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            slide_count INTEGER NOT NULL DEFAULT 0,
            date_created TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_presentations_lesson ON presentations(lesson_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS document_exports(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            date_created TEXT NOT NULL,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_document_exports_lesson ON document_exports(lesson_id)",
        [],
    )?;

    // Append-only. No foreign key to users: rows outlive deleted accounts.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS token_transactions(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            balance_after INTEGER NOT NULL,
            transaction_type TEXT NOT NULL,
            reason TEXT NOT NULL,
            source TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_token_transactions_user ON token_transactions(user_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS role_configs(
            role TEXT PRIMARY KEY,
            monthly_quota INTEGER NOT NULL CHECK(monthly_quota >= 0),
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_users_token_columns(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "users", "role")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN role TEXT NOT NULL DEFAULT 'student'",
            [],
        )?;
    }
    if !table_has_column(conn, "users", "monthly_token_quota")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN monthly_token_quota INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "users", "token_balance")? {
        // ALTER TABLE cannot add a CHECK constraint; the ledger's conditional
        // updates keep the balance non-negative.
        conn.execute(
            "ALTER TABLE users ADD COLUMN token_balance INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !table_has_column(conn, "users", "token_renewal_date")? {
        // NULL forces a renewal on the next load, which seeds the balance.
        conn.execute("ALTER TABLE users ADD COLUMN token_renewal_date TEXT", [])?;
    }
    if !table_has_column(conn, "users", "quota_override")? {
        conn.execute(
            "ALTER TABLE users ADD COLUMN quota_override INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    Ok(())
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> anyhow::Result<Option<serde_json::Value>> {
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
