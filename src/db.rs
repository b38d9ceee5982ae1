use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "feeder.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            external_id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS functions(
            external_id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS field_of_study(
            external_id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS structures(
            external_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            override_class TEXT,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            external_id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES structures(external_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_structure ON classes(structure_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS functional_groups(
            external_id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES structures(external_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_functional_groups_structure ON functional_groups(structure_id)",
        [],
    )?;
    // Group tagging came after the first workspaces were created.
    ensure_structure_name_column(&conn, "classes")?;
    ensure_structure_name_column(&conn, "functional_groups")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            profile TEXT NOT NULL,
            source TEXT NOT NULL,
            properties TEXT NOT NULL,
            delete_date TEXT,
            disappearance_date TEXT,
            created_at TEXT NOT NULL,
            modified_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_source ON users(source)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_structures(
            user_external_id TEXT NOT NULL,
            structure_id TEXT NOT NULL,
            PRIMARY KEY(user_external_id, structure_id),
            FOREIGN KEY(user_external_id) REFERENCES users(external_id),
            FOREIGN KEY(structure_id) REFERENCES structures(external_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_classes(
            user_external_id TEXT NOT NULL,
            class_external_id TEXT NOT NULL,
            structure_id TEXT NOT NULL,
            discriminant TEXT NOT NULL DEFAULT '',
            inherited INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY(user_external_id, class_external_id, discriminant),
            FOREIGN KEY(user_external_id) REFERENCES users(external_id),
            FOREIGN KEY(class_external_id) REFERENCES classes(external_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_classes_class ON user_classes(class_external_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_groups(
            user_external_id TEXT NOT NULL,
            group_external_id TEXT NOT NULL,
            structure_id TEXT NOT NULL,
            discriminant TEXT NOT NULL DEFAULT '',
            PRIMARY KEY(user_external_id, group_external_id, discriminant),
            FOREIGN KEY(user_external_id) REFERENCES users(external_id),
            FOREIGN KEY(group_external_id) REFERENCES functional_groups(external_id)
        )",
        [],
    )?;

    // Children may be referenced before (or without) being imported, so no FK on the student side.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS relative_links(
            relative_external_id TEXT NOT NULL,
            student_external_id TEXT NOT NULL,
            PRIMARY KEY(relative_external_id, student_external_id),
            FOREIGN KEY(relative_external_id) REFERENCES users(external_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_relative_links_student ON relative_links(student_external_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            external_id TEXT PRIMARY KEY,
            structure_id TEXT NOT NULL,
            code TEXT NOT NULL,
            label TEXT NOT NULL,
            FOREIGN KEY(structure_id) REFERENCES structures(external_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            user_external_id TEXT NOT NULL,
            subject_external_id TEXT NOT NULL,
            PRIMARY KEY(user_external_id, subject_external_id),
            FOREIGN KEY(user_external_id) REFERENCES users(external_id),
            FOREIGN KEY(subject_external_id) REFERENCES subjects(external_id)
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_structure_name_column(conn: &Connection, table: &str) -> anyhow::Result<()> {
    if table_has_column(conn, table, "structure_name")? {
        return Ok(());
    }
    conn.execute(
        &format!("ALTER TABLE {} ADD COLUMN structure_name TEXT", table),
        [],
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

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
