use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE_NAME: &str = "coursesync.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)
        .with_context(|| format!("failed to create workspace {}", workspace.to_string_lossy()))?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS feature_gates(
            name TEXT NOT NULL,
            environment TEXT NOT NULL,
            enabled INTEGER NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(name, environment)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS school_admins(
            user_id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_schools(
            teacher_id TEXT NOT NULL,
            school_id TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY(teacher_id, school_id),
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subject TEXT,
            grade INTEGER,
            country TEXT,
            course_type TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            study_plan_id TEXT,
            teacher_ids TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_courses_school ON courses(school_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS study_plans(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            topic_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules_weekly(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            study_plan_id TEXT,
            topic_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(topic_id) REFERENCES topics(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedules_weekly_course ON schedules_weekly(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_groups(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(course_id, external_id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lessons(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            name TEXT,
            start_time TEXT,
            end_time TEXT,
            lesson_type TEXT NOT NULL,
            status TEXT NOT NULL,
            scheduling_status TEXT NOT NULL DEFAULT 'published',
            control_settings TEXT,
            center_id TEXT,
            group_id TEXT,
            topic_id TEXT,
            schedule_id TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(group_id) REFERENCES lesson_groups(id),
            FOREIGN KEY(topic_id) REFERENCES topics(id),
            FOREIGN KEY(schedule_id) REFERENCES schedules_weekly(id)
        )",
        [],
    )?;
    // Workspaces created before scheduling status was tracked lack the column.
    ensure_lessons_scheduling_status(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id)",
        [],
    )?;

    // Effective lesson fields for both schemas: flattened lessons carry their own
    // name/window, legacy lessons derive them from the topic/schedule pair.
    conn.execute(
        "CREATE VIEW IF NOT EXISTS lesson_windows AS
         SELECT
           l.id AS lesson_id,
           l.course_id AS course_id,
           COALESCE(l.name, t.name) AS name,
           COALESCE(l.start_time, s.start_time) AS start_time,
           COALESCE(l.end_time, s.end_time) AS end_time,
           l.deleted_at AS deleted_at
         FROM lessons l
         LEFT JOIN topics t ON t.id = l.topic_id AND t.deleted_at IS NULL
         LEFT JOIN schedules_weekly s ON s.id = l.schedule_id AND s.deleted_at IS NULL",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_classes(
            course_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY(course_id, class_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_members(
            lesson_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            deleted_at TEXT,
            PRIMARY KEY(lesson_id, student_id),
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_lesson_members_student ON lesson_members(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS lesson_notifications(
            id TEXT PRIMARY KEY,
            lesson_id TEXT NOT NULL,
            status TEXT NOT NULL,
            sent_at TEXT,
            deleted_at TEXT,
            FOREIGN KEY(lesson_id) REFERENCES lessons(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS outbox(
            id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            published_at TEXT,
            message_id TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_outbox_pending ON outbox(published_at, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ingested_envelopes(
            fingerprint TEXT PRIMARY KEY,
            natural_key TEXT NOT NULL,
            action TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_lessons_scheduling_status(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "lessons", "scheduling_status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE lessons ADD COLUMN scheduling_status TEXT NOT NULL DEFAULT 'published'",
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
        Some(s) => {
            let v = serde_json::from_str(&s)
                .with_context(|| format!("settings value for {} is not valid json", key))?;
            Ok(Some(v))
        }
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
