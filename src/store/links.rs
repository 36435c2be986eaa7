//! Course↔class links and lesson↔student memberships. Neither is ever hard-deleted.

use super::{placeholders, text_values};
use crate::model::{fmt_ts, LinkStatus, Timestamp};
use rusqlite::{params, params_from_iter, Connection};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseClassLink {
    pub course_id: String,
    pub class_id: String,
    pub status: LinkStatus,
    pub deleted: bool,
}

pub fn course_class_links(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<CourseClassLink>> {
    let mut stmt = conn.prepare(
        "SELECT course_id, class_id, status, deleted_at
         FROM course_classes WHERE course_id = ? ORDER BY class_id",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            let status: String = r.get(2)?;
            let deleted_at: Option<String> = r.get(3)?;
            Ok(CourseClassLink {
                course_id: r.get(0)?,
                class_id: r.get(1)?,
                status: LinkStatus::parse(&status)
                    .map_err(|m| super::conversion_err(2, m))?,
                deleted: deleted_at.is_some(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn active_class_ids(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<String>> {
    Ok(course_class_links(conn, course_id)?
        .into_iter()
        .filter(|l| l.status == LinkStatus::Active && !l.deleted)
        .map(|l| l.class_id)
        .collect())
}

/// Inserts an active link, or reactivates a previously removed one.
pub fn activate_class_link(
    conn: &Connection,
    course_id: &str,
    class_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    let ts = fmt_ts(now);
    conn.execute(
        "INSERT INTO course_classes(course_id, class_id, status, created_at, updated_at)
         VALUES(?, ?, 'active', ?, ?)
         ON CONFLICT(course_id, class_id) DO UPDATE SET
           status = 'active',
           deleted_at = NULL,
           updated_at = excluded.updated_at",
        params![course_id, class_id, ts, ts],
    )?;
    Ok(())
}

pub fn deactivate_class_links(
    conn: &Connection,
    course_id: &str,
    class_ids: &[String],
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    if class_ids.is_empty() {
        return Ok(0);
    }
    let ts = fmt_ts(now);
    let sql = format!(
        "UPDATE course_classes SET status = 'inactive', deleted_at = ?, updated_at = ?
         WHERE course_id = ? AND deleted_at IS NULL AND class_id IN ({})",
        placeholders(class_ids.len())
    );
    let mut values = vec![
        rusqlite::types::Value::Text(ts.clone()),
        rusqlite::types::Value::Text(ts),
        rusqlite::types::Value::Text(course_id.to_string()),
    ];
    values.extend(text_values(class_ids));
    conn.execute(&sql, params_from_iter(values))
}

pub fn deactivate_all_class_links(
    conn: &Connection,
    course_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    let ts = fmt_ts(now);
    conn.execute(
        "UPDATE course_classes SET status = 'inactive', deleted_at = ?, updated_at = ?
         WHERE course_id = ? AND deleted_at IS NULL",
        params![ts, ts, course_id],
    )
}

/// Upserts one membership row per (lesson, student); re-adding a removed pair revives it.
pub fn upsert_members(
    conn: &Connection,
    lesson_id: &str,
    student_ids: &[String],
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    let ts = fmt_ts(now);
    let mut stmt = conn.prepare(
        "INSERT INTO lesson_members(lesson_id, student_id, created_at, updated_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(lesson_id, student_id) DO UPDATE SET
           deleted_at = NULL,
           updated_at = excluded.updated_at",
    )?;
    let mut n = 0;
    for sid in student_ids {
        n += stmt.execute(params![lesson_id, sid, ts, ts])?;
    }
    Ok(n)
}

pub fn soft_delete_member(
    conn: &Connection,
    lesson_id: &str,
    student_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    let ts = fmt_ts(now);
    conn.execute(
        "UPDATE lesson_members SET deleted_at = ?, updated_at = ?
         WHERE lesson_id = ? AND student_id = ? AND deleted_at IS NULL",
        params![ts, ts, lesson_id, student_id],
    )
}

pub fn soft_delete_members_for_lessons(
    conn: &Connection,
    lesson_ids: &[String],
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    if lesson_ids.is_empty() {
        return Ok(0);
    }
    let ts = fmt_ts(now);
    let sql = format!(
        "UPDATE lesson_members SET deleted_at = ?, updated_at = ?
         WHERE deleted_at IS NULL AND lesson_id IN ({})",
        placeholders(lesson_ids.len())
    );
    let mut values = vec![
        rusqlite::types::Value::Text(ts.clone()),
        rusqlite::types::Value::Text(ts),
    ];
    values.extend(text_values(lesson_ids));
    conn.execute(&sql, params_from_iter(values))
}

pub fn lesson_ids_of_student(conn: &Connection, student_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT lesson_id FROM lesson_members
         WHERE student_id = ? AND deleted_at IS NULL ORDER BY lesson_id",
    )?;
    let ids = stmt
        .query_map([student_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

pub fn student_ids_of_lesson(conn: &Connection, lesson_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM lesson_members
         WHERE lesson_id = ? AND deleted_at IS NULL ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map([lesson_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}
