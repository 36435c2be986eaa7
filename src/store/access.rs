//! Schools, school admins, teacher memberships and classes: the directory rows the
//! access guard and teacher validation resolve against.

use super::{placeholders, text_values};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::collections::{HashMap, HashSet};

pub fn upsert_school(conn: &Connection, school_id: &str, name: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        params![school_id, name],
    )?;
    Ok(())
}

pub fn school_exists(conn: &Connection, school_id: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| r.get(0))
        .optional()?;
    Ok(hit.is_some())
}

pub fn assign_school_admin(conn: &Connection, user_id: &str, school_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO school_admins(user_id, school_id) VALUES(?, ?)
         ON CONFLICT(user_id) DO UPDATE SET school_id = excluded.school_id",
        params![user_id, school_id],
    )?;
    Ok(())
}

pub fn school_of_admin(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT school_id FROM school_admins WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )
    .optional()
}

pub fn link_teacher(conn: &Connection, teacher_id: &str, school_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO teacher_schools(teacher_id, school_id) VALUES(?, ?)
         ON CONFLICT(teacher_id, school_id) DO UPDATE SET deleted_at = NULL",
        params![teacher_id, school_id],
    )?;
    Ok(())
}

pub fn teacher_school_ids(conn: &Connection, teacher_id: &str) -> rusqlite::Result<HashSet<String>> {
    let mut stmt = conn.prepare(
        "SELECT school_id FROM teacher_schools WHERE teacher_id = ? AND deleted_at IS NULL",
    )?;
    let ids = stmt
        .query_map([teacher_id], |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Teachers among `teacher_ids` that hold a membership in `school_id`.
pub fn teachers_in_school(
    conn: &Connection,
    school_id: &str,
    teacher_ids: &[String],
) -> rusqlite::Result<HashSet<String>> {
    if teacher_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let sql = format!(
        "SELECT teacher_id FROM teacher_schools
         WHERE school_id = ? AND deleted_at IS NULL AND teacher_id IN ({})",
        placeholders(teacher_ids.len())
    );
    let mut values = vec![rusqlite::types::Value::Text(school_id.to_string())];
    values.extend(text_values(teacher_ids));
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(values), |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

pub fn upsert_class(conn: &Connection, class_id: &str, school_id: &str, name: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO classes(id, school_id, name) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        params![class_id, school_id, name],
    )?;
    Ok(())
}

/// Owning school per class id; unknown classes are absent from the map.
pub fn class_schools(conn: &Connection, class_ids: &[String]) -> rusqlite::Result<HashMap<String, String>> {
    if class_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let sql = format!(
        "SELECT id, school_id FROM classes WHERE id IN ({})",
        placeholders(class_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(class_ids)), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

pub fn school_of_course(conn: &Connection, course_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT school_id FROM courses WHERE id = ? AND deleted_at IS NULL",
        [course_id],
        |r| r.get(0),
    )
    .optional()
}

pub fn school_of_lesson(conn: &Connection, lesson_id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT c.school_id FROM lessons l
         JOIN courses c ON c.id = l.course_id
         WHERE l.id = ? AND l.deleted_at IS NULL AND c.deleted_at IS NULL",
        [lesson_id],
        |r| r.get(0),
    )
    .optional()
}
