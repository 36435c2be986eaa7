use super::{conversion_err, placeholders, text_values};
use crate::model::{
    fmt_ts, parse_ts, Lesson, LessonStatus, LessonType, SchedulingStatus, TimeWindow, Timestamp,
};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use uuid::Uuid;

const LESSON_SELECT: &str = "SELECT
       l.id, l.course_id, l.teacher_id, w.name, w.start_time, w.end_time,
       l.lesson_type, l.status, l.scheduling_status, l.control_settings,
       l.center_id, l.group_id, l.topic_id, l.schedule_id
     FROM lessons l
     JOIN lesson_windows w ON w.lesson_id = l.id";

fn lesson_from_row(row: &Row<'_>) -> rusqlite::Result<Lesson> {
    let start: String = row.get(4)?;
    let end: String = row.get(5)?;
    let lesson_type: String = row.get(6)?;
    let status: String = row.get(7)?;
    let scheduling_status: String = row.get(8)?;
    let control_settings: Option<String> = row.get(9)?;
    Ok(Lesson {
        id: row.get(0)?,
        course_id: row.get(1)?,
        teacher_id: row.get(2)?,
        name: row.get(3)?,
        window: TimeWindow {
            start: parse_ts(&start).map_err(|m| conversion_err(4, m))?,
            end: parse_ts(&end).map_err(|m| conversion_err(5, m))?,
        },
        lesson_type: LessonType::parse(&lesson_type).map_err(|m| conversion_err(6, m))?,
        status: LessonStatus::parse(&status).map_err(|m| conversion_err(7, m))?,
        scheduling_status: SchedulingStatus::parse(&scheduling_status)
            .map_err(|m| conversion_err(8, m))?,
        control_settings: control_settings.and_then(|s| serde_json::from_str(&s).ok()),
        center_id: row.get(10)?,
        group_id: row.get(11)?,
        topic_id: row.get(12)?,
        schedule_id: row.get(13)?,
    })
}

pub fn find(conn: &Connection, lesson_id: &str) -> rusqlite::Result<Option<Lesson>> {
    conn.query_row(
        &format!("{} WHERE l.id = ? AND l.deleted_at IS NULL", LESSON_SELECT),
        [lesson_id],
        lesson_from_row,
    )
    .optional()
}

pub fn find_many(conn: &Connection, lesson_ids: &[String]) -> rusqlite::Result<Vec<Lesson>> {
    if lesson_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "{} WHERE l.id IN ({}) AND l.deleted_at IS NULL ORDER BY l.id",
        LESSON_SELECT,
        placeholders(lesson_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(lesson_ids)), lesson_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// The subset of `lesson_ids` that exist and are not deleted.
pub fn existing_ids(conn: &Connection, lesson_ids: &[String]) -> rusqlite::Result<HashSet<String>> {
    if lesson_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let sql = format!(
        "SELECT id FROM lessons WHERE id IN ({}) AND deleted_at IS NULL",
        placeholders(lesson_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(text_values(lesson_ids)), |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// The subset of `lesson_ids` whose owning course is a live course.
pub fn live_ids(conn: &Connection, lesson_ids: &[String]) -> rusqlite::Result<HashSet<String>> {
    if lesson_ids.is_empty() {
        return Ok(HashSet::new());
    }
    let sql = format!(
        "SELECT l.id FROM lessons l
         JOIN courses c ON c.id = l.course_id
         WHERE l.id IN ({}) AND c.course_type = 'live'",
        placeholders(lesson_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let ids = stmt
        .query_map(params_from_iter(text_values(lesson_ids)), |r| r.get::<_, String>(0))?
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(ids)
}

/// Owning course ids of the given lessons, deleted lessons included.
pub fn course_ids_of(conn: &Connection, lesson_ids: &[String]) -> rusqlite::Result<Vec<(String, String)>> {
    if lesson_ids.is_empty() {
        return Ok(Vec::new());
    }
    let sql = format!(
        "SELECT id, course_id FROM lessons WHERE id IN ({})",
        placeholders(lesson_ids.len())
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(text_values(lesson_ids)), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn ids_by_course(conn: &Connection, course_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM lessons WHERE course_id = ? AND deleted_at IS NULL ORDER BY id",
    )?;
    let ids = stmt
        .query_map([course_id], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Writes a lesson row. With `flattened == false` the name/window columns stay
/// NULL and are read through the topic/schedule pair instead.
pub fn insert(
    conn: &Connection,
    lesson: &Lesson,
    flattened: bool,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    let ts = fmt_ts(now);
    let control_settings = lesson
        .control_settings
        .as_ref()
        .map(|v| v.to_string());
    conn.execute(
        "INSERT INTO lessons(id, course_id, teacher_id, name, start_time, end_time,
                             lesson_type, status, scheduling_status, control_settings,
                             center_id, group_id, topic_id, schedule_id, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            lesson.id,
            lesson.course_id,
            lesson.teacher_id,
            flattened.then(|| lesson.name.clone()),
            flattened.then(|| fmt_ts(&lesson.window.start)),
            flattened.then(|| fmt_ts(&lesson.window.end)),
            lesson.lesson_type.as_str(),
            lesson.status.as_str(),
            lesson.scheduling_status.as_str(),
            control_settings,
            lesson.center_id,
            lesson.group_id,
            lesson.topic_id,
            lesson.schedule_id,
            ts,
            ts,
        ],
    )?;
    Ok(())
}

pub fn update(
    conn: &Connection,
    lesson: &Lesson,
    flattened: bool,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    let control_settings = lesson
        .control_settings
        .as_ref()
        .map(|v| v.to_string());
    conn.execute(
        "UPDATE lessons SET
           teacher_id = ?, name = ?, start_time = ?, end_time = ?,
           lesson_type = ?, status = ?, scheduling_status = ?, control_settings = ?,
           center_id = ?, group_id = ?, topic_id = ?, schedule_id = ?, updated_at = ?
         WHERE id = ? AND deleted_at IS NULL",
        params![
            lesson.teacher_id,
            flattened.then(|| lesson.name.clone()),
            flattened.then(|| fmt_ts(&lesson.window.start)),
            flattened.then(|| fmt_ts(&lesson.window.end)),
            lesson.lesson_type.as_str(),
            lesson.status.as_str(),
            lesson.scheduling_status.as_str(),
            control_settings,
            lesson.center_id,
            lesson.group_id,
            lesson.topic_id,
            lesson.schedule_id,
            fmt_ts(now),
            lesson.id,
        ],
    )
}

pub fn soft_delete_many(
    conn: &Connection,
    lesson_ids: &[String],
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    if lesson_ids.is_empty() {
        return Ok(0);
    }
    let ts = fmt_ts(now);
    let sql = format!(
        "UPDATE lessons SET deleted_at = ?, updated_at = ?
         WHERE id IN ({}) AND deleted_at IS NULL",
        placeholders(lesson_ids.len())
    );
    let mut values = vec![
        rusqlite::types::Value::Text(ts.clone()),
        rusqlite::types::Value::Text(ts),
    ];
    values.extend(text_values(lesson_ids));
    conn.execute(&sql, params_from_iter(values))
}

/// Finds the group for an external series id, creating it on first sight.
pub fn find_or_create_group(
    conn: &Connection,
    course_id: &str,
    external_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<String> {
    conn.execute(
        "INSERT INTO lesson_groups(id, course_id, external_id, created_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(course_id, external_id) DO NOTHING",
        params![Uuid::new_v4().to_string(), course_id, external_id, fmt_ts(now)],
    )?;
    conn.query_row(
        "SELECT id FROM lesson_groups WHERE course_id = ? AND external_id = ?",
        params![course_id, external_id],
        |r| r.get(0),
    )
}

/// Soft-deletes already-sent notifications so a fresh one can be issued.
pub fn invalidate_sent_notifications(
    conn: &Connection,
    lesson_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE lesson_notifications SET deleted_at = ?
         WHERE lesson_id = ? AND status = 'sent' AND deleted_at IS NULL",
        params![fmt_ts(now), lesson_id],
    )
}

pub fn record_sent_notification(conn: &Connection, lesson_id: &str, now: &Timestamp) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO lesson_notifications(id, lesson_id, status, sent_at) VALUES(?, ?, 'sent', ?)",
        params![id, lesson_id, fmt_ts(now)],
    )?;
    Ok(id)
}
