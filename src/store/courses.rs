use crate::model::{fmt_ts, parse_ts, Course, CourseType, TimeWindow, Timestamp};
use super::conversion_err;
use rusqlite::{params, Connection, OptionalExtension, Row};

const COURSE_COLUMNS: &str = "id, school_id, name, subject, grade, country, course_type,
     start_date, end_date, study_plan_id, teacher_ids, deleted_at";

fn course_from_row(row: &Row<'_>) -> rusqlite::Result<Course> {
    let course_type: String = row.get(6)?;
    let start: Option<String> = row.get(7)?;
    let end: Option<String> = row.get(8)?;
    let window = match (start, end) {
        (Some(s), Some(e)) => Some(TimeWindow {
            start: parse_ts(&s).map_err(|m| conversion_err(7, m))?,
            end: parse_ts(&e).map_err(|m| conversion_err(8, m))?,
        }),
        _ => None,
    };
    let teacher_ids_raw: String = row.get(10)?;
    let deleted_at: Option<String> = row.get(11)?;
    Ok(Course {
        id: row.get(0)?,
        school_id: row.get(1)?,
        name: row.get(2)?,
        subject: row.get(3)?,
        grade: row.get(4)?,
        country: row.get(5)?,
        course_type: CourseType::parse(&course_type).map_err(|m| conversion_err(6, m))?,
        window,
        study_plan_id: row.get(9)?,
        teacher_ids: serde_json::from_str(&teacher_ids_raw).unwrap_or_default(),
        deleted: deleted_at.is_some(),
    })
}

/// Finds a course including soft-deleted rows.
pub fn find_any(conn: &Connection, course_id: &str) -> rusqlite::Result<Option<Course>> {
    conn.query_row(
        &format!("SELECT {} FROM courses WHERE id = ?", COURSE_COLUMNS),
        [course_id],
        course_from_row,
    )
    .optional()
}

/// Finds a live (non-deleted) course.
pub fn find(conn: &Connection, course_id: &str) -> rusqlite::Result<Option<Course>> {
    Ok(find_any(conn, course_id)?.filter(|c| !c.deleted))
}

pub fn upsert(conn: &Connection, course: &Course, now: &Timestamp) -> rusqlite::Result<()> {
    let now = fmt_ts(now);
    let teacher_ids = serde_json::to_string(&course.teacher_ids)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO courses(id, school_id, name, subject, grade, country, course_type,
                             study_plan_id, teacher_ids, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           subject = excluded.subject,
           grade = excluded.grade,
           country = excluded.country,
           course_type = excluded.course_type,
           study_plan_id = COALESCE(excluded.study_plan_id, courses.study_plan_id),
           teacher_ids = excluded.teacher_ids,
           updated_at = excluded.updated_at",
        params![
            course.id,
            course.school_id,
            course.name,
            course.subject,
            course.grade,
            course.country,
            course.course_type.as_str(),
            course.study_plan_id,
            teacher_ids,
            now,
            now,
        ],
    )?;
    Ok(())
}

pub fn set_window(
    conn: &Connection,
    course_id: &str,
    window: Option<&TimeWindow>,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE courses SET start_date = ?, end_date = ?, updated_at = ? WHERE id = ?",
        params![
            window.map(|w| fmt_ts(&w.start)),
            window.map(|w| fmt_ts(&w.end)),
            fmt_ts(now),
            course_id
        ],
    )?;
    Ok(())
}

/// Returns the number of rows touched (0 when the course was already deleted).
pub fn soft_delete(conn: &Connection, course_id: &str, now: &Timestamp) -> rusqlite::Result<usize> {
    let ts = fmt_ts(now);
    conn.execute(
        "UPDATE courses SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        params![ts, ts, course_id],
    )
}

/// Min start / max end over the course's surviving lessons, using the effective
/// window of either schema.
pub fn lesson_bounds(conn: &Connection, course_id: &str) -> rusqlite::Result<Option<TimeWindow>> {
    let (start, end): (Option<String>, Option<String>) = conn.query_row(
        "SELECT MIN(start_time), MAX(end_time)
         FROM lesson_windows
         WHERE course_id = ? AND deleted_at IS NULL",
        [course_id],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    match (start, end) {
        (Some(s), Some(e)) => Ok(Some(TimeWindow {
            start: parse_ts(&s).map_err(|m| conversion_err(0, m))?,
            end: parse_ts(&e).map_err(|m| conversion_err(1, m))?,
        })),
        _ => Ok(None),
    }
}

pub fn set_study_plan(
    conn: &Connection,
    course_id: &str,
    study_plan_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE courses SET study_plan_id = ?, updated_at = ? WHERE id = ?",
        params![study_plan_id, fmt_ts(now), course_id],
    )?;
    Ok(())
}
