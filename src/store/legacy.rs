//! Topic / weekly schedule / study plan rows used by the legacy lesson schema.

use super::{conversion_err, placeholders, text_values};
use crate::model::{fmt_ts, parse_ts, TimeWindow, Timestamp};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct Topic {
    pub id: String,
    pub course_id: String,
    pub name: String,
    pub topic_type: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleWeekly {
    pub id: String,
    pub course_id: String,
    pub study_plan_id: Option<String>,
    pub topic_id: String,
    pub window: TimeWindow,
}

pub fn insert_topic(conn: &Connection, topic: &Topic, now: &Timestamp) -> rusqlite::Result<()> {
    let ts = fmt_ts(now);
    conn.execute(
        "INSERT INTO topics(id, course_id, name, topic_type, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![topic.id, topic.course_id, topic.name, topic.topic_type, ts, ts],
    )?;
    Ok(())
}

pub fn update_topic_name(
    conn: &Connection,
    topic_id: &str,
    name: &str,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE topics SET name = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        params![name, fmt_ts(now), topic_id],
    )
}

pub fn find_topic(conn: &Connection, topic_id: &str) -> rusqlite::Result<Option<Topic>> {
    conn.query_row(
        "SELECT id, course_id, name, topic_type FROM topics WHERE id = ? AND deleted_at IS NULL",
        [topic_id],
        |r| {
            Ok(Topic {
                id: r.get(0)?,
                course_id: r.get(1)?,
                name: r.get(2)?,
                topic_type: r.get(3)?,
            })
        },
    )
    .optional()
}

pub fn insert_schedule(
    conn: &Connection,
    schedule: &ScheduleWeekly,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    let ts = fmt_ts(now);
    conn.execute(
        "INSERT INTO schedules_weekly(id, course_id, study_plan_id, topic_id, start_time, end_time,
                                      created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            schedule.id,
            schedule.course_id,
            schedule.study_plan_id,
            schedule.topic_id,
            fmt_ts(&schedule.window.start),
            fmt_ts(&schedule.window.end),
            ts,
            ts,
        ],
    )?;
    Ok(())
}

pub fn update_schedule_window(
    conn: &Connection,
    schedule_id: &str,
    window: &TimeWindow,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE schedules_weekly SET start_time = ?, end_time = ?, updated_at = ?
         WHERE id = ? AND deleted_at IS NULL",
        params![
            fmt_ts(&window.start),
            fmt_ts(&window.end),
            fmt_ts(now),
            schedule_id
        ],
    )
}

pub fn find_schedule(conn: &Connection, schedule_id: &str) -> rusqlite::Result<Option<ScheduleWeekly>> {
    conn.query_row(
        "SELECT id, course_id, study_plan_id, topic_id, start_time, end_time
         FROM schedules_weekly WHERE id = ? AND deleted_at IS NULL",
        [schedule_id],
        |r| {
            let start: String = r.get(4)?;
            let end: String = r.get(5)?;
            Ok(ScheduleWeekly {
                id: r.get(0)?,
                course_id: r.get(1)?,
                study_plan_id: r.get(2)?,
                topic_id: r.get(3)?,
                window: TimeWindow {
                    start: parse_ts(&start).map_err(|m| conversion_err(4, m))?,
                    end: parse_ts(&end).map_err(|m| conversion_err(5, m))?,
                },
            })
        },
    )
    .optional()
}

pub fn insert_study_plan(
    conn: &Connection,
    plan_id: &str,
    course_id: &str,
    name: &str,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO study_plans(id, course_id, name, created_at) VALUES(?, ?, ?, ?)",
        params![plan_id, course_id, name, fmt_ts(now)],
    )?;
    Ok(())
}

/// Soft-deletes every topic, schedule and study plan of a course.
pub fn soft_delete_by_course(
    conn: &Connection,
    course_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    let ts = fmt_ts(now);
    let mut n = conn.execute(
        "UPDATE schedules_weekly SET deleted_at = ?, updated_at = ?
         WHERE course_id = ? AND deleted_at IS NULL",
        params![ts, ts, course_id],
    )?;
    n += conn.execute(
        "UPDATE topics SET deleted_at = ?, updated_at = ?
         WHERE course_id = ? AND deleted_at IS NULL",
        params![ts, ts, course_id],
    )?;
    n += conn.execute(
        "UPDATE study_plans SET deleted_at = ? WHERE course_id = ? AND deleted_at IS NULL",
        params![ts, course_id],
    )?;
    Ok(n)
}

/// Soft-deletes the topic/schedule pairs behind the given lessons.
pub fn soft_delete_for_lessons(
    conn: &Connection,
    lesson_ids: &[String],
    now: &Timestamp,
) -> rusqlite::Result<usize> {
    if lesson_ids.is_empty() {
        return Ok(0);
    }
    let ts = fmt_ts(now);
    let marks = placeholders(lesson_ids.len());
    let mut values = vec![
        rusqlite::types::Value::Text(ts.clone()),
        rusqlite::types::Value::Text(ts),
    ];
    values.extend(text_values(lesson_ids));
    let mut n = conn.execute(
        &format!(
            "UPDATE schedules_weekly SET deleted_at = ?, updated_at = ?
             WHERE deleted_at IS NULL
               AND id IN (SELECT schedule_id FROM lessons WHERE id IN ({}))",
            marks
        ),
        params_from_iter(values.clone()),
    )?;
    n += conn.execute(
        &format!(
            "UPDATE topics SET deleted_at = ?, updated_at = ?
             WHERE deleted_at IS NULL
               AND id IN (SELECT topic_id FROM lessons WHERE id IN ({}))",
            marks
        ),
        params_from_iter(values),
    )?;
    Ok(n)
}
