use super::input::{clean_ids, LessonInput, LessonPatch};
use super::writeset::{LessonWriteSet, Strategy};
use super::{MutationContext, Outcome};
use crate::aggregate::{self, WindowChange};
use crate::error::{OpContext, OrchestratorError, Result};
use crate::events::{DomainEvent, LessonRef};
use crate::flags::SchemaPath;
use crate::model::{
    Course, Lesson, LessonStatus, LessonType, SchedulingStatus, TimeWindow, Timestamp,
};
use crate::store::legacy::{self, ScheduleWeekly, Topic};
use crate::store::{access, courses, lessons, links};
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::info;
use uuid::Uuid;

pub(super) fn load_live_course(conn: &Connection, course_id: &str) -> Result<Course> {
    courses::find(conn, course_id)
        .op("load course")?
        .ok_or_else(|| OrchestratorError::not_found("cannot find course"))
}

/// Rejects every teacher that has no membership in the course's school.
pub(super) fn ensure_teachers_in_school(
    conn: &Connection,
    school_id: &str,
    teacher_ids: &[String],
) -> Result<()> {
    let members = access::teachers_in_school(conn, school_id, teacher_ids)
        .op("check teacher schools")?;
    let missing: Vec<&str> = teacher_ids
        .iter()
        .filter(|t| !members.contains(*t))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(OrchestratorError::invalid(format!(
        "teacher(s) {} do not belong to school {}",
        missing.join(", "),
        school_id
    )))
}

/// The legacy schedule rows hang off the course's study plan; create it on demand.
pub(super) fn ensure_study_plan(conn: &Connection, course: &Course, now: &Timestamp) -> Result<String> {
    if let Some(id) = &course.study_plan_id {
        return Ok(id.clone());
    }
    let plan_id = Uuid::new_v4().to_string();
    legacy::insert_study_plan(conn, &plan_id, &course.id, &course.name, now)
        .op("create study plan")?;
    courses::set_study_plan(conn, &course.id, &plan_id, now).op("link study plan")?;
    Ok(plan_id)
}

pub(super) fn create(
    conn: &Connection,
    ctx: &MutationContext<'_>,
    inputs: Vec<LessonInput>,
    events: &mut Vec<DomainEvent>,
) -> Result<Outcome> {
    if inputs.is_empty() {
        return Err(OrchestratorError::invalid("no lessons to create"));
    }
    let mut by_course: BTreeMap<String, Vec<_>> = BTreeMap::new();
    let mut requested_ids = HashSet::new();
    for input in &inputs {
        let v = input.validate()?;
        if let Some(id) = &v.id {
            if !requested_ids.insert(id.clone()) {
                return Err(OrchestratorError::invalid(format!(
                    "lesson {} appears more than once",
                    id
                )));
            }
        }
        by_course.entry(v.course_id.clone()).or_default().push(v);
    }
    let explicit: Vec<String> = requested_ids.into_iter().collect();
    if let Some((taken, _)) = lessons::course_ids_of(conn, &explicit)
        .op("look up lesson ids")?
        .into_iter()
        .next()
    {
        return Err(OrchestratorError::invalid(format!("lesson {} already exists", taken)));
    }

    let strategy = Strategy::from(ctx.path);
    let mut created: Vec<Lesson> = Vec::new();
    for (course_id, batch) in by_course {
        let course = load_live_course(conn, &course_id)?;
        ctx.ensure_school(&course.school_id)?;
        let teacher_ids: Vec<String> = batch
            .iter()
            .map(|v| v.teacher_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        ensure_teachers_in_school(conn, &course.school_id, &teacher_ids)?;

        let study_plan_id = match ctx.path {
            SchemaPath::Legacy => Some(ensure_study_plan(conn, &course, &ctx.now)?),
            SchemaPath::Current => None,
        };

        let mut union: Option<TimeWindow> = None;
        for v in batch {
            let group_id = match &v.external_group_id {
                Some(ext) => Some(
                    lessons::find_or_create_group(conn, &course.id, ext, &ctx.now)
                        .op("find or create lesson group")?,
                ),
                None => None,
            };
            let lesson = Lesson {
                id: v.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                course_id: course.id.clone(),
                teacher_id: v.teacher_id,
                name: v.name,
                window: v.window,
                lesson_type: v.lesson_type,
                status: v.status,
                scheduling_status: v.scheduling_status,
                control_settings: v.control_settings,
                center_id: v.center_id,
                group_id,
                topic_id: None,
                schedule_id: None,
            };
            let mut ws = LessonWriteSet::new(lesson, strategy);
            ws.insert(conn, study_plan_id.as_deref(), &ctx.now)
                .op("insert lesson")?;
            if !v.student_ids.is_empty() {
                links::upsert_members(conn, &ws.lesson.id, &v.student_ids, &ctx.now)
                    .op("upsert lesson members")?;
            }
            union = Some(match union {
                Some(u) => u.union(&ws.lesson.window),
                None => ws.lesson.window,
            });
            created.push(ws.lesson);
        }
        if let Some(window) = union {
            aggregate::recompute(conn, &course.id, Some(&WindowChange::created(window)), &ctx.now)?;
        }
    }

    if created.iter().any(|l| l.lesson_type == LessonType::Online) {
        events.push(DomainEvent::LessonCreated {
            lessons: created
                .iter()
                .map(|l| LessonRef {
                    id: l.id.clone(),
                    name: l.name.clone(),
                })
                .collect(),
        });
    }
    info!(count = created.len(), path = ctx.path.as_str(), "live lessons created");
    Ok(Outcome::LessonsCreated {
        lesson_ids: created.into_iter().map(|l| l.id).collect(),
    })
}

fn opt_trimmed(v: &Option<String>) -> Option<String> {
    v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Applies the patch to a copy of `current`, returning the copy and the names of
/// the fields whose value actually changes.
fn apply_patch(current: &Lesson, patch: &LessonPatch) -> Result<(Lesson, Vec<&'static str>)> {
    let mut next = current.clone();
    let mut changed = Vec::new();

    if let Some(t) = opt_trimmed(&patch.teacher_id) {
        if t != current.teacher_id {
            next.teacher_id = t;
            changed.push("teacherId");
        }
    }
    if let Some(n) = opt_trimmed(&patch.name) {
        if n != current.name {
            next.name = n;
            changed.push("name");
        }
    }
    let start = match opt_trimmed(&patch.start_time) {
        Some(raw) => crate::model::parse_ts(&raw).map_err(OrchestratorError::InvalidArgument)?,
        None => current.window.start,
    };
    let end = match opt_trimmed(&patch.end_time) {
        Some(raw) => crate::model::parse_ts(&raw).map_err(OrchestratorError::InvalidArgument)?,
        None => current.window.end,
    };
    let window = TimeWindow::new(start, end).map_err(OrchestratorError::InvalidArgument)?;
    if window.start != current.window.start {
        changed.push("startTime");
    }
    if window.end != current.window.end {
        changed.push("endTime");
    }
    next.window = window;

    if let Some(raw) = opt_trimmed(&patch.lesson_type) {
        let v = LessonType::parse(&raw).map_err(OrchestratorError::InvalidArgument)?;
        if v != current.lesson_type {
            next.lesson_type = v;
            changed.push("lessonType");
        }
    }
    if let Some(raw) = opt_trimmed(&patch.status) {
        let v = LessonStatus::parse(&raw).map_err(OrchestratorError::InvalidArgument)?;
        if v != current.status {
            next.status = v;
            changed.push("status");
        }
    }
    if let Some(raw) = opt_trimmed(&patch.scheduling_status) {
        let v = SchedulingStatus::parse(&raw).map_err(OrchestratorError::InvalidArgument)?;
        if v != current.scheduling_status {
            next.scheduling_status = v;
            changed.push("schedulingStatus");
        }
    }
    if let Some(cs) = patch.control_settings.as_ref().filter(|v| !v.is_null()) {
        if Some(cs) != current.control_settings.as_ref() {
            next.control_settings = Some(cs.clone());
            changed.push("controlSettings");
        }
    }
    if let Some(c) = opt_trimmed(&patch.center_id) {
        if Some(&c) != current.center_id.as_ref() {
            next.center_id = Some(c);
            changed.push("centerId");
        }
    }
    Ok((next, changed))
}

fn load_triple(conn: &Connection, lesson: &Lesson) -> Result<Option<(Topic, ScheduleWeekly)>> {
    let (Some(topic_id), Some(schedule_id)) = (&lesson.topic_id, &lesson.schedule_id) else {
        return Ok(None);
    };
    let topic = legacy::find_topic(conn, topic_id)
        .op("load topic")?
        .ok_or_else(|| OrchestratorError::not_found("cannot find topic"))?;
    let schedule = legacy::find_schedule(conn, schedule_id)
        .op("load schedule")?
        .ok_or_else(|| OrchestratorError::not_found("cannot find schedule"))?;
    Ok(Some((topic, schedule)))
}

pub(super) fn update(conn: &Connection, ctx: &MutationContext<'_>, patch: LessonPatch) -> Result<Outcome> {
    let lesson_id = patch.lesson_id.trim().to_string();
    if lesson_id.is_empty() {
        return Err(OrchestratorError::invalid("missing lesson id"));
    }
    let current = lessons::find(conn, &lesson_id)
        .op("load lesson")?
        .ok_or_else(|| OrchestratorError::not_found("cannot find lesson"))?;
    let course = load_live_course(conn, &current.course_id)?;
    ctx.ensure_school(&course.school_id)?;
    // A stored triple is kept in step whichever schema the call is routed to.
    let triple = load_triple(conn, &current)?;

    let (next, changed) = apply_patch(&current, &patch)?;
    let legacy_out_of_sync = match (&triple, ctx.path) {
        (Some((topic, schedule)), _) => topic.name != next.name || schedule.window != next.window,
        (None, SchemaPath::Legacy) => true,
        (None, SchemaPath::Current) => false,
    };
    if changed.is_empty() && !legacy_out_of_sync {
        return Ok(Outcome::LessonUpdated {
            lesson_id,
            changed_fields: changed,
            notifications_invalidated: 0,
        });
    }
    if changed.contains(&"teacherId") {
        ensure_teachers_in_school(conn, &course.school_id, std::slice::from_ref(&next.teacher_id))?;
    }

    let study_plan_id = match (ctx.path, &triple) {
        (SchemaPath::Legacy, None) => Some(ensure_study_plan(conn, &course, &ctx.now)?),
        _ => None,
    };
    let mut ws = LessonWriteSet::new(next, Strategy::from(ctx.path));
    ws.update(
        conn,
        triple.as_ref().map(|(t, s)| (t, s)),
        study_plan_id.as_deref(),
        &ctx.now,
    )
    .op("update lesson")?;

    let mut notifications_invalidated = 0;
    if ws.lesson.window.start != current.window.start && ws.lesson.window.start > ctx.now {
        notifications_invalidated = lessons::invalidate_sent_notifications(conn, &lesson_id, &ctx.now)
            .op("invalidate sent notifications")?;
    }
    if ws.lesson.window != current.window {
        aggregate::recompute(
            conn,
            &course.id,
            Some(&WindowChange::moved(current.window, ws.lesson.window)),
            &ctx.now,
        )?;
    }
    info!(lesson_id = %lesson_id, fields = ?changed, "live lesson updated");
    Ok(Outcome::LessonUpdated {
        lesson_id,
        changed_fields: changed,
        notifications_invalidated,
    })
}

pub(super) fn delete(
    conn: &Connection,
    ctx: &MutationContext<'_>,
    lesson_ids: Vec<String>,
) -> Result<Outcome> {
    let ids = clean_ids(&lesson_ids);
    if ids.is_empty() {
        return Err(OrchestratorError::invalid("missing lesson ids"));
    }
    let found = lessons::find_many(conn, &ids).op("load lessons")?;
    let found_ids: HashSet<&str> = found.iter().map(|l| l.id.as_str()).collect();
    if let Some(missing) = ids.iter().find(|id| !found_ids.contains(id.as_str())) {
        return Err(OrchestratorError::not_found(format!("cannot find lesson {}", missing)));
    }
    let mut course_ids = BTreeSet::new();
    for l in &found {
        if course_ids.insert(l.course_id.clone()) {
            let school = access::school_of_course(conn, &l.course_id)
                .op("resolve course school")?
                .ok_or_else(|| OrchestratorError::not_found("cannot find course"))?;
            ctx.ensure_school(&school)?;
        }
    }

    legacy::soft_delete_for_lessons(conn, &ids, &ctx.now).op("delete lesson schedules")?;
    links::soft_delete_members_for_lessons(conn, &ids, &ctx.now).op("delete lesson members")?;
    lessons::soft_delete_many(conn, &ids, &ctx.now).op("delete lessons")?;

    for course_id in &course_ids {
        aggregate::recompute(conn, course_id, None, &ctx.now)?;
    }
    info!(count = ids.len(), courses = course_ids.len(), "live lessons deleted");
    Ok(Outcome::LessonsDeleted {
        lesson_ids: ids,
        courses_recomputed: course_ids.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::super::testkit::Fixture;
    use super::super::Plan;
    use super::*;
    use crate::model::{fmt_ts, now};

    fn input(course: &str, teacher: &str, start: &str, end: &str) -> LessonInput {
        LessonInput {
            course_id: course.into(),
            teacher_id: teacher.into(),
            name: "Lesson".into(),
            start_time: start.into(),
            end_time: end.into(),
            ..Default::default()
        }
    }

    fn created_ids(outcome: &Outcome) -> Vec<String> {
        match outcome {
            Outcome::LessonsCreated { lesson_ids } => lesson_ids.clone(),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn window_of(fx: &Fixture, course: &str) -> Option<(String, String)> {
        fx.course(course)
            .window
            .map(|w| (fmt_ts(&w.start), fmt_ts(&w.end)))
    }

    #[test]
    fn create_then_widen_course_window_on_both_paths() {
        for path in [SchemaPath::Legacy, SchemaPath::Current] {
            let mut fx = Fixture::new();
            fx.add_course("c1", "s1");
            let report = fx
                .run(
                    path,
                    Plan::CreateLiveLessons(vec![input(
                        "c1",
                        "t1",
                        "2024-01-10T00:00:00Z",
                        "2024-01-10T02:00:00Z",
                    )]),
                )
                .expect("create");
            let id = created_ids(&report.outcome).remove(0);
            assert_eq!(
                window_of(&fx, "c1"),
                Some(("2024-01-10T00:00:00Z".into(), "2024-01-10T02:00:00Z".into()))
            );

            fx.run(
                path,
                Plan::UpdateLiveLesson(LessonPatch {
                    lesson_id: id.clone(),
                    end_time: Some("2024-01-15T00:00:00Z".into()),
                    ..Default::default()
                }),
            )
            .expect("update");
            assert_eq!(
                window_of(&fx, "c1"),
                Some(("2024-01-10T00:00:00Z".into(), "2024-01-15T00:00:00Z".into()))
            );
            let lesson = lessons::find(&fx.conn, &id).expect("query").expect("lesson");
            assert_eq!(fmt_ts(&lesson.window.end), "2024-01-15T00:00:00Z");
            assert_eq!(lesson.has_legacy_triple(), path == SchemaPath::Legacy);
        }
    }

    #[test]
    fn shrinking_and_deleting_lessons_tracks_bounds() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let report = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![
                    input("c1", "t1", "2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z"),
                    input("c1", "t1", "2024-01-20T00:00:00Z", "2024-01-20T02:00:00Z"),
                ]),
            )
            .expect("create");
        let ids = created_ids(&report.outcome);
        assert_eq!(
            window_of(&fx, "c1"),
            Some(("2024-01-10T00:00:00Z".into(), "2024-01-20T02:00:00Z".into()))
        );

        // Pull the later lesson inward: the end bound must follow it.
        let later = ids
            .iter()
            .find(|id| {
                lessons::find(&fx.conn, id)
                    .expect("query")
                    .map(|l| fmt_ts(&l.window.start) == "2024-01-20T00:00:00Z")
                    .unwrap_or(false)
            })
            .cloned()
            .expect("later lesson");
        fx.run(
            SchemaPath::Current,
            Plan::UpdateLiveLesson(LessonPatch {
                lesson_id: later.clone(),
                start_time: Some("2024-01-12T00:00:00Z".into()),
                end_time: Some("2024-01-12T01:00:00Z".into()),
                ..Default::default()
            }),
        )
        .expect("update");
        assert_eq!(
            window_of(&fx, "c1"),
            Some(("2024-01-10T00:00:00Z".into(), "2024-01-12T01:00:00Z".into()))
        );

        fx.run(
            SchemaPath::Current,
            Plan::DeleteLiveLessons {
                lesson_ids: vec![later],
            },
        )
        .expect("delete one");
        assert_eq!(
            window_of(&fx, "c1"),
            Some(("2024-01-10T00:00:00Z".into(), "2024-01-10T02:00:00Z".into()))
        );

        fx.run(
            SchemaPath::Current,
            Plan::DeleteLiveLessons { lesson_ids: ids },
        )
        .expect_err("already deleted lesson is not found");
        let remaining = lessons::ids_by_course(&fx.conn, "c1").expect("ids");
        fx.run(
            SchemaPath::Current,
            Plan::DeleteLiveLessons {
                lesson_ids: remaining,
            },
        )
        .expect("delete rest");
        assert_eq!(window_of(&fx, "c1"), None);
    }

    #[test]
    fn failed_publish_on_legacy_path_rolls_back_everything() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        fx.bus.set_failing(true);
        let err = fx
            .run(
                SchemaPath::Legacy,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect_err("publish fails");
        assert!(matches!(err, OrchestratorError::PublishFailed { committed: false, .. }));
        for table in ["lessons", "topics", "schedules_weekly", "study_plans"] {
            let n: i64 = fx
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
                .expect("count");
            assert_eq!(n, 0, "{} must be empty after rollback", table);
        }
        assert_eq!(window_of(&fx, "c1"), None);
        assert!(fx.course("c1").study_plan_id.is_none());
    }

    #[test]
    fn failed_publish_on_current_path_keeps_data_and_outbox_row() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        fx.bus.set_failing(true);
        let err = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect_err("publish fails");
        assert!(matches!(err, OrchestratorError::PublishFailed { committed: true, .. }));
        assert_eq!(lessons::ids_by_course(&fx.conn, "c1").expect("ids").len(), 1);
        assert_eq!(crate::store::outbox::pending_count(&fx.conn).expect("count"), 1);
    }

    #[test]
    fn offline_only_batch_publishes_nothing() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let mut lesson = input("c1", "t1", "2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z");
        lesson.lesson_type = Some("offline".into());
        let report = fx
            .run(SchemaPath::Legacy, Plan::CreateLiveLessons(vec![lesson]))
            .expect("create");
        assert_eq!(report.events, 0);
        assert!(fx.bus.records().is_empty());
    }

    #[test]
    fn teacher_outside_school_is_named_in_error() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let err = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![
                    input("c1", "t1", "2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z"),
                    input("c1", "t2", "2024-01-11T00:00:00Z", "2024-01-11T02:00:00Z"),
                ]),
            )
            .expect_err("t2 is not in s1");
        match err {
            OrchestratorError::InvalidArgument(msg) => {
                assert!(msg.contains("t2"));
                assert!(!msg.contains("t1,"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(lessons::ids_by_course(&fx.conn, "c1").expect("ids").is_empty());
    }

    #[test]
    fn unchanged_patch_writes_nothing() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let report = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect("create");
        let id = created_ids(&report.outcome).remove(0);
        let before: String = fx
            .conn
            .query_row("SELECT updated_at FROM lessons WHERE id = ?", [&id], |r| r.get(0))
            .expect("ts");
        let report = fx
            .run(
                SchemaPath::Current,
                Plan::UpdateLiveLesson(LessonPatch {
                    lesson_id: id.clone(),
                    name: Some("Lesson".into()),
                    start_time: Some("2024-01-10T00:00:00Z".into()),
                    ..Default::default()
                }),
            )
            .expect("update");
        match report.outcome {
            Outcome::LessonUpdated { changed_fields, .. } => assert!(changed_fields.is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        let after: String = fx
            .conn
            .query_row("SELECT updated_at FROM lessons WHERE id = ?", [&id], |r| r.get(0))
            .expect("ts");
        assert_eq!(before, after);
    }

    #[test]
    fn sub_second_times_are_invalid_arguments() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let err = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00.250Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect_err("fractional start");
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));

        let report = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect("create");
        let id = created_ids(&report.outcome).remove(0);
        let err = fx
            .run(
                SchemaPath::Current,
                Plan::UpdateLiveLesson(LessonPatch {
                    lesson_id: id,
                    end_time: Some("2024-01-10T02:00:00.500Z".into()),
                    ..Default::default()
                }),
            )
            .expect_err("fractional end");
        assert!(matches!(err, OrchestratorError::InvalidArgument(_)));
        assert_eq!(
            window_of(&fx, "c1"),
            Some(("2024-01-10T00:00:00Z".into(), "2024-01-10T02:00:00Z".into()))
        );
    }

    #[test]
    fn moving_start_into_future_invalidates_sent_notifications() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let report = fx
            .run(
                SchemaPath::Legacy,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect("create");
        let id = created_ids(&report.outcome).remove(0);
        lessons::record_sent_notification(&fx.conn, &id, &now()).expect("notification");

        let future = now() + chrono::Duration::days(30);
        let report = fx
            .run(
                SchemaPath::Legacy,
                Plan::UpdateLiveLesson(LessonPatch {
                    lesson_id: id.clone(),
                    start_time: Some(fmt_ts(&future)),
                    end_time: Some(fmt_ts(&(future + chrono::Duration::hours(1)))),
                    ..Default::default()
                }),
            )
            .expect("update");
        match report.outcome {
            Outcome::LessonUpdated {
                notifications_invalidated,
                ..
            } => assert_eq!(notifications_invalidated, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn cancelled_call_leaves_no_rows() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        fx.cancel.cancel();
        let err = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect_err("cancelled");
        assert!(matches!(err, OrchestratorError::Cancelled));
        assert!(lessons::ids_by_course(&fx.conn, "c1").expect("ids").is_empty());
    }

    #[test]
    fn legacy_update_of_flattened_lesson_builds_triple() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let report = fx
            .run(
                SchemaPath::Current,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect("create");
        let id = created_ids(&report.outcome).remove(0);
        fx.run(
            SchemaPath::Legacy,
            Plan::UpdateLiveLesson(LessonPatch {
                lesson_id: id.clone(),
                name: Some("Renamed".into()),
                ..Default::default()
            }),
        )
        .expect("update");
        let lesson = lessons::find(&fx.conn, &id).expect("query").expect("lesson");
        assert!(lesson.has_legacy_triple());
        assert_eq!(lesson.name, "Renamed");
        let raw_name: Option<String> = fx
            .conn
            .query_row("SELECT name FROM lessons WHERE id = ?", [&id], |r| r.get(0))
            .expect("raw");
        assert_eq!(raw_name, None);
    }

    fn live_triple_rows(fx: &Fixture) -> (i64, i64) {
        let count = |table: &str| -> i64 {
            fx.conn
                .query_row(
                    &format!("SELECT COUNT(*) FROM {} WHERE deleted_at IS NULL", table),
                    [],
                    |r| r.get(0),
                )
                .expect("count")
        };
        (count("topics"), count("schedules_weekly"))
    }

    #[test]
    fn current_delete_of_legacy_lesson_retires_its_triple() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let report = fx
            .run(
                SchemaPath::Legacy,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect("create");
        let id = created_ids(&report.outcome).remove(0);
        assert_eq!(live_triple_rows(&fx), (1, 1));

        fx.run(SchemaPath::Current, Plan::DeleteLiveLessons { lesson_ids: vec![id] })
            .expect("delete");
        assert_eq!(live_triple_rows(&fx), (0, 0));
    }

    #[test]
    fn current_update_of_legacy_lesson_keeps_triple_in_step() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let report = fx
            .run(
                SchemaPath::Legacy,
                Plan::CreateLiveLessons(vec![input(
                    "c1",
                    "t1",
                    "2024-01-10T00:00:00Z",
                    "2024-01-10T02:00:00Z",
                )]),
            )
            .expect("create");
        let id = created_ids(&report.outcome).remove(0);
        fx.run(
            SchemaPath::Current,
            Plan::UpdateLiveLesson(LessonPatch {
                lesson_id: id.clone(),
                name: Some("Moved".into()),
                end_time: Some("2024-01-12T00:00:00Z".into()),
                ..Default::default()
            }),
        )
        .expect("update");

        let lesson = lessons::find(&fx.conn, &id).expect("query").expect("lesson");
        let (topic_id, schedule_id) = (
            lesson.topic_id.clone().expect("topic"),
            lesson.schedule_id.clone().expect("schedule"),
        );
        let topic = legacy::find_topic(&fx.conn, &topic_id).expect("query").expect("topic");
        let schedule = legacy::find_schedule(&fx.conn, &schedule_id)
            .expect("query")
            .expect("schedule");
        assert_eq!(topic.name, "Moved");
        assert_eq!(fmt_ts(&schedule.window.end), "2024-01-12T00:00:00Z");
        assert_eq!(schedule.window, lesson.window);
    }

    #[test]
    fn course_delete_on_current_path_retires_legacy_rows() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        fx.run(
            SchemaPath::Legacy,
            Plan::CreateLiveLessons(vec![input(
                "c1",
                "t1",
                "2024-01-10T00:00:00Z",
                "2024-01-10T02:00:00Z",
            )]),
        )
        .expect("create");
        fx.run(SchemaPath::Current, Plan::DeleteLiveCourse { course_id: "c1".into() })
            .expect("delete");
        assert_eq!(live_triple_rows(&fx), (0, 0));
    }

    #[test]
    fn group_and_members_are_not_duplicated() {
        let mut fx = Fixture::new();
        fx.add_course("c1", "s1");
        let mut a = input("c1", "t1", "2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z");
        a.external_group_id = Some("series-1".into());
        a.student_ids = vec!["st1".into(), "st1".into(), "st2".into()];
        let mut b = a.clone();
        b.student_ids = vec![];
        let report = fx
            .run(SchemaPath::Current, Plan::CreateLiveLessons(vec![a, b]))
            .expect("create");
        let ids = created_ids(&report.outcome);
        let groups: i64 = fx
            .conn
            .query_row("SELECT COUNT(*) FROM lesson_groups", [], |r| r.get(0))
            .expect("count");
        assert_eq!(groups, 1);
        let members = links::student_ids_of_lesson(&fx.conn, &ids[0]).expect("members");
        assert_eq!(members, vec!["st1".to_string(), "st2".to_string()]);
    }
}
