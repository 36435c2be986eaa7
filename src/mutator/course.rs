use super::input::CourseInput;
use super::lessons::{ensure_study_plan, ensure_teachers_in_school, load_live_course};
use super::{MutationContext, Outcome};
use crate::error::{OpContext, OrchestratorError, Result};
use crate::flags::SchemaPath;
use crate::model::{Course, CourseType};
use crate::store::{access, courses, legacy, lessons, links};
use rusqlite::Connection;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

/// Every requested class must exist and belong to the course's school.
fn check_classes(conn: &Connection, school_id: &str, class_ids: &[String]) -> Result<()> {
    let owners = access::class_schools(conn, class_ids).op("resolve class schools")?;
    for class_id in class_ids {
        match owners.get(class_id) {
            None => {
                return Err(OrchestratorError::not_found(format!(
                    "cannot find class {}",
                    class_id
                )))
            }
            Some(owner) if owner != school_id => {
                return Err(OrchestratorError::invalid(format!(
                    "class {} belongs to another school",
                    class_id
                )))
            }
            Some(_) => {}
        }
    }
    Ok(())
}

pub(super) fn upsert(conn: &Connection, ctx: &MutationContext<'_>, input: CourseInput) -> Result<Outcome> {
    let v = input.validate()?;
    let existing = match &v.id {
        Some(id) => courses::find_any(conn, id).op("load course")?,
        None => None,
    };
    if let Some(c) = &existing {
        if c.deleted {
            return Err(OrchestratorError::not_found("cannot find course"));
        }
        if c.school_id != v.school_id {
            return Err(OrchestratorError::invalid("course cannot move to another school"));
        }
    }
    ctx.ensure_school(&v.school_id)?;
    if !access::school_exists(conn, &v.school_id).op("check school")? {
        return Err(OrchestratorError::not_found("cannot find school"));
    }
    check_classes(conn, &v.school_id, &v.class_ids)?;
    ensure_teachers_in_school(conn, &v.school_id, &v.teacher_ids)?;

    let created = existing.is_none();
    let course = Course {
        id: v.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        school_id: v.school_id,
        name: v.name,
        subject: v.subject,
        grade: v.grade,
        country: v.country,
        course_type: v.course_type,
        window: existing.as_ref().and_then(|c| c.window),
        study_plan_id: existing.as_ref().and_then(|c| c.study_plan_id.clone()),
        teacher_ids: v.teacher_ids,
        deleted: false,
    };
    courses::upsert(conn, &course, &ctx.now).op("upsert course")?;
    if ctx.path == SchemaPath::Legacy && course.course_type == CourseType::Live {
        ensure_study_plan(conn, &course, &ctx.now)?;
    }

    let wanted: BTreeSet<String> = v.class_ids.iter().cloned().collect();
    let current: BTreeSet<String> = links::active_class_ids(conn, &course.id)
        .op("load class links")?
        .into_iter()
        .collect();
    for class_id in wanted.difference(&current) {
        links::activate_class_link(conn, &course.id, class_id, &ctx.now).op("link class")?;
    }
    let stale: Vec<String> = current.difference(&wanted).cloned().collect();
    links::deactivate_class_links(conn, &course.id, &stale, &ctx.now).op("unlink classes")?;

    info!(course_id = %course.id, created, classes = wanted.len(), "course upserted");
    Ok(Outcome::CourseUpserted {
        course_id: course.id,
        created,
        class_ids: v.class_ids,
    })
}

pub(super) fn delete(conn: &Connection, ctx: &MutationContext<'_>, course_id: &str) -> Result<Outcome> {
    let course_id = course_id.trim();
    if course_id.is_empty() {
        return Err(OrchestratorError::invalid("missing course id"));
    }
    let course = load_live_course(conn, course_id)?;
    ctx.ensure_school(&course.school_id)?;

    let lesson_ids = lessons::ids_by_course(conn, course_id).op("load course lessons")?;
    courses::soft_delete(conn, course_id, &ctx.now).op("delete course")?;
    let class_links_removed =
        links::deactivate_all_class_links(conn, course_id, &ctx.now).op("unlink classes")?;
    links::soft_delete_members_for_lessons(conn, &lesson_ids, &ctx.now)
        .op("delete lesson members")?;
    let lessons_deleted =
        lessons::soft_delete_many(conn, &lesson_ids, &ctx.now).op("delete lessons")?;
    legacy::soft_delete_by_course(conn, course_id, &ctx.now).op("delete course schedules")?;

    info!(course_id, lessons_deleted, class_links_removed, "live course deleted");
    Ok(Outcome::CourseDeleted {
        course_id: course_id.to_string(),
        lessons_deleted,
        class_links_removed,
    })
}
