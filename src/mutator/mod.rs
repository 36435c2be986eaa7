//! All-or-nothing writes across course, topic, schedule, lesson and link rows.
//!
//! Every plan runs inside one immediate transaction. Any failing step rolls the
//! whole plan back. Events produced by a plan follow the schema path: the legacy
//! path hands them to the bus before commit, the current path stages them in the
//! outbox and drains it after commit.

mod course;
mod input;
mod lessons;
mod writeset;

pub(crate) use input::clean_ids;
pub use input::{CourseInput, LessonInput, LessonPatch};

use crate::abac::AccessScope;
use crate::cancel::CancelToken;
use crate::error::{OpContext, OrchestratorError, Result};
use crate::events::{DomainEvent, EventPublisher};
use crate::flags::SchemaPath;
use crate::model::Timestamp;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use tracing::info;

const OUTBOX_DRAIN_LIMIT: usize = 256;

pub enum Plan {
    UpsertCourse(CourseInput),
    DeleteLiveCourse { course_id: String },
    CreateLiveLessons(Vec<LessonInput>),
    UpdateLiveLesson(LessonPatch),
    DeleteLiveLessons { lesson_ids: Vec<String> },
}

impl Plan {
    fn op_name(&self) -> &'static str {
        match self {
            Plan::UpsertCourse(_) => "upsert course",
            Plan::DeleteLiveCourse { .. } => "delete live course",
            Plan::CreateLiveLessons(_) => "create live lessons",
            Plan::UpdateLiveLesson(_) => "update live lesson",
            Plan::DeleteLiveLessons { .. } => "delete live lessons",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Outcome {
    #[serde(rename_all = "camelCase")]
    CourseUpserted {
        course_id: String,
        created: bool,
        class_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    CourseDeleted {
        course_id: String,
        lessons_deleted: usize,
        class_links_removed: usize,
    },
    #[serde(rename_all = "camelCase")]
    LessonsCreated { lesson_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    LessonUpdated {
        lesson_id: String,
        changed_fields: Vec<&'static str>,
        notifications_invalidated: usize,
    },
    #[serde(rename_all = "camelCase")]
    LessonsDeleted {
        lesson_ids: Vec<String>,
        courses_recomputed: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationReport {
    pub outcome: Outcome,
    pub schema_path: &'static str,
    pub events: usize,
}

pub struct MutationContext<'a> {
    pub path: SchemaPath,
    pub scope: &'a AccessScope,
    pub publisher: &'a EventPublisher,
    pub cancel: &'a CancelToken,
    pub now: Timestamp,
}

impl MutationContext<'_> {
    fn ensure_school(&self, school_id: &str) -> Result<()> {
        if self.scope.permits_school(school_id) {
            Ok(())
        } else {
            Err(OrchestratorError::denied(
                "permission denied: resource belongs to another school",
            ))
        }
    }
}

/// Runs `f` in one transaction; commits only when it succeeds and the call has not
/// been cancelled, rolls back otherwise.
pub(crate) fn in_transaction<T>(
    conn: &mut Connection,
    op: &'static str,
    cancel: &CancelToken,
    f: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    cancel.check()?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .op(op)?;
    let value = match f(&tx) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return Err(e);
        }
    };
    if cancel.is_cancelled() {
        let _ = tx.rollback();
        return Err(OrchestratorError::Cancelled);
    }
    tx.commit().op(op)?;
    Ok(value)
}

pub fn mutate(conn: &mut Connection, ctx: &MutationContext<'_>, plan: Plan) -> Result<MutationReport> {
    let op = plan.op_name();
    let (outcome, events) = in_transaction(conn, op, ctx.cancel, |tx| {
        let mut events: Vec<DomainEvent> = Vec::new();
        let outcome = match plan {
            Plan::UpsertCourse(input) => course::upsert(tx, ctx, input)?,
            Plan::DeleteLiveCourse { course_id } => course::delete(tx, ctx, &course_id)?,
            Plan::CreateLiveLessons(inputs) => lessons::create(tx, ctx, inputs, &mut events)?,
            Plan::UpdateLiveLesson(patch) => lessons::update(tx, ctx, patch)?,
            Plan::DeleteLiveLessons { lesson_ids } => lessons::delete(tx, ctx, lesson_ids)?,
        };
        ctx.cancel.check()?;
        for ev in &events {
            match ctx.path {
                SchemaPath::Legacy => {
                    ctx.publisher.publish(ev)?;
                }
                SchemaPath::Current => {
                    ctx.publisher.stage(tx, ev, &ctx.now)?;
                }
            }
        }
        Ok((outcome, events.len()))
    })?;

    info!(op, path = ctx.path.as_str(), events, "mutation committed");
    if ctx.path == SchemaPath::Current && events > 0 {
        ctx.publisher.drain_outbox(conn, OUTBOX_DRAIN_LIMIT, &ctx.now)?;
    }
    Ok(MutationReport {
        outcome,
        schema_path: ctx.path.as_str(),
        events,
    })
}
