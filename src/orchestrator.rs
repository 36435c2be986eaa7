//! Entry points: guard the caller, pin the call to one schema, then hand the
//! plan to the mutator (or the sync ingestor).

use crate::abac::{self, CallerContext, Resource};
use crate::cancel::CancelToken;
use crate::config::OrchestratorConfig;
use crate::error::{OpContext, OrchestratorError, Result};
use crate::events::{EventPublisher, MessageBus, Topics};
use crate::flags::{CallKind, FeatureGate, FlagRouter};
use crate::model::now;
use crate::mutator::{self, clean_ids, CourseInput, LessonInput, LessonPatch, MutationContext, MutationReport, Plan};
use crate::store::{courses, outbox};
use crate::sync::{self, ChangeEnvelope, IngestReport, MembershipChange, SyncContext};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;

const OUTBOX_FLUSH_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    pub published: usize,
    pub pending: i64,
}

pub struct Orchestrator {
    router: FlagRouter,
    publisher: EventPublisher,
    max_sync_batch: usize,
}

impl Orchestrator {
    pub fn new(gate: Arc<dyn FeatureGate>, bus: Arc<dyn MessageBus>, config: &OrchestratorConfig) -> Self {
        let router = FlagRouter::new(
            gate,
            config.flag_name.clone(),
            config.environment.clone(),
            config.flag_default,
        );
        let publisher = EventPublisher::new(
            bus,
            Topics {
                lesson_created: config.topic_lesson_created.clone(),
                membership: config.topic_membership.clone(),
            },
        );
        Self {
            router,
            publisher,
            max_sync_batch: config.max_sync_batch,
        }
    }

    fn run(
        &self,
        conn: &mut Connection,
        caller: &CallerContext,
        resources: &[Resource],
        kind: CallKind,
        plan: Plan,
        cancel: &CancelToken,
    ) -> Result<MutationReport> {
        let scope = abac::authorize(conn, caller, resources)?;
        let path = self.router.route(kind)?;
        let ctx = MutationContext {
            path,
            scope: &scope,
            publisher: &self.publisher,
            cancel,
            now: now(),
        };
        mutator::mutate(conn, &ctx, plan)
    }

    pub fn upsert_course(
        &self,
        conn: &mut Connection,
        caller: &CallerContext,
        input: CourseInput,
        cancel: &CancelToken,
    ) -> Result<MutationReport> {
        let v = input.validate()?;
        let mut resources = vec![Resource::School(v.school_id.clone())];
        if let Some(id) = &v.id {
            if courses::find(conn, id).op("load course")?.is_some() {
                resources.push(Resource::Course(id.clone()));
            }
        }
        resources.extend(v.class_ids.iter().cloned().map(Resource::Class));
        self.run(conn, caller, &resources, CallKind::UpsertCourse, Plan::UpsertCourse(input), cancel)
    }

    pub fn delete_live_course(
        &self,
        conn: &mut Connection,
        caller: &CallerContext,
        course_id: &str,
        cancel: &CancelToken,
    ) -> Result<MutationReport> {
        let course_id = course_id.trim().to_string();
        if course_id.is_empty() {
            return Err(OrchestratorError::invalid("missing course id"));
        }
        self.run(
            conn,
            caller,
            &[Resource::Course(course_id.clone())],
            CallKind::DeleteLiveCourse,
            Plan::DeleteLiveCourse { course_id },
            cancel,
        )
    }

    pub fn create_live_lessons(
        &self,
        conn: &mut Connection,
        caller: &CallerContext,
        inputs: Vec<LessonInput>,
        cancel: &CancelToken,
    ) -> Result<MutationReport> {
        if inputs.is_empty() {
            return Err(OrchestratorError::invalid("no lessons to create"));
        }
        let mut course_ids = BTreeSet::new();
        for input in &inputs {
            course_ids.insert(input.validate()?.course_id);
        }
        let resources: Vec<Resource> = course_ids.into_iter().map(Resource::Course).collect();
        self.run(
            conn,
            caller,
            &resources,
            CallKind::CreateLiveLessons,
            Plan::CreateLiveLessons(inputs),
            cancel,
        )
    }

    pub fn update_live_lesson(
        &self,
        conn: &mut Connection,
        caller: &CallerContext,
        patch: LessonPatch,
        cancel: &CancelToken,
    ) -> Result<MutationReport> {
        let lesson_id = patch.lesson_id.trim().to_string();
        if lesson_id.is_empty() {
            return Err(OrchestratorError::invalid("missing lesson id"));
        }
        self.run(
            conn,
            caller,
            &[Resource::Lesson(lesson_id)],
            CallKind::UpdateLiveLesson,
            Plan::UpdateLiveLesson(patch),
            cancel,
        )
    }

    pub fn delete_live_lessons(
        &self,
        conn: &mut Connection,
        caller: &CallerContext,
        lesson_ids: Vec<String>,
        cancel: &CancelToken,
    ) -> Result<MutationReport> {
        let ids = clean_ids(&lesson_ids);
        if ids.is_empty() {
            return Err(OrchestratorError::invalid("missing lesson ids"));
        }
        let resources: Vec<Resource> = ids.iter().cloned().map(Resource::Lesson).collect();
        self.run(
            conn,
            caller,
            &resources,
            CallKind::DeleteLiveLessons,
            Plan::DeleteLiveLessons { lesson_ids: ids },
            cancel,
        )
    }

    fn sync_context<'a>(&'a self, cancel: &'a CancelToken) -> Result<SyncContext<'a>> {
        Ok(SyncContext {
            path: self.router.route(CallKind::SyncIngest)?,
            publisher: &self.publisher,
            cancel,
            now: now(),
        })
    }

    /// Runs as the feed's system identity; per-item failures come back in the
    /// report rather than as an error.
    pub fn ingest(
        &self,
        conn: &mut Connection,
        envelopes: Vec<ChangeEnvelope>,
        cancel: &CancelToken,
    ) -> Result<IngestReport> {
        if envelopes.len() > self.max_sync_batch {
            return Err(OrchestratorError::invalid(format!(
                "batch of {} exceeds maxSyncBatch {}",
                envelopes.len(),
                self.max_sync_batch
            )));
        }
        let ctx = self.sync_context(cancel)?;
        sync::ingest(conn, &ctx, envelopes)
    }

    pub fn sync_student_lessons(
        &self,
        conn: &mut Connection,
        student_id: &str,
        lesson_ids: &[String],
        cancel: &CancelToken,
    ) -> Result<MembershipChange> {
        let ctx = self.sync_context(cancel)?;
        sync::reconcile_student_lessons(conn, &ctx, student_id, lesson_ids)
    }

    /// Retries pending outbox rows written by committed current-path calls.
    pub fn flush_outbox(&self, conn: &Connection) -> Result<FlushReport> {
        let published = self.publisher.drain_outbox(conn, OUTBOX_FLUSH_LIMIT, &now())?;
        let pending = outbox::pending_count(conn).op("count outbox")?;
        Ok(FlushReport { published, pending })
    }
}
