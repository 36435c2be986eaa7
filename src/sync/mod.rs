//! Projects an at-least-once change feed into the workspace.
//!
//! Items are independent: a failing item is recorded against its natural key and
//! the rest of the batch still runs. Lesson creates are grouped per course and
//! each group is written in one transaction; updates, deletes and membership
//! reconciliations each get their own.

mod membership;

pub use membership::{reconcile_student_lessons, MembershipChange};

use crate::abac::AccessScope;
use crate::cancel::CancelToken;
use crate::error::{ItemFailure, OpContext, OrchestratorError, Result};
use crate::events::{ActionKind, EventPublisher};
use crate::flags::SchemaPath;
use crate::model::Timestamp;
use crate::mutator::{self, LessonInput, LessonPatch, MutationContext, Plan};
use crate::store::{courses, ledger, lessons};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Lesson,
    StudentLessons,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Lesson => "lesson",
            EntityKind::StudentLessons => "student_lessons",
        }
    }
}

/// One record of the inbound change feed. For `lesson` the natural key is the
/// lesson id and the payload a full lesson; for `student_lessons` the key is the
/// student id and the payload `{lessonIds}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEnvelope {
    pub action: ActionKind,
    pub natural_key: String,
    #[serde(default)]
    pub entity: EntityKind,
    #[serde(default)]
    pub payload: Value,
}

impl ChangeEnvelope {
    /// Stable digest of the envelope content, used to skip replays.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.entity.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.action.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(self.natural_key.trim().as_bytes());
        hasher.update([0u8]);
        // serde_json maps are ordered, so equal payloads serialize identically.
        hasher.update(self.payload.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub applied: Vec<String>,
    /// Keys whose identical envelope was already applied earlier.
    pub skipped: Vec<String>,
    pub failures: Vec<ItemFailure>,
}

impl IngestReport {
    fn fail(&mut self, key: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(natural_key = key, reason = %reason, "sync item failed");
        self.failures.push(ItemFailure {
            natural_key: key.to_string(),
            reason,
        });
    }

    /// The aggregated error for this batch, if any item failed.
    pub fn error(&self) -> Option<OrchestratorError> {
        (!self.failures.is_empty()).then(|| OrchestratorError::PartialBatch(self.failures.clone()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentLessonsPayload {
    #[serde(default)]
    lesson_ids: Vec<String>,
}

struct PendingItem {
    key: String,
    fingerprint: String,
    action: ActionKind,
}

pub struct SyncContext<'a> {
    pub path: SchemaPath,
    pub publisher: &'a EventPublisher,
    pub cancel: &'a CancelToken,
    pub now: Timestamp,
}

impl SyncContext<'_> {
    fn run(&self, conn: &mut Connection, plan: Plan) -> Result<mutator::MutationReport> {
        let scope = AccessScope::Unrestricted;
        let ctx = MutationContext {
            path: self.path,
            scope: &scope,
            publisher: self.publisher,
            cancel: self.cancel,
            now: self.now,
        };
        mutator::mutate(conn, &ctx, plan)
    }
}

fn mark_applied(conn: &Connection, item: &PendingItem, now: &Timestamp) -> Result<()> {
    ledger::record_applied(conn, &item.fingerprint, &item.key, item.action.as_str(), now)
        .op("record applied envelope")
}

/// Checks a create candidate against the same rules the create path enforces, so
/// one bad item does not sink the rest of its course group.
fn precheck_create(conn: &Connection, input: &LessonInput) -> std::result::Result<(), String> {
    let course = courses::find(conn, input.course_id.trim())
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "cannot find course".to_string())?;
    let teacher = input.teacher_id.trim().to_string();
    let members = crate::store::access::teachers_in_school(
        conn,
        &course.school_id,
        std::slice::from_ref(&teacher),
    )
    .map_err(|e| e.to_string())?;
    if !members.contains(&teacher) {
        return Err(format!(
            "teacher(s) {} do not belong to school {}",
            teacher, course.school_id
        ));
    }
    Ok(())
}

pub fn ingest(
    conn: &mut Connection,
    ctx: &SyncContext<'_>,
    envelopes: Vec<ChangeEnvelope>,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut creates: BTreeMap<String, Vec<(PendingItem, LessonInput)>> = BTreeMap::new();
    let mut deletes: Vec<PendingItem> = Vec::new();

    for env in envelopes {
        ctx.cancel.check()?;
        let key = env.natural_key.trim().to_string();
        if key.is_empty() {
            report.fail("", "missing natural key");
            continue;
        }
        if !seen.insert(format!("{}:{}", env.entity.as_str(), key)) {
            report.fail(&key, "duplicate natural key in batch");
            continue;
        }
        let item = PendingItem {
            key: key.clone(),
            fingerprint: env.fingerprint(),
            action: env.action,
        };
        if ledger::is_applied(conn, &item.fingerprint).op("check ledger")? {
            report.skipped.push(key);
            continue;
        }

        match (env.entity, env.action) {
            (EntityKind::Lesson, ActionKind::Upserted) => {
                let mut input: LessonInput = match serde_json::from_value(env.payload) {
                    Ok(v) => v,
                    Err(e) => {
                        report.fail(&key, format!("malformed lesson payload: {}", e));
                        continue;
                    }
                };
                input.id = Some(key.clone());
                if let Err(e) = input.validate() {
                    report.fail(&key, e.to_string());
                    continue;
                }
                let owner: HashMap<String, String> = lessons::course_ids_of(conn, &[key.clone()])
                    .op("look up lesson")?
                    .into_iter()
                    .collect();
                match owner.get(&key) {
                    None => {
                        if let Err(reason) = precheck_create(conn, &input) {
                            report.fail(&key, reason);
                            continue;
                        }
                        creates
                            .entry(input.course_id.trim().to_string())
                            .or_default()
                            .push((item, input));
                    }
                    Some(course_id) if course_id != input.course_id.trim() => {
                        report.fail(&key, "lesson cannot move to another course");
                    }
                    Some(_) => {
                        if !lessons::existing_ids(conn, &[key.clone()])
                            .op("look up lesson")?
                            .contains(&key)
                        {
                            report.fail(&key, "lesson was deleted");
                            continue;
                        }
                        let patch = LessonPatch::from_input(&key, &input);
                        match ctx.run(conn, Plan::UpdateLiveLesson(patch)) {
                            Ok(_) => {
                                mark_applied(conn, &item, &ctx.now)?;
                                report.applied.push(key);
                            }
                            Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                            Err(e) => report.fail(&key, e.to_string()),
                        }
                    }
                }
            }
            (EntityKind::Lesson, ActionKind::Deleted) => {
                if lessons::existing_ids(conn, &[key.clone()])
                    .op("look up lesson")?
                    .contains(&key)
                {
                    deletes.push(item);
                } else if lessons::course_ids_of(conn, &[key.clone()])
                    .op("look up lesson")?
                    .is_empty()
                {
                    report.fail(&key, "cannot find lesson");
                } else {
                    // Already deleted: a replayed delete converges.
                    mark_applied(conn, &item, &ctx.now)?;
                    report.applied.push(key);
                }
            }
            (EntityKind::StudentLessons, action) => {
                let desired = match action {
                    ActionKind::Deleted => Vec::new(),
                    ActionKind::Upserted => {
                        match serde_json::from_value::<StudentLessonsPayload>(env.payload) {
                            Ok(p) => p.lesson_ids,
                            Err(e) => {
                                report.fail(&key, format!("malformed membership payload: {}", e));
                                continue;
                            }
                        }
                    }
                };
                match reconcile_student_lessons(conn, ctx, &key, &desired) {
                    Ok(change) if change.rejected.is_empty() => {
                        mark_applied(conn, &item, &ctx.now)?;
                        report.applied.push(key);
                    }
                    Ok(change) => {
                        report.fail(
                            &key,
                            format!("cannot find lesson(s) {}", change.rejected.join(", ")),
                        );
                    }
                    Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
                    Err(e) => report.fail(&key, e.to_string()),
                }
            }
        }
    }

    for (course_id, batch) in creates {
        ctx.cancel.check()?;
        let (items, inputs): (Vec<PendingItem>, Vec<LessonInput>) = batch.into_iter().unzip();
        match ctx.run(conn, Plan::CreateLiveLessons(inputs)) {
            Ok(_) => {
                for item in items {
                    mark_applied(conn, &item, &ctx.now)?;
                    report.applied.push(item.key);
                }
            }
            // Rows are durable; only the notification is late.
            Err(OrchestratorError::PublishFailed {
                committed: true,
                reason,
            }) => {
                warn!(course_id = %course_id, reason = %reason, "lessons created, publish pending");
                for item in items {
                    mark_applied(conn, &item, &ctx.now)?;
                    report.applied.push(item.key);
                }
            }
            Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(e) => {
                let reason = e.to_string();
                for item in items {
                    report.fail(&item.key, reason.clone());
                }
            }
        }
    }

    if !deletes.is_empty() {
        ctx.cancel.check()?;
        let ids = deletes.iter().map(|i| i.key.clone()).collect();
        match ctx.run(conn, Plan::DeleteLiveLessons { lesson_ids: ids }) {
            Ok(_) => {
                for item in deletes {
                    mark_applied(conn, &item, &ctx.now)?;
                    report.applied.push(item.key);
                }
            }
            Err(OrchestratorError::Cancelled) => return Err(OrchestratorError::Cancelled),
            Err(e) => {
                let reason = e.to_string();
                for item in deletes {
                    report.fail(&item.key, reason.clone());
                }
            }
        }
    }

    info!(
        applied = report.applied.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        path = ctx.path.as_str(),
        "sync batch ingested"
    );
    Ok(report)
}
