use super::SyncContext;
use crate::error::{OpContext, OrchestratorError, Result};
use crate::events::{ActionKind, DomainEvent};
use crate::mutator::{clean_ids, in_transaction};
use crate::store::{lessons, links};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipChange {
    pub student_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Requested lesson ids that do not exist; everything else was applied.
    pub rejected: Vec<String>,
    pub published: usize,
}

const OUTBOX_DRAIN_LIMIT: usize = 256;

fn live_subset(conn: &Connection, ids: &[String]) -> Result<Vec<String>> {
    let live = lessons::live_ids(conn, ids).op("filter live lessons")?;
    Ok(ids.iter().filter(|id| live.contains(*id)).cloned().collect())
}

/// Makes `desired` the student's lesson set. Unknown lesson ids are rejected
/// while the valid part is still applied. Live-course changes are staged in the
/// outbox with the membership rows, then drained with acknowledgement; a failed
/// drain leaves them pending for a replay or `outbox.flush`.
pub fn reconcile_student_lessons(
    conn: &mut Connection,
    ctx: &SyncContext<'_>,
    student_id: &str,
    desired: &[String],
) -> Result<MembershipChange> {
    let student_id = student_id.trim();
    if student_id.is_empty() {
        return Err(OrchestratorError::invalid("missing student id"));
    }
    let desired: BTreeSet<String> = clean_ids(desired).into_iter().collect();

    let change = in_transaction(conn, "reconcile student lessons", ctx.cancel, |tx| {
        let current: BTreeSet<String> = links::lesson_ids_of_student(tx, student_id)
            .op("load memberships")?
            .into_iter()
            .collect();
        let to_add: Vec<String> = desired.difference(&current).cloned().collect();
        let removed: Vec<String> = current.difference(&desired).cloned().collect();

        let valid = lessons::existing_ids(tx, &to_add).op("look up lessons")?;
        let (added, rejected): (Vec<String>, Vec<String>) =
            to_add.into_iter().partition(|id| valid.contains(id));

        let student = [student_id.to_string()];
        for lesson_id in &added {
            links::upsert_members(tx, lesson_id, &student, &ctx.now).op("add membership")?;
        }
        for lesson_id in &removed {
            links::soft_delete_member(tx, lesson_id, student_id, &ctx.now)
                .op("remove membership")?;
        }

        let mut published = 0;
        for (action_kind, ids) in [
            (ActionKind::Upserted, live_subset(tx, &added)?),
            (ActionKind::Deleted, live_subset(tx, &removed)?),
        ] {
            if ids.is_empty() {
                continue;
            }
            let event = DomainEvent::StudentLessonMembershipChanged {
                student_id: student_id.to_string(),
                action_kind,
                lesson_ids: ids,
            };
            ctx.publisher.stage(tx, &event, &ctx.now)?;
            published += 1;
        }
        Ok(MembershipChange {
            student_id: student_id.to_string(),
            added,
            removed,
            rejected,
            published,
        })
    })?;

    // Also delivers rows left pending by an earlier failed attempt.
    ctx.publisher
        .drain_outbox_acked(conn, OUTBOX_DRAIN_LIMIT, &ctx.now)?;
    info!(
        student_id,
        added = change.added.len(),
        removed = change.removed.len(),
        rejected = change.rejected.len(),
        "student lessons reconciled"
    );
    Ok(change)
}
