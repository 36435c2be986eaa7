//! Keeps a course's `[start_date, end_date]` equal to the bounds of its surviving
//! lessons. Runs on the caller's transaction handle.

use crate::error::{OpContext, OrchestratorError, Result};
use crate::model::{TimeWindow, Timestamp};
use crate::store::courses;
use rusqlite::Connection;
use tracing::debug;

/// A lesson window before and after a write. `before == None` is a create,
/// `after == None` is a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowChange {
    pub before: Option<TimeWindow>,
    pub after: Option<TimeWindow>,
}

impl WindowChange {
    pub fn created(w: TimeWindow) -> Self {
        Self {
            before: None,
            after: Some(w),
        }
    }

    pub fn moved(before: TimeWindow, after: TimeWindow) -> Self {
        Self {
            before: Some(before),
            after: Some(after),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Unchanged,
    Updated(Option<TimeWindow>),
}

fn needs_recompute(stored: Option<&TimeWindow>, change: Option<&WindowChange>) -> bool {
    let (Some(stored), Some(change)) = (stored, change) else {
        // Never set, or the caller asked for an unconditional recompute.
        return true;
    };
    if change.before == change.after {
        return false;
    }
    if let Some(after) = &change.after {
        if !stored.contains(after) {
            return true;
        }
    }
    // A window leaving the boundary can shrink the aggregate.
    match &change.before {
        Some(before) => before.start == stored.start || before.end == stored.end,
        None => false,
    }
}

pub fn recompute(
    conn: &Connection,
    course_id: &str,
    change: Option<&WindowChange>,
    now: &Timestamp,
) -> Result<Outcome> {
    let course = courses::find_any(conn, course_id)
        .op("load course")?
        .ok_or_else(|| OrchestratorError::not_found("cannot find course"))?;
    if !needs_recompute(course.window.as_ref(), change) {
        debug!(course_id, "course window unaffected");
        return Ok(Outcome::Unchanged);
    }
    let bounds = courses::lesson_bounds(conn, course_id).op("query lesson bounds")?;
    if bounds == course.window {
        return Ok(Outcome::Unchanged);
    }
    courses::set_window(conn, course_id, bounds.as_ref(), now).op("update course window")?;
    debug!(course_id, ?bounds, "course window recomputed");
    Ok(Outcome::Updated(bounds))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(s: &str, e: &str) -> TimeWindow {
        TimeWindow::parse(s, e).expect("window")
    }

    #[test]
    fn unset_window_always_recomputes() {
        let change = WindowChange::created(w("2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z"));
        assert!(needs_recompute(None, Some(&change)));
        assert!(needs_recompute(None, None));
    }

    #[test]
    fn inside_window_create_is_noop() {
        let stored = w("2024-01-01T00:00:00Z", "2024-01-31T00:00:00Z");
        let change = WindowChange::created(w("2024-01-10T00:00:00Z", "2024-01-10T02:00:00Z"));
        assert!(!needs_recompute(Some(&stored), Some(&change)));
    }

    #[test]
    fn outside_or_boundary_moves_recompute() {
        let stored = w("2024-01-01T00:00:00Z", "2024-01-31T00:00:00Z");
        let widen = WindowChange::created(w("2024-01-30T00:00:00Z", "2024-02-02T00:00:00Z"));
        assert!(needs_recompute(Some(&stored), Some(&widen)));

        let shrink = WindowChange::moved(
            w("2024-01-20T00:00:00Z", "2024-01-31T00:00:00Z"),
            w("2024-01-20T00:00:00Z", "2024-01-21T00:00:00Z"),
        );
        assert!(needs_recompute(Some(&stored), Some(&shrink)));

        let interior = WindowChange::moved(
            w("2024-01-10T00:00:00Z", "2024-01-11T00:00:00Z"),
            w("2024-01-12T00:00:00Z", "2024-01-13T00:00:00Z"),
        );
        assert!(!needs_recompute(Some(&stored), Some(&interior)));
    }
}
