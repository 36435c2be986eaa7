use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{caller, cancel_token, get_required_str, get_typed, no_workspace};
use crate::ipc::types::{AppState, Request};
use crate::model::now;
use crate::mutator::{LessonInput, LessonPatch};
use crate::store::{lessons, links};
use serde_json::json;

fn handle_create_live(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let inputs: Vec<LessonInput> = match get_typed(req, "lessons") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match orch.create_live_lessons(conn, &caller(req), inputs, &cancel_token(req)) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_update_live(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let patch: LessonPatch = match get_typed(req, "patch") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match orch.update_live_lesson(conn, &caller(req), patch, &cancel_token(req)) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let ids: Vec<String> = match get_typed(req, "lessonIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match orch.delete_live_lessons(conn, &caller(req), ids, &cancel_token(req)) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let lesson_id = match get_required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match lessons::find(conn, &lesson_id) {
        Ok(Some(lesson)) => ok(
            &req.id,
            json!({ "lesson": lesson, "legacyTriple": lesson.has_legacy_triple() }),
        ),
        Ok(None) => err(&req.id, "not_found", "cannot find lesson", None),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_members(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let lesson_id = match get_required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match links::student_ids_of_lesson(conn, &lesson_id) {
        Ok(ids) => ok(&req.id, json!({ "lessonId": lesson_id, "studentIds": ids })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

/// Recorded by the external notifier; a later start-time move into the future
/// invalidates these so the reminder goes out again.
fn handle_notification_sent(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let lesson_id = match get_required_str(req, "lessonId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match lessons::find(conn, &lesson_id) {
        Ok(Some(_)) => {}
        Ok(None) => return err(&req.id, "not_found", "cannot find lesson", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    }
    match lessons::record_sent_notification(conn, &lesson_id, &now()) {
        Ok(id) => ok(&req.id, json!({ "notificationId": id, "lessonId": lesson_id })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "lessons.createLive" => Some(handle_create_live(state, req)),
        "lessons.updateLive" => Some(handle_update_live(state, req)),
        "lessons.delete" => Some(handle_delete(state, req)),
        "lessons.get" => Some(handle_get(state, req)),
        "lessons.members" => Some(handle_members(state, req)),
        "lessons.notificationSent" => Some(handle_notification_sent(state, req)),
        _ => None,
    }
}
