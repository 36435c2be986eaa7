use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{caller, cancel_token, get_required_str, get_typed, no_workspace};
use crate::ipc::types::{AppState, Request};
use crate::mutator::CourseInput;
use crate::store::{courses, links};
use serde_json::json;

fn handle_courses_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let input: CourseInput = match get_typed(req, "course") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match orch.upsert_course(conn, &caller(req), input, &cancel_token(req)) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_courses_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let course_id = match get_required_str(req, "courseId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let course = match courses::find(conn, &course_id) {
        Ok(Some(c)) => c,
        Ok(None) => return err(&req.id, "not_found", "cannot find course", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let class_ids = match links::active_class_ids(conn, &course_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ "course": course, "classIds": class_ids }))
}

fn handle_courses_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let course_id = req
        .params
        .get("courseId")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    match orch.delete_live_course(conn, &caller(req), course_id, &cancel_token(req)) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => fail(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.upsert" => Some(handle_courses_upsert(state, req)),
        "courses.get" => Some(handle_courses_get(state, req)),
        "courses.delete" => Some(handle_courses_delete(state, req)),
        _ => None,
    }
}
