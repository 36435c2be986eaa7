//! Inbound feed, outbox retry and the workspace bus log.

use crate::ipc::error::{err, fail, ok};
use crate::ipc::helpers::{cancel_token, get_required_str, get_typed, no_workspace};
use crate::ipc::types::{AppState, Request};
use crate::sync::ChangeEnvelope;
use serde_json::json;

fn handle_ingest(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let envelopes: Vec<ChangeEnvelope> = match get_typed(req, "envelopes") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let report = match orch.ingest(conn, envelopes, &cancel_token(req)) {
        Ok(r) => r,
        Err(e) => return fail(&req.id, &e),
    };
    match report.error() {
        None => ok(&req.id, json!(report)),
        Some(e) => err(
            &req.id,
            e.code(),
            e.to_string(),
            Some(json!({
                "failures": report.failures,
                "applied": report.applied,
                "skipped": report.skipped,
            })),
        ),
    }
}

fn handle_student_lessons(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_mut(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    let student_id = match get_required_str(req, "studentId") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let lesson_ids: Vec<String> = match get_typed(req, "lessonIds") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match orch.sync_student_lessons(conn, &student_id, &lesson_ids, &cancel_token(req)) {
        Ok(change) => ok(&req.id, json!(change)),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_outbox_flush(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(orch)) = (state.db.as_ref(), state.orchestrator.as_ref()) else {
        return no_workspace(req);
    };
    match orch.flush_outbox(conn) {
        Ok(report) => ok(&req.id, json!(report)),
        Err(e) => fail(&req.id, &e),
    }
}

fn handle_bus_drain(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(bus) = state.bus.as_ref() else {
        return no_workspace(req);
    };
    match bus.drain() {
        Ok(messages) => ok(&req.id, json!({ "messages": messages })),
        Err(e) => err(&req.id, "bus_read_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sync.ingest" => Some(handle_ingest(state, req)),
        "sync.studentLessons" => Some(handle_student_lessons(state, req)),
        "outbox.flush" => Some(handle_outbox_flush(state, req)),
        "bus.drain" => Some(handle_bus_drain(state, req)),
        _ => None,
    }
}
