use super::core::rebuild_orchestrator;
use crate::config;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::no_workspace;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const SECTION_ORCHESTRATOR: &str = "orchestrator";

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    match config::load(conn) {
        Ok(cfg) => ok(&req.id, json!({ SECTION_ORCHESTRATOR: cfg.to_json() })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (Some(conn), Some(workspace), Some(bus)) =
        (state.db.as_ref(), state.workspace.as_ref(), state.bus.as_ref())
    else {
        return no_workspace(req);
    };
    let Some(section) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    if section != SECTION_ORCHESTRATOR {
        return err(&req.id, "bad_params", "unknown section", None);
    }
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    if let Err(msg) = config::update(conn, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    // Environment overrides still apply on top of the stored section.
    let orchestrator = match rebuild_orchestrator(conn, workspace, bus.clone()) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let effective = match config::load(conn) {
        Ok(cfg) => cfg.to_json(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    state.orchestrator = Some(orchestrator);
    ok(&req.id, json!({ SECTION_ORCHESTRATOR: effective }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
