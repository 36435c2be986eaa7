use crate::abac::Role;
use crate::config;
use crate::flags;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{caller, no_workspace};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use tracing::info;

/// Gate name and environment, defaulting to the configured ones.
fn gate_key(conn: &rusqlite::Connection, req: &Request) -> anyhow::Result<(String, String)> {
    let cfg = config::load(conn)?;
    let pick = |key: &str, fallback: String| {
        req.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(fallback)
    };
    Ok((pick("name", cfg.flag_name), pick("environment", cfg.environment)))
}

fn handle_flags_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    if caller(req).role != Role::Admin {
        return err(&req.id, "permission_denied", "only admins may change gates", None);
    }
    let Some(enabled) = req.params.get("enabled").and_then(|v| v.as_bool()) else {
        return err(&req.id, "bad_params", "enabled must be boolean", None);
    };
    let (name, environment) = match gate_key(conn, req) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(e) = flags::set_gate(conn, &name, &environment, enabled) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(gate = %name, environment = %environment, enabled, "gate updated");
    ok(
        &req.id,
        json!({ "name": name, "environment": environment, "enabled": enabled }),
    )
}

fn handle_flags_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return no_workspace(req);
    };
    let (name, environment) = match gate_key(conn, req) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    match flags::get_gate(conn, &name, &environment) {
        Ok(enabled) => ok(
            &req.id,
            json!({ "name": name, "environment": environment, "enabled": enabled }),
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "flags.set" => Some(handle_flags_set(state, req)),
        "flags.get" => Some(handle_flags_get(state, req)),
        _ => None,
    }
}
