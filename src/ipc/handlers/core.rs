use crate::config;
use crate::db;
use crate::events::LogBus;
use crate::flags::SettingsGate;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::orchestrator::Orchestrator;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

const BUS_LOG: &str = "bus/outbound.jsonl";

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

/// (Re)builds the orchestrator from the workspace's current configuration.
pub fn rebuild_orchestrator(
    conn: &rusqlite::Connection,
    workspace: &Path,
    bus: Arc<LogBus>,
) -> anyhow::Result<Orchestrator> {
    let cfg = config::load(conn)?;
    let gate = SettingsGate::open(&workspace.join(db::DB_FILE_NAME))?;
    info!(
        environment = %cfg.environment,
        flag = %cfg.flag_name,
        "orchestrator configured"
    );
    Ok(Orchestrator::new(Arc::new(gate), bus, &cfg))
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    let conn = match db::open_db(&path) {
        Ok(conn) => conn,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };
    let bus = Arc::new(LogBus::new(path.join(BUS_LOG)));
    let orchestrator = match rebuild_orchestrator(&conn, &path, bus.clone()) {
        Ok(o) => o,
        Err(e) => return err(&req.id, "db_open_failed", format!("{e:?}"), None),
    };

    state.workspace = Some(path.clone());
    state.db = Some(conn);
    state.bus = Some(bus);
    state.orchestrator = Some(orchestrator);
    info!(workspace = %path.display(), "workspace selected");
    ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        _ => None,
    }
}
