use crate::error::OrchestratorError;
use serde_json::json;
use tracing::error;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Maps an orchestrator failure onto the response envelope. Store failures stay
/// opaque to the caller; only the failing operation's name is exposed.
pub fn fail(id: &str, e: &OrchestratorError) -> serde_json::Value {
    match e {
        OrchestratorError::Internal { op, source } => {
            error!(op, error = %format!("{:#}", source), "operation failed");
            err(id, e.code(), "operation failed", Some(json!({ "op": op })))
        }
        OrchestratorError::PublishFailed { committed, .. } => err(
            id,
            e.code(),
            e.to_string(),
            Some(json!({ "committed": committed })),
        ),
        OrchestratorError::PartialBatch(failures) => err(
            id,
            e.code(),
            e.to_string(),
            Some(json!({ "failures": failures })),
        ),
        _ => err(id, e.code(), e.to_string(), None),
    }
}
