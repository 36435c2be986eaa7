use crate::abac::CallerContext;
use crate::cancel::CancelToken;
use crate::ipc::error::err;
use crate::ipc::types::Request;
use serde::de::DeserializeOwned;

pub fn caller(req: &Request) -> CallerContext {
    CallerContext::from_json(req.params.get("caller"))
}

/// `params.cancelled = true` hands the call an already-cancelled token.
pub fn cancel_token(req: &Request) -> CancelToken {
    let token = CancelToken::new();
    if req.params.get("cancelled").and_then(|v| v.as_bool()) == Some(true) {
        token.cancel();
    }
    token
}

pub fn get_required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn get_typed<T: DeserializeOwned>(req: &Request, key: &str) -> Result<T, serde_json::Value> {
    let Some(raw) = req.params.get(key) else {
        return Err(err(&req.id, "bad_params", format!("missing {}", key), None));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| err(&req.id, "bad_params", format!("invalid {}: {}", key, e), None))
}

pub fn no_workspace(req: &Request) -> serde_json::Value {
    err(&req.id, "no_workspace", "select a workspace first", None)
}
