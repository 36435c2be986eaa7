use crate::db;
use serde_json::{json, Map, Value};

pub const SETTINGS_KEY: &str = "setup.orchestrator";

pub const ENV_ENVIRONMENT: &str = "COURSESYNC_ENV";
pub const ENV_FLAG_NAME: &str = "COURSESYNC_FLAG_NAME";

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    pub environment: String,
    /// Gate that selects the flattened lesson schema when enabled.
    pub flag_name: String,
    /// Used when the gate has no stored value; `None` makes that an error.
    pub flag_default: Option<bool>,
    pub topic_lesson_created: String,
    pub topic_membership: String,
    pub max_sync_batch: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            environment: "production".to_string(),
            flag_name: "lesson_flattened_schema".to_string(),
            flag_default: None,
            topic_lesson_created: "lesson.created".to_string(),
            topic_membership: "student.lesson.membership".to_string(),
            max_sync_batch: 500,
        }
    }
}

impl OrchestratorConfig {
    pub fn to_json(&self) -> Value {
        json!({
            "environment": self.environment,
            "flagName": self.flag_name,
            "flagDefault": self.flag_default,
            "busTopicLessonCreated": self.topic_lesson_created,
            "busTopicMembership": self.topic_membership,
            "maxSyncBatch": self.max_sync_batch,
        })
    }

    /// Best-effort read of a stored section; malformed fields keep their defaults.
    fn from_json(obj: &Map<String, Value>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = obj.get("environment").and_then(|v| v.as_str()) {
            cfg.environment = v.to_string();
        }
        if let Some(v) = obj.get("flagName").and_then(|v| v.as_str()) {
            cfg.flag_name = v.to_string();
        }
        cfg.flag_default = obj.get("flagDefault").and_then(|v| v.as_bool());
        if let Some(v) = obj.get("busTopicLessonCreated").and_then(|v| v.as_str()) {
            cfg.topic_lesson_created = v.to_string();
        }
        if let Some(v) = obj.get("busTopicMembership").and_then(|v| v.as_str()) {
            cfg.topic_membership = v.to_string();
        }
        if let Some(v) = obj
            .get("maxSyncBatch")
            .and_then(|v| v.as_u64())
            .filter(|v| *v > 0)
        {
            cfg.max_sync_batch = v as usize;
        }
        cfg
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup(ENV_ENVIRONMENT).filter(|s| !s.trim().is_empty()) {
            self.environment = v.trim().to_string();
        }
        if let Some(v) = lookup(ENV_FLAG_NAME).filter(|s| !s.trim().is_empty()) {
            self.flag_name = v.trim().to_string();
        }
    }
}

/// Stored section (without environment overrides).
pub fn load_stored(conn: &rusqlite::Connection) -> anyhow::Result<OrchestratorConfig> {
    let obj = db::settings_get_json(conn, SETTINGS_KEY)?
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default();
    Ok(OrchestratorConfig::from_json(&obj))
}

pub fn load(conn: &rusqlite::Connection) -> anyhow::Result<OrchestratorConfig> {
    let mut cfg = load_stored(conn)?;
    cfg.apply_env(|k| std::env::var(k).ok());
    Ok(cfg)
}

fn parse_string_max(v: &Value, key: &str, max: usize) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be a string", key))?
        .trim()
        .to_string();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.chars().count() > max {
        return Err(format!("{} must be at most {} characters", key, max));
    }
    Ok(s)
}

/// Applies a validated patch on top of the stored section and persists it.
pub fn update(
    conn: &rusqlite::Connection,
    patch: &Map<String, Value>,
) -> Result<OrchestratorConfig, String> {
    let mut obj = load_stored(conn)
        .map_err(|e| e.to_string())?
        .to_json()
        .as_object()
        .cloned()
        .unwrap_or_default();
    for (k, v) in patch {
        match k.as_str() {
            "environment" | "flagName" | "busTopicLessonCreated" | "busTopicMembership" => {
                obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
            }
            "flagDefault" => {
                if !v.is_null() && !v.is_boolean() {
                    return Err("flagDefault must be boolean or null".into());
                }
                obj.insert(k.clone(), v.clone());
            }
            "maxSyncBatch" => {
                let n = v
                    .as_i64()
                    .filter(|n| (1..=10_000).contains(n))
                    .ok_or_else(|| "maxSyncBatch must be an integer in 1..=10000".to_string())?;
                obj.insert(k.clone(), Value::from(n));
            }
            _ => return Err(format!("unknown orchestrator field: {}", k)),
        }
    }
    db::settings_set_json(conn, SETTINGS_KEY, &Value::Object(obj.clone()))
        .map_err(|e| e.to_string())?;
    Ok(OrchestratorConfig::from_json(&obj))
}
