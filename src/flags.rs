//! Feature gate lookup and the per-call schema routing decision.

use crate::error::{OrchestratorError, Result};
use crate::model::{fmt_ts, now};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("gate {name} has no value for environment {environment}")]
    Unset { name: String, environment: String },
    #[error("gate service unavailable: {0}")]
    Unavailable(String),
}

pub trait FeatureGate: Send + Sync {
    fn is_enabled(&self, name: &str, environment: &str) -> std::result::Result<bool, GateError>;
}

/// Reads gates from the workspace `feature_gates` table over its own connection,
/// so evaluation never participates in a caller's transaction.
pub struct SettingsGate {
    conn: Mutex<Connection>,
}

impl SettingsGate {
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl FeatureGate for SettingsGate {
    fn is_enabled(&self, name: &str, environment: &str) -> std::result::Result<bool, GateError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| GateError::Unavailable("gate connection poisoned".into()))?;
        let enabled: Option<i64> = conn
            .query_row(
                "SELECT enabled FROM feature_gates WHERE name = ? AND environment = ?",
                params![name, environment],
                |r| r.get(0),
            )
            .optional()
            .map_err(|e| GateError::Unavailable(e.to_string()))?;
        match enabled {
            Some(v) => Ok(v != 0),
            None => Err(GateError::Unset {
                name: name.to_string(),
                environment: environment.to_string(),
            }),
        }
    }
}

/// Fixed answer, for tests.
#[cfg(test)]
pub struct StaticGate(pub std::result::Result<bool, GateError>);

#[cfg(test)]
impl FeatureGate for StaticGate {
    fn is_enabled(&self, _name: &str, _environment: &str) -> std::result::Result<bool, GateError> {
        self.0.clone()
    }
}

pub fn set_gate(conn: &Connection, name: &str, environment: &str, enabled: bool) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO feature_gates(name, environment, enabled, updated_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(name, environment) DO UPDATE SET
           enabled = excluded.enabled,
           updated_at = excluded.updated_at",
        params![name, environment, enabled as i64, fmt_ts(&now())],
    )?;
    Ok(())
}

pub fn get_gate(conn: &Connection, name: &str, environment: &str) -> rusqlite::Result<Option<bool>> {
    let v: Option<i64> = conn
        .query_row(
            "SELECT enabled FROM feature_gates WHERE name = ? AND environment = ?",
            params![name, environment],
            |r| r.get(0),
        )
        .optional()?;
    Ok(v.map(|v| v != 0))
}

/// Which lesson schema owns a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaPath {
    /// Topic + weekly schedule + lesson triple; events published inside the transaction.
    Legacy,
    /// Flattened lesson rows; events go through the outbox after commit.
    Current,
}

impl SchemaPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaPath::Legacy => "legacy",
            SchemaPath::Current => "current",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    UpsertCourse,
    DeleteLiveCourse,
    CreateLiveLessons,
    UpdateLiveLesson,
    DeleteLiveLessons,
    SyncIngest,
}

#[derive(Clone)]
pub struct FlagRouter {
    gate: Arc<dyn FeatureGate>,
    flag_name: String,
    environment: String,
    unset_default: Option<bool>,
}

impl FlagRouter {
    pub fn new(
        gate: Arc<dyn FeatureGate>,
        flag_name: impl Into<String>,
        environment: impl Into<String>,
        unset_default: Option<bool>,
    ) -> Self {
        Self {
            gate,
            flag_name: flag_name.into(),
            environment: environment.into(),
            unset_default,
        }
    }

    /// Evaluates the gate exactly once. The returned path must be threaded through
    /// every nested write of the call.
    pub fn route(&self, kind: CallKind) -> Result<SchemaPath> {
        let enabled = match (
            self.gate.is_enabled(&self.flag_name, &self.environment),
            self.unset_default,
        ) {
            (Ok(v), _) => v,
            (Err(GateError::Unset { .. }), Some(default)) => default,
            (Err(e), _) => return Err(OrchestratorError::Gate(e.to_string())),
        };
        let path = if enabled {
            SchemaPath::Current
        } else {
            SchemaPath::Legacy
        };
        debug!(?kind, path = path.as_str(), flag = %self.flag_name, "routed call");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingGate {
        calls: AtomicUsize,
    }

    impl FeatureGate for CountingGate {
        fn is_enabled(&self, _: &str, _: &str) -> std::result::Result<bool, GateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    #[test]
    fn enabled_gate_routes_current() {
        let gate = Arc::new(CountingGate {
            calls: AtomicUsize::new(0),
        });
        let router = FlagRouter::new(gate.clone(), "g", "test", None);
        assert_eq!(router.route(CallKind::CreateLiveLessons).expect("route"), SchemaPath::Current);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unavailable_gate_is_fatal_even_with_default() {
        let gate = Arc::new(StaticGate(Err(GateError::Unavailable("down".into()))));
        let router = FlagRouter::new(gate, "g", "test", Some(true));
        let err = router.route(CallKind::UpdateLiveLesson).expect_err("fatal");
        assert!(matches!(err, OrchestratorError::Gate(_)));
    }

    #[test]
    fn unset_gate_uses_configured_default_only() {
        let unset = || {
            Arc::new(StaticGate(Err(GateError::Unset {
                name: "g".into(),
                environment: "test".into(),
            })))
        };
        let with_default = FlagRouter::new(unset(), "g", "test", Some(false));
        assert_eq!(with_default.route(CallKind::SyncIngest).expect("route"), SchemaPath::Legacy);
        let without = FlagRouter::new(unset(), "g", "test", None);
        assert!(matches!(without.route(CallKind::SyncIngest), Err(OrchestratorError::Gate(_))));
    }

    #[test]
    fn settings_gate_reads_workspace_table() {
        let dir = std::env::temp_dir().join(format!("coursesync-gate-{}", uuid::Uuid::new_v4()));
        let conn = db::open_db(&dir).expect("open");
        let gate = SettingsGate::open(&dir.join(db::DB_FILE_NAME)).expect("gate");
        assert!(matches!(gate.is_enabled("g", "prod"), Err(GateError::Unset { .. })));
        set_gate(&conn, "g", "prod", true).expect("set");
        assert_eq!(gate.is_enabled("g", "prod"), Ok(true));
        set_gate(&conn, "g", "prod", false).expect("set");
        assert_eq!(gate.is_enabled("g", "prod"), Ok(false));
        assert_eq!(get_gate(&conn, "g", "prod").expect("get"), Some(false));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
