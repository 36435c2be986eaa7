//! Outbound domain events, the bus contract, and the publisher that hands events
//! to the bus either directly or through the workspace outbox.

use crate::error::{OpContext, OrchestratorError, Result};
use crate::model::Timestamp;
use crate::store::outbox;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
#[cfg(test)]
use std::sync::atomic::AtomicBool;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Upserted,
    Deleted,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Upserted => "upserted",
            ActionKind::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DomainEvent {
    LessonCreated {
        lessons: Vec<LessonRef>,
    },
    #[serde(rename_all = "camelCase")]
    StudentLessonMembershipChanged {
        student_id: String,
        action_kind: ActionKind,
        lesson_ids: Vec<String>,
    },
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus rejected message: {0}")]
    Rejected(String),
    #[error("bus io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub message_id: String,
    pub sequence: u64,
}

pub trait MessageBus: Send + Sync {
    /// Hands the message off and returns its id without waiting for delivery.
    fn publish_async(&self, topic: &str, payload: &[u8]) -> std::result::Result<String, BusError>;

    /// Waits for the bus to acknowledge the message.
    fn publish(&self, topic: &str, payload: &[u8]) -> std::result::Result<Ack, BusError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusRecord {
    pub message_id: String,
    pub topic: String,
    pub payload: serde_json::Value,
}

/// Appends every message as a JSON line under the workspace, for a downstream
/// relay (or the `bus.drain` method) to pick up.
pub struct LogBus {
    path: PathBuf,
    lock: Mutex<()>,
    sequence: AtomicU64,
}

impl LogBus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
        }
    }

    fn append(&self, topic: &str, payload: &[u8]) -> std::result::Result<String, BusError> {
        let payload: serde_json::Value = serde_json::from_slice(payload)
            .map_err(|e| BusError::Rejected(format!("payload is not json: {}", e)))?;
        let record = BusRecord {
            message_id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            payload,
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| BusError::Rejected(e.to_string()))?;
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BusError::Rejected("bus log lock poisoned".into()))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(f, "{}", line)?;
        f.flush()?;
        Ok(record.message_id)
    }

    /// Returns every logged record and truncates the log.
    pub fn drain(&self) -> std::result::Result<Vec<BusRecord>, BusError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| BusError::Rejected("bus log lock poisoned".into()))?;
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let f = std::fs::File::open(&self.path)?;
        let mut out = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(rec) = serde_json::from_str::<BusRecord>(&line) {
                out.push(rec);
            }
        }
        std::fs::write(&self.path, b"")?;
        Ok(out)
    }
}

impl MessageBus for LogBus {
    fn publish_async(&self, topic: &str, payload: &[u8]) -> std::result::Result<String, BusError> {
        self.append(topic, payload)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> std::result::Result<Ack, BusError> {
        let message_id = self.append(topic, payload)?;
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Ack {
            message_id,
            sequence,
        })
    }
}

/// In-process capture with a failure switch.
#[cfg(test)]
#[derive(Default)]
pub struct MemoryBus {
    records: Mutex<Vec<BusRecord>>,
    failing: AtomicBool,
}

#[cfg(test)]
impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<BusRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    fn push(&self, topic: &str, payload: &[u8]) -> std::result::Result<(String, u64), BusError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Rejected("bus unavailable".into()));
        }
        let payload = serde_json::from_slice(payload)
            .map_err(|e| BusError::Rejected(format!("payload is not json: {}", e)))?;
        let mut records = self
            .records
            .lock()
            .map_err(|_| BusError::Rejected("memory bus poisoned".into()))?;
        let message_id = Uuid::new_v4().to_string();
        records.push(BusRecord {
            message_id: message_id.clone(),
            topic: topic.to_string(),
            payload,
        });
        Ok((message_id, records.len() as u64))
    }
}

#[cfg(test)]
impl MessageBus for MemoryBus {
    fn publish_async(&self, topic: &str, payload: &[u8]) -> std::result::Result<String, BusError> {
        self.push(topic, payload).map(|(id, _)| id)
    }

    fn publish(&self, topic: &str, payload: &[u8]) -> std::result::Result<Ack, BusError> {
        self.push(topic, payload).map(|(message_id, sequence)| Ack {
            message_id,
            sequence,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub lesson_created: String,
    pub membership: String,
}

#[derive(Clone)]
pub struct EventPublisher {
    bus: Arc<dyn MessageBus>,
    topics: Topics,
}

impl EventPublisher {
    pub fn new(bus: Arc<dyn MessageBus>, topics: Topics) -> Self {
        Self { bus, topics }
    }

    fn topic_for(&self, event: &DomainEvent) -> &str {
        match event {
            DomainEvent::LessonCreated { .. } => &self.topics.lesson_created,
            DomainEvent::StudentLessonMembershipChanged { .. } => &self.topics.membership,
        }
    }

    fn encode(event: &DomainEvent) -> Result<Vec<u8>> {
        serde_json::to_vec(event).op("encode event")
    }

    /// Publishes straight to the bus. Callers that run this inside an open
    /// transaction get the failure back before commit, so nothing is committed.
    pub fn publish(&self, event: &DomainEvent) -> Result<String> {
        let bytes = Self::encode(event)?;
        let topic = self.topic_for(event);
        self.bus.publish_async(topic, &bytes).map_err(|e| {
            warn!(topic, error = %e, "publish failed");
            OrchestratorError::PublishFailed {
                committed: false,
                reason: e.to_string(),
            }
        })
    }

    /// Records the event in the outbox as part of the caller's transaction.
    pub fn stage(&self, conn: &Connection, event: &DomainEvent, now: &Timestamp) -> Result<String> {
        let bytes = Self::encode(event)?;
        let payload = String::from_utf8(bytes).map_err(|e| OrchestratorError::Internal {
            op: "encode event",
            source: e.into(),
        })?;
        outbox::enqueue(conn, self.topic_for(event), &payload, now).op("stage event")
    }

    /// Publishes pending outbox rows in order, stopping at the first failure.
    /// The rows describe committed writes, so a failure reports `committed: true`.
    pub fn drain_outbox(&self, conn: &Connection, limit: usize, now: &Timestamp) -> Result<usize> {
        self.drain_with(conn, limit, now, |topic, payload| {
            self.bus.publish_async(topic, payload)
        })
    }

    /// Like `drain_outbox`, but waits for the bus to acknowledge every row.
    pub fn drain_outbox_acked(&self, conn: &Connection, limit: usize, now: &Timestamp) -> Result<usize> {
        self.drain_with(conn, limit, now, |topic, payload| {
            self.bus.publish(topic, payload).map(|ack| {
                debug!(message_id = %ack.message_id, sequence = ack.sequence, "bus acknowledged");
                ack.message_id
            })
        })
    }

    fn drain_with(
        &self,
        conn: &Connection,
        limit: usize,
        now: &Timestamp,
        send: impl Fn(&str, &[u8]) -> std::result::Result<String, BusError>,
    ) -> Result<usize> {
        let pending = outbox::pending(conn, limit).op("load outbox")?;
        let mut published = 0;
        for msg in pending {
            match send(&msg.topic, msg.payload.as_bytes()) {
                Ok(message_id) => {
                    outbox::mark_published(conn, &msg.id, &message_id, now)
                        .op("mark outbox published")?;
                    published += 1;
                }
                Err(e) => {
                    warn!(outbox_id = %msg.id, topic = %msg.topic, error = %e, "outbox publish failed");
                    outbox::mark_failed(conn, &msg.id, &e.to_string()).op("mark outbox failed")?;
                    return Err(OrchestratorError::PublishFailed {
                        committed: true,
                        reason: e.to_string(),
                    });
                }
            }
        }
        if published > 0 {
            info!(published, "outbox drained");
        }
        Ok(published)
    }
}
