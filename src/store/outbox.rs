use crate::model::{fmt_ts, Timestamp};
use rusqlite::{params, Connection};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMessage {
    pub id: String,
    pub topic: String,
    pub payload: String,
}

pub fn enqueue(conn: &Connection, topic: &str, payload: &str, now: &Timestamp) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO outbox(id, topic, payload, created_at) VALUES(?, ?, ?, ?)",
        params![id, topic, payload, fmt_ts(now)],
    )?;
    Ok(id)
}

/// Unpublished messages in insertion order.
pub fn pending(conn: &Connection, limit: usize) -> rusqlite::Result<Vec<OutboxMessage>> {
    let mut stmt = conn.prepare(
        "SELECT id, topic, payload FROM outbox
         WHERE published_at IS NULL
         ORDER BY created_at, rowid
         LIMIT ?",
    )?;
    let rows = stmt
        .query_map([limit as i64], |r| {
            Ok(OutboxMessage {
                id: r.get(0)?,
                topic: r.get(1)?,
                payload: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn pending_count(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM outbox WHERE published_at IS NULL",
        [],
        |r| r.get(0),
    )
}

pub fn mark_published(
    conn: &Connection,
    id: &str,
    message_id: &str,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE outbox SET published_at = ?, message_id = ?, attempts = attempts + 1,
                           last_error = NULL
         WHERE id = ?",
        params![fmt_ts(now), message_id, id],
    )?;
    Ok(())
}

pub fn mark_failed(conn: &Connection, id: &str, error: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE outbox SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
    )?;
    Ok(())
}
