//! Fingerprints of change envelopes that were already applied.

use crate::model::{fmt_ts, Timestamp};
use rusqlite::{params, Connection, OptionalExtension};

pub fn is_applied(conn: &Connection, fingerprint: &str) -> rusqlite::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM ingested_envelopes WHERE fingerprint = ?",
            [fingerprint],
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

pub fn record_applied(
    conn: &Connection,
    fingerprint: &str,
    natural_key: &str,
    action: &str,
    now: &Timestamp,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO ingested_envelopes(fingerprint, natural_key, action, applied_at)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(fingerprint) DO NOTHING",
        params![fingerprint, natural_key, action, fmt_ts(now)],
    )?;
    Ok(())
}
