//! Per-entity repositories. Every function takes a `&Connection`, which is either
//! the bare workspace connection or an open `Transaction` (it derefs to one).

pub mod access;
pub mod courses;
pub mod ledger;
pub mod legacy;
pub mod lessons;
pub mod links;
pub mod outbox;

use rusqlite::types::Value;

pub(crate) fn text_values(ids: &[String]) -> Vec<Value> {
    ids.iter().map(|s| Value::Text(s.clone())).collect()
}

pub(crate) fn placeholders(n: usize) -> String {
    std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ")
}

pub(crate) fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}
