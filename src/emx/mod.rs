//! EMX gateway: transport session, id registry, protocol codec and the
//! adapter that glues them behind the [`crate::gateway::Gateway`] seam.

pub mod adapter;
pub mod auth;
pub mod execution;
pub mod session;
pub mod storage;
pub mod streaming;

use serde_json::Value;

use crate::error::{Error, Result};

/// Required string field of a venue message.
pub(crate) fn str_field<'a>(msg: &'a Value, field: &str) -> Result<&'a str> {
    msg.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Protocol(format!("missing field `{field}` in {msg}")))
}

/// Required numeric field; the venue serialises most numbers as strings.
pub(crate) fn f64_field(msg: &Value, field: &str) -> Result<f64> {
    msg.get(field)
        .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .ok_or_else(|| Error::Protocol(format!("missing numeric field `{field}` in {msg}")))
}
