//! Job record layout.
//!
//! A record is a hash with three fields. `data` holds the payload as JSON
//! text. An ended job keeps `id` and `data` but has no `state`.

use serde::Serialize;
use serde_json::Value;

use super::state::StateName;

pub const FIELD_ID: &str = "id";
pub const FIELD_STATE: &str = "state";
pub const FIELD_DATA: &str = "data";

/// What `read` returns for an identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub state: Option<StateName>,
    pub data: Value,
}

/// Only objects and arrays are accepted as job data.
pub(crate) fn is_structured(data: &Value) -> bool {
    matches!(data, Value::Object(_) | Value::Array(_))
}

pub(crate) fn json_kind(data: &Value) -> &'static str {
    match data {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
