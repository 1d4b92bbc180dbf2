use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::Value as JsonValue;

use crate::access::{AccessError, Identity};
use crate::calendar::parse_iso_date;
use crate::ipc::error::{err, ok};
use crate::ipc::types::Request;
use crate::session::SessionError;
use crate::store::SaveError;

pub const GENERIC_SAVE_FAILURE: &str = "failed to save orders";

#[derive(Debug)]
pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<JsonValue>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn response(self, id: &str) -> JsonValue {
        err(id, self.code, self.message, self.details)
    }
}

impl From<AccessError> for HandlerErr {
    fn from(e: AccessError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<SessionError> for HandlerErr {
    fn from(e: SessionError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}

impl From<SaveError> for HandlerErr {
    fn from(e: SaveError) -> Self {
        let message = match &e {
            SaveError::Db(_) | SaveError::Load(_) => {
                let m = e.to_string();
                if m.trim().is_empty() {
                    GENERIC_SAVE_FAILURE.to_string()
                } else {
                    m
                }
            }
            _ => e.to_string(),
        };
        Self::new(e.code(), message)
    }
}

pub fn query_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("db_query_failed", e.to_string())
}

pub fn write_failed(code: &'static str, table: &str, e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new(code, e.to_string()).with_details(serde_json::json!({ "table": table }))
}

pub fn respond(req: &Request, result: Result<JsonValue, HandlerErr>) -> JsonValue {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    }
}

pub fn db_conn(db: &Option<Connection>) -> Result<&Connection, HandlerErr> {
    db.as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn identity(req: &Request) -> Result<Identity, HandlerErr> {
    let Some(raw) = req.params.get("identity").filter(|v| !v.is_null()) else {
        return Err(HandlerErr::new("unauthorized", "missing identity"));
    };
    serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::new("unauthorized", format!("bad identity: {}", e)))
}

pub fn required_str(params: &JsonValue, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str(params: &JsonValue, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn required_date(params: &JsonValue, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = required_str(params, key)?;
    parse_iso_date(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

pub fn optional_date(params: &JsonValue, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key) {
        None => Ok(None),
        Some(raw) => parse_iso_date(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
    }
}

pub fn required_date_range(
    params: &JsonValue,
) -> Result<(NaiveDate, NaiveDate), HandlerErr> {
    let start = required_date(params, "start")?;
    let end = required_date(params, "end")?;
    if end < start {
        return Err(HandlerErr::bad_params("end must not be before start"));
    }
    Ok((start, end))
}

/// `confirmDiscard: true` acknowledges throwing away unsaved session edits.
pub fn confirm_discard(params: &JsonValue) -> bool {
    params
        .get("confirmDiscard")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

pub fn parse_string_array(params: &JsonValue, key: &str) -> Result<Vec<String>, HandlerErr> {
    let Some(arr) = params.get(key).and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params(format!("{} must be an array", key)));
    };
    arr.iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.trim().to_string())
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must contain strings", key)))
        })
        .collect()
}
