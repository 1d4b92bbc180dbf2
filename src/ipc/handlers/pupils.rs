use std::collections::BTreeSet;

use crate::access::{require_parent_of, require_school_staff, Identity, Role};
use crate::ipc::helpers::{
    db_conn, identity, optional_str, parse_string_array, query_failed, required_str, respond,
    write_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::find_pupil;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};

const MAX_CODES_PER_REQUEST: usize = 5;

fn pupil_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "name": r.get::<_, String>(1)?,
        "status": r.get::<_, String>(2)?,
        "classroomId": r.get::<_, String>(3)?,
        "classroomName": r.get::<_, String>(4)?,
        "registered": r.get::<_, Option<String>>(5)?.is_some(),
    }))
}

fn query_pupils(conn: &Connection, filter: &str, arg: &str) -> Result<Vec<Value>, HandlerErr> {
    let sql = format!(
        "SELECT p.id, p.name, p.status, p.classroom_id, c.name, p.parent_id
         FROM pupils p
         JOIN classrooms c ON c.id = p.classroom_id
         WHERE {} = ?
         ORDER BY p.name, p.id",
        filter
    );
    let mut stmt = conn.prepare(&sql).map_err(query_failed)?;
    let rows = stmt
        .query_map([arg], pupil_json)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(rows)
}

fn pupils_for_classroom(
    conn: &Connection,
    who: &Identity,
    classroom_id: &str,
) -> Result<Vec<Value>, HandlerErr> {
    let school: Option<String> = conn
        .query_row(
            "SELECT school_id FROM classrooms WHERE id = ?",
            [classroom_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(query_failed)?;
    let Some(school) = school else {
        return Ok(Vec::new());
    };
    require_school_staff(who, &school)?;
    query_pupils(conn, "p.classroom_id", classroom_id)
}

fn pupils_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let pupils = match who.role {
        Role::Admin | Role::SchoolAdmin => match optional_str(&req.params, "classroomId") {
            Some(classroom_id) => pupils_for_classroom(conn, &who, &classroom_id)?,
            None => Vec::new(),
        },
        Role::User => query_pupils(conn, "p.parent_id", &who.user_id)?,
    };
    Ok(json!({ "pupils": pupils }))
}

fn pupils_rename(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let pupil_id = required_str(&req.params, "pupilId")?;
    let name = required_str(&req.params, "name")?;
    let pupil = find_pupil(conn, &pupil_id)
        .map_err(query_failed)?
        .ok_or_else(|| HandlerErr::not_found("pupil"))?;
    require_parent_of(&who, &pupil)?;
    conn.execute("UPDATE pupils SET name = ? WHERE id = ?", (&name, &pupil_id))
        .map_err(|e| write_failed("db_update_failed", "pupils", e))?;
    Ok(json!({ "ok": true }))
}

fn parse_codes(params: &Value) -> Result<Vec<String>, HandlerErr> {
    let mut seen = BTreeSet::new();
    let codes: Vec<String> = parse_string_array(params, "codes")?
        .into_iter()
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.clone()))
        .collect();
    if codes.is_empty() || codes.len() > MAX_CODES_PER_REQUEST {
        return Err(HandlerErr::bad_params(format!(
            "codes must hold 1..={} entries",
            MAX_CODES_PER_REQUEST
        )));
    }
    Ok(codes)
}

/// Codes that do not name an unclaimed pupil.
fn invalid_codes(conn: &Connection, codes: &[String]) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT 1 FROM pupils WHERE id = ? AND parent_id IS NULL")
        .map_err(query_failed)?;
    let mut invalid = Vec::new();
    for code in codes {
        if !stmt.exists([code]).map_err(query_failed)? {
            invalid.push(code.clone());
        }
    }
    Ok(invalid)
}

fn pupils_validate_codes(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    identity(req)?;
    let codes = parse_codes(&req.params)?;
    let invalid = invalid_codes(conn, &codes)?;
    Ok(json!({ "valid": invalid.is_empty(), "invalid": invalid }))
}

fn pupils_claim(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    if who.role != Role::User {
        return Err(HandlerErr::new("forbidden", "only parents claim pupils"));
    }
    let codes = parse_codes(&req.params)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let invalid = invalid_codes(&tx, &codes)?;
    if !invalid.is_empty() {
        return Err(HandlerErr::bad_params("some codes are not claimable")
            .with_details(json!({ "invalid": invalid })));
    }
    let mut claimed = 0usize;
    for code in &codes {
        claimed += tx
            .execute(
                "UPDATE pupils SET parent_id = ?, status = 'ACTIVE'
                 WHERE id = ? AND parent_id IS NULL",
                params![who.user_id, code],
            )
            .map_err(|e| write_failed("db_update_failed", "pupils", e))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(parent = %who.user_id, claimed, "pupils claimed");
    Ok(json!({ "claimed": claimed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "pupils.list" => pupils_list(state, req),
        "pupils.rename" => pupils_rename(state, req),
        "pupils.validateCodes" => pupils_validate_codes(state, req),
        "pupils.claim" => pupils_claim(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
