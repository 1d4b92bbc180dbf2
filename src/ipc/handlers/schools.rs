use crate::access::{require_admin, require_school_staff, staff_school_scope};
use crate::ipc::helpers::{
    db_conn, identity, optional_str, query_failed, required_str, respond, write_failed,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::now_ts;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const MAX_PLACEHOLDER_PUPILS: i64 = 100;

fn school_exists(conn: &Connection, school_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM schools WHERE id = ?", [school_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

fn classroom_school(conn: &Connection, classroom_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT school_id FROM classrooms WHERE id = ?",
        [classroom_id],
        |r| r.get::<_, String>(0),
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| HandlerErr::not_found("classroom"))
}

fn schools_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let mut stmt = conn
        .prepare(
            "SELECT
               s.id,
               s.name,
               (SELECT COUNT(*) FROM classrooms c WHERE c.school_id = s.id) AS classroom_count
             FROM schools s
             ORDER BY s.name",
        )
        .map_err(query_failed)?;
    let schools = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "classroomCount": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "schools": schools }))
}

fn schools_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let name = required_str(&req.params, "name")?;
    let school_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)",
        (&school_id, &name),
    )
    .map_err(|e| write_failed("db_insert_failed", "schools", e))?;
    Ok(json!({ "schoolId": school_id, "name": name }))
}

fn schools_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let school_id = required_str(&req.params, "schoolId")?;
    let name = required_str(&req.params, "name")?;
    let changed = conn
        .execute("UPDATE schools SET name = ? WHERE id = ?", (&name, &school_id))
        .map_err(|e| write_failed("db_update_failed", "schools", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("school"));
    }
    Ok(json!({ "ok": true }))
}

fn schools_delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let school_id = required_str(&req.params, "schoolId")?;
    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr::not_found("school"));
    }
    // Classrooms and schedules keep the row alive through foreign keys.
    conn.execute("DELETE FROM schools WHERE id = ?", [&school_id])
        .map_err(|e| write_failed("db_delete_failed", "schools", e))?;
    tracing::info!(school = %school_id, "school deleted");
    Ok(json!({ "ok": true }))
}

fn classrooms_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let scope = staff_school_scope(&who, optional_str(&req.params, "schoolId").as_deref())?;

    // Correlated subqueries keep the counts from multiplying through joins.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.school_id,
               c.name,
               (SELECT COUNT(*) FROM pupils p WHERE p.classroom_id = c.id AND p.parent_id IS NOT NULL),
               (SELECT COUNT(*) FROM pupils p WHERE p.classroom_id = c.id AND p.parent_id IS NULL)
             FROM classrooms c
             WHERE ?1 IS NULL OR c.school_id = ?1
             ORDER BY c.name",
        )
        .map_err(query_failed)?;
    let classrooms = stmt
        .query_map([scope.as_deref()], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "schoolId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "registeredCount": r.get::<_, i64>(3)?,
                "unregisteredCount": r.get::<_, i64>(4)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "classrooms": classrooms }))
}

fn classrooms_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let school_id = required_str(&req.params, "schoolId")?;
    let name = required_str(&req.params, "name")?;
    require_school_staff(&who, &school_id)?;
    if !school_exists(conn, &school_id)? {
        return Err(HandlerErr::not_found("school"));
    }
    let classroom_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classrooms(id, school_id, name, created_at) VALUES(?, ?, ?, ?)",
        params![classroom_id, school_id, name, now_ts()],
    )
    .map_err(|e| write_failed("db_insert_failed", "classrooms", e))?;
    Ok(json!({ "classroomId": classroom_id, "schoolId": school_id, "name": name }))
}

fn classrooms_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let name = required_str(&req.params, "name")?;
    require_school_staff(&who, &classroom_school(conn, &classroom_id)?)?;
    conn.execute(
        "UPDATE classrooms SET name = ? WHERE id = ?",
        (&name, &classroom_id),
    )
    .map_err(|e| write_failed("db_update_failed", "classrooms", e))?;
    Ok(json!({ "ok": true }))
}

fn classrooms_delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    require_school_staff(&who, &classroom_school(conn, &classroom_id)?)?;
    conn.execute("DELETE FROM classrooms WHERE id = ?", [&classroom_id])
        .map_err(|e| write_failed("db_delete_failed", "classrooms", e))?;
    Ok(json!({ "ok": true }))
}

/// Placeholder pupils are created unclaimed; their ids double as the codes
/// handed to parents.
fn classrooms_add_unregistered(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let classroom_id = required_str(&req.params, "classroomId")?;
    let count = req
        .params
        .get("count")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("count must be integer"))?;
    if !(1..=MAX_PLACEHOLDER_PUPILS).contains(&count) {
        return Err(HandlerErr::bad_params(format!(
            "count must be in 1..={}",
            MAX_PLACEHOLDER_PUPILS
        )));
    }
    require_school_staff(&who, &classroom_school(conn, &classroom_id)?)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let ts = now_ts();
    let mut codes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let pupil_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO pupils(id, classroom_id, parent_id, name, status, created_at)
             VALUES(?, ?, NULL, '', 'UNREGISTERED', ?)",
            params![pupil_id, classroom_id, ts],
        )
        .map_err(|e| write_failed("db_insert_failed", "pupils", e))?;
        codes.push(pupil_id);
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    tracing::info!(classroom = %classroom_id, count, "placeholder pupils created");
    Ok(json!({ "codes": codes }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schools.list" => schools_list(state, req),
        "schools.create" => schools_create(state, req),
        "schools.update" => schools_update(state, req),
        "schools.delete" => schools_delete(state, req),
        "classrooms.list" => classrooms_list(state, req),
        "classrooms.create" => classrooms_create(state, req),
        "classrooms.update" => classrooms_update(state, req),
        "classrooms.delete" => classrooms_delete(state, req),
        "classrooms.addUnregisteredPupils" => classrooms_add_unregistered(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
