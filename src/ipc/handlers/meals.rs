use std::collections::BTreeMap;

use crate::access::require_admin;
use crate::ipc::helpers::{
    db_conn, identity, optional_str, query_failed, required_str, respond, write_failed,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

fn parse_max_selections(params: &Value) -> Result<Option<i64>, HandlerErr> {
    match params.get("maxSelections") {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_i64() {
            Some(n) if n >= 1 => Ok(Some(n)),
            _ => Err(HandlerErr::bad_params("maxSelections must be an integer >= 1")),
        },
    }
}

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM meal_groups WHERE id = ?", [group_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(query_failed)
}

fn groups_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    identity(req)?;

    let mut choices_by_group: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    {
        let mut stmt = conn
            .prepare("SELECT id, group_id, name FROM meal_choices ORDER BY name, id")
            .map_err(query_failed)?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                ))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(query_failed)?;
        for (id, group_id, name) in rows {
            choices_by_group
                .entry(group_id)
                .or_default()
                .push(json!({ "id": id, "name": name }));
        }
    }

    let mut stmt = conn
        .prepare("SELECT id, name, max_selections FROM meal_groups ORDER BY name, id")
        .map_err(query_failed)?;
    let groups = stmt
        .query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?
        .into_iter()
        .map(|(id, name, max_selections)| {
            let choices = choices_by_group.remove(&id).unwrap_or_default();
            json!({
                "id": id,
                "name": name,
                "maxSelections": max_selections,
                "choices": choices,
            })
        })
        .collect::<Vec<_>>();
    Ok(json!({ "groups": groups }))
}

fn groups_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let name = required_str(&req.params, "name")?;
    let max_selections = parse_max_selections(&req.params)?.unwrap_or(1);
    let group_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO meal_groups(id, name, max_selections) VALUES(?, ?, ?)",
        params![group_id, name, max_selections],
    )
    .map_err(|e| write_failed("db_insert_failed", "meal_groups", e))?;
    Ok(json!({ "groupId": group_id, "name": name, "maxSelections": max_selections }))
}

fn groups_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let group_id = required_str(&req.params, "groupId")?;
    let name = optional_str(&req.params, "name");
    let max_selections = parse_max_selections(&req.params)?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("meal group"));
    }
    conn.execute(
        "UPDATE meal_groups
         SET name = COALESCE(?, name), max_selections = COALESCE(?, max_selections)
         WHERE id = ?",
        params![name, max_selections, group_id],
    )
    .map_err(|e| write_failed("db_update_failed", "meal_groups", e))?;
    Ok(json!({ "ok": true }))
}

fn groups_delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let group_id = required_str(&req.params, "groupId")?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("meal group"));
    }
    conn.execute("DELETE FROM meal_groups WHERE id = ?", [&group_id])
        .map_err(|e| write_failed("db_delete_failed", "meal_groups", e))?;
    Ok(json!({ "ok": true }))
}

fn choices_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let group_id = required_str(&req.params, "groupId")?;
    let name = required_str(&req.params, "name")?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("meal group"));
    }
    let choice_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO meal_choices(id, group_id, name) VALUES(?, ?, ?)",
        params![choice_id, group_id, name],
    )
    .map_err(|e| write_failed("db_insert_failed", "meal_choices", e))?;
    Ok(json!({ "choiceId": choice_id, "groupId": group_id, "name": name }))
}

fn choices_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let choice_id = required_str(&req.params, "choiceId")?;
    let name = optional_str(&req.params, "name");
    let group_id = optional_str(&req.params, "groupId");
    if let Some(g) = group_id.as_deref() {
        if !group_exists(conn, g)? {
            return Err(HandlerErr::not_found("meal group"));
        }
    }
    let changed = conn
        .execute(
            "UPDATE meal_choices
             SET name = COALESCE(?, name), group_id = COALESCE(?, group_id)
             WHERE id = ?",
            params![name, group_id, choice_id],
        )
        .map_err(|e| write_failed("db_update_failed", "meal_choices", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("meal choice"));
    }
    Ok(json!({ "ok": true }))
}

/// Choices referenced by saved orders stay; the foreign key refuses the delete.
fn choices_delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    require_admin(&identity(req)?)?;
    let choice_id = required_str(&req.params, "choiceId")?;
    let changed = conn
        .execute("DELETE FROM meal_choices WHERE id = ?", [&choice_id])
        .map_err(|e| write_failed("db_delete_failed", "meal_choices", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("meal choice"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "meals.groups.list" => groups_list(state, req),
        "meals.groups.create" => groups_create(state, req),
        "meals.groups.update" => groups_update(state, req),
        "meals.groups.delete" => groups_delete(state, req),
        "meals.choices.create" => choices_create(state, req),
        "meals.choices.update" => choices_update(state, req),
        "meals.choices.delete" => choices_delete(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
