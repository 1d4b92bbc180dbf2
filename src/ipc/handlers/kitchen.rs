use std::collections::BTreeMap;

use crate::access::{staff_school_scope, AccessError, Role};
use crate::calendar::format_iso_date;
use crate::ipc::handlers::setup::{kitchen_settings, KitchenSort};
use crate::ipc::helpers::{
    db_conn, identity, optional_str, query_failed, required_date, respond, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{kitchen_prep_summary, PrepRow, PrepScope};
use rusqlite::OptionalExtension;
use serde_json::{json, Value};

fn group_names(conn: &rusqlite::Connection) -> Result<Vec<String>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT name FROM meal_groups ORDER BY name")
        .map_err(query_failed)?;
    let names = stmt
        .query_map([], |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(names)
}

fn sort_rows(rows: &mut [PrepRow], sort: KitchenSort) {
    if sort == KitchenSort::Count {
        // Stable, so ties keep group/choice order.
        rows.sort_by(|a, b| b.count.cmp(&a.count));
    }
}

fn classroom_school(conn: &rusqlite::Connection, classroom_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT school_id FROM classrooms WHERE id = ?",
        [classroom_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(query_failed)?
    .ok_or_else(|| HandlerErr::not_found("classroom"))
}

/// Admins see any scope; a school admin only their own school and its classrooms.
fn prep_scope(conn: &rusqlite::Connection, req: &Request) -> Result<PrepScope, HandlerErr> {
    let who = identity(req)?;
    let school = staff_school_scope(&who, optional_str(&req.params, "schoolId").as_deref())?;
    let Some(classroom) = optional_str(&req.params, "classroomId") else {
        return Ok(school.map_or(PrepScope::All, PrepScope::School));
    };
    if let (Role::SchoolAdmin, Some(own)) = (who.role, school.as_deref()) {
        if classroom_school(conn, &classroom)? != own {
            return Err(AccessError::Forbidden("classroom is not in your school".to_string()).into());
        }
    }
    Ok(PrepScope::Classroom(classroom))
}

fn prep_summary(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let scope = prep_scope(conn, req)?;
    let date = required_date(&req.params, "date")?;
    let settings = kitchen_settings(conn).map_err(query_failed)?;

    let mut rows = kitchen_prep_summary(conn, date, &scope).map_err(query_failed)?;
    sort_rows(&mut rows, settings.sort_by);

    let mut totals: BTreeMap<String, i64> = BTreeMap::new();
    if settings.include_empty_groups {
        for name in group_names(conn)? {
            totals.insert(name, 0);
        }
    }
    for row in &rows {
        *totals.entry(row.group.clone()).or_default() += row.count;
    }
    let groups: Vec<Value> = totals
        .into_iter()
        .map(|(group, total)| json!({ "group": group, "total": total }))
        .collect();

    Ok(json!({
        "date": format_iso_date(date),
        "rows": rows,
        "groups": groups,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "kitchen.prepSummary" => Some(respond(req, prep_summary(state, req))),
        _ => None,
    }
}
