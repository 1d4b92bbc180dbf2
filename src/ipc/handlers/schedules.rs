use chrono::NaiveDate;

use crate::access::{
    require_school_staff, resolve_schedule_school, staff_school_scope, AccessError, Identity,
    PupilLookup, PupilRef, Role,
};
use crate::calendar::{
    format_iso_date, month_grid, parse_iso_date, resolve_orderable_days, split_by_kind,
    OrderableDays, ScheduleKind,
};
use crate::ipc::handlers::setup::ordering_settings;
use crate::ipc::helpers::{
    db_conn, identity, optional_date, optional_str, query_failed, required_str, respond,
    write_failed, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::{find_pupil, load_school_intervals};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

/// Resolves a school's orderable days with the workspace's expansion caps.
pub fn school_orderable_days(
    conn: &Connection,
    school_id: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<OrderableDays, HandlerErr> {
    let caps = ordering_settings(conn).map_err(query_failed)?.caps();
    let intervals = load_school_intervals(conn, school_id).map_err(query_failed)?;
    let (terms, holidays) = split_by_kind(&intervals);
    Ok(resolve_orderable_days(&terms, &holidays, start, end, caps))
}

struct ScheduleRow {
    school_id: String,
    name: String,
    kind: ScheduleKind,
    start_date: NaiveDate,
    end_date: NaiveDate,
}

fn parse_kind(raw: &str) -> Result<ScheduleKind, HandlerErr> {
    ScheduleKind::parse(raw).ok_or_else(|| HandlerErr::bad_params("kind must be TERM or HOLIDAY"))
}

fn parse_date_param(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match optional_str(params, key) {
        None => Ok(None),
        // Stored schedule dates are plain days; timestamps are refused here.
        Some(raw) if raw.len() != 10 => {
            Err(HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
        }
        Some(raw) => parse_iso_date(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key))),
    }
}

fn check_order(start: NaiveDate, end: NaiveDate) -> Result<(), HandlerErr> {
    if end < start {
        return Err(HandlerErr::bad_params("endDate must not be before startDate"));
    }
    Ok(())
}

/// School a staff member writes schedules for: admins name it, school admins
/// default to their own.
fn target_school(who: &Identity, params: &Value) -> Result<String, HandlerErr> {
    let explicit = optional_str(params, "schoolId");
    let school_id = match who.role {
        Role::Admin => explicit.ok_or_else(|| HandlerErr::bad_params("missing schoolId"))?,
        Role::SchoolAdmin => explicit
            .or_else(|| who.school_id.clone())
            .ok_or_else(|| HandlerErr::from(AccessError::Forbidden("no school assigned".into())))?,
        Role::User => return Err(AccessError::Unauthorized.into()),
    };
    require_school_staff(who, &school_id)?;
    Ok(school_id)
}

fn load_schedule(conn: &Connection, schedule_id: &str) -> Result<ScheduleRow, HandlerErr> {
    let raw = conn
        .query_row(
            "SELECT school_id, name, kind, start_date, end_date FROM schedules WHERE id = ?",
            [schedule_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(query_failed)?
        .ok_or_else(|| HandlerErr::not_found("schedule"))?;
    let (school_id, name, kind, start, end) = raw;
    let corrupt = || HandlerErr::new("db_query_failed", "stored schedule is unreadable");
    Ok(ScheduleRow {
        school_id,
        name,
        kind: ScheduleKind::parse(&kind).ok_or_else(corrupt)?,
        start_date: parse_iso_date(&start).ok_or_else(corrupt)?,
        end_date: parse_iso_date(&end).ok_or_else(corrupt)?,
    })
}

fn schedules_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let scope = staff_school_scope(&who, optional_str(&req.params, "schoolId").as_deref())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, school_id, name, kind, start_date, end_date
             FROM schedules
             WHERE ?1 IS NULL OR school_id = ?1
             ORDER BY start_date, name",
        )
        .map_err(query_failed)?;
    let schedules = stmt
        .query_map([scope.as_deref()], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "schoolId": r.get::<_, String>(1)?,
                "name": r.get::<_, String>(2)?,
                "kind": r.get::<_, String>(3)?,
                "startDate": r.get::<_, String>(4)?,
                "endDate": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(query_failed)?;
    Ok(json!({ "schedules": schedules }))
}

fn schedules_create(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let school_id = target_school(&who, &req.params)?;
    let name = optional_str(&req.params, "name").unwrap_or_default();
    let kind = parse_kind(&required_str(&req.params, "kind")?)?;
    let start = parse_date_param(&req.params, "startDate")?
        .ok_or_else(|| HandlerErr::bad_params("missing startDate"))?;
    let end = parse_date_param(&req.params, "endDate")?
        .ok_or_else(|| HandlerErr::bad_params("missing endDate"))?;
    check_order(start, end)?;

    let exists = conn
        .query_row("SELECT 1 FROM schools WHERE id = ?", [&school_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(query_failed)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("school"));
    }

    let schedule_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedules(id, school_id, name, kind, start_date, end_date)
         VALUES(?, ?, ?, ?, ?, ?)",
        params![
            schedule_id,
            school_id,
            name,
            kind.as_str(),
            format_iso_date(start),
            format_iso_date(end)
        ],
    )
    .map_err(|e| write_failed("db_insert_failed", "schedules", e))?;
    tracing::info!(school = %school_id, kind = kind.as_str(), "schedule created");
    Ok(json!({ "scheduleId": schedule_id, "schoolId": school_id }))
}

fn schedules_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let schedule_id = required_str(&req.params, "scheduleId")?;
    let mut row = load_schedule(conn, &schedule_id)?;
    require_school_staff(&who, &row.school_id)?;

    if let Some(name) = optional_str(&req.params, "name") {
        row.name = name;
    }
    if let Some(kind) = optional_str(&req.params, "kind") {
        row.kind = parse_kind(&kind)?;
    }
    if let Some(start) = parse_date_param(&req.params, "startDate")? {
        row.start_date = start;
    }
    if let Some(end) = parse_date_param(&req.params, "endDate")? {
        row.end_date = end;
    }
    check_order(row.start_date, row.end_date)?;

    conn.execute(
        "UPDATE schedules SET name = ?, kind = ?, start_date = ?, end_date = ? WHERE id = ?",
        params![
            row.name,
            row.kind.as_str(),
            format_iso_date(row.start_date),
            format_iso_date(row.end_date),
            schedule_id
        ],
    )
    .map_err(|e| write_failed("db_update_failed", "schedules", e))?;
    Ok(json!({ "ok": true }))
}

fn schedules_delete(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let schedule_id = required_str(&req.params, "scheduleId")?;
    let row = load_schedule(conn, &schedule_id)?;
    require_school_staff(&who, &row.school_id)?;
    conn.execute("DELETE FROM schedules WHERE id = ?", [&schedule_id])
        .map_err(|e| write_failed("db_delete_failed", "schedules", e))?;
    Ok(json!({ "ok": true }))
}

/// Applies the calendar visibility rules to the request's pupil/school.
fn visible_school(
    conn: &Connection,
    who: &Identity,
    params: &Value,
) -> Result<Option<String>, HandlerErr> {
    let pupil_id = optional_str(params, "pupilId");
    let pupil: Option<PupilRef> = match pupil_id.as_deref() {
        Some(id) => find_pupil(conn, id).map_err(query_failed)?,
        None => None,
    };
    let lookup = match (&pupil_id, &pupil) {
        (None, _) => PupilLookup::NotRequested,
        (Some(_), None) => PupilLookup::Missing,
        (Some(_), Some(p)) => PupilLookup::Found(p),
    };
    let school_param = optional_str(params, "schoolId");
    Ok(resolve_schedule_school(who, lookup, school_param.as_deref())?)
}

fn calendar_orderable_days(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let start = optional_date(&req.params, "start")?;
    let end = optional_date(&req.params, "end")?;

    let Some(school_id) = visible_school(conn, &who, &req.params)? else {
        return Ok(json!({ "schoolId": null, "orderable": [], "holidays": [] }));
    };
    let days = school_orderable_days(conn, &school_id, start, end)?;
    tracing::debug!(
        school = %school_id,
        orderable = days.orderable.len(),
        holidays = days.holidays.len(),
        "orderable days resolved"
    );
    Ok(json!({
        "schoolId": school_id,
        "orderable": days.orderable_strings(),
        "holidays": days.holiday_strings(),
    }))
}

fn parse_month(raw: &str) -> Option<(i32, u32)> {
    let (y, m) = raw.trim().split_once('-')?;
    if y.len() != 4 || m.len() != 2 {
        return None;
    }
    let year = y.parse::<i32>().ok()?;
    let month = m.parse::<u32>().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

fn calendar_month(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let month_raw = required_str(&req.params, "month")?;
    let (year, month) =
        parse_month(&month_raw).ok_or_else(|| HandlerErr::bad_params("month must be YYYY-MM"))?;

    let school_id = visible_school(conn, &who, &req.params)?;
    let intervals = match school_id.as_deref() {
        Some(id) => load_school_intervals(conn, id).map_err(query_failed)?,
        None => Vec::new(),
    };
    let days = month_grid(year, month, &intervals)
        .ok_or_else(|| HandlerErr::bad_params("month out of range"))?;
    Ok(json!({
        "schoolId": school_id,
        "month": month_raw,
        "days": days,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "schedules.list" => schedules_list(state, req),
        "schedules.create" => schedules_create(state, req),
        "schedules.update" => schedules_update(state, req),
        "schedules.delete" => schedules_delete(state, req),
        "calendar.orderableDays" => calendar_orderable_days(state, req),
        "calendar.month" => calendar_month(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
