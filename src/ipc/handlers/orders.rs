use chrono::NaiveDate;

use crate::access::{require_parent_of, require_school_staff, Identity, PupilRef, Role};
use crate::calendar::format_iso_date;
use crate::ipc::handlers::schedules::school_orderable_days;
use crate::ipc::handlers::setup::ordering_settings;
use crate::ipc::helpers::{
    confirm_discard, db_conn, identity, parse_string_array, query_failed, required_date,
    required_date_range, required_str, respond, HandlerErr, GENERIC_SAVE_FAILURE,
};
use crate::ipc::types::{AppState, Request};
use crate::replicate::{ReplicationMode, ReplicationRequest, MAX_REPLICATION_COUNT};
use crate::selections::OrderSelections;
use crate::session::EditSession;
use crate::store::{
    find_pupil, list_orders, load_catalog, load_order_lines, save_order_batch, OrderLine,
    SaveBatch,
};
use rusqlite::Connection;
use serde_json::{json, Value};

fn load_pupil(conn: &Connection, pupil_id: &str) -> Result<PupilRef, HandlerErr> {
    find_pupil(conn, pupil_id)
        .map_err(query_failed)?
        .ok_or_else(|| HandlerErr::not_found("pupil"))
}

/// Parents read their own pupils' orders; staff read their school's.
fn require_reader(who: &Identity, pupil: &PupilRef) -> Result<(), HandlerErr> {
    match who.role {
        Role::SchoolAdmin => Ok(require_school_staff(who, &pupil.school_id)?),
        Role::Admin | Role::User => Ok(require_parent_of(who, pupil)?),
    }
}

fn no_session() -> HandlerErr {
    HandlerErr::new("no_session", "no order session is open")
}

fn orders_list(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let pupil_id = required_str(&req.params, "pupilId")?;
    let (start, end) = required_date_range(&req.params)?;
    let pupil = load_pupil(conn, &pupil_id)?;
    require_reader(&who, &pupil)?;
    let orders = list_orders(conn, &pupil_id, start, end).map_err(query_failed)?;
    Ok(json!({
        "pupilId": pupil_id,
        "classroomId": pupil.classroom_id,
        "orders": orders,
    }))
}

fn parse_order_lines(params: &Value) -> Result<Vec<OrderLine>, HandlerErr> {
    let Some(raw) = params.get("orders").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("orders must be an array"));
    };
    raw.iter()
        .map(|line| {
            Ok(OrderLine {
                date: required_date(line, "date")?,
                choice_ids: parse_string_array(line, "choiceIds")?,
            })
        })
        .collect()
}

fn orders_save(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let pupil_id = required_str(&req.params, "pupilId")?;
    let orders = parse_order_lines(&req.params)?;
    let pupil = load_pupil(conn, &pupil_id)?;
    require_parent_of(&who, &pupil)?;

    let today = state.config.today();
    // Clearing a day is always allowed; new lunches need an open day.
    let days = school_orderable_days(conn, &pupil.school_id, None, None)?;
    if let Some(closed) = orders
        .iter()
        .find(|o| o.date >= today && !o.choice_ids.is_empty() && !days.is_orderable(o.date))
    {
        return Err(HandlerErr::new(
            "not_orderable",
            format!("{} is not an orderable day", format_iso_date(closed.date)),
        ));
    }

    let batch = SaveBatch { pupil_id, orders };
    match save_order_batch(conn, &batch, today) {
        Ok(written) => {
            tracing::info!(pupil = %batch.pupil_id, dates = batch.orders.len(), written, "orders saved");
            Ok(json!({ "saved": batch.orders.len(), "ordered": written }))
        }
        Err(e) => {
            tracing::warn!(pupil = %batch.pupil_id, error = %e, "order save rejected");
            Err(e.into())
        }
    }
}

fn session_open(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    if let Some(current) = state.session.as_ref() {
        current.check_discard(confirm_discard(&req.params))?;
    }

    let conn = db_conn(&state.db)?;
    let who = identity(req)?;
    let pupil_id = required_str(&req.params, "pupilId")?;
    let (start, end) = required_date_range(&req.params)?;
    let pupil = load_pupil(conn, &pupil_id)?;
    require_parent_of(&who, &pupil)?;

    // Unbounded so replication can reach past the visible window.
    let days = school_orderable_days(conn, &pupil.school_id, None, None)?;
    let catalog = load_catalog(conn).map_err(query_failed)?;
    let lines = load_order_lines(conn, &pupil_id, start, end).map_err(query_failed)?;
    let selections = OrderSelections::hydrate(lines, &catalog);

    let session = EditSession::open(pupil_id, start, end, days, catalog, selections);
    let out = session.to_json();
    if state.session.replace(session).is_some() {
        tracing::info!("previous order session discarded");
    }
    tracing::debug!(pupil = %pupil.id, start = %start, end = %end, "order session opened");
    Ok(out)
}

fn session_get(state: &AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let session = state.session.as_ref().ok_or_else(no_session)?;
    Ok(session.to_json())
}

fn session_select(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let date = required_date(&req.params, "date")?;
    let group_id = required_str(&req.params, "groupId")?;
    let choice_id = required_str(&req.params, "choiceId")?;
    let today = state.config.today();
    let session = state.session.as_mut().ok_or_else(no_session)?;
    let day = session.select(date, &group_id, &choice_id, today)?.clone();
    Ok(json!({
        "date": format_iso_date(date),
        "selections": day,
        "state": session.state(),
    }))
}

fn replication_count(
    conn: &Connection,
    params: &Value,
    mode: ReplicationMode,
) -> Result<i64, HandlerErr> {
    let settings = ordering_settings(conn).map_err(query_failed)?;
    let n = match params.get("n") {
        None | Some(Value::Null) => settings.default_count(mode),
        Some(v) => v
            .as_i64()
            .ok_or_else(|| HandlerErr::bad_params("n must be integer"))?,
    };
    // Counts outside the engine's own bound copy nothing; only the
    // workspace's tighter limit is an error.
    if n <= MAX_REPLICATION_COUNT && n > settings.max_replication_count {
        return Err(HandlerErr::bad_params(format!(
            "n must be at most {}",
            settings.max_replication_count
        )));
    }
    Ok(n)
}

fn session_replicate(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    let source_date = required_date(&req.params, "date")?;
    let mode_raw = required_str(&req.params, "mode")?;
    let mode = ReplicationMode::parse(&mode_raw)
        .ok_or_else(|| HandlerErr::bad_params("mode must be nextDays or sameWeekday"))?;
    let conn = db_conn(&state.db)?;
    let n = replication_count(conn, &req.params, mode)?;
    let today = state.config.today();

    let session = state.session.as_mut().ok_or_else(no_session)?;
    let request = ReplicationRequest {
        source_date,
        mode,
        n,
    };
    let outcome = session.replicate(&request, today)?;
    tracing::debug!(
        source = %source_date,
        ?mode,
        requested = n,
        copied = outcome.copied(),
        "replicated selections"
    );
    Ok(json!({
        "requested": outcome.requested,
        "copied": outcome.copied(),
        "copiedDates": outcome.copied_dates,
        "nothingToCopy": outcome.nothing_to_copy,
        "state": session.state(),
    }))
}

fn session_save(state: &mut AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let today = state.config.today();
    let conn = db_conn(&state.db)?;
    let session = state.session.as_mut().ok_or_else(no_session)?;
    let batch = session.begin_save(today)?;

    let result = save_order_batch(conn, &batch, today);
    session.finish_save(result.is_ok())?;
    match result {
        Ok(written) => {
            tracing::info!(pupil = %batch.pupil_id, dates = batch.orders.len(), written, "orders saved");
            Ok(json!({
                "saved": batch.orders.len(),
                "ordered": written,
                "state": session.state(),
            }))
        }
        Err(e) => {
            tracing::warn!(pupil = %batch.pupil_id, error = %e, "order session save failed");
            let message = e.to_string();
            let message = if message.trim().is_empty() {
                GENERIC_SAVE_FAILURE.to_string()
            } else {
                message
            };
            Err(HandlerErr::new("save_failed", message)
                .with_details(json!({ "reason": e.code() })))
        }
    }
}

fn session_discard(state: &mut AppState, req: &Request) -> Result<Value, HandlerErr> {
    if let Some(current) = state.session.as_ref() {
        current.check_discard(confirm_discard(&req.params))?;
    }
    let discarded = state.session.take().is_some();
    Ok(json!({ "discarded": discarded }))
}

/// Days the open session would write on save, for hosts that preview.
fn pending_dates(session: &EditSession, today: NaiveDate) -> Vec<String> {
    session
        .selections()
        .days_from(today)
        .map(|(d, _)| format_iso_date(*d))
        .collect()
}

fn session_pending(state: &AppState, _req: &Request) -> Result<Value, HandlerErr> {
    let session = state.session.as_ref().ok_or_else(no_session)?;
    Ok(json!({
        "pupilId": session.pupil_id(),
        "dates": pending_dates(session, state.config.today()),
        "state": session.state(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "orders.list" => orders_list(state, req),
        "orders.save" => orders_save(state, req),
        "orders.session.open" => session_open(state, req),
        "orders.session.get" => session_get(state, req),
        "orders.session.select" => session_select(state, req),
        "orders.session.replicate" => session_replicate(state, req),
        "orders.session.pending" => session_pending(state, req),
        "orders.session.save" => session_save(state, req),
        "orders.session.discard" => session_discard(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
