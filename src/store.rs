use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::access::PupilRef;
use crate::calendar::{format_iso_date, parse_iso_date, ScheduleInterval, ScheduleKind};
use crate::selections::{MealCatalog, MealGroupRule};

pub fn now_ts() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    #[serde(serialize_with = "ser_date")]
    pub date: NaiveDate,
    pub choice_ids: Vec<String>,
}

/// Everything one save writes. Each listed date is replaced wholesale; an
/// empty `choice_ids` clears that date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveBatch {
    pub pupil_id: String,
    pub orders: Vec<OrderLine>,
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("cannot save orders for past date {0}")]
    PastDate(NaiveDate),
    #[error("pupil not found")]
    PupilNotFound,
    #[error("unknown meal choice {0}")]
    UnknownChoice(String),
    #[error("meal group {group} allows at most {max} selection(s) on {date}")]
    TooManySelections {
        group: String,
        max: usize,
        date: NaiveDate,
    },
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
    #[error(transparent)]
    Load(#[from] anyhow::Error),
}

impl SaveError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PastDate(_) => "past_date",
            Self::PupilNotFound => "not_found",
            Self::UnknownChoice(_) | Self::TooManySelections { .. } => "bad_params",
            Self::Db(_) | Self::Load(_) => "save_failed",
        }
    }
}

fn ser_date<S: serde::Serializer>(d: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&format_iso_date(*d))
}

/// A batch touching any day before `today` is refused as a whole.
pub fn check_batch_dates(batch: &SaveBatch, today: NaiveDate) -> Result<(), SaveError> {
    match batch.orders.iter().map(|o| o.date).filter(|d| *d < today).min() {
        Some(past) => Err(SaveError::PastDate(past)),
        None => Ok(()),
    }
}

fn check_batch_choices(batch: &SaveBatch, catalog: &MealCatalog) -> Result<(), SaveError> {
    for line in &batch.orders {
        let mut per_group: BTreeMap<&str, usize> = BTreeMap::new();
        for choice in &line.choice_ids {
            let group = catalog
                .group_of(choice)
                .ok_or_else(|| SaveError::UnknownChoice(choice.clone()))?;
            *per_group.entry(group).or_default() += 1;
        }
        for (group, count) in per_group {
            let max = catalog.max_selections(group).unwrap_or(0);
            if count > max {
                return Err(SaveError::TooManySelections {
                    group: group.to_string(),
                    max,
                    date: line.date,
                });
            }
        }
    }
    Ok(())
}

/// Validates then replaces every date in the batch inside one transaction.
/// Returns the number of dates that now hold an order.
pub fn save_order_batch(
    conn: &Connection,
    batch: &SaveBatch,
    today: NaiveDate,
) -> Result<usize, SaveError> {
    check_batch_dates(batch, today)?;
    if find_pupil(conn, &batch.pupil_id)?.is_none() {
        return Err(SaveError::PupilNotFound);
    }
    let catalog = load_catalog(conn)?;
    let deduped: Vec<OrderLine> = batch
        .orders
        .iter()
        .map(|o| {
            let mut seen = BTreeSet::new();
            OrderLine {
                date: o.date,
                choice_ids: o
                    .choice_ids
                    .iter()
                    .filter(|c| seen.insert(c.as_str()))
                    .cloned()
                    .collect(),
            }
        })
        .collect();
    check_batch_choices(
        &SaveBatch {
            pupil_id: batch.pupil_id.clone(),
            orders: deduped.clone(),
        },
        &catalog,
    )?;

    let tx = conn.unchecked_transaction()?;
    let ts = now_ts();
    let mut written = 0usize;
    for line in &deduped {
        let date = format_iso_date(line.date);
        tx.execute(
            "DELETE FROM order_items WHERE order_id IN (
                SELECT id FROM lunch_orders WHERE pupil_id = ? AND order_date = ?
             )",
            params![batch.pupil_id, date],
        )?;
        tx.execute(
            "DELETE FROM lunch_orders WHERE pupil_id = ? AND order_date = ?",
            params![batch.pupil_id, date],
        )?;
        if line.choice_ids.is_empty() {
            continue;
        }
        let order_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO lunch_orders(id, pupil_id, order_date, created_at) VALUES(?, ?, ?, ?)",
            params![order_id, batch.pupil_id, date, ts],
        )?;
        for choice in &line.choice_ids {
            tx.execute(
                "INSERT INTO order_items(id, order_id, choice_id) VALUES(?, ?, ?)",
                params![Uuid::new_v4().to_string(), order_id, choice],
            )?;
        }
        written += 1;
    }
    // Dropping an uncommitted transaction rolls it back.
    tx.commit()?;
    Ok(written)
}

/// Persisted `(date, choice)` lines for a pupil in `[start, end]`.
pub fn load_order_lines(
    conn: &Connection,
    pupil_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<(NaiveDate, String)>> {
    let mut stmt = conn.prepare(
        "SELECT o.order_date, i.choice_id
         FROM lunch_orders o
         JOIN order_items i ON i.order_id = o.id
         WHERE o.pupil_id = ? AND o.order_date >= ? AND o.order_date <= ?
         ORDER BY o.order_date, i.rowid",
    )?;
    let rows = stmt
        .query_map(
            params![pupil_id, format_iso_date(start), format_iso_date(end)],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)),
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(d, c)| parse_iso_date(&d).map(|d| (d, c)))
        .collect())
}

pub fn list_orders(
    conn: &Connection,
    pupil_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<OrderLine>> {
    let mut by_day: BTreeMap<NaiveDate, Vec<String>> = BTreeMap::new();
    for (date, choice) in load_order_lines(conn, pupil_id, start, end)? {
        by_day.entry(date).or_default().push(choice);
    }
    Ok(by_day
        .into_iter()
        .map(|(date, choice_ids)| OrderLine { date, choice_ids })
        .collect())
}

pub fn find_pupil(conn: &Connection, pupil_id: &str) -> anyhow::Result<Option<PupilRef>> {
    let found = conn
        .query_row(
            "SELECT p.id, p.parent_id, p.classroom_id, c.school_id
             FROM pupils p
             JOIN classrooms c ON c.id = p.classroom_id
             WHERE p.id = ?",
            [pupil_id],
            |r| {
                Ok(PupilRef {
                    id: r.get(0)?,
                    parent_id: r.get(1)?,
                    classroom_id: r.get(2)?,
                    school_id: r.get(3)?,
                })
            },
        )
        .optional()
        .context("pupil lookup failed")?;
    Ok(found)
}

pub fn load_catalog(conn: &Connection) -> anyhow::Result<MealCatalog> {
    let mut gstmt = conn.prepare("SELECT id, max_selections FROM meal_groups")?;
    let groups = gstmt
        .query_map([], |r| {
            Ok(MealGroupRule {
                id: r.get(0)?,
                max_selections: r.get::<_, i64>(1)?.max(0) as usize,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    let mut cstmt = conn.prepare("SELECT id, group_id FROM meal_choices")?;
    let choices = cstmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(MealCatalog::new(groups, choices))
}

/// All intervals of a school, oldest first. Rows with unreadable dates are skipped.
pub fn load_school_intervals(
    conn: &Connection,
    school_id: &str,
) -> anyhow::Result<Vec<ScheduleInterval>> {
    let mut stmt = conn.prepare(
        "SELECT kind, start_date, end_date, name
         FROM schedules
         WHERE school_id = ?
         ORDER BY start_date, rowid",
    )?;
    let rows = stmt
        .query_map([school_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(kind, start, end, name)| {
            Some(ScheduleInterval {
                kind: ScheduleKind::parse(&kind)?,
                start_date: parse_iso_date(&start)?,
                end_date: parse_iso_date(&end)?,
                school_id: school_id.to_string(),
                name,
            })
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrepScope {
    All,
    School(String),
    Classroom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepRow {
    pub group: String,
    pub choice: String,
    pub count: i64,
}

/// How many of each choice the kitchen must prepare on `date`.
pub fn kitchen_prep_summary(
    conn: &Connection,
    date: NaiveDate,
    scope: &PrepScope,
) -> anyhow::Result<Vec<PrepRow>> {
    let (filter, arg) = match scope {
        PrepScope::All => ("", None),
        PrepScope::School(id) => ("AND c.school_id = ?2", Some(id.as_str())),
        PrepScope::Classroom(id) => ("AND p.classroom_id = ?2", Some(id.as_str())),
    };
    let sql = format!(
        "SELECT g.name, m.name, COUNT(*)
         FROM order_items i
         JOIN lunch_orders o ON o.id = i.order_id
         JOIN pupils p ON p.id = o.pupil_id
         JOIN classrooms c ON c.id = p.classroom_id
         JOIN meal_choices m ON m.id = i.choice_id
         JOIN meal_groups g ON g.id = m.group_id
         WHERE o.order_date = ?1 {}
         GROUP BY m.id
         ORDER BY g.name, m.name",
        filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let map_row = |r: &rusqlite::Row<'_>| {
        Ok(PrepRow {
            group: r.get(0)?,
            choice: r.get(1)?,
            count: r.get(2)?,
        })
    };
    let date_s = format_iso_date(date);
    let rows = match arg {
        Some(a) => stmt
            .query_map(params![date_s, a], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
        None => stmt
            .query_map(params![date_s], map_row)?
            .collect::<Result<Vec<_>, _>>()?,
    };
    Ok(rows)
}
