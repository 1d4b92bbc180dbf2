use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Calendar days enumerated per TERM interval before the rest is dropped.
pub const TERM_DAY_CAP: usize = 400;
/// Holiday spans are short in practice, so they get a tighter bound.
pub const HOLIDAY_DAY_CAP: usize = 120;

const ISO_DATE: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleKind {
    Term,
    Holiday,
}

impl ScheduleKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TERM" => Some(Self::Term),
            "HOLIDAY" => Some(Self::Holiday),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Holiday => "HOLIDAY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInterval {
    pub kind: ScheduleKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub school_id: String,
    #[serde(default)]
    pub name: String,
}

impl ScheduleInterval {
    pub fn is_inverted(&self) -> bool {
        self.start_date > self.end_date
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveCaps {
    pub term_days: usize,
    pub holiday_days: usize,
}

impl Default for ResolveCaps {
    fn default() -> Self {
        Self {
            term_days: TERM_DAY_CAP,
            holiday_days: HOLIDAY_DAY_CAP,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderableDays {
    pub orderable: BTreeSet<NaiveDate>,
    pub holidays: BTreeSet<NaiveDate>,
}

impl OrderableDays {
    pub fn is_orderable(&self, date: NaiveDate) -> bool {
        self.orderable.contains(&date)
    }

    pub fn orderable_strings(&self) -> Vec<String> {
        self.orderable.iter().map(|d| format_iso_date(*d)).collect()
    }

    pub fn holiday_strings(&self) -> Vec<String> {
        self.holidays.iter().map(|d| format_iso_date(*d)).collect()
    }
}

pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let t = raw.trim();
    // Stored timestamps ("2024-03-04T00:00:00Z") are reduced to their day.
    let day = match t.as_bytes().get(10) {
        Some(b'T') | Some(b' ') => &t[..10],
        _ => t,
    };
    NaiveDate::parse_from_str(day, ISO_DATE).ok()
}

pub fn format_iso_date(date: NaiveDate) -> String {
    date.format(ISO_DATE).to_string()
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Mon-Fri dates in `[start, end]`, looking at no more than `cap` calendar days.
/// An inverted interval yields nothing.
pub fn expand_weekdays(
    start: NaiveDate,
    end: NaiveDate,
    cap: usize,
) -> impl Iterator<Item = NaiveDate> {
    let limit = if start > end { 0 } else { cap };
    start
        .iter_days()
        .take_while(move |d| *d <= end)
        .take(limit)
        .filter(|d| !is_weekend(*d))
}

pub fn split_by_kind(
    intervals: &[ScheduleInterval],
) -> (Vec<ScheduleInterval>, Vec<ScheduleInterval>) {
    intervals
        .iter()
        .cloned()
        .partition(|i| i.kind == ScheduleKind::Term)
}

/// Orderable days are term weekdays that are not holiday weekdays, optionally
/// limited to `[range_start, range_end]`. Holidays are never range-limited.
pub fn resolve_orderable_days(
    terms: &[ScheduleInterval],
    holidays: &[ScheduleInterval],
    range_start: Option<NaiveDate>,
    range_end: Option<NaiveDate>,
    caps: ResolveCaps,
) -> OrderableDays {
    let term_days: BTreeSet<NaiveDate> = terms
        .iter()
        .filter(|t| !t.is_inverted())
        .flat_map(|t| expand_weekdays(t.start_date, t.end_date, caps.term_days))
        .collect();
    let holiday_days: BTreeSet<NaiveDate> = holidays
        .iter()
        .filter(|h| !h.is_inverted())
        .flat_map(|h| expand_weekdays(h.start_date, h.end_date, caps.holiday_days))
        .collect();

    // A day that is both term and holiday is not orderable.
    let orderable = term_days
        .difference(&holiday_days)
        .copied()
        .filter(|d| range_start.map_or(true, |s| *d >= s))
        .filter(|d| range_end.map_or(true, |e| *d <= e))
        .collect();

    OrderableDays {
        orderable,
        holidays: holiday_days,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Holiday,
    Term,
    None,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthDay {
    pub date: String,
    pub in_month: bool,
    pub status: DayStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Status of one day for the schedule view. The first matching holiday wins
/// over any term; the interval name is shown on its first and last day.
pub fn day_status(date: NaiveDate, intervals: &[ScheduleInterval]) -> (DayStatus, Option<String>) {
    let hit = intervals
        .iter()
        .find(|i| i.kind == ScheduleKind::Holiday && i.contains(date))
        .or_else(|| {
            intervals
                .iter()
                .find(|i| i.kind == ScheduleKind::Term && i.contains(date))
        });
    match hit {
        Some(i) => {
            let status = match i.kind {
                ScheduleKind::Holiday => DayStatus::Holiday,
                ScheduleKind::Term => DayStatus::Term,
            };
            let label = (date == i.start_date || date == i.end_date)
                .then(|| i.name.clone())
                .filter(|n| !n.is_empty());
            (status, label)
        }
        None => (DayStatus::None, None),
    }
}

/// Weekday cells for a Monday-first month grid, padded to whole weeks.
pub fn month_grid(year: i32, month: u32, intervals: &[ScheduleInterval]) -> Option<Vec<MonthDay>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next_first = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last = next_first.pred_opt()?;
    let grid_start =
        first - ChronoDuration::days(i64::from(first.weekday().num_days_from_monday()));
    let grid_end =
        last + ChronoDuration::days(6 - i64::from(last.weekday().num_days_from_monday()));

    let out = grid_start
        .iter_days()
        .take_while(|d| *d <= grid_end)
        .filter(|d| !is_weekend(*d))
        .map(|d| {
            let (status, label) = day_status(d, intervals);
            MonthDay {
                date: format_iso_date(d),
                in_month: d.month() == month && d.year() == year,
                status,
                label,
            }
        })
        .collect();
    Some(out)
}
