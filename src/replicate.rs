use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Included};

use crate::selections::DaySelections;

pub const MAX_REPLICATION_COUNT: i64 = 10;

/// Calendar days walked forward before giving up on finding more targets.
const NEXT_DAYS_SCAN_LIMIT: i64 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplicationMode {
    /// The next `n` orderable days after the source day.
    NextDays,
    /// The source weekday in each of the next `n` weeks, skipping holes.
    SameWeekday,
}

impl ReplicationMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "nextDays" | "next-days" => Some(Self::NextDays),
            "sameWeekday" | "weekday-weeks" => Some(Self::SameWeekday),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationRequest {
    pub source_date: NaiveDate,
    pub mode: ReplicationMode,
    pub n: i64,
}

impl ReplicationRequest {
    pub fn run(
        &self,
        base: &DaySelections,
        orderable: &BTreeSet<NaiveDate>,
    ) -> BTreeMap<NaiveDate, DaySelections> {
        replicate(base, self.source_date, self.mode, self.n, orderable)
    }
}

/// Copies `base` onto the target days picked by `mode`. Only orderable days are
/// ever returned and the source day never is. Each value is its own copy.
///
/// An empty `base`, or `n` outside `1..=10`, produces no targets.
pub fn replicate(
    base: &DaySelections,
    base_date: NaiveDate,
    mode: ReplicationMode,
    n: i64,
    orderable: &BTreeSet<NaiveDate>,
) -> BTreeMap<NaiveDate, DaySelections> {
    if base.is_empty() || !(1..=MAX_REPLICATION_COUNT).contains(&n) {
        return BTreeMap::new();
    }
    // n is in 1..=10 here
    let count = n as usize;

    let targets: Vec<NaiveDate> = match mode {
        ReplicationMode::NextDays => {
            let horizon = base_date
                .checked_add_signed(ChronoDuration::days(NEXT_DAYS_SCAN_LIMIT))
                .unwrap_or(NaiveDate::MAX);
            orderable
                .range((Excluded(base_date), Included(horizon)))
                .take(count)
                .copied()
                .collect()
        }
        ReplicationMode::SameWeekday => (1..=n)
            .map_while(|i| base_date.checked_add_signed(ChronoDuration::days(7 * i)))
            .filter(|d| orderable.contains(d))
            .collect(),
    };

    targets.into_iter().map(|d| (d, base.clone())).collect()
}
