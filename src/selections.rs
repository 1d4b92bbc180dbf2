use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::calendar::format_iso_date;

/// One day's choices: meal group id -> choice ids in the order they were picked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DaySelections(BTreeMap<String, Vec<String>>);

impl DaySelections {
    #[cfg(test)]
    pub fn from_groups<I, G, C>(groups: I) -> Self
    where
        I: IntoIterator<Item = (G, Vec<C>)>,
        G: Into<String>,
        C: Into<String>,
    {
        let mut out = Self::default();
        for (group, choices) in groups {
            out.set(group.into(), choices.into_iter().map(Into::into).collect());
        }
        out
    }

    /// True when no group has a choice picked.
    pub fn is_empty(&self) -> bool {
        self.0.values().all(|v| v.is_empty())
    }

    pub fn get(&self, group_id: &str) -> &[String] {
        self.0.get(group_id).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn set(&mut self, group_id: String, choices: Vec<String>) {
        if choices.is_empty() {
            self.0.remove(&group_id);
        } else {
            self.0.insert(group_id, choices);
        }
    }

    /// Deselects a picked choice, otherwise picks it. When the group is full the
    /// oldest pick is dropped to make room. Returns false when nothing changed.
    pub fn toggle(&mut self, group_id: &str, choice_id: &str, max_selections: usize) -> bool {
        let mut current = self.get(group_id).to_vec();
        if let Some(pos) = current.iter().position(|c| c == choice_id) {
            current.remove(pos);
        } else if max_selections == 0 {
            return false;
        } else {
            while current.len() >= max_selections {
                current.remove(0);
            }
            current.push(choice_id.to_string());
        }
        self.set(group_id.to_string(), current);
        true
    }

    pub fn choice_ids(&self) -> Vec<String> {
        self.0.values().flatten().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MealGroupRule {
    pub id: String,
    pub max_selections: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MealCatalog {
    groups: HashMap<String, usize>,
    choice_group: HashMap<String, String>,
}

impl MealCatalog {
    pub fn new<G, C>(groups: G, choices: C) -> Self
    where
        G: IntoIterator<Item = MealGroupRule>,
        C: IntoIterator<Item = (String, String)>,
    {
        Self {
            groups: groups
                .into_iter()
                .map(|g| (g.id, g.max_selections))
                .collect(),
            choice_group: choices.into_iter().collect(),
        }
    }

    pub fn max_selections(&self, group_id: &str) -> Option<usize> {
        self.groups.get(group_id).copied()
    }

    pub fn group_of(&self, choice_id: &str) -> Option<&str> {
        self.choice_group.get(choice_id).map(|s| s.as_str())
    }
}

/// Working state of an order edit: every day the parent has touched or loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderSelections {
    days: BTreeMap<NaiveDate, DaySelections>,
}

impl OrderSelections {
    /// Builds working state from persisted `(date, choice)` lines. Choices the
    /// catalog does not know are dropped, and a day holding only such choices
    /// gets no entry, so a later save leaves its stored lines alone.
    pub fn hydrate<I>(lines: I, catalog: &MealCatalog) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, String)>,
    {
        let mut days: BTreeMap<NaiveDate, DaySelections> = BTreeMap::new();
        for (date, choice_id) in lines {
            let Some(group_id) = catalog.group_of(&choice_id) else {
                continue;
            };
            let day = days.entry(date).or_default();
            let mut choices = day.get(group_id).to_vec();
            if !choices.contains(&choice_id) {
                choices.push(choice_id);
            }
            day.set(group_id.to_string(), choices);
        }
        Self { days }
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DaySelections> {
        self.days.get(&date)
    }

    pub fn day_mut(&mut self, date: NaiveDate) -> &mut DaySelections {
        self.days.entry(date).or_default()
    }

    /// Replaces each listed day wholesale; returns how many days were written.
    pub fn merge(&mut self, updates: BTreeMap<NaiveDate, DaySelections>) -> usize {
        let n = updates.len();
        self.days.extend(updates);
        n
    }

    pub fn days_from(&self, first: NaiveDate) -> impl Iterator<Item = (&NaiveDate, &DaySelections)> {
        self.days.range(first..)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .days
            .iter()
            .map(|(d, sel)| {
                (
                    format_iso_date(*d),
                    serde_json::to_value(sel).unwrap_or(serde_json::Value::Null),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }
}
