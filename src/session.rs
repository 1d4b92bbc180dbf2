use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeSet;

use crate::calendar::{format_iso_date, OrderableDays};
use crate::replicate::ReplicationRequest;
use crate::selections::{DaySelections, MealCatalog, OrderSelections};
use crate::store::{OrderLine, SaveBatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveState {
    Clean,
    Dirty,
    Saving,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("{0} is not an orderable day")]
    NotOrderable(NaiveDate),
    #[error("unknown meal group {0}")]
    UnknownGroup(String),
    #[error("choice {choice} is not in meal group {group}")]
    ChoiceNotInGroup { group: String, choice: String },
    #[error("there are unsaved changes; confirm discard first")]
    UnsavedChanges,
    #[error("a save is already in progress")]
    SaveInProgress,
    #[error("no save in progress")]
    NotSaving,
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotOrderable(_) => "not_orderable",
            Self::UnknownGroup(_) | Self::ChoiceNotInGroup { .. } => "bad_params",
            Self::UnsavedChanges => "unsaved_changes",
            Self::SaveInProgress | Self::NotSaving => "bad_state",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationOutcome {
    pub requested: i64,
    /// Days actually written; may be fewer than requested.
    pub copied_dates: Vec<String>,
    pub nothing_to_copy: bool,
}

impl ReplicationOutcome {
    pub fn copied(&self) -> usize {
        self.copied_dates.len()
    }
}

/// One parent's in-progress edit of one pupil's orders.
#[derive(Debug, Clone)]
pub struct EditSession {
    pupil_id: String,
    window_start: NaiveDate,
    window_end: NaiveDate,
    days: OrderableDays,
    catalog: MealCatalog,
    selections: OrderSelections,
    state: SaveState,
}

impl EditSession {
    /// `days` should be resolved without a range so replication can reach
    /// past the visible window.
    pub fn open(
        pupil_id: impl Into<String>,
        window_start: NaiveDate,
        window_end: NaiveDate,
        days: OrderableDays,
        catalog: MealCatalog,
        selections: OrderSelections,
    ) -> Self {
        Self {
            pupil_id: pupil_id.into(),
            window_start,
            window_end,
            days,
            catalog,
            selections,
            state: SaveState::Clean,
        }
    }

    pub fn pupil_id(&self) -> &str {
        &self.pupil_id
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    pub fn selections(&self) -> &OrderSelections {
        &self.selections
    }

    /// Leaving the session throws away edits, so a dirty one needs `confirm`.
    pub fn check_discard(&self, confirm: bool) -> Result<(), SessionError> {
        match self.state {
            SaveState::Clean => Ok(()),
            SaveState::Dirty | SaveState::Saving if confirm => Ok(()),
            SaveState::Dirty | SaveState::Saving => Err(SessionError::UnsavedChanges),
        }
    }

    fn check_editable(&self, date: NaiveDate, today: NaiveDate) -> Result<(), SessionError> {
        if self.state == SaveState::Saving {
            return Err(SessionError::SaveInProgress);
        }
        if date < today || !self.days.is_orderable(date) {
            return Err(SessionError::NotOrderable(date));
        }
        Ok(())
    }

    pub fn select(
        &mut self,
        date: NaiveDate,
        group_id: &str,
        choice_id: &str,
        today: NaiveDate,
    ) -> Result<&DaySelections, SessionError> {
        self.check_editable(date, today)?;
        let max = self
            .catalog
            .max_selections(group_id)
            .ok_or_else(|| SessionError::UnknownGroup(group_id.to_string()))?;
        if self.catalog.group_of(choice_id) != Some(group_id) {
            return Err(SessionError::ChoiceNotInGroup {
                group: group_id.to_string(),
                choice: choice_id.to_string(),
            });
        }
        if self.selections.day_mut(date).toggle(group_id, choice_id, max) {
            self.state = SaveState::Dirty;
        }
        Ok(self.selections.day_mut(date))
    }

    /// Copies the source day forward. Targets before `today` are never written.
    pub fn replicate(
        &mut self,
        req: &ReplicationRequest,
        today: NaiveDate,
    ) -> Result<ReplicationOutcome, SessionError> {
        if self.state == SaveState::Saving {
            return Err(SessionError::SaveInProgress);
        }
        let base = self
            .selections
            .day(req.source_date)
            .cloned()
            .unwrap_or_default();
        if base.is_empty() {
            return Ok(ReplicationOutcome {
                requested: req.n,
                copied_dates: Vec::new(),
                nothing_to_copy: true,
            });
        }
        let future: BTreeSet<NaiveDate> = self.days.orderable.range(today..).copied().collect();
        let updates = req.run(&base, &future);
        let copied_dates = updates.keys().map(|d| format_iso_date(*d)).collect();
        if self.selections.merge(updates) > 0 {
            self.state = SaveState::Dirty;
        }
        Ok(ReplicationOutcome {
            requested: req.n,
            copied_dates,
            nothing_to_copy: false,
        })
    }

    /// Moves to `Saving` and returns every working day from `today` on.
    pub fn begin_save(&mut self, today: NaiveDate) -> Result<SaveBatch, SessionError> {
        if self.state == SaveState::Saving {
            return Err(SessionError::SaveInProgress);
        }
        let orders = self
            .selections
            .days_from(today)
            .map(|(date, sel)| OrderLine {
                date: *date,
                choice_ids: sel.choice_ids(),
            })
            .collect();
        self.state = SaveState::Saving;
        Ok(SaveBatch {
            pupil_id: self.pupil_id.clone(),
            orders,
        })
    }

    pub fn finish_save(&mut self, succeeded: bool) -> Result<(), SessionError> {
        if self.state != SaveState::Saving {
            return Err(SessionError::NotSaving);
        }
        self.state = if succeeded {
            SaveState::Clean
        } else {
            SaveState::Dirty
        };
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "pupilId": self.pupil_id,
            "start": format_iso_date(self.window_start),
            "end": format_iso_date(self.window_end),
            "state": self.state,
            "orderable": self
                .days
                .orderable
                .iter()
                .filter(|d| **d >= self.window_start && **d <= self.window_end)
                .map(|d| format_iso_date(*d))
                .collect::<Vec<_>>(),
            "holidays": self.days.holiday_strings(),
            "selections": self.selections.to_json(),
        })
    }
}
