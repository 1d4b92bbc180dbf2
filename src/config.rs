use anyhow::Context;
use chrono::NaiveDate;
use std::path::PathBuf;

use crate::calendar::parse_iso_date;

const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub log_filter: Option<String>,
    /// Pins "today" for fixtures and tests.
    pub today_override: Option<NaiveDate>,
    pub workspace: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let log_filter = std::env::var("LUNCHD_LOG")
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .filter(|s| !s.trim().is_empty());
        let today_override = match std::env::var("LUNCHD_TODAY") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                parse_iso_date(&raw)
                    .with_context(|| format!("LUNCHD_TODAY must be YYYY-MM-DD, got {:?}", raw))?,
            ),
            _ => None,
        };
        let workspace = std::env::var_os("LUNCHD_WORKSPACE")
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty());
        Ok(Self {
            log_filter,
            today_override,
            workspace,
        })
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    /// Current day, local time. Time of day never matters to ordering rules.
    pub fn today(&self) -> NaiveDate {
        self.today_override
            .unwrap_or_else(|| chrono::Local::now().date_naive())
    }
}
