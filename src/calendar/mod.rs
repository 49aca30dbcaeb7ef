//! Temporal context: stem-branch pillars, lunar date, solar-term proximity and season.
//!
//! Every leaf has an exact path that asks a [`CalendarProvider`] and a fallback path
//! computed from static tables. The fallback never fails for a valid [`CalendarMoment`].

pub mod engine;
pub mod ganzhi;
pub mod lunar;
pub mod season;
pub mod solar_term;
pub mod term_table;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use engine::{LeafSources, TemporalContext, TemporalEngine};
pub use ganzhi::{FourPillars, PillarUnit, StemBranch};
pub use lunar::LunarDate;
pub use season::Season;
pub use solar_term::{SolarTerm, SolarTermRelation, TermBoundary, TermRelation, SOLAR_TERM_CATALOG};
pub use term_table::TermTableCalendar;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CalendarMoment {
    pub date: NaiveDate,
    pub hour: u8,
    pub minute: u8,
}

impl CalendarMoment {
    pub fn new(date: NaiveDate, hour: u8, minute: u8) -> Result<Self, String> {
        if hour > 23 {
            return Err(format!("invalid hour (0-23): {}", hour));
        }
        if minute > 59 {
            return Err(format!("invalid minute (0-59): {}", minute));
        }
        Ok(Self { date, hour, minute })
    }

    pub fn from_ymd_hm(year: i32, month: u32, day: u32, hour: u8, minute: u8) -> Result<Self, String> {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or_else(|| format!("invalid date: {:04}-{:02}-{:02}", year, month, day))?;
        Self::new(date, hour, minute)
    }

    /// Parses `YYYY-MM-DD` and `HH:MM`.
    pub fn parse(date: &str, time: &str) -> Result<Self, String> {
        let date = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d")
            .map_err(|err| format!("invalid date '{}': {}", date.trim(), err))?;
        let (hour, minute) = time
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("invalid time '{}': expected HH:MM", time.trim()))?;
        let hour = hour
            .trim()
            .parse::<u8>()
            .map_err(|err| format!("invalid hour '{}': {}", hour, err))?;
        let minute = minute
            .trim()
            .parse::<u8>()
            .map_err(|err| format!("invalid minute '{}': {}", minute, err))?;
        Self::new(date, hour, minute)
    }

    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    pub fn time_label(&self) -> String {
        format!("{:02}:{:02}", self.hour, self.minute)
    }
}

/// Which implementation produced a temporal leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarSource {
    Exact,
    Fallback,
}

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar collaborator does not support {0}")]
    Unsupported(&'static str),
    #[error("date outside the calendar table: {0}")]
    OutOfRange(NaiveDate),
    #[error("calendar collaborator failed: {0}")]
    Failed(String),
}

/// External astronomical calendar. Any call may fail; the engine falls back per leaf.
pub trait CalendarProvider: Send + Sync {
    fn solar_to_lunar(&self, date: NaiveDate) -> Result<LunarDate, CalendarError>;

    fn four_pillars(&self, moment: &CalendarMoment) -> Result<FourPillars, CalendarError>;

    /// Nearest term boundary on or before `date`, and the first one after it.
    fn nearest_term_boundaries(
        &self,
        date: NaiveDate,
    ) -> Result<(TermBoundary, TermBoundary), CalendarError>;
}

/// Signed whole-day distance from `from` to `to`.
pub(crate) fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    to.signed_duration_since(from).num_days()
}
