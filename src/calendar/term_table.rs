use std::fs;
use std::path::Path;

use chrono::NaiveDate;

use super::{CalendarError, CalendarMoment, CalendarProvider, FourPillars, LunarDate, TermBoundary};

/// Exact term boundaries read from a JSON table such as
/// `[{"name": "小寒", "date": "2025-01-05"}, ...]`.
///
/// Only boundary lookups are answered; lunar dates and pillars are left to the fallback.
#[derive(Debug, Clone)]
pub struct TermTableCalendar {
    entries: Vec<TermBoundary>,
}

impl TermTableCalendar {
    pub fn new(mut entries: Vec<TermBoundary>) -> Self {
        entries.sort_by_key(|entry| entry.date);
        Self { entries }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|err| format!("failed to read term table {}: {}", path.display(), err))?;
        Self::from_json(&contents)
            .map_err(|err| format!("failed to parse term table {}: {}", path.display(), err))
    }

    pub fn from_json(contents: &str) -> Result<Self, String> {
        let entries: Vec<TermBoundary> =
            serde_json::from_str(contents).map_err(|err| err.to_string())?;
        if entries.is_empty() {
            return Err("term table has no entries".to_string());
        }
        Ok(Self::new(entries))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.entries.first().map(|entry| entry.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.entries.last().map(|entry| entry.date)
    }
}

impl CalendarProvider for TermTableCalendar {
    fn solar_to_lunar(&self, _date: NaiveDate) -> Result<LunarDate, CalendarError> {
        Err(CalendarError::Unsupported("lunar conversion"))
    }

    fn four_pillars(&self, _moment: &CalendarMoment) -> Result<FourPillars, CalendarError> {
        Err(CalendarError::Unsupported("four pillars"))
    }

    fn nearest_term_boundaries(
        &self,
        date: NaiveDate,
    ) -> Result<(TermBoundary, TermBoundary), CalendarError> {
        let split = self.entries.partition_point(|entry| entry.date <= date);
        let previous = split
            .checked_sub(1)
            .and_then(|index| self.entries.get(index))
            .ok_or(CalendarError::OutOfRange(date))?;
        let next = self
            .entries
            .get(split)
            .ok_or(CalendarError::OutOfRange(date))?;
        Ok((previous.clone(), next.clone()))
    }
}
