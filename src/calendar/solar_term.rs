use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::days_between;
use crate::Language;

/// Largest offset, in days, that still counts as being next to a term boundary.
pub const PROXIMITY_DAYS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SolarTerm {
    pub name: &'static str,
    pub english: &'static str,
    pub anchor_month: u32,
    pub day_range_start: u32,
    pub day_range_end: u32,
}

const fn term(
    name: &'static str,
    english: &'static str,
    anchor_month: u32,
    day_range_start: u32,
    day_range_end: u32,
) -> SolarTerm {
    SolarTerm {
        name,
        english,
        anchor_month,
        day_range_start,
        day_range_end,
    }
}

/// The 24 terms in order of occurrence, starting from 立春.
pub static SOLAR_TERM_CATALOG: [SolarTerm; 24] = [
    term("立春", "Start of Spring", 2, 3, 5),
    term("雨水", "Rain Water", 2, 18, 20),
    term("惊蛰", "Awakening of Insects", 3, 5, 7),
    term("春分", "Spring Equinox", 3, 20, 22),
    term("清明", "Clear and Bright", 4, 4, 6),
    term("谷雨", "Grain Rain", 4, 19, 21),
    term("立夏", "Start of Summer", 5, 5, 7),
    term("小满", "Grain Buds", 5, 20, 22),
    term("芒种", "Grain in Ear", 6, 5, 7),
    term("夏至", "Summer Solstice", 6, 21, 22),
    term("小暑", "Minor Heat", 7, 6, 8),
    term("大暑", "Major Heat", 7, 22, 24),
    term("立秋", "Start of Autumn", 8, 7, 9),
    term("处暑", "End of Heat", 8, 22, 24),
    term("白露", "White Dew", 9, 7, 9),
    term("秋分", "Autumn Equinox", 9, 22, 24),
    term("寒露", "Cold Dew", 10, 8, 10),
    term("霜降", "Frost's Descent", 10, 23, 25),
    term("立冬", "Start of Winter", 11, 7, 8),
    term("小雪", "Minor Snow", 11, 22, 23),
    term("大雪", "Major Snow", 12, 6, 8),
    term("冬至", "Winter Solstice", 12, 21, 23),
    term("小寒", "Minor Cold", 1, 5, 7),
    term("大寒", "Major Cold", 1, 19, 21),
];

pub fn english_name(name: &str) -> Option<&'static str> {
    SOLAR_TERM_CATALOG
        .iter()
        .find(|term| term.name == name)
        .map(|term| term.english)
}

pub fn display_name(name: &str, language: Language) -> String {
    match language {
        Language::Zh => name.to_string(),
        Language::En => english_name(name).unwrap_or(name).to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TermRelation {
    Today,
    Yesterday,
    DayBeforeYesterday,
    Tomorrow,
    DayAfterTomorrow,
    /// Inside a term's window but not next to its first day. Only the catalog path reports it.
    Current,
}

impl TermRelation {
    /// Positive offsets mean the term began that many days ago.
    pub fn from_offset(offset: i64) -> Option<Self> {
        match offset {
            0 => Some(TermRelation::Today),
            1 => Some(TermRelation::Yesterday),
            2 => Some(TermRelation::DayBeforeYesterday),
            -1 => Some(TermRelation::Tomorrow),
            -2 => Some(TermRelation::DayAfterTomorrow),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TermRelation::Today => "today",
            TermRelation::Yesterday => "yesterday",
            TermRelation::DayBeforeYesterday => "dayBeforeYesterday",
            TermRelation::Tomorrow => "tomorrow",
            TermRelation::DayAfterTomorrow => "dayAfterTomorrow",
            TermRelation::Current => "current",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolarTermRelation {
    pub name: String,
    pub relation: TermRelation,
    pub day_offset: i64,
}

/// A concrete term boundary reported by a calendar collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermBoundary {
    pub name: String,
    pub date: NaiveDate,
}

/// Catalog scan. The first entry within two days of its start wins; otherwise a date
/// inside some entry's widened window is reported as `Current`.
pub fn locate_in_catalog(catalog: &[SolarTerm], month: u32, day: u32) -> Option<SolarTermRelation> {
    let mut inside: Option<&SolarTerm> = None;
    for term in catalog.iter().filter(|term| term.anchor_month == month) {
        let window_start = term.day_range_start as i64 - PROXIMITY_DAYS;
        let window_end = term.day_range_end as i64 + PROXIMITY_DAYS;
        let day = day as i64;
        if day < window_start || day > window_end {
            continue;
        }
        let offset = day - term.day_range_start as i64;
        if let Some(relation) = TermRelation::from_offset(offset) {
            return Some(SolarTermRelation {
                name: term.name.to_string(),
                relation,
                day_offset: offset,
            });
        }
        inside.get_or_insert(term);
    }
    inside.map(|term| SolarTermRelation {
        name: term.name.to_string(),
        relation: TermRelation::Current,
        day_offset: 0,
    })
}

pub fn fallback_solar_term(date: NaiveDate) -> Option<SolarTermRelation> {
    use chrono::Datelike;
    locate_in_catalog(&SOLAR_TERM_CATALOG, date.month(), date.day())
}

/// Relation from concrete boundaries. The preceding term is preferred.
pub fn relation_from_boundaries(
    date: NaiveDate,
    previous: &TermBoundary,
    next: &TermBoundary,
) -> Option<SolarTermRelation> {
    let since_previous = days_between(previous.date, date);
    if (0..=PROXIMITY_DAYS).contains(&since_previous) {
        return TermRelation::from_offset(since_previous).map(|relation| SolarTermRelation {
            name: previous.name.clone(),
            relation,
            day_offset: since_previous,
        });
    }
    let until_next = days_between(date, next.date);
    if (0..=PROXIMITY_DAYS).contains(&until_next) {
        return TermRelation::from_offset(-until_next).map(|relation| SolarTermRelation {
            name: next.name.clone(),
            relation,
            day_offset: -until_next,
        });
    }
    None
}
