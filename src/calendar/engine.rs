use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::ganzhi::fallback_four_pillars;
use super::lunar::fallback_solar_to_lunar;
use super::solar_term::{fallback_solar_term, relation_from_boundaries};
use super::{
    CalendarError, CalendarMoment, CalendarProvider, CalendarSource, FourPillars, LunarDate,
    Season, SolarTermRelation, TermTableCalendar,
};
use crate::config::CalendarConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeafSources {
    pub pillars: CalendarSource,
    pub lunar: CalendarSource,
    pub solar_term: CalendarSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemporalContext {
    pub moment: CalendarMoment,
    pub pillars: FourPillars,
    pub lunar: LunarDate,
    pub solar_term: Option<SolarTermRelation>,
    pub season: Season,
    pub sources: LeafSources,
}

impl TemporalContext {
    /// `甲辰年 丙子月 … 2024年腊月初六` followed by the term name when one is near.
    pub fn summary(&self) -> String {
        let mut line = format!("{}  {}", self.pillars.compact(), self.lunar.display);
        if let Some(term) = &self.solar_term {
            line.push_str(&format!("  {} ({})", term.name, term.relation.as_str()));
        }
        line
    }
}

/// Composes the three calendar leaves and the season classifier.
///
/// Each leaf asks the provider first and falls back on its own, so a collaborator that
/// only knows term boundaries still yields exact terms with approximate pillars.
#[derive(Clone, Default)]
pub struct TemporalEngine {
    provider: Option<Arc<dyn CalendarProvider>>,
}

impl TemporalEngine {
    pub fn new(provider: Option<Arc<dyn CalendarProvider>>) -> Self {
        Self { provider }
    }

    pub fn fallback_only() -> Self {
        Self { provider: None }
    }

    pub fn with_provider(provider: Arc<dyn CalendarProvider>) -> Self {
        Self {
            provider: Some(provider),
        }
    }

    /// Uses the configured term table as the exact collaborator when one is set.
    pub fn from_config(config: &CalendarConfig) -> Result<Self, String> {
        let Some(path) = config.term_table.as_deref() else {
            return Ok(Self::fallback_only());
        };
        let table = TermTableCalendar::load(path)?;
        info!(path = %path.display(), entries = table.len(), "loaded solar term table");
        Ok(Self::with_provider(Arc::new(table)))
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn context(&self, moment: &CalendarMoment) -> TemporalContext {
        let (pillars, pillars_source) = self.four_pillars(moment);
        let (lunar, lunar_source) = self.lunar_date(moment.date);
        let (solar_term, term_source) = self.solar_term(moment.date);
        TemporalContext {
            moment: *moment,
            pillars,
            lunar,
            solar_term,
            season: Season::of(moment.date),
            sources: LeafSources {
                pillars: pillars_source,
                lunar: lunar_source,
                solar_term: term_source,
            },
        }
    }

    pub fn four_pillars(&self, moment: &CalendarMoment) -> (FourPillars, CalendarSource) {
        self.exact_or_fallback(
            "four pillars",
            |provider| provider.four_pillars(moment),
            || fallback_four_pillars(moment),
        )
    }

    pub fn lunar_date(&self, date: NaiveDate) -> (LunarDate, CalendarSource) {
        self.exact_or_fallback(
            "lunar date",
            |provider| provider.solar_to_lunar(date),
            || fallback_solar_to_lunar(date),
        )
    }

    pub fn solar_term(&self, date: NaiveDate) -> (Option<SolarTermRelation>, CalendarSource) {
        self.exact_or_fallback(
            "solar term",
            |provider| {
                provider
                    .nearest_term_boundaries(date)
                    .map(|(previous, next)| relation_from_boundaries(date, &previous, &next))
            },
            || fallback_solar_term(date),
        )
    }

    fn exact_or_fallback<T>(
        &self,
        leaf: &str,
        exact: impl FnOnce(&dyn CalendarProvider) -> Result<T, CalendarError>,
        fallback: impl FnOnce() -> T,
    ) -> (T, CalendarSource) {
        let Some(provider) = self.provider.as_deref() else {
            return (fallback(), CalendarSource::Fallback);
        };
        match exact(provider) {
            Ok(value) => (value, CalendarSource::Exact),
            Err(CalendarError::Unsupported(what)) => {
                debug!(leaf, what, "calendar collaborator unsupported, using fallback");
                (fallback(), CalendarSource::Fallback)
            }
            Err(err) => {
                warn!(leaf, error = %err, "calendar collaborator failed, using fallback");
                (fallback(), CalendarSource::Fallback)
            }
        }
    }
}
