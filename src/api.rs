use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use shiling::calendar::solar_term::english_name;
use shiling::calendar::{LeafSources, TemporalContext};
use shiling::pipeline::request::solar_term_descriptor;
use shiling::pipeline::{
    DietType, MealPeriod, ModelAttempt, RecommendationResult, RecommendationSelections,
};
use shiling::{CalendarMoment, Language, RecommendationOutcome};

/// Moment from optional `YYYY-MM-DD` / `HH:MM` strings; missing parts default to local now.
pub fn parse_moment(date: Option<&str>, time: Option<&str>) -> Result<CalendarMoment, String> {
    let now = Local::now();
    let date = date
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| now.format("%Y-%m-%d").to_string());
    let time = time
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:02}:{:02}", now.hour(), now.minute()));
    CalendarMoment::parse(&date, &time)
}

pub fn parse_language(value: Option<&str>) -> Result<Option<Language>, String> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Language::from_str(value)
            .map(Some)
            .ok_or_else(|| format!("invalid language: {}", value)),
        None => Ok(None),
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiContextQuery {
    pub date: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApiRecommendRequest {
    pub request_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub meal_period: Option<String>,
    pub diet_type: Option<String>,
    pub health_goal: Option<String>,
    pub location: Option<String>,
    pub weather: Option<String>,
    pub language: Option<String>,
}

impl ApiRecommendRequest {
    pub fn into_selections(self) -> Result<(CalendarMoment, RecommendationSelections), String> {
        let moment = parse_moment(self.date.as_deref(), self.time.as_deref())?;
        let mut selections = RecommendationSelections::default();

        if let Some(meal) = self.meal_period.as_deref() {
            selections.meal_period = Some(
                MealPeriod::from_str(meal)
                    .ok_or_else(|| format!("invalid meal period: {}", meal))?,
            );
        }
        if let Some(diet) = self.diet_type.as_deref() {
            selections.diet_type =
                DietType::from_str(diet).ok_or_else(|| format!("invalid diet type: {}", diet))?;
        }
        selections.health_goal = self.health_goal;
        selections.location = self.location;
        selections.weather = self.weather;
        selections.language = parse_language(self.language.as_deref())?;

        Ok((moment, selections))
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiTranslateRequest {
    pub request_id: Option<String>,
    pub language: String,
}

#[derive(Debug, Serialize)]
pub struct ApiSolarTerm {
    pub name: String,
    pub english: Option<String>,
    pub relation: String,
    pub day_offset: i64,
}

#[derive(Debug, Serialize)]
pub struct ApiContextResponse {
    pub date: String,
    pub time: String,
    pub pillars: [String; 4],
    pub pillars_pinyin: [String; 4],
    pub zodiac: String,
    pub zodiac_en: Option<String>,
    pub shichen: String,
    pub pillars_display: String,
    pub lunar: String,
    pub lunar_year: i32,
    pub lunar_month: u8,
    pub lunar_day: u8,
    pub solar_term: Option<ApiSolarTerm>,
    pub descriptor_zh: String,
    pub descriptor_en: String,
    pub season: String,
    pub summary: String,
    pub sources: LeafSources,
}

impl ApiContextResponse {
    pub fn from_context(context: &TemporalContext) -> Self {
        let pillars = &context.pillars;
        Self {
            date: context.moment.date.format("%Y-%m-%d").to_string(),
            time: context.moment.time_label(),
            pillars: pillars.labels(),
            pillars_pinyin: [
                pillars.year_pillar.pinyin(),
                pillars.month_pillar.pinyin(),
                pillars.day_pillar.pinyin(),
                pillars.hour_pillar.pinyin(),
            ],
            zodiac: pillars.zodiac.clone(),
            zodiac_en: pillars.zodiac_english().map(str::to_string),
            shichen: pillars.shichen.clone(),
            pillars_display: pillars.display(&context.moment),
            lunar: context.lunar.display.clone(),
            lunar_year: context.lunar.year,
            lunar_month: context.lunar.month,
            lunar_day: context.lunar.day,
            solar_term: context.solar_term.as_ref().map(|term| ApiSolarTerm {
                name: term.name.clone(),
                english: english_name(&term.name).map(str::to_string),
                relation: term.relation.as_str().to_string(),
                day_offset: term.day_offset,
            }),
            descriptor_zh: solar_term_descriptor(context.solar_term.as_ref(), Language::Zh),
            descriptor_en: solar_term_descriptor(context.solar_term.as_ref(), Language::En),
            season: context.season.name(Language::En).to_string(),
            summary: context.summary(),
            sources: context.sources,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiRecommendResponse {
    pub request_id: String,
    pub sequence: u64,
    pub model: String,
    pub attempts: Vec<ModelAttempt>,
    pub elapsed_ms: u128,
    pub solar_term: String,
    pub season: String,
    pub context: ApiContextResponse,
    pub recommendation: RecommendationResult,
    pub warnings: Vec<String>,
}

impl ApiRecommendResponse {
    pub fn from_outcome(outcome: RecommendationOutcome, request_id: String) -> Self {
        let mut warnings = Vec::new();
        if outcome.result.degraded {
            warnings.push("generated content was not valid JSON; showing extracted text".to_string());
        }
        if !outcome.cached {
            warnings.push("a newer recommendation replaced this one in the cache".to_string());
        }
        warnings.extend(
            outcome
                .attempts
                .iter()
                .filter_map(|attempt| {
                    attempt
                        .error
                        .as_ref()
                        .map(|error| format!("{} failed: {}", attempt.model_id, error))
                }),
        );
        Self {
            request_id,
            sequence: outcome.sequence,
            model: outcome.model,
            attempts: outcome.attempts,
            elapsed_ms: outcome.elapsed_ms,
            solar_term: outcome.request.solar_term_descriptor,
            season: outcome.request.season,
            context: ApiContextResponse::from_context(&outcome.context),
            recommendation: outcome.result,
            warnings,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiTranslateResponse {
    pub request_id: String,
    pub language: Language,
    pub recommendation: RecommendationResult,
}

#[derive(Debug, Serialize)]
pub struct ApiModelsResponse {
    pub models: Vec<String>,
    pub timeout_ms: u64,
}
