use serde::{Deserialize, Serialize};

use crate::calendar::solar_term::display_name;
use crate::calendar::{SolarTermRelation, TemporalContext, TermRelation};
use crate::config::DefaultsConfig;
use crate::Language;

/// Term named when the date is not near any term boundary.
pub const DEFAULT_SOLAR_TERM: &str = "立春";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MealPeriod {
    Breakfast,
    #[default]
    Lunch,
    AfternoonTea,
    Dinner,
    LateNight,
}

impl MealPeriod {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "breakfast" | "早餐" => Some(MealPeriod::Breakfast),
            "lunch" | "午餐" => Some(MealPeriod::Lunch),
            "afternoon_tea" | "tea_time" | "下午茶" => Some(MealPeriod::AfternoonTea),
            "dinner" | "晚餐" => Some(MealPeriod::Dinner),
            "late_night" | "late_night_snack" | "夜宵" => Some(MealPeriod::LateNight),
            _ => None,
        }
    }

    /// Meal suggested for a clock hour; anything outside the usual meal times maps to lunch.
    pub fn for_hour(hour: u8) -> Self {
        match hour {
            5..=8 => MealPeriod::Breakfast,
            11..=13 => MealPeriod::Lunch,
            17..=19 => MealPeriod::Dinner,
            _ => MealPeriod::Lunch,
        }
    }

    pub fn label(self, language: Language) -> &'static str {
        match (self, language) {
            (MealPeriod::Breakfast, Language::Zh) => "早餐",
            (MealPeriod::Lunch, Language::Zh) => "午餐",
            (MealPeriod::AfternoonTea, Language::Zh) => "下午茶",
            (MealPeriod::Dinner, Language::Zh) => "晚餐",
            (MealPeriod::LateNight, Language::Zh) => "夜宵",
            (MealPeriod::Breakfast, Language::En) => "breakfast",
            (MealPeriod::Lunch, Language::En) => "lunch",
            (MealPeriod::AfternoonTea, Language::En) => "afternoon tea",
            (MealPeriod::Dinner, Language::En) => "dinner",
            (MealPeriod::LateNight, Language::En) => "late-night snack",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateFamily {
    Food,
    Tea,
}

impl TemplateFamily {
    pub fn file_name(self) -> &'static str {
        match self {
            TemplateFamily::Food => "food_recommendation_prompt.txt",
            TemplateFamily::Tea => "tea_recommendation_prompt.txt",
        }
    }

    pub fn item_kind(self) -> super::ItemKind {
        match self {
            TemplateFamily::Food => super::ItemKind::Dish,
            TemplateFamily::Tea => super::ItemKind::Tea,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DietType {
    #[default]
    Balanced,
    Vegetarian,
    Therapeutic,
    Light,
    Tea,
}

impl DietType {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "balanced" | "均衡饮食" | "均衡" => Some(DietType::Balanced),
            "vegetarian" | "素食" => Some(DietType::Vegetarian),
            "therapeutic" | "食疗养生" | "食疗" => Some(DietType::Therapeutic),
            "light" | "清淡饮食" | "清淡" => Some(DietType::Light),
            "tea" | "茶饮推荐" | "茶饮" => Some(DietType::Tea),
            _ => None,
        }
    }

    pub fn template_family(self) -> TemplateFamily {
        match self {
            DietType::Tea => TemplateFamily::Tea,
            _ => TemplateFamily::Food,
        }
    }

    pub fn label(self, language: Language) -> &'static str {
        match (self, language) {
            (DietType::Balanced, Language::Zh) => "均衡饮食",
            (DietType::Vegetarian, Language::Zh) => "素食",
            (DietType::Therapeutic, Language::Zh) => "食疗养生",
            (DietType::Light, Language::Zh) => "清淡饮食",
            (DietType::Tea, Language::Zh) => "茶饮推荐",
            (DietType::Balanced, Language::En) => "balanced diet",
            (DietType::Vegetarian, Language::En) => "vegetarian",
            (DietType::Therapeutic, Language::En) => "therapeutic diet",
            (DietType::Light, Language::En) => "light diet",
            (DietType::Tea, Language::En) => "tea recommendation",
        }
    }
}

/// What the user picked. Unset fields take configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendationSelections {
    pub meal_period: Option<MealPeriod>,
    pub diet_type: DietType,
    pub health_goal: Option<String>,
    pub location: Option<String>,
    pub weather: Option<String>,
    pub language: Option<Language>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationRequest {
    pub date: String,
    pub time: String,
    pub meal_period: MealPeriod,
    pub diet_type: DietType,
    pub health_goal: String,
    pub location: String,
    pub weather: String,
    pub solar_term_descriptor: String,
    pub season: String,
    pub language: Language,
}

impl RecommendationRequest {
    pub fn template_family(&self) -> TemplateFamily {
        self.diet_type.template_family()
    }

    /// Placeholder name and rendered value for every template field.
    pub fn placeholders(&self) -> [(&'static str, String); 10] {
        [
            ("date", self.date.clone()),
            ("time", self.time.clone()),
            ("mealPeriod", self.meal_period.label(self.language).to_string()),
            ("dietType", self.diet_type.label(self.language).to_string()),
            ("healthGoal", self.health_goal.clone()),
            ("location", self.location.clone()),
            ("weather", self.weather.clone()),
            ("solarTerm", self.solar_term_descriptor.clone()),
            ("season", self.season.clone()),
            ("language", self.language.prompt_label().to_string()),
        ]
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestBuilder {
    defaults: DefaultsConfig,
}

impl RequestBuilder {
    pub fn new(defaults: DefaultsConfig) -> Self {
        Self { defaults }
    }

    pub fn build(
        &self,
        selections: &RecommendationSelections,
        context: &TemporalContext,
    ) -> RecommendationRequest {
        let language = selections.language.unwrap_or(self.defaults.language);
        let meal_period = selections
            .meal_period
            .unwrap_or_else(|| MealPeriod::for_hour(context.moment.hour));
        RecommendationRequest {
            date: context.moment.date.format("%Y-%m-%d").to_string(),
            time: context.moment.time_label(),
            meal_period,
            diet_type: selections.diet_type,
            health_goal: non_empty(selections.health_goal.as_deref())
                .unwrap_or_else(|| default_health_goal(language).to_string()),
            location: non_empty(selections.location.as_deref())
                .unwrap_or_else(|| self.defaults.location.clone()),
            weather: non_empty(selections.weather.as_deref())
                .unwrap_or_else(|| self.defaults.weather.clone()),
            solar_term_descriptor: solar_term_descriptor(context.solar_term.as_ref(), language),
            season: context.season.name(language).to_string(),
            language,
        }
    }
}

/// Short phrase such as `昨日小寒` or `yesterday's Minor Cold`.
pub fn solar_term_descriptor(relation: Option<&SolarTermRelation>, language: Language) -> String {
    let Some(relation) = relation else {
        return display_name(DEFAULT_SOLAR_TERM, language);
    };
    let name = display_name(&relation.name, language);
    match language {
        Language::Zh => match relation.relation {
            TermRelation::Today => format!("今日{}", name),
            TermRelation::Yesterday => format!("昨日{}", name),
            TermRelation::DayBeforeYesterday => format!("前日{}", name),
            TermRelation::Tomorrow => format!("明日{}", name),
            TermRelation::DayAfterTomorrow => format!("后日{}", name),
            TermRelation::Current => format!("{}期间", name),
        },
        Language::En => match relation.relation {
            TermRelation::Today => format!("today's {}", name),
            TermRelation::Yesterday => format!("yesterday's {}", name),
            TermRelation::DayBeforeYesterday => format!("{} two days ago", name),
            TermRelation::Tomorrow => format!("tomorrow's {}", name),
            TermRelation::DayAfterTomorrow => format!("{} in two days", name),
            TermRelation::Current => format!("during {}", name),
        },
    }
}

fn default_health_goal(language: Language) -> &'static str {
    match language {
        Language::Zh => "日常养生",
        Language::En => "everyday wellbeing",
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
