pub mod calendar;
pub mod config;
pub mod credentials;
pub mod generation_client;
pub mod logging;
pub mod pipeline;

use serde::{Deserialize, Serialize};

pub use calendar::{CalendarMoment, TemporalContext, TemporalEngine};
pub use config::ShilingConfig;
pub use pipeline::{
    RecommendationOutcome, RecommendationSelections, RecommendationService, PipelineError,
};

/// Output language for descriptors, prompts and translations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Zh,
    En,
}

impl Language {
    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "zh" | "zh-cn" | "cn" | "chinese" | "中文" => Some(Language::Zh),
            "en" | "en-us" | "english" | "英文" => Some(Language::En),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Language::Zh => "zh",
            Language::En => "en",
        }
    }

    /// Name of the language as it is written into prompts.
    pub fn prompt_label(self) -> &'static str {
        match self {
            Language::Zh => "中文",
            Language::En => "English",
        }
    }
}
