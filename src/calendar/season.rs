use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Spring,
    Summer,
    Autumn,
    Winter,
}

impl Season {
    /// Spring 3/21-5/20, summer 5/21-8/22, autumn 8/23-11/22, winter otherwise.
    pub fn from_month_day(month: u32, day: u32) -> Self {
        match (month, day) {
            (3, 21..) | (4, _) | (5, ..=20) => Season::Spring,
            (5, _) | (6, _) | (7, _) | (8, ..=22) => Season::Summer,
            (8, _) | (9, _) | (10, _) | (11, ..=22) => Season::Autumn,
            _ => Season::Winter,
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self::from_month_day(date.month(), date.day())
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "spring" | "春" | "春季" => Some(Season::Spring),
            "summer" | "夏" | "夏季" => Some(Season::Summer),
            "autumn" | "fall" | "秋" | "秋季" => Some(Season::Autumn),
            "winter" | "冬" | "冬季" => Some(Season::Winter),
            _ => None,
        }
    }

    pub fn name(self, language: Language) -> &'static str {
        match (self, language) {
            (Season::Spring, Language::Zh) => "春季",
            (Season::Summer, Language::Zh) => "夏季",
            (Season::Autumn, Language::Zh) => "秋季",
            (Season::Winter, Language::Zh) => "冬季",
            (Season::Spring, Language::En) => "spring",
            (Season::Summer, Language::En) => "summer",
            (Season::Autumn, Language::En) => "autumn",
            (Season::Winter, Language::En) => "winter",
        }
    }
}
