use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::days_between;

pub const LUNAR_MONTH_NAMES: [&str; 12] = [
    "正月", "二月", "三月", "四月", "五月", "六月", "七月", "八月", "九月", "十月", "冬月", "腊月",
];

pub const LUNAR_DAY_NAMES: [&str; 30] = [
    "初一", "初二", "初三", "初四", "初五", "初六", "初七", "初八", "初九", "初十", "十一", "十二",
    "十三", "十四", "十五", "十六", "十七", "十八", "十九", "二十", "廿一", "廿二", "廿三", "廿四",
    "廿五", "廿六", "廿七", "廿八", "廿九", "三十",
];

/// 2024-01-11 is lunar 2023-12-01.
const SOLAR_ANCHOR: NaiveDate = match NaiveDate::from_ymd_opt(2024, 1, 11) {
    Some(date) => date,
    None => panic!("lunar anchor is not a valid date"),
};
const LUNAR_ANCHOR_YEAR: i32 = 2023;
const LUNAR_ANCHOR_MONTH: u8 = 12;

/// Twelve alternating 30/29-day months.
const APPROXIMATE_YEAR_DAYS: i64 = 354;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LunarDate {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub display: String,
}

impl LunarDate {
    /// Builds a date with the standard `2024年腊月初七` display. Month and day are clamped.
    pub fn new(year: i32, month: u8, day: u8) -> Self {
        let month = month.clamp(1, 12);
        let day = day.clamp(1, 30);
        let display = format!(
            "{}年{}{}",
            year,
            LUNAR_MONTH_NAMES[(month - 1) as usize],
            LUNAR_DAY_NAMES[(day - 1) as usize]
        );
        Self {
            year,
            month,
            day,
            display,
        }
    }

    pub fn month_name(&self) -> &'static str {
        LUNAR_MONTH_NAMES[(self.month.clamp(1, 12) - 1) as usize]
    }

    pub fn day_name(&self) -> &'static str {
        LUNAR_DAY_NAMES[(self.day.clamp(1, 30) - 1) as usize]
    }
}

/// Approximate month length: odd months are "big" (30 days), even months "small" (29).
/// Real lunar months vary and intercalary months are not modelled.
pub fn approximate_month_length(month: u8) -> i64 {
    if month % 2 == 1 {
        30
    } else {
        29
    }
}

pub fn fallback_solar_to_lunar(date: NaiveDate) -> LunarDate {
    let mut year = LUNAR_ANCHOR_YEAR;
    let mut month = LUNAR_ANCHOR_MONTH;
    let mut day = 1 + days_between(SOLAR_ANCHOR, date);

    // Any twelve consecutive months span the same number of days, so whole
    // years can be skipped in either direction before walking month by month.
    let whole_years = (day - 1).div_euclid(APPROXIMATE_YEAR_DAYS);
    year += whole_years as i32;
    day -= whole_years * APPROXIMATE_YEAR_DAYS;

    while day > approximate_month_length(month) {
        day -= approximate_month_length(month);
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }

    LunarDate::new(year, month, day.clamp(1, 30) as u8)
}
