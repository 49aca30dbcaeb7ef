//! Stem-branch (ganzhi) pillars.
//!
//! - Stems: 甲(0) 乙(1) 丙(2) 丁(3) 戊(4) 己(5) 庚(6) 辛(7) 壬(8) 癸(9)
//! - Branches: 子(0) 丑(1) 寅(2) 卯(3) 辰(4) 巳(5) 午(6) 未(7) 申(8) 酉(9) 戌(10) 亥(11)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{days_between, CalendarMoment};

pub const STEMS: [&str; 10] = ["甲", "乙", "丙", "丁", "戊", "己", "庚", "辛", "壬", "癸"];

pub const STEM_PINYIN: [&str; 10] = [
    "Jia", "Yi", "Bing", "Ding", "Wu", "Ji", "Geng", "Xin", "Ren", "Gui",
];

pub const BRANCHES: [&str; 12] = [
    "子", "丑", "寅", "卯", "辰", "巳", "午", "未", "申", "酉", "戌", "亥",
];

pub const BRANCH_PINYIN: [&str; 12] = [
    "Zi", "Chou", "Yin", "Mao", "Chen", "Si", "Wu", "Wei", "Shen", "You", "Xu", "Hai",
];

pub const ZODIAC: [&str; 12] = [
    "鼠", "牛", "虎", "兔", "龙", "蛇", "马", "羊", "猴", "鸡", "狗", "猪",
];

pub const ZODIAC_EN: [&str; 12] = [
    "Rat", "Ox", "Tiger", "Rabbit", "Dragon", "Snake", "Horse", "Goat", "Monkey", "Rooster",
    "Dog", "Pig",
];

/// 1949-10-01 is a 甲子 day.
const DAY_PILLAR_ANCHOR: NaiveDate = match NaiveDate::from_ymd_opt(1949, 10, 1) {
    Some(date) => date,
    None => panic!("day pillar anchor is not a valid date"),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PillarUnit {
    Year,
    Month,
    Day,
    Hour,
}

impl PillarUnit {
    pub fn suffix(self) -> &'static str {
        match self {
            PillarUnit::Year => "年",
            PillarUnit::Month => "月",
            PillarUnit::Day => "日",
            PillarUnit::Hour => "时",
        }
    }
}

/// A stem index in `[0, 10)` paired with a branch index in `[0, 12)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StemBranch {
    stem: u8,
    branch: u8,
}

impl StemBranch {
    /// Builds a pair from raw indices, reducing each into its modulus range.
    pub fn new(stem: i64, branch: i64) -> Self {
        Self {
            stem: stem.rem_euclid(10) as u8,
            branch: branch.rem_euclid(12) as u8,
        }
    }

    /// The pair `offset` steps after a 甲子 origin.
    pub fn from_offset(offset: i64) -> Self {
        Self::new(offset, offset)
    }

    /// Looks a pair up by its Chinese characters, e.g. `"甲子"`.
    pub fn from_label(label: &str) -> Option<Self> {
        let mut chars = label.chars();
        let stem = chars.next()?.to_string();
        let branch = chars.next()?.to_string();
        let stem = STEMS.iter().position(|value| *value == stem)?;
        let branch = BRANCHES.iter().position(|value| *value == branch)?;
        Some(Self::new(stem as i64, branch as i64))
    }

    pub fn stem(self) -> u8 {
        self.stem
    }

    pub fn branch(self) -> u8 {
        self.branch
    }

    pub fn stem_name(self) -> &'static str {
        STEMS[self.stem as usize]
    }

    pub fn branch_name(self) -> &'static str {
        BRANCHES[self.branch as usize]
    }

    /// Position in the sixty-pair cycle, or `None` when stem and branch parity differ
    /// (the simplified month formula can produce such pairs).
    pub fn cycle_index(self) -> Option<u8> {
        if self.stem % 2 != self.branch % 2 {
            return None;
        }
        let index = (6 * self.stem as i32 - 5 * self.branch as i32).rem_euclid(60);
        Some(index as u8)
    }

    pub fn name(self) -> String {
        format!("{}{}", self.stem_name(), self.branch_name())
    }

    pub fn label(self, unit: PillarUnit) -> String {
        format!("{}{}", self.name(), unit.suffix())
    }

    pub fn pinyin(self) -> String {
        format!(
            "{}-{}",
            STEM_PINYIN[self.stem as usize],
            BRANCH_PINYIN[self.branch as usize]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FourPillars {
    pub year_pillar: StemBranch,
    pub month_pillar: StemBranch,
    pub day_pillar: StemBranch,
    pub hour_pillar: StemBranch,
    pub zodiac: String,
    /// Two-hour period name, e.g. `午时`.
    pub shichen: String,
}

impl FourPillars {
    pub fn labels(&self) -> [String; 4] {
        [
            self.year_pillar.label(PillarUnit::Year),
            self.month_pillar.label(PillarUnit::Month),
            self.day_pillar.label(PillarUnit::Day),
            self.hour_pillar.label(PillarUnit::Hour),
        ]
    }

    pub fn compact(&self) -> String {
        self.labels().join(" ")
    }

    pub fn display(&self, moment: &CalendarMoment) -> String {
        format!(
            "{} ({} {})",
            self.compact(),
            self.shichen,
            moment.time_label()
        )
    }

    pub fn zodiac_english(&self) -> Option<&'static str> {
        ZODIAC
            .iter()
            .position(|animal| *animal == self.zodiac)
            .map(|index| ZODIAC_EN[index])
    }
}

pub fn shichen_name(branch: u8) -> String {
    format!("{}时", BRANCHES[(branch % 12) as usize])
}

/// Year boundary used by the fallback: dates before Feb 4 belong to the previous year.
pub fn is_before_lichun(month: u32, day: u32) -> bool {
    month == 1 || (month == 2 && day < 4)
}

pub fn fallback_four_pillars(moment: &CalendarMoment) -> FourPillars {
    let mut ganzhi_year = moment.year() as i64;
    if is_before_lichun(moment.month(), moment.day()) {
        ganzhi_year -= 1;
    }
    let year_pillar = StemBranch::new(ganzhi_year - 4, ganzhi_year - 4);

    // Month boundaries follow the civil month, not the solar-term month.
    let month = moment.month() as i64;
    let month_pillar = StemBranch::new(year_pillar.stem as i64 * 2 + month, month + 1);

    let day_pillar = StemBranch::from_offset(days_between(DAY_PILLAR_ANCHOR, moment.date));

    let hour_branch = ((moment.hour as i64 + 1) / 2) % 12;
    let hour_pillar = StemBranch::new(day_pillar.stem as i64 * 2 + hour_branch, hour_branch);

    FourPillars {
        year_pillar,
        month_pillar,
        day_pillar,
        hour_pillar,
        zodiac: ZODIAC[year_pillar.branch as usize].to_string(),
        shichen: shichen_name(hour_pillar.branch),
    }
}
