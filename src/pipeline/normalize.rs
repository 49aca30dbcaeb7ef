//! Turns raw generated text into a [`RecommendationResult`].
//!
//! Strategies run in order and the first one that yields a valid object wins:
//! fenced code block, outermost brace span, whole text. When none does, prose is mined
//! line by line, and if even that finds nothing a labelled placeholder is returned.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::result::{ExtractionStrategy, Item, ItemKind, Nutrition, RecommendationResult};
use crate::Language;

static NUMBERED_MARKER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*\d+\s*[.、．)）]\s*").ok());

const ITEM_KEYWORDS: [&str; 5] = ["菜品", "推荐", "茶饮", "dish", "recommend"];

pub fn normalize(raw: &str, expected: ItemKind, language: Language) -> RecommendationResult {
    let candidates = [
        (ExtractionStrategy::FencedBlock, fenced_block(raw)),
        (ExtractionStrategy::BraceSpan, brace_span(raw)),
        (ExtractionStrategy::FullText, Some(raw.trim())),
    ];

    for (strategy, candidate) in candidates {
        let Some(candidate) = candidate else {
            continue;
        };
        match serde_json::from_str::<Value>(candidate) {
            Ok(value) => match validate(&value, strategy) {
                Some(result) => {
                    debug!(?strategy, items = result.items.len(), "extracted structured result");
                    return result;
                }
                None => debug!(?strategy, "parsed JSON has no usable dishes or teas"),
            },
            Err(err) => debug!(?strategy, error = %err, "candidate is not valid JSON"),
        }
    }

    let mined = mine_items(raw, expected, language);
    if !mined.is_empty() {
        warn!(items = mined.len(), "no structured result, mined items from text");
        return RecommendationResult {
            kind: expected,
            items: mined,
            total_nutrition: Nutrition::zero(match language {
                Language::Zh => "内容来自文本提取，暂无营养数据",
                Language::En => "Extracted from free text; nutrition data unavailable",
            }),
            reasoning: None,
            tips: None,
            overall_advice: None,
            extraction: ExtractionStrategy::Heuristic,
            degraded: true,
        };
    }

    warn!("generated content could not be parsed, returning placeholder");
    placeholder(expected, language)
}

/// Interior of the first fenced code block, without its language tag.
pub fn fenced_block(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    let body_start = after_fence.find('\n').map(|index| index + 1)?;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

/// From the first `{` to the last `}`, inclusive.
pub fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Accepts an object with a non-empty `dishes` or `teas` array. `dishes` is checked first.
/// The array's elements are taken as they are.
fn validate(value: &Value, extraction: ExtractionStrategy) -> Option<RecommendationResult> {
    let object = value.as_object()?;
    let (kind, items) = [ItemKind::Dish, ItemKind::Tea]
        .into_iter()
        .find_map(|kind| read_items(object, kind).map(|items| (kind, items)))?;

    Some(RecommendationResult {
        kind,
        items,
        total_nutrition: object
            .get("totalNutrition")
            .map(Nutrition::from_value)
            .unwrap_or_default(),
        reasoning: non_null(object.get("reasoning")),
        tips: non_null(object.get("tips")),
        overall_advice: non_null(object.get("overallAdvice")),
        extraction,
        degraded: false,
    })
}

fn read_items(object: &Map<String, Value>, kind: ItemKind) -> Option<Vec<Item>> {
    let entries = object.get(kind.source_key())?.as_array()?;
    if entries.is_empty() {
        return None;
    }
    Some(
        entries
            .iter()
            .map(|entry| Item::new(kind, entry.clone()))
            .collect(),
    )
}

fn non_null(value: Option<&Value>) -> Option<Value> {
    value.filter(|value| !value.is_null()).cloned()
}

/// One item per line that looks like a list entry or mentions a recommendation keyword.
/// Lines that look like JSON fragments are skipped.
pub fn mine_items(raw: &str, kind: ItemKind, language: Language) -> Vec<Item> {
    raw.lines()
        .map(str::trim)
        .filter(|line| is_item_marker(line))
        .filter_map(|line| {
            let name = clean_item_name(line);
            if name.is_empty() {
                return None;
            }
            Some(placeholder_item(kind, &name, language, false))
        })
        .collect()
}

fn is_item_marker(line: &str) -> bool {
    if line.is_empty() || line.starts_with(['{', '}', '[', ']', '"']) {
        return false;
    }
    let lower = line.to_lowercase();
    let numbered = NUMBERED_MARKER
        .as_ref()
        .is_some_and(|marker| marker.is_match(line));
    numbered || ITEM_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn clean_item_name(line: &str) -> String {
    let stripped = match NUMBERED_MARKER.as_ref() {
        Some(marker) => marker.replace(line, ""),
        None => Cow::Borrowed(line),
    };
    stripped
        .trim_matches(|ch: char| ch == '*' || ch == '#' || ch == '-' || ch.is_whitespace())
        .to_string()
}

fn placeholder(kind: ItemKind, language: Language) -> RecommendationResult {
    let name = match language {
        Language::Zh => "AI返回内容解析失败",
        Language::En => "Could not parse the generated content",
    };
    RecommendationResult {
        kind,
        items: vec![placeholder_item(kind, name, language, true)],
        total_nutrition: Nutrition::zero(match language {
            Language::Zh => "数据解析失败，请重新生成",
            Language::En => "Parsing failed; please generate again",
        }),
        reasoning: None,
        tips: None,
        overall_advice: None,
        extraction: ExtractionStrategy::Placeholder,
        degraded: true,
    }
}

fn placeholder_item(kind: ItemKind, name: &str, language: Language, failed: bool) -> Item {
    let (ingredients, steps, note) = match (language, failed) {
        (Language::Zh, false) => ("详见AI回复", "请参考AI返回的详细制作方法", "营养丰富，符合季节特点"),
        (Language::Zh, true) => ("请稍后重试", "请重新生成", "可能是AI返回格式问题"),
        (Language::En, false) => (
            "See the full response",
            "Refer to the full response for preparation",
            "Seasonal and nourishing",
        ),
        (Language::En, true) => (
            "Please try again later",
            "Generate the recommendation again",
            "The response format was not recognised",
        ),
    };
    let value = match kind {
        ItemKind::Dish => json!({
            "name": name,
            "ingredients": [ingredients],
            "recipe": [steps],
            "nutrition": note,
        }),
        ItemKind::Tea => json!({
            "name": name,
            "ingredients": [ingredients],
            "method": [steps],
            "benefits": note,
        }),
    };
    Item::new(kind, value)
}
