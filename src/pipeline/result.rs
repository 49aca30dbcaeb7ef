use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Dish,
    Tea,
}

impl ItemKind {
    /// Array key used by the generation service for this kind.
    pub fn source_key(self) -> &'static str {
        match self {
            ItemKind::Dish => "dishes",
            ItemKind::Tea => "teas",
        }
    }
}

/// One recommended dish or tea, kept exactly as the generation service sent it.
///
/// Accessors read the common fields leniently. Serialization writes the element back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Dish(Value),
    Tea(Value),
}

impl Serialize for Item {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

impl Item {
    pub fn new(kind: ItemKind, value: Value) -> Self {
        match kind {
            ItemKind::Dish => Item::Dish(value),
            ItemKind::Tea => Item::Tea(value),
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            Item::Dish(_) => ItemKind::Dish,
            Item::Tea(_) => ItemKind::Tea,
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            Item::Dish(value) | Item::Tea(value) => value,
        }
    }

    /// `name` of an object element or the text of a bare string; empty otherwise.
    pub fn name(&self) -> &str {
        match self.value() {
            Value::String(name) => name.trim(),
            Value::Object(fields) => fields
                .get("name")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default(),
            _ => "",
        }
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.value().as_object()?.get(key)
    }

    pub fn ingredient_labels(&self) -> Vec<String> {
        match self.field("ingredients") {
            Some(Value::Array(entries)) => entries.iter().map(ingredient_label).collect(),
            Some(Value::Object(parts)) => parts
                .iter()
                .map(|(part, entry)| format!("{}: {}", part, ingredient_label(entry)))
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![text_of(other)],
        }
    }

    /// `recipe` for dishes, `method` for teas, one entry per step.
    pub fn steps(&self) -> Vec<String> {
        let key = match self {
            Item::Dish(_) => "recipe",
            Item::Tea(_) => "method",
        };
        match self.field(key) {
            Some(Value::Array(entries)) => entries.iter().map(text_of).collect(),
            Some(Value::String(text)) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::Null) | None => Vec::new(),
            Some(other) => vec![other.to_string()],
        }
    }
}

/// `山药200克` style label for `{ "item" | "name", "amount" }`.
fn ingredient_label(entry: &Value) -> String {
    let Value::Object(fields) = entry else {
        return text_of(entry);
    };
    let Some(item) = ["item", "name"]
        .iter()
        .find_map(|key| fields.get(*key).and_then(Value::as_str))
    else {
        return entry.to_string();
    };
    match fields.get("amount") {
        Some(Value::Number(number)) => format!("{}{}克", item, number),
        Some(Value::String(text)) if !text.trim().is_empty() => format!("{}{}", item, text.trim()),
        _ => item.to_string(),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MacroAmount {
    pub amount: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Micronutrient {
    pub name: String,
    pub amount: String,
}

/// Canonical nutrition summary. Older responses used bare numbers for the macros and
/// plain strings for vitamins and minerals; [`Nutrition::from_value`] accepts both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Nutrition {
    pub calories: f64,
    pub protein: MacroAmount,
    pub fat: MacroAmount,
    pub carbs: MacroAmount,
    pub vitamins: Vec<Micronutrient>,
    pub minerals: Vec<Micronutrient>,
    pub summary: String,
}

impl Nutrition {
    pub fn zero(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            ..Self::default()
        }
    }

    pub fn from_value(value: &Value) -> Self {
        let Value::Object(object) = value else {
            return match value {
                Value::String(text) => Self::zero(text.clone()),
                _ => Self::default(),
            };
        };

        let calories = object.get("calories").and_then(read_amount).unwrap_or(0.0);
        let protein = read_macro(object.get("protein"));
        let fat = read_macro(object.get("fat"));
        let carbs = read_macro(object.get("carbs"));

        let total = protein.0 + fat.0 + carbs.0;
        let resolve = |(amount, percentage): (f64, Option<f64>)| MacroAmount {
            amount,
            percentage: percentage.unwrap_or_else(|| share_of(amount, total)),
        };

        Self {
            calories,
            protein: resolve(protein),
            fat: resolve(fat),
            carbs: resolve(carbs),
            vitamins: read_micronutrients(object.get("vitamins")),
            minerals: read_micronutrients(object.get("minerals")),
            summary: object
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

fn read_macro(value: Option<&Value>) -> (f64, Option<f64>) {
    match value {
        Some(Value::Object(object)) => (
            object.get("amount").and_then(read_amount).unwrap_or(0.0),
            object.get("percentage").and_then(read_amount),
        ),
        Some(value) => (read_amount(value).unwrap_or(0.0), None),
        None => (0.0, None),
    }
}

/// Numbers, numeric strings such as `"30g"` or `"35%"`, or `{ "amount": .. }`.
fn read_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let numeric: String = text
                .trim()
                .chars()
                .take_while(|ch| ch.is_ascii_digit() || *ch == '.')
                .collect();
            numeric.parse().ok()
        }
        Value::Object(object) => object.get("amount").and_then(read_amount),
        _ => None,
    }
}

fn read_micronutrients(value: Option<&Value>) -> Vec<Micronutrient> {
    let Some(Value::Array(entries)) = value else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| match entry {
            Value::String(name) => Some(Micronutrient {
                name: name.clone(),
                amount: String::new(),
            }),
            Value::Object(object) => {
                let name = object.get("name").and_then(Value::as_str)?.to_string();
                let amount = match object.get("amount") {
                    Some(Value::String(text)) => text.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                Some(Micronutrient { name, amount })
            }
            _ => None,
        })
        .collect()
}

fn share_of(amount: f64, total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    (amount / total * 1000.0).round() / 10.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    FencedBlock,
    BraceSpan,
    FullText,
    Heuristic,
    Placeholder,
}

impl ExtractionStrategy {
    pub fn is_structured(self) -> bool {
        matches!(
            self,
            ExtractionStrategy::FencedBlock
                | ExtractionStrategy::BraceSpan
                | ExtractionStrategy::FullText
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationResult {
    pub kind: ItemKind,
    /// Never empty.
    pub items: Vec<Item>,
    pub total_nutrition: Nutrition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tips: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_advice: Option<Value>,
    pub extraction: ExtractionStrategy,
    /// Mined from prose or a placeholder rather than parsed from JSON.
    pub degraded: bool,
}

impl RecommendationResult {
    /// The result in the shape the generation service produces, with `dishes` or `teas`.
    pub fn to_source_value(&self) -> Result<Value, serde_json::Error> {
        let mut object = Map::new();
        object.insert(
            self.kind.source_key().to_string(),
            serde_json::to_value(&self.items)?,
        );
        object.insert(
            "totalNutrition".to_string(),
            serde_json::to_value(&self.total_nutrition)?,
        );
        for (key, value) in [
            ("reasoning", &self.reasoning),
            ("tips", &self.tips),
            ("overallAdvice", &self.overall_advice),
        ] {
            if let Some(value) = value {
                object.insert(key.to_string(), value.clone());
            }
        }
        Ok(Value::Object(object))
    }

    pub fn item_names(&self) -> Vec<&str> {
        self.items.iter().map(Item::name).collect()
    }
}
