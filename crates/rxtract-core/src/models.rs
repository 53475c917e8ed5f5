//! Data models for extracted records and their scores.
//!
//! - [`Record`] - Schema-less field map produced by the parser or supplied as ground truth
//! - [`Item`] - One entry of a record's item list (e.g. a prescribed medication)
//! - [`ValidationResult`] - Rule-based warnings and confidence attached to a record
//! - [`EvaluationResult`] / [`ItemScore`] - Similarity of one prediction against its reference
//! - [`DatasetSummary`] - Mean scores across a dataset of prediction/reference pairs

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One entry of a record's item list.
pub type Item = Map<String, Value>;

/// Key under which the validator attaches its [`ValidationResult`].
pub const VALIDATION_KEY: &str = "validation";

/// Key carried by error-shaped records produced from a failed parse.
pub const ERROR_KEY: &str = "error";

/// Key holding the raw model text on error-shaped records.
pub const RAW_TEXT_KEY: &str = "raw_text";

/// A structured record: named scalar fields plus one list of [`Item`]s.
///
/// Field names are not fixed. Fields the scoring and validation rules do not
/// know about pass through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value if it is an object.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Look up a field.
    #[inline]
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Whether the field key is present (even if its value is null).
    #[inline]
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Set a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// The item list stored under `field`, if that field holds an array.
    #[must_use]
    pub fn items(&self, field: &str) -> Option<&Vec<Value>> {
        self.0.get(field).and_then(Value::as_array)
    }

    /// Mutable access to the item list stored under `field`.
    pub fn items_mut(&mut self, field: &str) -> Option<&mut Vec<Value>> {
        self.0.get_mut(field).and_then(Value::as_array_mut)
    }

    /// The attached validation block, if the record has been validated.
    #[must_use]
    pub fn validation(&self) -> Option<ValidationResult> {
        self.0
            .get(VALIDATION_KEY)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Whether this record stands in for a failed parse.
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.0.contains_key(ERROR_KEY)
    }

    /// Number of top-level fields.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    #[inline]
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume the record, returning the underlying map.
    #[inline]
    #[must_use]
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Self::Object(record.0)
    }
}

/// Truthiness of a JSON value: null, `false`, zero, and empty strings,
/// arrays or objects count as absent.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Render a JSON value as plain text. Null has no text.
#[must_use]
pub fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Round to two decimal places.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Outcome of rule-based validation, attached to a record under `validation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// False when a critical rule failed (missing subject name, no items)
    pub is_valid: bool,
    /// Human-readable warnings in rule order
    pub warnings: Vec<String>,
    /// Per-item confidence keyed by `item_<n>` (1-based)
    pub confidence_scores: BTreeMap<String, f64>,
    /// Record-level confidence (0.0-1.0)
    pub overall_confidence: f64,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self {
            is_valid: true,
            warnings: Vec::new(),
            confidence_scores: BTreeMap::new(),
            overall_confidence: 1.0,
        }
    }
}

/// Score of one reference item against its best predicted counterpart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    /// Name of the reference item ("Unknown" when it has none)
    pub reference_label: String,
    /// Name of the matched predicted item ("Not found" when unmatched)
    pub predicted_label: String,
    /// Whether a predicted item was aligned
    #[serde(default)]
    pub matched: bool,
    /// Similarity per scored sub-field (0.0-1.0)
    pub field_scores: BTreeMap<String, f64>,
    /// Weighted item score (0.0-1.0)
    pub score: f64,
}

impl ItemScore {
    /// Whether a predicted item was aligned to this reference item.
    #[inline]
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        self.matched
    }
}

/// Evaluation of a single predicted record against its reference.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Similarity per scored top-level field (0.0-1.0)
    pub field_scores: BTreeMap<String, f64>,
    /// One entry per reference item, in reference order
    pub item_scores: Vec<ItemScore>,
    /// Weighted overall score (0.0-1.0)
    pub overall_score: f64,
}

/// Mean scores over a dataset of prediction/reference pairs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    /// Mean of per-record overall scores
    pub overall_score: f64,
    /// Mean per top-level field, over the records where it was scored
    pub field_scores: BTreeMap<String, f64>,
    /// Mean per item sub-field, over all item scores where it was scored
    pub item_field_scores: BTreeMap<String, f64>,
    /// Number of evaluated pairs
    pub record_count: usize,
}
