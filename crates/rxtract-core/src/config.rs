//! Configuration for parsing, validation and evaluation.
//!
//! All lookup tables (weights, regex patterns, date formats) are plain data
//! here. Components compile what they need once at construction and treat
//! their configuration as read-only afterwards.
//!
//! A TOML file may override any subset of the defaults:
//!
//! ```toml
//! [evaluation]
//! name_match_threshold = 0.75
//!
//! [evaluation.field_weights]
//! patient_name = 1.0
//! date = 0.5
//!
//! [validation]
//! check_frequency = false
//! ```

use crate::error::{Result, RxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;

/// Field names and wording used by the validation and scoring rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSchema {
    /// Top-level field naming the subject (e.g. the patient)
    pub subject_name_field: String,
    /// Top-level age field
    pub age_field: String,
    /// Top-level date field
    pub date_field: String,
    /// Top-level field holding the item list
    pub items_field: String,
    /// Item sub-field used for naming and alignment
    pub item_name_field: String,
    /// Item sub-field checked against the dosage patterns
    pub dosage_field: String,
    /// Item sub-field checked against the frequency patterns
    pub frequency_field: String,
    /// Noun for the subject in warnings ("patient")
    pub subject_noun: String,
    /// Noun for one item in warnings ("Medication")
    pub item_noun: String,
    /// Plural noun for items in warnings ("medications")
    pub items_noun: String,
    /// Noun for the whole record in warnings ("prescription")
    pub record_noun: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            subject_name_field: "patient_name".to_string(),
            age_field: "patient_age".to_string(),
            date_field: "date".to_string(),
            items_field: "medication_list".to_string(),
            item_name_field: "name".to_string(),
            dosage_field: "dosage".to_string(),
            frequency_field: "frequency".to_string(),
            subject_noun: "patient".to_string(),
            item_noun: "Medication".to_string(),
            items_noun: "medications".to_string(),
            record_noun: "prescription".to_string(),
        }
    }
}

/// Relative importance of each field in the weighted score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(BTreeMap<String, f64>);

impl WeightTable {
    /// Build a table from `(field, weight)` pairs.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Weight configured for `field`.
    #[inline]
    #[must_use]
    pub fn weight(&self, field: &str) -> Option<f64> {
        self.0.get(field).copied()
    }

    /// Iterate `(field, weight)` in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Sum of all weights.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.0.values().sum()
    }

    /// Reject non-positive or non-finite weights.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::InvalidWeight`] for the first offending entry.
    pub fn validate(&self) -> Result<()> {
        for (field, weight) in self.iter() {
            if !weight.is_finite() || weight <= 0.0 {
                return Err(RxError::InvalidWeight {
                    field: field.to_string(),
                    weight,
                });
            }
        }
        Ok(())
    }

    /// Default top-level weights for prescription records.
    #[must_use]
    pub fn default_fields() -> Self {
        Self::from_pairs([
            ("patient_name", 1.0),
            ("patient_age", 0.8),
            ("patient_gender", 0.8),
            ("doctor_name", 1.0),
            ("date", 0.9),
            ("diagnosis", 0.9),
            ("hospital/clinic", 0.7),
        ])
    }

    /// Default item weights for medication entries.
    #[must_use]
    pub fn default_items() -> Self {
        Self::from_pairs([
            ("name", 1.0),
            ("dosage", 0.9),
            ("frequency", 0.9),
            ("duration", 0.8),
            ("route", 0.7),
            ("special_instructions", 0.6),
        ])
    }
}

/// Settings for the weighted evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Weights for top-level fields
    pub field_weights: WeightTable,
    /// Weights for item sub-fields (must include the item name field)
    pub item_weights: WeightTable,
    /// Name similarity an item must exceed to be aligned
    pub name_match_threshold: f64,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            field_weights: WeightTable::default_fields(),
            item_weights: WeightTable::default_items(),
            name_match_threshold: 0.7,
        }
    }
}

/// Settings for the rule validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Case-insensitive patterns a dosage must contain
    pub dosage_patterns: Vec<String>,
    /// Case-insensitive patterns a frequency must contain
    pub frequency_patterns: Vec<String>,
    /// Whether item frequencies are checked at all
    pub check_frequency: bool,
    /// `chrono` formats tried in order for the date field
    pub date_formats: Vec<String>,
    /// Dates older than this many days draw a warning
    pub staleness_days: i64,
    /// Smallest plausible age
    pub min_age: i64,
    /// Largest plausible age
    pub max_age: i64,
    /// Lowest overall confidence regardless of warning count
    pub confidence_floor: f64,
    /// Overall confidence lost per warning
    pub warning_penalty: f64,
    /// Item confidence factor when the item has no name
    pub missing_name_factor: f64,
    /// Item confidence factor per unrecognized dosage/frequency
    pub unusual_format_factor: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            dosage_patterns: [
                r"\d+\s*mg",
                r"\d+\s*g",
                r"\d+\s*mcg",
                r"\d+\s*ml",
                r"\d+\s*tablet(s)?",
                r"\d+\s*pill(s)?",
                r"\d+\s*capsule(s)?",
                r"\d+\s*drop(s)?",
                r"\d+\s*application(s)?",
                r"\d+\s*puff(s)?",
                r"\d+\s*patch(es)?",
            ]
            .map(String::from)
            .to_vec(),
            frequency_patterns: [
                r"once daily",
                r"twice daily",
                r"three times daily",
                r"four times daily",
                r"every \d+ hours",
                r"every morning",
                r"every night",
                r"at bedtime",
                r"as needed",
                r"with meals",
                r"\d+ times (a|per) day",
                r"daily",
                r"weekly",
                r"monthly",
            ]
            .map(String::from)
            .to_vec(),
            check_frequency: true,
            date_formats: ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%B %d, %Y", "%d %B %Y"]
                .map(String::from)
                .to_vec(),
            staleness_days: 365,
            min_age: 1,
            max_age: 120,
            confidence_floor: 0.1,
            warning_penalty: 0.1,
            missing_name_factor: 0.5,
            unusual_format_factor: 0.8,
        }
    }
}

/// Settings for terminology correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminologyConfig {
    /// Minimum similarity for a vocabulary entry to replace a name
    pub cutoff: f64,
}

impl Default for TerminologyConfig {
    fn default() -> Self {
        Self { cutoff: 0.8 }
    }
}

/// Complete configuration for all components.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Field names and warning wording
    pub schema: RecordSchema,
    /// Weighted evaluator settings
    pub evaluation: EvaluationConfig,
    /// Rule validator settings
    pub validation: ValidationConfig,
    /// Terminology corrector settings
    pub terminology: TerminologyConfig,
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Apply overrides from environment variables
    ///
    /// Environment variables:
    /// - `RXTRACT_NAME_MATCH_THRESHOLD`: item alignment threshold (default: 0.7)
    /// - `RXTRACT_TERM_CUTOFF`: terminology match cutoff (default: 0.8)
    /// - `RXTRACT_STALENESS_DAYS`: date staleness window (default: 365)
    /// - `RXTRACT_CONFIDENCE_FLOOR`: minimum overall confidence (default: 0.1)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Unparsable values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("RXTRACT_NAME_MATCH_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.evaluation.name_match_threshold = v;
        }
        if let Some(v) = lookup("RXTRACT_TERM_CUTOFF").and_then(|s| s.parse().ok()) {
            self.terminology.cutoff = v;
        }
        if let Some(v) = lookup("RXTRACT_STALENESS_DAYS").and_then(|s| s.parse().ok()) {
            self.validation.staleness_days = v;
        }
        if let Some(v) = lookup("RXTRACT_CONFIDENCE_FLOOR").and_then(|s| s.parse().ok()) {
            self.validation.confidence_floor = v;
        }
    }

    /// Check weights and thresholds.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::InvalidWeight`] for bad weights and
    /// [`RxError::InvalidConfig`] for out-of-range thresholds or a missing
    /// item-name weight.
    pub fn validate(&self) -> Result<()> {
        self.evaluation.field_weights.validate()?;
        self.evaluation.item_weights.validate()?;

        if self
            .evaluation
            .item_weights
            .weight(&self.schema.item_name_field)
            .is_none()
        {
            return Err(RxError::InvalidConfig(format!(
                "item weights must include the item name field '{}'",
                self.schema.item_name_field
            )));
        }

        let unit_values = [
            ("name_match_threshold", self.evaluation.name_match_threshold),
            ("terminology cutoff", self.terminology.cutoff),
            ("confidence_floor", self.validation.confidence_floor),
            ("warning_penalty", self.validation.warning_penalty),
            ("missing_name_factor", self.validation.missing_name_factor),
            ("unusual_format_factor", self.validation.unusual_format_factor),
        ];
        for (name, value) in unit_values {
            if !(0.0..=1.0).contains(&value) {
                return Err(RxError::InvalidConfig(format!(
                    "{name} must be within 0.0-1.0, got {value}"
                )));
            }
        }

        if self.validation.min_age > self.validation.max_age {
            return Err(RxError::InvalidConfig(format!(
                "min_age ({}) exceeds max_age ({})",
                self.validation.min_age, self.validation.max_age
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.evaluation.name_match_threshold, 0.7);
        assert_eq!(config.terminology.cutoff, 0.8);
        assert_eq!(config.validation.staleness_days, 365);
        assert_eq!(config.schema.items_field, "medication_list");
    }

    #[test]
    fn test_default_weights() {
        let fields = WeightTable::default_fields();
        assert_eq!(fields.weight("patient_name"), Some(1.0));
        assert_eq!(fields.weight("hospital/clinic"), Some(0.7));
        assert!((fields.total() - 6.1).abs() < 1e-9);

        let items = WeightTable::default_items();
        assert_eq!(items.weight("name"), Some(1.0));
        assert_eq!(items.weight("unknown"), None);
    }

    #[test]
    fn test_invalid_weight_rejected() {
        let table = WeightTable::from_pairs([("a", 1.0), ("b", 0.0)]);
        match table.validate() {
            Err(RxError::InvalidWeight { field, .. }) => assert_eq!(field, "b"),
            other => panic!("expected InvalidWeight, got {other:?}"),
        }
        assert!(WeightTable::from_pairs([("a", f64::NAN)]).validate().is_err());
    }

    #[test]
    fn test_missing_item_name_weight_rejected() {
        let mut config = Config::default();
        config.evaluation.item_weights = WeightTable::from_pairs([("dosage", 1.0)]);
        assert!(matches!(config.validate(), Err(RxError::InvalidConfig(_))));
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let mut config = Config::default();
        config.evaluation.name_match_threshold = 1.5;
        assert!(matches!(config.validate(), Err(RxError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [evaluation]
            name_match_threshold = 0.75

            [evaluation.field_weights]
            patient_name = 2.0

            [validation]
            check_frequency = false
            "#,
        )
        .unwrap();

        assert_eq!(config.evaluation.name_match_threshold, 0.75);
        assert_eq!(config.evaluation.field_weights.weight("patient_name"), Some(2.0));
        assert_eq!(config.evaluation.field_weights.weight("date"), None);
        assert_eq!(config.evaluation.item_weights, WeightTable::default_items());
        assert!(!config.validation.check_frequency);
        assert_eq!(config.validation.dosage_patterns.len(), 11);
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/rxtract.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rxtract.toml");
        std::fs::write(&path, "[terminology]\ncutoff = 0.9\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.terminology.cutoff, 0.9);
    }

    #[test]
    fn test_load_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rxtract.toml");
        std::fs::write(&path, "[terminology\ncutoff = ").unwrap();
        assert!(matches!(Config::load(&path), Err(RxError::Toml(_))));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RXTRACT_NAME_MATCH_THRESHOLD", "0.6"),
            ("RXTRACT_TERM_CUTOFF", "0.85"),
            ("RXTRACT_STALENESS_DAYS", "30"),
            ("RXTRACT_CONFIDENCE_FLOOR", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.evaluation.name_match_threshold, 0.6);
        assert_eq!(config.terminology.cutoff, 0.85);
        assert_eq!(config.validation.staleness_days, 30);
        assert_eq!(config.validation.confidence_floor, 0.1);
    }
}
