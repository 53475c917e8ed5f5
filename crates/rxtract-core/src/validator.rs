//! Rule-based plausibility checks for extracted records.
//!
//! Rules run independently and each adds at most one warning per field or
//! item:
//!
//! - Subject name missing or empty: warning, record invalid
//! - Age present but not a leading integer, or outside the allowed range: warning
//! - Date present but unparsable, or older than the staleness window: warning
//! - Item list missing, not a list, or empty: warning, record invalid
//! - Per item: missing name (x0.5), dosage or frequency matching no known
//!   pattern (x0.8 each), each with a warning
//!
//! Overall confidence drops by a fixed penalty per warning down to a floor.
//! The input record is never modified; [`Validator::validate`] returns a copy
//! with the [`ValidationResult`] attached under `validation`.

// Warning counts use f64 from usize
#![allow(clippy::cast_precision_loss)]

use crate::config::{RecordSchema, ValidationConfig};
use crate::error::{Result, RxError};
use crate::models::{is_truthy, round2, value_text, Record, ValidationResult, VALIDATION_KEY};
use chrono::{Local, NaiveDate};
use regex::{RegexBuilder, RegexSet, RegexSetBuilder};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::num::IntErrorKind;
use tracing::debug;

/// Applies plausibility rules and attaches warnings plus confidence scores.
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidationConfig,
    schema: RecordSchema,
    dosage: RegexSet,
    frequency: RegexSet,
}

impl Validator {
    /// Compile the pattern tables from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::InvalidPattern`] naming the first pattern that does
    /// not compile.
    pub fn new(config: ValidationConfig) -> Result<Self> {
        let dosage = compile_patterns(&config.dosage_patterns)?;
        let frequency = compile_patterns(&config.frequency_patterns)?;
        Ok(Self {
            config,
            schema: RecordSchema::default(),
            dosage,
            frequency,
        })
    }

    /// Use a custom record schema.
    #[must_use]
    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Validate against today's local date.
    #[must_use]
    pub fn validate(&self, record: &Record) -> Record {
        self.validate_at(record, Local::now().date_naive())
    }

    /// Validate with an explicit "today" for the staleness rule.
    #[must_use]
    pub fn validate_at(&self, record: &Record, today: NaiveDate) -> Record {
        let result = self.check_at(record, today);
        let mut validated = record.clone();
        validated.insert(VALIDATION_KEY, validation_value(&result));
        validated
    }

    /// Run every rule and return the outcome without attaching it.
    ///
    /// Any existing `validation` block on the input is ignored.
    #[must_use]
    pub fn check_at(&self, record: &Record, today: NaiveDate) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.check_subject(record, &mut result);
        self.check_age(record, &mut result);
        self.check_date(record, today, &mut result);
        self.check_items(record, &mut result);

        result.overall_confidence = if result.warnings.is_empty() {
            1.0
        } else {
            let penalty = self.config.warning_penalty * result.warnings.len() as f64;
            round2(1.0 - penalty).max(self.config.confidence_floor)
        };

        debug!(
            "Validated record: valid={}, {} warning(s), confidence {:.2}",
            result.is_valid,
            result.warnings.len(),
            result.overall_confidence
        );
        result
    }

    fn check_subject(&self, record: &Record, result: &mut ValidationResult) {
        if !record.get(&self.schema.subject_name_field).is_some_and(is_truthy) {
            result
                .warnings
                .push(format!("Missing {} name", self.schema.subject_noun));
            result.is_valid = false;
        }
    }

    fn check_age(&self, record: &Record, result: &mut ValidationResult) {
        let Some(raw) = record.get(&self.schema.age_field).and_then(value_text) else {
            return;
        };

        let token = raw.split_whitespace().next().unwrap_or_default();
        let in_range = match token.parse::<i64>() {
            Ok(age) => Some((self.config.min_age..=self.config.max_age).contains(&age)),
            Err(e) if matches!(
                e.kind(),
                IntErrorKind::PosOverflow | IntErrorKind::NegOverflow
            ) =>
            {
                Some(false)
            }
            Err(_) => None,
        };
        match in_range {
            Some(true) => {}
            Some(false) => result.warnings.push(format!(
                "Unusual {} age: {token}",
                self.schema.subject_noun
            )),
            None => result.warnings.push(format!(
                "Invalid {} age format: {raw}",
                self.schema.subject_noun
            )),
        }
    }

    fn check_date(&self, record: &Record, today: NaiveDate, result: &mut ValidationResult) {
        let Some(raw) = record.get(&self.schema.date_field).and_then(value_text) else {
            return;
        };
        let text = raw.trim();
        if text.is_empty() {
            return;
        }

        let parsed = self
            .config
            .date_formats
            .iter()
            .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok());

        match parsed {
            Some(date) if (today - date).num_days() > self.config.staleness_days => {
                result.warnings.push(format!(
                    "Date of {} is more than {} days old: {raw}",
                    self.schema.record_noun, self.config.staleness_days
                ));
            }
            Some(_) => {}
            None => result
                .warnings
                .push(format!("Could not validate date format: {raw}")),
        }
    }

    fn check_items(&self, record: &Record, result: &mut ValidationResult) {
        let items = match record.items(&self.schema.items_field) {
            Some(items) if !items.is_empty() => items,
            _ => {
                result.warnings.push(format!(
                    "No {} found in {}",
                    self.schema.items_noun, self.schema.record_noun
                ));
                result.is_valid = false;
                return;
            }
        };

        let mut scores = BTreeMap::new();
        for (idx, item) in items.iter().enumerate() {
            let number = idx + 1;
            let confidence = self.check_item(item, number, &mut result.warnings);
            scores.insert(format!("item_{number}"), round2(confidence));
        }
        result.confidence_scores = scores;
    }

    /// Confidence for one item, pushing its warnings.
    fn check_item(&self, item: &Value, number: usize, warnings: &mut Vec<String>) -> f64 {
        let noun = &self.schema.item_noun;
        let field = |name: &str| item.as_object().and_then(|o| o.get(name));
        let mut confidence = 1.0;

        if !field(self.schema.item_name_field.as_str()).is_some_and(is_truthy) {
            warnings.push(format!("{noun} #{number} is missing a name"));
            confidence *= self.config.missing_name_factor;
        }

        let label = field(self.schema.item_name_field.as_str())
            .and_then(value_text)
            .unwrap_or_else(|| format!("#{number}"));

        let mut checks = vec![(&self.schema.dosage_field, &self.dosage, "dosage")];
        if self.config.check_frequency {
            checks.push((&self.schema.frequency_field, &self.frequency, "frequency"));
        }

        for (field_name, patterns, kind) in checks {
            let Some(value) = field(field_name.as_str()).filter(|v| is_truthy(v)) else {
                continue;
            };
            let text = value_text(value).unwrap_or_default();
            if !patterns.is_match(&text) {
                warnings.push(format!("{noun} '{label}' has unusual {kind} format: {text}"));
                confidence *= self.config.unusual_format_factor;
            }
        }

        confidence
    }
}

/// Compile a case-insensitive pattern table, reporting the first bad entry.
fn compile_patterns(patterns: &[String]) -> Result<RegexSet> {
    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .map_err(|set_err| {
            for pattern in patterns {
                if let Err(source) = RegexBuilder::new(pattern).case_insensitive(true).build() {
                    return RxError::InvalidPattern {
                        pattern: pattern.clone(),
                        source,
                    };
                }
            }
            RxError::InvalidPattern {
                pattern: patterns.join(" | "),
                source: set_err,
            }
        })
}

fn validation_value(result: &ValidationResult) -> Value {
    json!({
        "is_valid": result.is_valid,
        "warnings": result.warnings,
        "confidence_scores": result.confidence_scores,
        "overall_confidence": result.overall_confidence,
    })
}
