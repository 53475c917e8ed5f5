//! Weighted similarity scoring of predicted records against references.
//!
//! Scoring is reference-driven: only fields present in the reference (and
//! carrying a weight) count toward the denominator. Items are aligned by name
//! with a greedy best-match per reference item:
//!
//! - A predicted item is a candidate when its name similarity exceeds the
//!   threshold and beats every earlier candidate for the same reference item
//! - Items on either side without a name key are never aligned
//! - Predicted items may be reused across reference items
//! - An unaligned reference item scores zero on every field it carries
//!
//! Per-item weighted sums are folded into the record's overall score.

// Score means use f64 from usize
#![allow(clippy::cast_precision_loss)]

use crate::config::{EvaluationConfig, RecordSchema, WeightTable};
use crate::error::{Result, RxError};
use crate::models::{value_text, DatasetSummary, EvaluationResult, Item, ItemScore, Record};
use crate::similarity::value_similarity;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Predicted label for a reference item with no aligned prediction.
pub const NOT_FOUND_LABEL: &str = "Not found";

/// Reference label for an item without a name.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Running `weighted_sum / total_weight` accumulator.
#[derive(Debug, Default, Clone, Copy)]
struct WeightedSum {
    weighted: f64,
    total: f64,
}

impl WeightedSum {
    #[inline]
    fn add(&mut self, score: f64, weight: f64) {
        self.weighted += score * weight;
        self.total += weight;
    }

    #[inline]
    fn merge(&mut self, other: Self) {
        self.weighted += other.weighted;
        self.total += other.total;
    }

    /// Weighted mean, or 0 when nothing was weighed.
    #[inline]
    fn mean(self) -> f64 {
        if self.total > 0.0 {
            self.weighted / self.total
        } else {
            0.0
        }
    }
}

/// Scores predictions against references with configurable weights.
#[derive(Debug, Clone)]
pub struct Evaluator {
    config: EvaluationConfig,
    schema: RecordSchema,
}

impl Evaluator {
    /// Create an evaluator using the default record schema.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::InvalidWeight`] if any weight is not positive and
    /// finite, or [`RxError::InvalidConfig`] if the threshold lies outside
    /// `[0, 1]`.
    pub fn new(config: EvaluationConfig) -> Result<Self> {
        config.field_weights.validate()?;
        config.item_weights.validate()?;
        if !(0.0..=1.0).contains(&config.name_match_threshold) {
            return Err(RxError::InvalidConfig(format!(
                "name_match_threshold must be within 0.0-1.0, got {}",
                config.name_match_threshold
            )));
        }
        Ok(Self {
            config,
            schema: RecordSchema::default(),
        })
    }

    /// Use a custom record schema.
    #[must_use]
    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Score one prediction against its reference.
    #[must_use = "evaluation returns scores without side effects"]
    pub fn evaluate(&self, prediction: &Record, reference: &Record) -> EvaluationResult {
        let mut field_scores = BTreeMap::new();
        let mut overall = WeightedSum::default();

        for (field, weight) in self.config.field_weights.iter() {
            if field == self.schema.items_field || !reference.contains(field) {
                continue;
            }
            let score = if prediction.contains(field) {
                value_similarity(prediction.get(field), reference.get(field))
            } else {
                0.0
            };
            overall.add(score, weight);
            field_scores.insert(field.to_string(), score);
        }

        let empty = Vec::new();
        let predicted_items = prediction.items(&self.schema.items_field).unwrap_or(&empty);
        let mut item_scores = Vec::new();

        if let Some(reference_items) = reference.items(&self.schema.items_field) {
            for reference_item in reference_items {
                let reference_item = as_item(reference_item);
                let (score, sum) = self.score_item(reference_item, predicted_items);
                overall.merge(sum);
                item_scores.push(score);
            }
        }

        EvaluationResult {
            field_scores,
            item_scores,
            overall_score: overall.mean(),
        }
    }

    /// Score every pair in parallel, preserving input order.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::LengthMismatch`] if the slices differ in length.
    pub fn evaluate_all(
        &self,
        predictions: &[Record],
        references: &[Record],
    ) -> Result<Vec<EvaluationResult>> {
        if predictions.len() != references.len() {
            return Err(RxError::LengthMismatch {
                predictions: predictions.len(),
                references: references.len(),
            });
        }

        Ok(predictions
            .par_iter()
            .zip(references.par_iter())
            .map(|(prediction, reference)| self.evaluate(prediction, reference))
            .collect())
    }

    /// Score a dataset and average the results.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::LengthMismatch`] if the slices differ in length.
    pub fn evaluate_dataset(
        &self,
        predictions: &[Record],
        references: &[Record],
    ) -> Result<DatasetSummary> {
        let results = self.evaluate_all(predictions, references)?;
        let summary = aggregate(&results);
        info!(
            "Evaluated {} record(s), overall score {:.4}",
            summary.record_count, summary.overall_score
        );
        Ok(summary)
    }

    /// Align one reference item and score it, returning its weighted sum.
    fn score_item(&self, reference: &Item, predicted: &[Value]) -> (ItemScore, WeightedSum) {
        let name_field = self.schema.item_name_field.as_str();
        let name_weight = self.config.item_weights.weight(name_field).unwrap_or(1.0);

        let mut best: Option<(&Item, f64)> = None;
        let named = reference.contains_key(name_field);
        for candidate in predicted.iter().map(as_item) {
            if !named || !candidate.contains_key(name_field) {
                continue;
            }
            let score = value_similarity(candidate.get(name_field), reference.get(name_field));
            let beats_best = best.map_or(true, |(_, s)| score > s);
            if score > self.config.name_match_threshold && beats_best {
                best = Some((candidate, score));
            }
        }

        let mut field_scores = BTreeMap::new();
        let mut sum = WeightedSum::default();

        let name_score = best.map_or(0.0, |(_, s)| s);
        sum.add(name_score, name_weight);
        field_scores.insert(name_field.to_string(), name_score);

        for (field, weight) in other_fields(&self.config.item_weights, name_field) {
            if !reference.contains_key(field) {
                continue;
            }
            let score = match best {
                Some((matched, _)) if matched.contains_key(field) => {
                    value_similarity(matched.get(field), reference.get(field))
                }
                _ => 0.0,
            };
            sum.add(score, weight);
            field_scores.insert(field.to_string(), score);
        }

        let reference_label = label(reference.get(name_field), UNKNOWN_LABEL);
        let predicted_label = match best {
            Some((matched, _)) => label(matched.get(name_field), UNKNOWN_LABEL),
            None => NOT_FOUND_LABEL.to_string(),
        };
        debug!(
            "Aligned item '{}' -> '{}' (name similarity {:.3})",
            reference_label, predicted_label, name_score
        );

        let score = ItemScore {
            reference_label,
            predicted_label,
            matched: best.is_some(),
            field_scores,
            score: sum.mean(),
        };
        (score, sum)
    }
}

/// Average per-record results into a dataset summary.
///
/// Field means only include records (or items) where that field was scored.
/// An empty slice yields an all-zero summary.
#[must_use]
pub fn aggregate(results: &[EvaluationResult]) -> DatasetSummary {
    if results.is_empty() {
        return DatasetSummary::default();
    }

    let overall_score =
        results.iter().map(|r| r.overall_score).sum::<f64>() / results.len() as f64;

    let field_scores = mean_by_key(results.iter().flat_map(|r| r.field_scores.iter()));
    let item_field_scores = mean_by_key(
        results
            .iter()
            .flat_map(|r| r.item_scores.iter())
            .flat_map(|i| i.field_scores.iter()),
    );

    DatasetSummary {
        overall_score,
        field_scores,
        item_field_scores,
        record_count: results.len(),
    }
}

fn mean_by_key<'a>(scores: impl Iterator<Item = (&'a String, &'a f64)>) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (field, score) in scores {
        let entry = sums.entry(field.clone()).or_default();
        entry.0 += score;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(field, (sum, count))| (field, sum / count as f64))
        .collect()
}

fn other_fields<'a>(
    weights: &'a WeightTable,
    name_field: &'a str,
) -> impl Iterator<Item = (&'a str, f64)> + 'a {
    weights.iter().filter(move |(field, _)| *field != name_field)
}

/// Treat non-object list entries as empty items.
fn as_item(value: &Value) -> &Item {
    static EMPTY: Lazy<Item> = Lazy::new(Item::new);
    value.as_object().unwrap_or(&EMPTY)
}

fn label(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(value_text)
        .unwrap_or_else(|| fallback.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(EvaluationConfig::default()).unwrap()
    }

    fn reference() -> Record {
        record(json!({
            "patient_name": "Ada Lovelace",
            "patient_age": 36,
            "date": "2024-05-20",
            "medication_list": [
                {"name": "Aspirin", "dosage": "100mg", "frequency": "once daily"},
                {"name": "Metformin", "dosage": "500mg"}
            ]
        }))
    }

    #[test]
    fn test_perfect_prediction_scores_one() {
        let reference = reference();
        let result = evaluator().evaluate(&reference, &reference);
        assert!((result.overall_score - 1.0).abs() < 1e-9);
        assert!(result.item_scores.iter().all(ItemScore::is_matched));
        assert!(result.field_scores.values().all(|s| (s - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_single_item_example() {
        let config = EvaluationConfig {
            field_weights: WeightTable::from_pairs([("patient_name", 1.0)]),
            item_weights: WeightTable::from_pairs([("name", 1.0), ("dosage", 0.9)]),
            ..EvaluationConfig::default()
        };
        let evaluator = Evaluator::new(config).unwrap();
        let reference = record(json!({"medication_list": [{"name": "Aspirin", "dosage": "100mg"}]}));
        let prediction = record(json!({"medication_list": [{"name": "Asprin", "dosage": "100mg"}]}));

        let result = evaluator.evaluate(&prediction, &reference);
        let expected = (6.0 / 7.0 + 0.9) / 1.9;
        assert!((result.overall_score - expected).abs() < 1e-9);
        assert!((result.item_scores[0].score - expected).abs() < 1e-9);
        assert_eq!(result.item_scores[0].predicted_label, "Asprin");
        assert!(result.field_scores.is_empty());
    }

    #[test]
    fn test_missing_prediction_field_scores_zero() {
        let reference = record(json!({"patient_name": "Ada", "date": "2024-01-01"}));
        let prediction = record(json!({"patient_name": "Ada"}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert_eq!(result.field_scores.get("date"), Some(&0.0));
        // (1.0 * 1.0 + 0.0 * 0.9) / 1.9
        assert!((result.overall_score - 1.0 / 1.9).abs() < 1e-9);
    }

    #[test]
    fn test_fields_absent_from_reference_ignored() {
        let reference = record(json!({"patient_name": "Ada"}));
        let prediction = record(json!({"patient_name": "Ada", "doctor_name": "Dr. Who"}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert_eq!(result.field_scores.len(), 1);
        assert!((result.overall_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unmatched_item() {
        let reference = record(json!({
            "medication_list": [{"name": "Aspirin", "dosage": "100mg", "route": "oral"}]
        }));
        let prediction = record(json!({"medication_list": [{"name": "Warfarin", "dosage": "100mg"}]}));
        let result = evaluator().evaluate(&prediction, &reference);

        let item = &result.item_scores[0];
        assert!(!item.is_matched());
        assert_eq!(item.reference_label, "Aspirin");
        assert_eq!(item.predicted_label, NOT_FOUND_LABEL);
        assert_eq!(item.field_scores.len(), 3);
        assert!(item.field_scores.values().all(|s| *s == 0.0));
        assert_eq!(item.score, 0.0);
        assert_eq!(result.overall_score, 0.0);
    }

    #[test]
    fn test_missing_prediction_list_counts_as_empty() {
        let reference = record(json!({"patient_name": "Ada", "medication_list": [{"name": "Aspirin"}]}));
        let prediction = record(json!({"patient_name": "Ada"}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert_eq!(result.item_scores.len(), 1);
        assert!(!result.item_scores[0].is_matched());
        assert!((result.overall_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_greedy_matching_reuses_candidates() {
        let reference = record(json!({"medication_list": [{"name": "Aspirin"}, {"name": "Aspirn"}]}));
        let prediction = record(json!({"medication_list": [{"name": "Aspirin"}]}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert!(result.item_scores.iter().all(ItemScore::is_matched));
        assert_eq!(result.item_scores[1].predicted_label, "Aspirin");
    }

    #[test]
    fn test_best_candidate_wins() {
        let reference = record(json!({"medication_list": [{"name": "Metformin", "dosage": "500mg"}]}));
        let prediction = record(json!({"medication_list": [
            {"name": "Metformn", "dosage": "850mg"},
            {"name": "metformin", "dosage": "500mg"}
        ]}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert_eq!(result.item_scores[0].predicted_label, "metformin");
        assert!((result.overall_score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let config = EvaluationConfig {
            name_match_threshold: 0.75,
            ..EvaluationConfig::default()
        };
        let evaluator = Evaluator::new(config).unwrap();
        // one edit over four characters: similarity exactly 0.75
        let reference = record(json!({"medication_list": [{"name": "abcd"}]}));
        let prediction = record(json!({"medication_list": [{"name": "abcx"}]}));
        let result = evaluator.evaluate(&prediction, &reference);
        assert!(!result.item_scores[0].is_matched());
    }

    #[test]
    fn test_nameless_reference_item_labelled_unknown() {
        let reference = record(json!({"medication_list": [{"dosage": "5mg"}, "junk"]}));
        let prediction = record(json!({"medication_list": []}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert_eq!(result.item_scores.len(), 2);
        assert_eq!(result.item_scores[0].reference_label, UNKNOWN_LABEL);
        assert_eq!(result.item_scores[1].field_scores.len(), 1);
    }

    #[test]
    fn test_nameless_items_are_never_aligned() {
        let reference = record(json!({"medication_list": [{"dosage": "5mg"}]}));
        let prediction = record(json!({"medication_list": [{"dosage": "5mg"}]}));
        let result = evaluator().evaluate(&prediction, &reference);

        let item = &result.item_scores[0];
        assert!(!item.matched);
        assert_eq!(item.predicted_label, NOT_FOUND_LABEL);
        assert_eq!(item.field_scores.get("name"), Some(&0.0));
        assert_eq!(item.field_scores.get("dosage"), Some(&0.0));
        assert_eq!(item.score, 0.0);
    }

    #[test]
    fn test_named_reference_skips_nameless_candidate() {
        let reference = record(json!({"medication_list": [{"name": "Aspirin", "dosage": "5mg"}]}));
        let prediction = record(json!({"medication_list": [
            {"dosage": "5mg"},
            {"name": "Aspirin", "dosage": "10mg"}
        ]}));
        let result = evaluator().evaluate(&prediction, &reference);
        assert!(result.item_scores[0].matched);
        assert_eq!(result.item_scores[0].field_scores.get("dosage"), Some(&0.5));
    }

    #[test]
    fn test_match_state_ignores_label_text() {
        let reference = record(json!({"medication_list": [{"name": "Not found"}]}));
        let result = evaluator().evaluate(&reference, &reference);
        let item = &result.item_scores[0];
        assert_eq!(item.predicted_label, NOT_FOUND_LABEL);
        assert!(item.is_matched());
        assert!((item.score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_reference_scores_zero() {
        let result = evaluator().evaluate(&Record::new(), &record(json!({"ward": 7})));
        assert_eq!(result.overall_score, 0.0);
        assert!(result.field_scores.is_empty());
    }

    #[test]
    fn test_dataset_means_skip_unscored_fields() {
        let references = vec![
            record(json!({"patient_name": "Ada", "date": "2024-01-01"})),
            record(json!({"patient_name": "Bob"})),
        ];
        let predictions = vec![
            record(json!({"patient_name": "Ada", "date": "2024-01-01"})),
            record(json!({"patient_name": "Rob"})),
        ];
        let summary = evaluator().evaluate_dataset(&predictions, &references).unwrap();

        assert_eq!(summary.record_count, 2);
        assert_eq!(summary.field_scores.get("date"), Some(&1.0));
        let name_mean = (1.0 + 2.0 / 3.0) / 2.0;
        assert!((summary.field_scores["patient_name"] - name_mean).abs() < 1e-9);
        assert!((summary.overall_score - name_mean).abs() < 1e-9);
    }

    #[test]
    fn test_dataset_item_field_means() {
        let references = vec![reference(), reference()];
        let predictions = vec![reference(), Record::new()];
        let summary = evaluator().evaluate_dataset(&predictions, &references).unwrap();
        assert!((summary.item_field_scores["name"] - 0.5).abs() < 1e-9);
        assert!((summary.item_field_scores["frequency"] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_dataset_length_mismatch() {
        let err = evaluator()
            .evaluate_dataset(&[Record::new()], &[])
            .unwrap_err();
        assert!(matches!(
            err,
            RxError::LengthMismatch { predictions: 1, references: 0 }
        ));
    }

    #[test]
    fn test_empty_dataset() {
        let summary = evaluator().evaluate_dataset(&[], &[]).unwrap();
        assert_eq!(summary, DatasetSummary::default());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = EvaluationConfig {
            item_weights: WeightTable::from_pairs([("name", -1.0)]),
            ..EvaluationConfig::default()
        };
        assert!(matches!(Evaluator::new(config), Err(RxError::InvalidWeight { .. })));
    }
}
