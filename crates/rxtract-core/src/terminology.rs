//! Snapping item names to a controlled vocabulary.
//!
//! Each item name is compared case-insensitively against every vocabulary
//! entry. The closest entry at or above the cutoff replaces the name (in the
//! vocabulary's own casing) and a `<name field>_confidence` value is attached
//! to the item. Names with no close entry are left as they are.

// Length ratios use f64 from usize
#![allow(clippy::cast_precision_loss)]

use crate::config::{RecordSchema, TerminologyConfig};
use crate::error::{Result, RxError};
use crate::models::{round2, Record};
use crate::similarity::similarity;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

/// Key holding the term list in a vocabulary file.
pub const DRUG_NAMES_KEY: &str = "drug_names";

/// A list of canonical terms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
    terms: Vec<String>,
    lowered: Vec<String>,
}

impl Vocabulary {
    /// Build a vocabulary from canonical terms. Blank terms are dropped.
    pub fn new<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let terms: Vec<String> = terms
            .into_iter()
            .map(Into::into)
            .filter(|t| !t.trim().is_empty())
            .collect();
        let lowered = terms.iter().map(|t| t.to_lowercase()).collect();
        Self { terms, lowered }
    }

    /// Load a vocabulary from JSON: either `{"drug_names": [...]}` or a bare array.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::Io`] if the file cannot be read and
    /// [`RxError::Vocabulary`] if it is not one of the accepted shapes.
    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
            .map_err(|e| RxError::Vocabulary(format!("{}: {e}", path.display())))
    }

    /// Parse a vocabulary from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RxError::Vocabulary`] if the text is not valid JSON of an
    /// accepted shape.
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| RxError::Vocabulary(e.to_string()))?;

        let list = match &value {
            Value::Array(list) => list,
            Value::Object(map) => map
                .get(DRUG_NAMES_KEY)
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    RxError::Vocabulary(format!("expected a '{DRUG_NAMES_KEY}' array"))
                })?,
            _ => {
                return Err(RxError::Vocabulary(
                    "expected a JSON array or object".to_string(),
                ))
            }
        };

        let terms = list
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| RxError::Vocabulary(format!("non-string term: {v}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(terms))
    }

    /// Number of terms.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the vocabulary has no terms.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Closest canonical term to `name` with similarity at least `cutoff`.
    ///
    /// Returns the canonical term and the lowercase form that matched. Ties go
    /// to the earlier term.
    #[must_use]
    pub fn closest(&self, name: &str, cutoff: f64) -> Option<(&str, &str)> {
        let needle = name.to_lowercase();
        let mut best: Option<(usize, f64)> = None;

        for (idx, candidate) in self.lowered.iter().enumerate() {
            let score = similarity(Some(needle.as_str()), Some(candidate.as_str()));
            if score < cutoff {
                continue;
            }
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((idx, score));
            }
        }

        best.map(|(idx, _)| (self.terms[idx].as_str(), self.lowered[idx].as_str()))
    }
}

/// Replaces near-miss item names with canonical vocabulary terms.
#[derive(Debug, Clone)]
pub struct TerminologyCorrector {
    vocabulary: Vocabulary,
    config: TerminologyConfig,
    schema: RecordSchema,
}

impl TerminologyCorrector {
    /// Create a corrector over `vocabulary` using the default record schema.
    #[must_use]
    pub fn new(vocabulary: Vocabulary, config: TerminologyConfig) -> Self {
        Self {
            vocabulary,
            config,
            schema: RecordSchema::default(),
        }
    }

    /// Use a custom record schema.
    #[must_use]
    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    /// The vocabulary in use.
    #[inline]
    #[must_use]
    pub const fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    /// Return a copy of `record` with item names snapped to the vocabulary.
    ///
    /// Only the item name field is ever replaced, and only with a vocabulary
    /// term. With an empty vocabulary the record comes back unchanged.
    #[must_use]
    pub fn standardize(&self, record: &Record) -> Record {
        let mut result = record.clone();
        if self.vocabulary.is_empty() {
            return result;
        }

        let name_field = self.schema.item_name_field.as_str();
        let confidence_field = format!("{name_field}_confidence");
        let Some(items) = result.items_mut(&self.schema.items_field) else {
            return result;
        };

        for item in items.iter_mut().filter_map(Value::as_object_mut) {
            let Some(name) = item.get(name_field).and_then(Value::as_str) else {
                continue;
            };
            let Some((canonical, matched)) = self.vocabulary.closest(name, self.config.cutoff)
            else {
                continue;
            };

            let confidence = name_confidence(name, matched, self.config.cutoff);
            debug!(
                "Standardized item name '{}' -> '{}' (confidence: {:.2})",
                name, canonical, confidence
            );
            item.insert(name_field.to_string(), Value::String(canonical.to_string()));
            item.insert(confidence_field.clone(), Value::from(confidence));
        }

        result
    }
}

/// Confidence for a corrected name from the cutoff and the length ratio of
/// the match to the original, rounded to two decimals and clamped to `[0, 1]`.
fn name_confidence(original: &str, matched: &str, cutoff: f64) -> f64 {
    let original_len = original.chars().count().max(1) as f64;
    let ratio = matched.chars().count() as f64 / original_len;
    let raw = (1.0 - cutoff).mul_add(-(1.0 - ratio), 1.0);
    round2(raw.clamp(0.0, 1.0))
}
