//! Raw model text to validated record.
//!
//! ```text
//! first pass ──parse──┐
//!                     ├─ pick ─> standardize names ─> validate
//! verify pass ─parse──┘
//! ```
//!
//! A successfully parsed verification response replaces the first pass.
//! When nothing parses the error-shaped record still flows through
//! validation, so callers always get a record with a `validation` block.

use crate::config::Config;
use crate::error::Result;
use crate::models::Record;
use crate::parser::parse;
use crate::terminology::{TerminologyCorrector, Vocabulary};
use crate::validator::Validator;
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Which response produced the final record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassUsed {
    /// The first extraction pass
    First,
    /// The verification pass
    Verification,
    /// Neither response parsed; the record is error-shaped
    Failed,
}

/// Output of [`Pipeline::process`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Standardized and validated record
    pub record: Record,
    /// Response the record came from
    pub source: PassUsed,
}

/// Parser, terminology corrector and validator built once and reused.
#[derive(Debug, Clone)]
pub struct Pipeline {
    corrector: Option<TerminologyCorrector>,
    validator: Validator,
}

impl Pipeline {
    /// Build the pipeline. Terminology correction runs only with a vocabulary.
    ///
    /// # Errors
    ///
    /// Returns an error if a validation pattern does not compile.
    pub fn new(config: Config, vocabulary: Option<Vocabulary>) -> Result<Self> {
        let validator = Validator::new(config.validation)?.with_schema(config.schema.clone());
        let corrector = vocabulary.map(|vocab| {
            TerminologyCorrector::new(vocab, config.terminology).with_schema(config.schema)
        });
        Ok(Self {
            corrector,
            validator,
        })
    }

    /// Turn raw responses into a validated record. Never fails.
    #[must_use]
    pub fn process(&self, first_pass: &str, verification: Option<&str>) -> ProcessedRecord {
        self.process_at(first_pass, verification, Local::now().date_naive())
    }

    /// [`process`](Self::process) with an explicit date for the staleness rule.
    #[must_use]
    pub fn process_at(
        &self,
        first_pass: &str,
        verification: Option<&str>,
        today: NaiveDate,
    ) -> ProcessedRecord {
        let (record, source) = Self::select(first_pass, verification);
        let standardized = self.standardize(&record);
        ProcessedRecord {
            record: self.validator.validate_at(&standardized, today),
            source,
        }
    }

    fn select(first_pass: &str, verification: Option<&str>) -> (Record, PassUsed) {
        let first = parse(first_pass);

        if let Some(text) = verification {
            match parse(text) {
                Ok(record) => {
                    info!("Using verified record");
                    return (record, PassUsed::Verification);
                }
                Err(e) => warn!("Verification pass did not parse, keeping first pass: {}", e),
            }
        }

        match first {
            Ok(record) => (record, PassUsed::First),
            Err(failure) => {
                warn!("No parsable response: {}", failure);
                (failure.into_record(), PassUsed::Failed)
            }
        }
    }

    fn standardize(&self, record: &Record) -> Record {
        match &self.corrector {
            Some(corrector) => corrector.standardize(record),
            None => record.clone(),
        }
    }
}
