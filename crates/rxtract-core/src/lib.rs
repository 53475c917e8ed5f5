//! # rxtract-core
//!
//! Turns loosely formatted model output describing a prescription into a
//! validated record, and scores predicted records against ground truth.
//!
//! ## Components
//!
//! - [`similarity`] - Normalized Levenshtein similarity of optional values
//! - [`parser`] - Tolerant JSON recovery from raw model text
//! - [`terminology`] - Snapping item names to a controlled vocabulary
//! - [`validator`] - Plausibility rules with per-item and overall confidence
//! - [`evaluator`] - Weighted, reference-driven scoring and dataset aggregation
//! - [`pipeline`] - Parse, pick pass, standardize and validate in one call
//!
//! ## Example
//!
//! ```
//! use rxtract_core::{parse, Evaluator, EvaluationConfig, Validator, ValidationConfig};
//!
//! let prediction = parse("```json\n{\"patient_name\": \"Ada\", \"medication_list\": []}\n```")
//!     .expect("fenced JSON parses");
//!
//! let validated = Validator::new(ValidationConfig::default())?.validate(&prediction);
//! let validation = validated.validation().expect("validation attached");
//! assert!(!validation.is_valid);
//!
//! let evaluator = Evaluator::new(EvaluationConfig::default())?;
//! let result = evaluator.evaluate(&prediction, &prediction);
//! assert!((result.overall_score - 1.0).abs() < 1e-9);
//! # Ok::<(), rxtract_core::RxError>(())
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod models;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod similarity;
pub mod terminology;
pub mod validator;

pub use config::{
    Config, EvaluationConfig, RecordSchema, TerminologyConfig, ValidationConfig, WeightTable,
};
pub use error::{Result, RxError};
pub use evaluator::{aggregate, Evaluator};
pub use models::{DatasetSummary, EvaluationResult, Item, ItemScore, Record, ValidationResult};
pub use parser::{parse, ParseFailure};
pub use pipeline::{PassUsed, Pipeline, ProcessedRecord};
pub use similarity::{similarity, value_similarity};
pub use terminology::{TerminologyCorrector, Vocabulary};
pub use validator::Validator;
