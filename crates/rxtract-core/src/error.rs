//! Error types for record scoring and validation.
//!
//! Only configuration-level problems surface as [`RxError`]. Malformed model
//! output is not an error in this sense: the parser reports it as a
//! [`ParseFailure`](crate::parser::ParseFailure) value, and validation
//! problems become warnings on the record.

use thiserror::Error;

/// Fatal errors raised while configuring components or loading inputs.
///
/// # Examples
///
/// ```
/// use rxtract_core::{Evaluator, EvaluationConfig, RxError};
///
/// let evaluator = Evaluator::new(EvaluationConfig::default())?;
/// match evaluator.evaluate_dataset(&[], &[Default::default()]) {
///     Err(RxError::LengthMismatch { predictions, references }) => {
///         assert_eq!((predictions, references), (0, 1));
///     }
///     other => panic!("unexpected: {other:?}"),
/// }
/// # Ok::<(), RxError>(())
/// ```
#[derive(Error, Debug)]
pub enum RxError {
    /// Prediction and reference datasets differ in length.
    #[error(
        "number of predictions ({predictions}) and ground truth samples ({references}) must match"
    )]
    LengthMismatch {
        /// Number of predicted records
        predictions: usize,
        /// Number of reference records
        references: usize,
    },

    /// The vocabulary source could not be read or has the wrong shape.
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// A configured pattern is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidPattern {
        /// The offending pattern text
        pattern: String,
        /// Underlying regex compilation error
        #[source]
        source: regex::Error,
    },

    /// A weight table entry is not a positive finite number.
    #[error("invalid weight {weight} for field '{field}' (must be positive and finite)")]
    InvalidWeight {
        /// Field the weight belongs to
        field: String,
        /// Rejected weight value
        weight: f64,
    },

    /// Any other out-of-range configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for rxtract operations.
pub type Result<T> = std::result::Result<T, RxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_mismatch_message() {
        let err = RxError::LengthMismatch {
            predictions: 3,
            references: 4,
        };
        assert_eq!(
            err.to_string(),
            "number of predictions (3) and ground truth samples (4) must match"
        );
    }

    #[test]
    fn test_invalid_pattern_keeps_source() {
        let source = regex::Regex::new("(unclosed").unwrap_err();
        let err = RxError::InvalidPattern {
            pattern: "(unclosed".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("invalid pattern '(unclosed'"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: RxError = io.into();
        assert!(matches!(err, RxError::Io(_)));
    }
}
