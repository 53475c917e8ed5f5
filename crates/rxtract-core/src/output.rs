//! Dataset loading, JSON persistence and report rendering.
//!
//! - **Loading**: read prediction and ground-truth record arrays
//! - **Persistence**: write any serializable result as pretty JSON
//! - **Reporting**: render a dataset evaluation as Markdown

// Bar widths convert between usize and f64
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use crate::error::Result;
use crate::models::{DatasetSummary, EvaluationResult, Record};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use tracing::debug;

const BAR_WIDTH: usize = 20;

/// Read a JSON array of records.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not an array of objects.
pub fn load_records(path: &Path) -> Result<Vec<Record>> {
    let contents = std::fs::read_to_string(path)?;
    let records: Vec<Record> = serde_json::from_str(&contents)?;
    debug!("Loaded {} record(s) from {}", records.len(), path.display());
    Ok(records)
}

/// Read predictions and ground truth.
///
/// Lengths are not checked here; the evaluator rejects mismatched datasets.
///
/// # Errors
///
/// Returns an error if either file cannot be loaded.
pub fn load_dataset(predictions: &Path, ground_truth: &Path) -> Result<(Vec<Record>, Vec<Record>)> {
    Ok((load_records(predictions)?, load_records(ground_truth)?))
}

/// Write `value` as pretty-printed JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if serialization or file writing fails.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    save_text(&json, path)
}

/// Write `text` to `path`, creating parent directories.
///
/// # Errors
///
/// Returns an error if a directory or the file cannot be written.
pub fn save_text(text: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, text)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

/// Render a dataset evaluation as Markdown.
#[must_use = "generates evaluation report"]
pub fn generate_report(summary: &DatasetSummary, results: &[EvaluationResult]) -> String {
    let mut report = String::new();

    report.push_str("# Extraction Evaluation Report\n\n");
    let _ = writeln!(
        report,
        "Generated: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(report, "**Records:** {}", summary.record_count);
    let _ = writeln!(report, "**Overall Score:** {:.2}\n", summary.overall_score);

    report.push_str("## Record Fields\n\n");
    score_table(&mut report, &summary.field_scores);

    report.push_str("\n## Item Fields\n\n");
    score_table(&mut report, &summary.item_field_scores);

    report.push_str("\n## Records\n\n");
    for (idx, result) in results.iter().enumerate() {
        let _ = writeln!(
            report,
            "### Record {} ({:.2})\n",
            idx + 1,
            result.overall_score
        );

        if result.item_scores.is_empty() {
            report.push_str("No reference items.\n\n");
            continue;
        }

        report.push_str("| Reference | Predicted | Score |\n");
        report.push_str("|-----------|-----------|-------|\n");
        for item in &result.item_scores {
            let _ = writeln!(
                report,
                "| {} | {} | {:.2} |",
                escape_cell(&item.reference_label),
                escape_cell(&item.predicted_label),
                item.score
            );
        }
        report.push('\n');
    }

    report
}

fn score_table(report: &mut String, scores: &BTreeMap<String, f64>) {
    if scores.is_empty() {
        report.push_str("No fields scored.\n");
        return;
    }

    report.push_str("| Field | Score | |\n");
    report.push_str("|-------|-------|---|\n");
    for (field, score) in scores {
        let _ = writeln!(
            report,
            "| {} | {:.2} | `{}` |",
            escape_cell(field),
            score,
            bar(*score)
        );
    }
}

/// Fixed-width text bar for a score in `[0, 1]`.
fn bar(score: f64) -> String {
    let filled = (score.clamp(0.0, 1.0) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ItemScore;
    use serde_json::json;

    #[test]
    fn test_bar() {
        assert_eq!(bar(0.0), ".".repeat(20));
        assert_eq!(bar(1.0), "#".repeat(20));
        assert_eq!(bar(0.5), format!("{}{}", "#".repeat(10), ".".repeat(10)));
        assert_eq!(bar(7.0), "#".repeat(20));
    }

    #[test]
    fn test_save_and_load_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/records.json");
        let records = vec![
            Record::from_value(json!({"patient_name": "Ada"})).unwrap(),
            Record::new(),
        ];
        save_json(&records, &path).unwrap();
        assert_eq!(load_records(&path).unwrap(), records);
    }

    #[test]
    fn test_save_text_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/2024/report.md");
        save_text("# Report\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report\n");
    }

    #[test]
    fn test_load_records_rejects_non_objects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(load_records(&path), Err(crate::RxError::Json(_))));
    }

    #[test]
    fn test_load_dataset_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("p.json");
        std::fs::write(&present, "[]").unwrap();
        let missing = dir.path().join("gt.json");
        assert!(matches!(
            load_dataset(&present, &missing),
            Err(crate::RxError::Io(_))
        ));
    }

    #[test]
    fn test_generate_report() {
        let mut summary = DatasetSummary {
            overall_score: 0.9,
            record_count: 1,
            ..DatasetSummary::default()
        };
        summary.field_scores.insert("patient_name".to_string(), 1.0);
        summary.item_field_scores.insert("name".to_string(), 0.75);

        let result = EvaluationResult {
            item_scores: vec![ItemScore {
                reference_label: "Aspirin".to_string(),
                predicted_label: "Asp|rin".to_string(),
                score: 0.75,
                ..ItemScore::default()
            }],
            overall_score: 0.9,
            ..EvaluationResult::default()
        };

        let report = generate_report(&summary, &[result]);
        assert!(report.starts_with("# Extraction Evaluation Report"));
        assert!(report.contains("**Overall Score:** 0.90"));
        assert!(report.contains("| patient_name | 1.00 |"));
        assert!(report.contains("| name | 0.75 |"));
        assert!(report.contains("| Aspirin | Asp\\|rin | 0.75 |"));
    }

    #[test]
    fn test_generate_report_empty() {
        let report = generate_report(&DatasetSummary::default(), &[]);
        assert_eq!(report.matches("No fields scored.").count(), 2);
    }
}
