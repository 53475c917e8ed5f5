//! Prompt templates for the upstream extraction model.
//!
//! The model call itself happens elsewhere. These functions only render the
//! instruction text for the first extraction pass, the verification pass and
//! per-region extraction.

use crate::config::RecordSchema;
use crate::models::Record;
use std::fmt::Write;

/// Instruction for the first extraction pass.
///
/// Field names follow `schema` so the model's keys line up with what the
/// validator and evaluator read.
#[must_use]
pub fn extraction_prompt(schema: &RecordSchema) -> String {
    let mut prompt = String::new();

    let top_level = [
        (schema.subject_name_field.as_str(), "Full name of the patient"),
        (schema.age_field.as_str(), "Age of the patient (number)"),
        ("patient_gender", "Gender of the patient"),
    ];
    let items = [
        (schema.item_name_field.as_str(), "Name of the medication"),
        (
            schema.dosage_field.as_str(),
            "The amount to be taken (e.g., \"10mg\", \"1 tablet\")",
        ),
        (
            "route",
            "How the medication should be taken (e.g., \"oral\", \"topical\")",
        ),
        (
            schema.frequency_field.as_str(),
            "How often to take it (e.g., \"twice daily\", \"every 8 hours\")",
        ),
        ("duration", "How long to take it (e.g., \"7 days\", \"2 weeks\")"),
        (
            "special_instructions",
            "Any additional notes on how to take the medication",
        ),
    ];
    let trailing = [
        ("diagnosis", "The medical condition being treated"),
        ("doctor_name", "Name of the prescribing doctor"),
        (
            "doctor_credentials",
            "Qualifications or specialization of the doctor",
        ),
        (schema.date_field.as_str(), "Date when the prescription was written"),
        ("hospital/clinic", "Name of the hospital or clinic"),
    ];

    let _ = writeln!(
        prompt,
        "Extract all information from this handwritten medical {} and format it as a JSON object with the following fields:\n",
        schema.record_noun
    );
    for (field, description) in top_level {
        let _ = writeln!(prompt, "- {field}: {description}");
    }
    let _ = writeln!(
        prompt,
        "- {}: A list of prescribed {} where each entry contains:",
        schema.items_field, schema.items_noun
    );
    for (field, description) in items {
        let _ = writeln!(prompt, "  - {field}: {description}");
    }
    for (field, description) in trailing {
        let _ = writeln!(prompt, "- {field}: {description}");
    }
    prompt.push_str(
        "\nProvide your response in valid JSON format only. If you cannot read or determine any field with certainty, use null for that field.",
    );

    prompt
}

/// Instruction for the second pass, embedding the first-pass record.
#[must_use]
pub fn verification_prompt(record: &Record) -> String {
    let rendered = serde_json::to_string_pretty(record).unwrap_or_else(|_| "{}".to_string());
    format!(
        "I've extracted the following information from a medical prescription:\n\n\
         {rendered}\n\n\
         Please verify this information and correct any errors you can identify. Pay special attention to:\n\
         1. Medical terminology and drug names\n\
         2. Dosage amounts and units\n\
         3. Frequency instructions\n\
         4. Missing critical information\n\n\
         If any information is clearly wrong or implausible for a medical prescription, please fix it.\n\
         Return the corrected information in the same JSON format."
    )
}

/// Instruction for one cropped region of the document.
#[must_use]
pub fn segment_prompt(region_description: &str) -> String {
    format!(
        "This image shows a portion of a medical prescription that likely contains {region_description}.\n\
         Extract all legible text from this segment and format it appropriately."
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extraction_prompt_lists_schema_fields() {
        let prompt = extraction_prompt(&RecordSchema::default());
        assert!(prompt.starts_with("Extract all information"));
        assert!(prompt.contains("- patient_name: Full name of the patient"));
        assert!(prompt.contains("- medication_list: A list of prescribed medications"));
        assert!(prompt.contains("  - dosage: The amount to be taken"));
        assert!(prompt.contains("- hospital/clinic:"));
        assert!(prompt.ends_with("use null for that field."));
    }

    #[test]
    fn test_extraction_prompt_follows_custom_schema() {
        let schema = RecordSchema {
            items_field: "drugs".to_string(),
            item_name_field: "drug".to_string(),
            ..RecordSchema::default()
        };
        let prompt = extraction_prompt(&schema);
        assert!(prompt.contains("- drugs: A list"));
        assert!(prompt.contains("  - drug: Name of the medication"));
        assert!(!prompt.contains("medication_list"));
    }

    #[test]
    fn test_verification_prompt_embeds_record() {
        let record = Record::from_value(json!({"patient_name": "Ada"})).unwrap();
        let prompt = verification_prompt(&record);
        assert!(prompt.contains("\"patient_name\": \"Ada\""));
        assert!(prompt.contains("2. Dosage amounts and units"));
        assert!(prompt.ends_with("same JSON format."));
    }

    #[test]
    fn test_segment_prompt() {
        let prompt = segment_prompt("the medication list");
        assert!(prompt.contains("likely contains the medication list."));
        assert_eq!(prompt.lines().count(), 2);
    }
}
