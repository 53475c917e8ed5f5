//! rxtract CLI
//!
//! Parse, validate and score prescription records extracted by a vision
//! model. The model itself runs elsewhere; this tool consumes its raw text
//! responses.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rxtract_core::output::{generate_report, load_dataset, load_records, save_json, save_text};
use rxtract_core::prompts::{extraction_prompt, segment_prompt, verification_prompt};
use rxtract_core::{Config, Evaluator, Pipeline, Record, Validator, Vocabulary};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Suffix marking a verification-pass response next to a first-pass one.
const VERIFY_SUFFIX: &str = ".verify.txt";

#[derive(Parser)]
#[command(name = "rxtract")]
#[command(about = "Tolerant parsing, validation and scoring of extracted prescriptions")]
struct Args {
    /// TOML configuration file (defaults apply when absent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline on one raw model response
    Parse {
        /// Raw first-pass response
        #[arg(short, long)]
        input: PathBuf,

        /// Raw verification-pass response
        #[arg(long)]
        verification: Option<PathBuf>,

        /// Vocabulary JSON for drug name correction
        #[arg(long)]
        terms: Option<PathBuf>,

        /// Write the record here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a record and print it with its validation block
    Validate {
        /// Record JSON
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Score one predicted record against its reference
    Compare {
        /// Predicted record JSON
        #[arg(long)]
        prediction: PathBuf,

        /// Reference record JSON
        #[arg(long)]
        reference: PathBuf,
    },

    /// Score a dataset of predictions against ground truth
    Evaluate {
        /// JSON array of predicted records
        #[arg(long)]
        predictions: PathBuf,

        /// JSON array of reference records
        #[arg(long)]
        ground_truth: PathBuf,

        /// Write the summary JSON here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write a Markdown report here
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Process every raw response in a directory
    Batch {
        /// Directory of `*.txt` responses (optional `<stem>.verify.txt` siblings)
        #[arg(short, long)]
        input_dir: PathBuf,

        /// Directory for per-record and combined results
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Ground truth JSON array, in file-name order
        #[arg(long)]
        gt_file: Option<PathBuf>,

        /// Vocabulary JSON for drug name correction
        #[arg(long)]
        terms: Option<PathBuf>,
    },

    /// Print the prompt templates
    Prompt {
        /// Render the verification prompt for this record instead
        #[arg(long)]
        verify: Option<PathBuf>,

        /// Render the segment prompt for this region description instead
        #[arg(long)]
        segment: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "rxtract=info"
                    .parse()
                    .expect("directive is compile-time constant"),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Parse {
            input,
            verification,
            terms,
            output,
        } => {
            parse_one(
                config,
                &input,
                verification.as_deref(),
                terms.as_deref(),
                output.as_deref(),
            )?;
        }
        Command::Validate { input } => validate(config, &input)?,
        Command::Compare {
            prediction,
            reference,
        } => compare(config, &prediction, &reference)?,
        Command::Evaluate {
            predictions,
            ground_truth,
            output,
            report,
        } => {
            let score = evaluate(
                config,
                &predictions,
                &ground_truth,
                output.as_deref(),
                report.as_deref(),
            )?;
            println!("Overall evaluation score: {score:.2}");
        }
        Command::Batch {
            input_dir,
            output_dir,
            gt_file,
            terms,
        } => {
            if let Some(score) = batch(
                config,
                &input_dir,
                &output_dir,
                gt_file.as_deref(),
                terms.as_deref(),
            )? {
                println!("Overall evaluation score: {score:.2}");
            }
        }
        Command::Prompt { verify, segment } => prompt(&config, verify.as_deref(), segment)?,
    }

    Ok(())
}

/// Load, override from the environment, and check the configuration.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_vocabulary(path: Option<&Path>) -> Result<Option<Vocabulary>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let vocabulary = Vocabulary::from_path(path)
        .with_context(|| format!("Failed to load vocabulary {}", path.display()))?;
    info!("Loaded {} vocabulary terms", vocabulary.len());
    Ok(Some(vocabulary))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_record(path: &Path) -> Result<Record> {
    let text = read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a JSON object", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_one(
    config: Config,
    input: &Path,
    verification: Option<&Path>,
    terms: Option<&Path>,
    output: Option<&Path>,
) -> Result<()> {
    let pipeline = Pipeline::new(config, load_vocabulary(terms)?)?;
    let first = read_text(input)?;
    let verified = verification.map(read_text).transpose()?;

    let processed = pipeline.process(&first, verified.as_deref());
    info!("Record built from {:?} pass", processed.source);

    match output {
        Some(path) => save_json(&processed.record, path)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => print_json(&processed.record)?,
    }
    Ok(())
}

fn validate(config: Config, input: &Path) -> Result<()> {
    let validator = Validator::new(config.validation)?.with_schema(config.schema);
    let record = read_record(input)?;
    print_json(&validator.validate(&record))
}

fn compare(config: Config, prediction: &Path, reference: &Path) -> Result<()> {
    let evaluator = Evaluator::new(config.evaluation)?.with_schema(config.schema);
    let result = evaluator.evaluate(&read_record(prediction)?, &read_record(reference)?);
    print_json(&result)
}

/// Score a dataset and return the overall score.
fn evaluate(
    config: Config,
    predictions: &Path,
    ground_truth: &Path,
    output: Option<&Path>,
    report: Option<&Path>,
) -> Result<f64> {
    let (predictions, references) =
        load_dataset(predictions, ground_truth).context("Failed to load dataset")?;
    score_dataset(config, &predictions, &references, output, report)
}

fn score_dataset(
    config: Config,
    predictions: &[Record],
    references: &[Record],
    output: Option<&Path>,
    report: Option<&Path>,
) -> Result<f64> {
    let evaluator = Evaluator::new(config.evaluation)?.with_schema(config.schema);
    let results = evaluator.evaluate_all(predictions, references)?;
    let summary = rxtract_core::aggregate(&results);

    if let Some(path) = output {
        save_json(&summary, path).with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved metrics to {}", path.display());
    }
    if let Some(path) = report {
        save_text(&generate_report(&summary, &results), path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Saved report to {}", path.display());
    }

    Ok(summary.overall_score)
}

/// First-pass response files in name order, each with its optional
/// verification sibling.
fn collect_responses(input_dir: &Path) -> Result<Vec<(PathBuf, Option<PathBuf>)>> {
    let mut first_passes: Vec<PathBuf> = std::fs::read_dir(input_dir)
        .with_context(|| format!("Failed to read {}", input_dir.display()))?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|e| e == "txt"))
        .filter(|p| !p.to_string_lossy().ends_with(VERIFY_SUFFIX))
        .collect();
    first_passes.sort();

    Ok(first_passes
        .into_iter()
        .map(|path| {
            let stem = file_stem(&path);
            let sibling = path.with_file_name(format!("{stem}{VERIFY_SUFFIX}"));
            let verify = sibling.is_file().then_some(sibling);
            (path, verify)
        })
        .collect())
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Process a directory of responses. Returns the overall score when ground
/// truth is supplied.
fn batch(
    config: Config,
    input_dir: &Path,
    output_dir: &Path,
    gt_file: Option<&Path>,
    terms: Option<&Path>,
) -> Result<Option<f64>> {
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;

    let pipeline = Pipeline::new(config.clone(), load_vocabulary(terms)?)?;
    let responses = collect_responses(input_dir)?;
    info!("Found {} responses", responses.len());

    let mut records = Vec::with_capacity(responses.len());
    for (first_path, verify_path) in &responses {
        let stem = file_stem(first_path);
        let first = read_text(first_path)?;
        let verified = verify_path.as_deref().map(read_text).transpose()?;

        let processed = pipeline.process(&first, verified.as_deref());
        if processed.record.is_error() {
            warn!("{}: no parsable JSON in response", stem);
        }

        save_json(
            &processed.record,
            &output_dir.join(format!("{stem}_results.json")),
        )?;
        records.push(processed.record);
    }

    save_json(&records, &output_dir.join("all_results.json"))?;
    info!("Saved {} records to {}", records.len(), output_dir.display());

    let Some(gt_file) = gt_file else {
        return Ok(None);
    };
    let references = load_records(gt_file)
        .with_context(|| format!("Failed to load ground truth {}", gt_file.display()))?;
    let score = score_dataset(
        config,
        &records,
        &references,
        Some(&output_dir.join("evaluation_metrics.json")),
        None,
    )?;
    Ok(Some(score))
}

fn prompt(config: &Config, verify: Option<&Path>, segment: Option<String>) -> Result<()> {
    let text = match (verify, segment) {
        (Some(path), _) => verification_prompt(&read_record(path)?),
        (None, Some(region)) => segment_prompt(&region),
        (None, None) => extraction_prompt(&config.schema),
    };
    println!("{text}");
    Ok(())
}
