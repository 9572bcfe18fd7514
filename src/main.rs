use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use idrisk::config::Settings;
use idrisk::batch;
use idrisk::evaluation::{self, LabelledScore};
use idrisk::models::{FeatureSet, RuleConfig};
use idrisk::pipeline::DecisionPipeline;
use idrisk::processing::{ImageQualityAnalyzer, InMemoryVelocityStore, LocalArtifactStore};
use idrisk::scoring::Scorer;
use idrisk::validation::MrzValidator;
use idrisk::IdRiskError;
use log::{error, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "idrisk",
    about = "Score identity-document verification cases and explain the decision",
    version
)]
struct Cli {
    /// Rule file (JSON or TOML); overrides RULES_PATH
    #[arg(long, global = true)]
    rules: Option<PathBuf>,
    /// Log level; overrides LOG_LEVEL
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate MRZ lines (two TD3 lines or three TD1 lines)
    Mrz {
        #[arg(required = true)]
        lines: Vec<String>,
    },
    /// Print blur and glare metrics for an image
    Quality { image: PathBuf },
    /// Score a JSON object of features
    Score { features: PathBuf },
    /// Run one case document through the full pipeline
    Process(ProcessArgs),
    /// Process every *.json case in a directory
    Batch(BatchArgs),
    /// Compute precision, recall and accuracy for labelled scores
    Evaluate {
        samples: PathBuf,
        /// Defaults to the reject threshold of the loaded rules
        #[arg(long)]
        threshold: Option<f64>,
    },
}

#[derive(Args, Debug)]
struct ProcessArgs {
    case: PathBuf,
    /// Evaluation time (RFC 3339); defaults to now
    #[arg(long, value_parser = parse_timestamp)]
    now: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
struct BatchArgs {
    dir: PathBuf,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    /// Evaluation time (RFC 3339); defaults to now
    #[arg(long, value_parser = parse_timestamp)]
    now: Option<DateTime<Utc>>,
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp {}: {}", value, e))
}

fn main() {
    let cli = Cli::parse();

    let mut settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{}", err);
            std::process::exit(2);
        }
    };
    if let Some(level) = &cli.log_level {
        settings.log_level = level.to_ascii_lowercase();
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
    )
    .init();

    if let Err(err) = run(cli, settings) {
        error!("{}", err);
        let code = if err.is_data_quality() { 3 } else { 1 };
        std::process::exit(code);
    }
}

fn run(cli: Cli, settings: Settings) -> Result<(), IdRiskError> {
    let explicit_rules = cli.rules;

    match cli.command {
        Command::Mrz { lines } => print_json(&MrzValidator::validate(lines.as_slice())),
        Command::Quality { image } => {
            let bytes = fs::read(&image)?;
            print_json(&ImageQualityAnalyzer::analyze(&bytes)?)
        }
        Command::Score { features } => {
            let rules = load_rules(explicit_rules.as_deref(), &settings)?;
            let features: FeatureSet = read_json(&features)?;
            print_json(&Scorer::score(&features, &rules))
        }
        Command::Process(args) => {
            let rules = load_rules(explicit_rules.as_deref(), &settings)?;
            let case = batch::read_case(&args.case)?;
            let pipeline = build_pipeline(
                rules,
                Arc::new(InMemoryVelocityStore::new()),
                &settings,
                case_root(&args.case),
            )?;
            let decided = pipeline.process_at(case, args.now.unwrap_or_else(Utc::now))?;
            print_json(&decided.audit_record()?)
        }
        Command::Batch(args) => {
            let rules = load_rules(explicit_rules.as_deref(), &settings)?;
            run_batch(args, rules, &settings)
        }
        Command::Evaluate { samples, threshold } => {
            let samples: Vec<LabelledScore> = read_json(&samples)?;
            let threshold = match threshold {
                Some(threshold) => threshold,
                None => load_rules(explicit_rules.as_deref(), &settings)?.thresholds.reject,
            };
            print_json(&evaluation::evaluate(&samples, threshold))
        }
    }
}

/// An explicit `--rules` file must exist; the settings path falls back to the built-in rules.
fn load_rules(explicit: Option<&Path>, settings: &Settings) -> Result<Arc<RuleConfig>, IdRiskError> {
    let rules = match explicit {
        Some(path) => RuleConfig::load(path)?,
        None if settings.rules_path.exists() => RuleConfig::load(&settings.rules_path)?,
        None => {
            warn!(
                "Rules file {} not found, using built-in rules",
                settings.rules_path.display()
            );
            RuleConfig::default_rules()
        }
    };
    rules.validate()?;
    Ok(Arc::new(rules))
}

fn build_pipeline(
    rules: Arc<RuleConfig>,
    velocity: Arc<InMemoryVelocityStore>,
    settings: &Settings,
    artifact_root: &Path,
) -> Result<DecisionPipeline, IdRiskError> {
    Ok(DecisionPipeline::new(rules, velocity, Arc::new(settings.risky_ip_set()))?
        .with_options(settings.aggregator_options())
        .with_store(Arc::new(LocalArtifactStore::new(artifact_root))))
}

fn case_root(case_path: &Path) -> &Path {
    case_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Decided records go to stdout even when some cases abort; the run then fails.
fn run_batch(args: BatchArgs, rules: Arc<RuleConfig>, settings: &Settings) -> Result<(), IdRiskError> {
    let paths = batch::case_files(&args.dir)?;
    let velocity = Arc::new(InMemoryVelocityStore::new());
    let pipeline = build_pipeline(rules, velocity.clone(), settings, &args.dir)?;

    let now = args.now.unwrap_or_else(Utc::now);
    let report = batch::process_files(&pipeline, &velocity, &paths, args.workers, now);
    for record in &report.records {
        println!("{}", serde_json::to_string(record)?);
    }
    report.check()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, IdRiskError> {
    let text = fs::read_to_string(path)
        .map_err(|e| IdRiskError::IoError(format!("Failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&text)
        .map_err(|e| IdRiskError::ParseError(format!("{}: {}", path.display(), e)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), IdRiskError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
