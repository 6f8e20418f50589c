//! BELAY Trainer CLI
//!
//! Deterministic offline trainer for the BELAY transaction models.

use anyhow::{Context, Result};
use belay_forest_core::{canonical_json_string, Ensemble, ForestModel, ModelKind};
use belay_trainer::config::ForestSettings;
use belay_trainer::{
    load_records, report, ModelArtifact, PipelineConfig, PipelineError, PipelineKind, Settings,
};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "belay-train")]
#[command(author = "BELAY Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic model trainer for BELAY transaction data", long_about = None)]
struct Cli {
    /// TOML file with settings overrides
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a model and write its artifact and metadata
    Train(TrainArgs),
    /// Predict records with a trained model artifact
    Predict(PredictArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Pipeline preset to run
    #[arg(short, long, value_enum)]
    pipeline: PipelineKind,

    /// Input JSON dataset path
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Model artifact output path
    #[arg(long)]
    model_path: Option<PathBuf>,

    /// Metadata output path
    #[arg(long)]
    metadata_path: Option<PathBuf>,

    /// Minimum usable transactions after filtering
    #[arg(long)]
    min_samples: Option<usize>,

    /// Fraction of samples held out for evaluation
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Random seed for splitting and bagging
    #[arg(long)]
    seed: Option<u64>,

    /// Number of trees
    #[arg(long)]
    trees: Option<usize>,

    /// Maximum tree depth (0 = unbounded)
    #[arg(long)]
    max_depth: Option<usize>,

    /// Worker threads for tree construction (0 = all cores)
    #[arg(long)]
    threads: Option<usize>,
}

impl TrainArgs {
    fn settings(&self) -> Settings {
        Settings {
            input: self.input.clone(),
            model_path: self.model_path.clone(),
            metadata_path: self.metadata_path.clone(),
            min_samples: self.min_samples,
            test_fraction: self.test_fraction,
            seed: self.seed,
            threads: self.threads,
            forest: ForestSettings {
                n_estimators: self.trees,
                max_depth: self.max_depth,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[derive(Args, Debug)]
struct PredictArgs {
    /// Model artifact written by `train`
    #[arg(short, long)]
    model: PathBuf,

    /// JSON array of transaction records
    #[arg(short, long)]
    input: PathBuf,

    /// Also write predictions as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<PipelineError>())
                .map_or(1, PipelineError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Command::Train(args) = &cli.command {
        settings = settings.overlay(args.settings());
    }

    init_logging(
        settings.log_level.as_deref().unwrap_or("info"),
        settings.log_format.as_deref().unwrap_or("pretty"),
        cli.verbose,
    );

    info!("BELAY Trainer v{}", belay_trainer::VERSION);

    match &cli.command {
        Command::Train(args) => train(args.pipeline, &settings),
        Command::Predict(args) => predict(args),
    }
}

fn init_logging(level: &str, format: &str, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }
}

fn train(kind: PipelineKind, settings: &Settings) -> Result<()> {
    let mut config = PipelineConfig::preset(kind);
    config.apply(settings)?;

    info!("Training configuration:");
    info!("  Pipeline: {}", config.kind);
    info!("  Input: {}", config.input.display());
    info!("  Trees: {}", config.forest.n_estimators);
    match config.forest.max_depth {
        Some(depth) => info!("  Max depth: {}", depth),
        None => info!("  Max depth: unbounded"),
    }
    info!("  Min samples split/leaf: {}/{}", config.forest.min_samples_split, config.forest.min_samples_leaf);
    info!("  Seed: {}", config.forest.seed);

    let outcome = belay_trainer::run(&config)?;

    for line in report::render(&outcome.report, config.target) {
        info!("{}", line);
    }

    info!("✓ Training completed successfully");
    info!("  Model: {}", outcome.model_path.display());
    info!("  Metadata: {}", outcome.metadata_path.display());
    info!("  Hash: {}", outcome.metadata.model_hash);
    Ok(())
}

fn predict(args: &PredictArgs) -> Result<()> {
    info!("Loading model from {}", args.model.display());
    let artifact = ModelArtifact::<ForestModel>::load(&args.model)?;
    info!(
        "{} over [{}]",
        artifact.model.kind.model_type(),
        artifact.schema.names().join(", ")
    );

    let records = load_records(&args.input)?;
    let predictions = artifact.predict_records(&records)?;

    let target = artifact.schema.target;
    let precision = target.precision();
    for (i, prediction) in predictions.iter().enumerate() {
        match (artifact.model.kind(), prediction.confidence) {
            (ModelKind::Classifier, Some(confidence)) => info!(
                "  #{}: {} ({:.1}% confidence)",
                i,
                if prediction.value >= 0.5 { "Success" } else { "Failure" },
                confidence * 100.0
            ),
            _ => info!(
                "  #{}: {:.p$} {}",
                i,
                prediction.value,
                target.unit(),
                p = precision
            ),
        }
    }

    if let Some(output) = &args.output {
        let json = canonical_json_string(&predictions).context("Failed to encode predictions")?;
        std::fs::write(output, json)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        info!("Wrote {} predictions to {}", predictions.len(), output.display());
    }

    Ok(())
}
