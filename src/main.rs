use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::{Builder, Env};
use log::{debug, info, LevelFilter};
use sysinfo::{get_current_pid, ProcessExt, System, SystemExt};
use thiserror::Error;

use stroke_prep::io::{self, ExportFormat};
use stroke_prep::metrics;
use stroke_prep::model::{ClassWeights, FitOptions, LogisticSequenceClassifier, OptimizerKind, SequenceClassifier};
use stroke_prep::split::Partition;
use stroke_prep::tuning::{self, RandomSearch, SearchSpace, TrialConfig};
use stroke_prep::{Pipeline, PipelineConfig, PipelineError, PreparedData};

static RAW_DIR: &str = "raw";
static SILVER_DIR: &str = "silver";
static GOLD_DIR: &str = "gold";
static STROKE_FILE_NAME: &str = "stroke";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[arg(short, long, action = ArgAction::Count, global = true, help = "Verbose level")]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the preparation stages and export the train and test partitions
    Prepare(CommonArgs),
    /// Prepare, fit the logistic baseline and evaluate it on the test partition
    Train {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value_t = 100)]
        epochs: usize,
        #[arg(long, default_value_t = 32)]
        batch_size: usize,
        #[arg(long, value_enum, default_value_t = OptimizerKind::Adam)]
        optimizer: OptimizerKind,
        #[arg(long, default_value_t = 0.001)]
        learning_rate: f64,
    },
    /// Prepare, then random-search classifier hyperparameters
    Tune {
        #[command(flatten)]
        common: CommonArgs,
        #[arg(long, default_value_t = 5)]
        max_trials: usize,
        #[arg(long, default_value_t = 3)]
        executions_per_trial: usize,
        #[arg(long, help = "JSON search space, defaults to the built-in one")]
        space: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    #[arg(short, long, help = "Raw dataset, CSV or Parquet")]
    input: PathBuf,
    #[arg(short, long, default_value = "data/output", help = "Output directory")]
    output_dir: PathBuf,
    #[arg(short, long, help = "JSON pipeline configuration")]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = ExportFormat::Parquet, help = "Output format")]
    format: ExportFormat,
    #[arg(short, long, help = "Override the configured seed")]
    seed: Option<u64>,
}

#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

fn monitor_memory() -> u64 {
    let mut system = System::new();
    match get_current_pid() {
        Ok(pid) if system.refresh_process(pid) => {
            system.process(pid).map(|p| p.memory()).unwrap_or(0)
        }
        _ => 0,
    }
}

fn load_config(args: &CommonArgs) -> Result<PipelineConfig, PipelineError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn output_path(args: &CommonArgs, dir: &str, name: &str, format: ExportFormat) -> PathBuf {
    args.output_dir.join(dir).join(format!("{}.{}", name, format.extension()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn export_partition(args: &CommonArgs, name: &str, partition: &Partition) -> Result<(), PipelineError> {
    let path = output_path(args, GOLD_DIR, name, args.format);
    let mut df = partition.to_frame()?;
    io::write_frame(&path, &mut df, args.format)?;
    info!("wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Reads the raw input, keeps a raw and a cleaned copy, then runs every stage.
fn prepare(args: &CommonArgs, config: PipelineConfig) -> Result<PreparedData, PipelineError> {
    let pipeline = Pipeline::new(config)?;
    let mut raw = io::read_dataset(&args.input)?;
    io::write_parquet(output_path(args, RAW_DIR, STROKE_FILE_NAME, ExportFormat::Parquet), &mut raw)?;

    let mut cleaned = pipeline.clean(raw)?;
    io::write_frame(
        output_path(args, SILVER_DIR, STROKE_FILE_NAME, args.format),
        &mut cleaned.frame,
        args.format,
    )?;

    let prepared = pipeline.finish(cleaned)?;
    export_partition(args, "train", &prepared.train)?;
    export_partition(args, "test", &prepared.test)?;
    write_json(&args.output_dir.join("report.json"), &prepared.report)?;
    if prepared.report.imputation.has_warnings() {
        info!("imputation raised policy warnings, see report.json");
    }
    Ok(prepared)
}

fn run(command: Command) -> Result<(), PipelineError> {
    match command {
        Command::Prepare(args) => {
            let prepared = prepare(&args, load_config(&args)?)?;
            println!(
                "train: {} samples, test: {} samples, features: {:?}",
                prepared.train.len(),
                prepared.test.len(),
                prepared.train.feature_names
            );
        }
        Command::Train {
            common,
            epochs,
            batch_size,
            optimizer,
            learning_rate,
        } => {
            let config = load_config(&common)?;
            let seed = config.seed;
            let prepared = prepare(&common, config)?;
            let train_labels = prepared.train.labels();
            let test_labels = prepared.test.labels();
            let options = FitOptions {
                epochs,
                batch_size,
                class_weight: ClassWeights::balanced(&train_labels)?,
            };
            debug!("class weights {:?}", options.class_weight);

            let mut model = LogisticSequenceClassifier::new(
                prepared.train_sequences.width(),
                optimizer,
                learning_rate,
                seed,
            );
            let history = model.fit(
                &prepared.train_sequences,
                &train_labels,
                &options,
                Some((&prepared.test_sequences, &test_labels)),
            )?;
            let probabilities = model.predict(&prepared.test_sequences)?;
            let report = metrics::evaluate(&test_labels, &probabilities, 0.5)?;
            write_json(&common.output_dir.join("history.json"), &history)?;
            write_json(&common.output_dir.join("evaluation.json"), &report)?;
            println!("{}", report);
        }
        Command::Tune {
            common,
            max_trials,
            executions_per_trial,
            space,
        } => {
            let space = match space {
                Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
                None => SearchSpace::default(),
            };
            let config = load_config(&common)?;
            let search = RandomSearch {
                max_trials,
                executions_per_trial,
                seed: config.seed,
            };
            let prepared = prepare(&common, config)?;
            let train_labels = prepared.train.labels();
            let test_labels = prepared.test.labels();
            let width = prepared.train_sequences.width();
            let outcome = search.search(
                &space,
                |trial: &TrialConfig| {
                    Ok(LogisticSequenceClassifier::new(
                        width,
                        trial.optimizer,
                        trial.learning_rate,
                        trial.seed,
                    ))
                },
                (&prepared.train_sequences, &train_labels),
                (&prepared.test_sequences, &test_labels),
                ClassWeights::balanced(&train_labels)?,
            )?;
            tuning::write_trials_csv(common.output_dir.join("trials.csv"), &outcome.trials)?;
            write_json(&common.output_dir.join("best_trial.json"), &outcome.best)?;
            println!("best score {:.4} with {:?}", outcome.best_score, outcome.best);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let env = Env::new().filter("STROKE_LOG");
    Builder::new()
        .filter(Some("stroke_prep"), log_level)
        .parse_env(env)
        .init();
    debug!("Arguments {:#?}", cli);

    let start_time = Instant::now();
    let start_memory = monitor_memory();

    tokio::task::spawn_blocking(move || run(cli.command)).await??;

    let end_memory = monitor_memory();
    info!("Time elapsed: {:?}", start_time.elapsed());
    info!(
        "Resident memory: {} KiB -> {} KiB",
        start_memory / 1024,
        end_memory / 1024
    );
    Ok(())
}
