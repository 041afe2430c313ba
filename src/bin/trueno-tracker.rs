//! trueno-tracker command-line interface
//!
//! - `worker`: serve one process-isolated logging call (stdin/stdout JSON)
//! - `experiment`: print an experiment's report
//! - `runs`: list an experiment's runs
//! - `metrics`: print a run's metric history
//!
//! Logs go to stderr (`RUST_LOG` overrides the level); stdout carries output.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trueno_tracker::dispatch::worker;
use trueno_tracker::{backend, ExperimentTracker, TrackerConfig, TrackingUri};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Tracking URI or directory (default: $TRUENO_TRACKING_URI, then ./mlruns)
    #[arg(long, global = true, value_name = "URI")]
    tracking_uri: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve one background logging request (used by process isolation)
    Worker,
    /// Show an experiment
    Experiment(ExperimentArgs),
    /// List the runs of an experiment
    Runs(ExperimentArgs),
    /// Print the metric history of a run
    Metrics {
        /// Run id
        #[arg(long)]
        run_id: String,
        /// Metric key
        #[arg(long)]
        key: String,
    },
}

#[derive(Debug, Args)]
struct ExperimentArgs {
    /// Experiment name
    #[arg(long, conflicts_with = "id")]
    name: Option<String>,
    /// Experiment id
    #[arg(long)]
    id: Option<String>,
}

fn init_logging(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn tracking_uri(cli: &Cli) -> Result<TrackingUri> {
    let uri = match &cli.tracking_uri {
        Some(raw) => TrackingUri::parse(raw),
        None => TrackingUri::from_env_or_default(),
    };
    uri.context("invalid tracking URI")
}

fn open_experiment(cli: &Cli, args: &ExperimentArgs) -> Result<ExperimentTracker> {
    if args.name.is_none() && args.id.is_none() {
        bail!("one of --name or --id is required");
    }
    let uri = tracking_uri(cli)?;
    let mut builder = TrackerConfig::builder()
        .tracking_uri(uri.to_string())
        .create_new(false);
    if let Some(name) = &args.name {
        builder = builder.experiment_name(name);
    }
    if let Some(id) = &args.id {
        builder = builder.experiment_id(id);
    }
    builder
        .open()
        .with_context(|| format!("failed to open experiment at {uri}"))
}

fn main() -> Result<()> {
    worker::serve_if_worker();

    let cli = Cli::parse();
    let worker_mode = matches!(cli.command, Command::Worker);
    init_logging(if worker_mode { "warn" } else { "info" });

    match &cli.command {
        Command::Worker => {
            let reply = worker::serve(std::io::stdin().lock(), std::io::stdout().lock())
                .context("failed to write worker reply")?;
            std::process::exit(reply.exit_code());
        }
        Command::Experiment(args) => {
            let tracker = open_experiment(&cli, args)?;
            println!("{tracker}");
        }
        Command::Runs(args) => {
            let tracker = open_experiment(&cli, args)?;
            for run in tracker.runs()? {
                let started = run
                    .started_at()
                    .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
                println!(
                    "{}\t{}\t{}\t{}",
                    run.run_id(),
                    run.run_name(),
                    run.status(),
                    started
                );
            }
        }
        Command::Metrics { run_id, key } => {
            let uri = tracking_uri(&cli)?;
            let store = backend::open(&uri)?;
            let history = store
                .get_metric_history(run_id, key)
                .with_context(|| format!("failed to read metric {key:?} of run {run_id}"))?;
            for point in history {
                println!(
                    "{}\t{}\t{}",
                    point.step(),
                    point.value(),
                    point.timestamp().to_rfc3339()
                );
            }
        }
    }
    Ok(())
}
