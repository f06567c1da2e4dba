//! Lockset Simulator CLI
//!
//! Runs a resource-set workload through the acquisition coordinator and the
//! blocking harness, on real threads or in deterministic virtual time.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use lockset_simulation::{SimulationOutcome, SimulationReport, Strategy};
use lockset_simulator::{Comparison, OrderMode, SimulatorConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lockset-sim")]
#[command(about = "Compare deadlock-free set acquisition against blocking locks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workload on real threads
    Run {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Skip the blocking harness
        #[arg(long)]
        no_harness: bool,
    },

    /// Replay the workload in virtual time
    Simulate {
        #[command(flatten)]
        workload: WorkloadArgs,

        /// Strategy to simulate (coordinated, blocking, both)
        #[arg(long, default_value = "both")]
        strategy: String,
    },
}

/// Overrides applied on top of the configuration file.
#[derive(Args)]
struct WorkloadArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Resource names (comma-separated)
    #[arg(long, value_delimiter = ',')]
    resources: Option<Vec<String>>,

    /// Number of workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Resources per request
    #[arg(long)]
    subset_size: Option<usize>,

    /// Requests per worker
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Request ordering (permuted, antiparallel)
    #[arg(long)]
    ordering: Option<String>,

    /// Per-resource try-acquire timeout in milliseconds
    #[arg(long)]
    attempt_timeout_ms: Option<u64>,

    /// Upper bound of the backoff window in milliseconds
    #[arg(long)]
    backoff_max_ms: Option<u64>,

    /// Retry bound per request
    #[arg(long)]
    max_retries: Option<u32>,

    /// Harness hang bound in milliseconds
    #[arg(long)]
    hang_bound_ms: Option<u64>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,
}

impl WorkloadArgs {
    fn into_config(self) -> anyhow::Result<SimulatorConfig> {
        let mut config = match &self.config {
            Some(path) => SimulatorConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => SimulatorConfig::default(),
        };

        if let Some(resources) = self.resources {
            config.resources = resources;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(subset_size) = self.subset_size {
            config.subset_size = subset_size;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if let Some(ordering) = self.ordering {
            config.ordering = parse_order_mode(&ordering)?;
        }
        if let Some(timeout) = self.attempt_timeout_ms {
            config.attempt_timeout_ms = timeout;
        }
        if let Some(backoff) = self.backoff_max_ms {
            config.backoff_max_ms = backoff;
        }
        if self.max_retries.is_some() {
            config.max_retries = self.max_retries;
        }
        if let Some(bound) = self.hang_bound_ms {
            config.hang_bound_ms = bound;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_order_mode(s: &str) -> anyhow::Result<OrderMode> {
    match s.to_lowercase().as_str() {
        "permuted" | "random" => Ok(OrderMode::Permuted),
        "antiparallel" | "ring" => Ok(OrderMode::Antiparallel),
        _ => anyhow::bail!("Unknown ordering: {}", s),
    }
}

fn parse_strategies(s: &str) -> anyhow::Result<Vec<Strategy>> {
    match s.to_lowercase().as_str() {
        "coordinated" => Ok(vec![Strategy::Coordinated]),
        "blocking" => Ok(vec![Strategy::Blocking]),
        "both" => Ok(vec![Strategy::Coordinated, Strategy::Blocking]),
        _ => anyhow::bail!("Unknown strategy: {}", s),
    }
}

fn print_simulation(report: &SimulationReport) {
    let outcome = match &report.outcome {
        SimulationOutcome::Completed { at } => format!("completed at {:?}", at),
        SimulationOutcome::Deadlocked { at, cycle } => {
            let cycle: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            format!("deadlocked at {:?}: {}", at, cycle.join(" -> "))
        }
        SimulationOutcome::Stalled { at } => format!("stalled at {:?}", at),
        SimulationOutcome::TimeLimit { at } => format!("hit the time limit at {:?}", at),
    };
    println!(
        "{:?} (seed {}): {} after {} events",
        report.strategy, report.seed, outcome, report.events_processed
    );
    for stats in &report.workers {
        println!(
            "  {}: {} granted, {} timed out, {} attempts (max {}), {} rollbacks",
            stats.worker,
            stats.completed,
            stats.timed_out,
            stats.attempts,
            stats.max_attempts,
            stats.rollbacks
        );
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            workload,
            no_harness,
        } => {
            let comparison = Comparison::new(workload.into_config()?)?;
            if no_harness {
                comparison.run_coordinated()?.print();
            } else {
                comparison.run()?.print();
            }
        }

        Commands::Simulate { workload, strategy } => {
            let strategies = parse_strategies(&strategy)?;
            let comparison = Comparison::new(workload.into_config()?)?;
            for strategy in strategies {
                print_simulation(&comparison.simulate(strategy)?);
            }
        }
    }

    Ok(())
}
