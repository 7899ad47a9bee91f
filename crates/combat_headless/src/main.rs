//! Headless combat simulator.
//!
//! Runs scenarios without any front end. Results go to stdout or JSON
//! files; logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # One iteration, metrics JSON on stdout
//! cargo run -p combat_headless -- run --scenario fire_mage --seed 7
//!
//! # Batch of iterations in parallel
//! cargo run -p combat_headless -- batch --scenario scenarios/fire_mage.ron --count 10000 --output results/
//!
//! # Print the summary of saved batch results
//! cargo run -p combat_headless -- report --input results/batch_results.json
//!
//! # Check a scenario file without running it
//! cargo run -p combat_headless -- validate --scenario scenarios/fire_mage.ron
//! ```
//!
//! `RUST_LOG` overrides the log level selected by `--verbose`.

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use combat_headless::{
    batch::{run_batch, run_single, verify_determinism, BatchConfig, BatchResults},
    content::build_encounter,
    metrics::BatchSummary,
    scenario::Scenario,
};

#[derive(Parser)]
#[command(name = "combat_headless")]
#[command(about = "Headless combat outcome simulator")]
#[command(version)]
struct Cli {
    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single iteration and print its metrics
    Run {
        /// Built-in scenario name or RON file
        #[arg(short, long, default_value = "fire_mage")]
        scenario: String,

        /// Base seed override
        #[arg(long)]
        seed: Option<u64>,

        /// Encounter length override in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Iteration index
        #[arg(short, long, default_value = "0")]
        iteration: u64,
    },

    /// Run a batch of iterations in parallel
    Batch {
        /// Built-in scenario name or RON file
        #[arg(short, long, default_value = "fire_mage")]
        scenario: String,

        /// Number of iterations (defaults to the scenario's own count)
        #[arg(short, long)]
        count: Option<u64>,

        /// Worker threads (0 = auto)
        #[arg(short, long, default_value = "0")]
        threads: usize,

        /// Output directory for results
        #[arg(short, long, default_value = "results")]
        output: PathBuf,

        /// Base seed override
        #[arg(long)]
        seed: Option<u64>,

        /// Encounter length override in seconds
        #[arg(long)]
        duration: Option<f64>,

        /// Keep per-iteration metrics in the results file
        #[arg(long)]
        keep_iterations: bool,
    },

    /// Print the summary of saved batch results
    Report {
        /// Batch results JSON file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Verify determinism by replaying the same iteration
    Verify {
        /// Built-in scenario name or RON file
        #[arg(short, long, default_value = "fire_mage")]
        scenario: String,

        /// Iteration to replay
        #[arg(short, long, default_value = "0")]
        iteration: u64,

        /// Number of fresh runs
        #[arg(short, long, default_value = "5")]
        runs: u32,
    },

    /// Load and build a scenario without running it
    Validate {
        /// Built-in scenario name or RON file
        #[arg(short, long)]
        scenario: String,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs to stderr; stdout is for results
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(true),
        )
        .with(filter)
        .init();

    match cli.command {
        Commands::Run {
            scenario,
            seed,
            duration,
            iteration,
        } => cmd_run(&scenario, seed, duration, iteration),
        Commands::Batch {
            scenario,
            count,
            threads,
            output,
            seed,
            duration,
            keep_iterations,
        } => cmd_batch(
            &scenario,
            count,
            threads,
            output,
            seed,
            duration,
            keep_iterations,
        ),
        Commands::Report { input } => cmd_report(&input),
        Commands::Verify {
            scenario,
            iteration,
            runs,
        } => cmd_verify(&scenario, iteration, runs),
        Commands::Validate { scenario } => cmd_validate(&scenario),
    }
}

/// Load a scenario or exit.
fn load_scenario(name_or_path: &str) -> Scenario {
    match Scenario::resolve(name_or_path) {
        Ok(scenario) => scenario,
        Err(e) => {
            tracing::error!(error = %e, scenario = name_or_path, "Failed to load scenario");
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    }
}

/// Apply command-line overrides or exit.
fn with_overrides(scenario: &Scenario, config: &BatchConfig) -> Scenario {
    match config.apply(scenario) {
        Ok(scenario) => scenario,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    }
}

/// Run a single iteration
fn cmd_run(name: &str, seed: Option<u64>, duration: Option<f64>, iteration: u64) {
    let mut config = BatchConfig::new(name, 1);
    config.seed = seed;
    config.duration_secs = duration;
    let scenario = with_overrides(&load_scenario(name), &config);

    tracing::info!(scenario = %scenario.name, iteration, "Running iteration");
    let metrics = match run_single(&scenario, iteration) {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("FATAL: iteration failed: {e}");
            std::process::exit(1);
        }
    };

    match serde_json::to_string_pretty(&metrics) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("FATAL: failed to encode metrics: {e}");
            std::process::exit(1);
        }
    }
}

/// Run a batch of iterations
fn cmd_batch(
    name: &str,
    count: Option<u64>,
    threads: usize,
    output: PathBuf,
    seed: Option<u64>,
    duration: Option<f64>,
    keep_iterations: bool,
) {
    let batch_start = Instant::now();
    let scenario = load_scenario(name);

    let num_cpus = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);

    let config = BatchConfig {
        scenario: name.to_string(),
        iterations: count.unwrap_or(scenario.simulation.iterations),
        threads,
        output_dir: output.clone(),
        seed,
        duration_secs: duration,
        keep_iterations,
    };

    tracing::info!(
        scenario = %scenario.name,
        iterations = config.iterations,
        threads,
        cpus_available = num_cpus,
        seed = ?seed,
        output = %output.display(),
        "Batch configuration"
    );

    if let Err(e) = std::fs::create_dir_all(&output) {
        tracing::error!(error = %e, path = %output.display(), "Failed to create output directory");
        eprintln!(
            "FATAL: Cannot create output directory '{}': {}",
            output.display(),
            e
        );
        std::process::exit(1);
    }

    let results = match run_batch(&scenario, config) {
        Ok(results) => results,
        Err(e) => {
            eprintln!("FATAL: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(
        iterations_completed = results.summary.total_iterations,
        iterations_failed = results.errors.len(),
        total_duration_secs = format!("{:.1}", batch_start.elapsed().as_secs_f64()),
        "Batch execution finished"
    );

    let results_path = output.join("batch_results.json");
    if let Err(e) = results.save(&results_path) {
        tracing::error!(error = %e, path = %results_path.display(), "Failed to save results");
        eprintln!("FATAL: Failed to save results: {e}");
        std::process::exit(1);
    }

    print_summary(&results.summary);
    eprintln!("Duration: {:.1}s", results.duration_seconds);
    eprintln!(
        "Throughput: {:.0} iterations/sec",
        results.summary.total_iterations as f64 / results.duration_seconds.max(0.001)
    );

    if !results.errors.is_empty() {
        eprintln!("\nITERATION FAILURES: {}", results.errors.len());
        for error in results.errors.iter().take(10) {
            eprintln!(
                "  Iteration {} (seed {}): {}",
                error.iteration, error.seed, error.message
            );
        }
        if results.errors.len() > 10 {
            eprintln!("  ... and {} more failures", results.errors.len() - 10);
        }
    }

    eprintln!("\nResults saved to: {}", results_path.display());
}

/// Print the summary of saved results
fn cmd_report(input: &std::path::Path) {
    tracing::info!("Loading batch results from: {}", input.display());

    let results = match BatchResults::load(input) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Failed to load results: {e}");
            std::process::exit(1);
        }
    };

    eprintln!(
        "Scenario '{}', base seed {}",
        results.scenario, results.base_seed
    );
    print_summary(&results.summary);
}

fn print_summary(summary: &BatchSummary) {
    eprintln!("\n{}", "=".repeat(50));
    eprintln!("BATCH SUMMARY");
    eprintln!("{}", "=".repeat(50));
    eprintln!("Iterations: {}", summary.total_iterations);
    eprintln!(
        "Encounter length: {:.1}s avg ({:.1}s - {:.1}s)",
        summary.avg_duration_secs, summary.min_duration_secs, summary.max_duration_secs
    );

    for unit in &summary.units {
        eprintln!(
            "\n{}: {:.1} DPS (+/- {:.1}, min {:.1}, max {:.1})",
            unit.name, unit.dps.mean, unit.dps_error, unit.dps.min, unit.dps.max
        );
        for action in &unit.actions {
            eprintln!(
                "  {:<16} {:>5.1}%  {:>10.0} dmg  {:>6.1} casts  {:>5.1}% crit",
                action.action.to_string(),
                action.share * 100.0,
                action.damage,
                action.casts,
                action.crit_rate * 100.0
            );
        }
        for (label, uptime) in &unit.aura_uptime {
            eprintln!("  {label}: {:.1}% uptime", uptime * 100.0);
        }
    }

    if !summary.proc_rates.is_empty() {
        eprintln!("\nProc rates:");
        for (key, rate) in &summary.proc_rates {
            eprintln!("  {key}: {:.1}%", rate * 100.0);
        }
    }
}

/// Verify determinism
fn cmd_verify(name: &str, iteration: u64, runs: u32) {
    let scenario = load_scenario(name);
    tracing::info!(
        "Verifying determinism: {} iteration {} ({} runs)",
        scenario.name,
        iteration,
        runs
    );

    match verify_determinism(&scenario, iteration, runs) {
        Ok(report) if report.deterministic => {
            eprintln!(
                "PASS: All {} runs produced fingerprint {:016x}",
                report.fingerprints.len(),
                report.fingerprints.first().copied().unwrap_or_default()
            );
        }
        Ok(report) => {
            eprintln!("FAIL: Non-determinism detected!");
            for (run, fingerprint) in report.fingerprints.iter().enumerate() {
                eprintln!("  run {run}: {fingerprint:016x}");
            }
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("FAIL: Error during verification: {e}");
            std::process::exit(1);
        }
    }
}

/// Validate a scenario
fn cmd_validate(name: &str) {
    let scenario = load_scenario(name);
    match build_encounter(&scenario) {
        Ok(encounter) => {
            eprintln!("OK: scenario '{}'", scenario.name);
            eprintln!("  Spells: {}", encounter.spells.len());
            eprintln!("  Buffs: {}", encounter.buffs.len());
            eprintln!("  Targets: {}", encounter.targets.len());
            eprintln!(
                "  Duration: {:.1}s (+/- {:.1}s)",
                scenario.simulation.duration.as_secs_f64(),
                scenario.simulation.duration_variation.as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("INVALID: {e}");
            std::process::exit(1);
        }
    }
}
