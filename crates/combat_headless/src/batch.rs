//! Batch runner for damage analysis.
//!
//! Runs many iterations of a scenario in parallel using rayon. Each worker
//! builds its own simulation once and reuses it for every iteration it
//! picks up; iteration `i` is seeded with `base_seed + i`, so results do
//! not depend on how work is split across threads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use combat_core::metrics::IterationMetrics;
use combat_core::simulation::Simulation;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::content::build_simulation;
use crate::metrics::BatchSummary;
use crate::scenario::{Scenario, ScenarioError};

/// Error that prevents a batch from starting.
#[derive(Error, Debug)]
pub enum BatchRunError {
    /// The scenario could not be built.
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    /// The worker pool could not be created.
    #[error("Failed to build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Configuration for a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Scenario name or path, for the record
    pub scenario: String,
    /// Number of iterations to run
    pub iterations: u64,
    /// Worker threads (0 = use rayon default)
    pub threads: usize,
    /// Output directory for results
    pub output_dir: PathBuf,
    /// Base seed override
    pub seed: Option<u64>,
    /// Encounter length override in seconds
    pub duration_secs: Option<f64>,
    /// Keep every iteration's metrics in the results
    pub keep_iterations: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            scenario: "fire_mage".to_string(),
            iterations: 1_000,
            threads: 0,
            output_dir: PathBuf::from("results"),
            seed: None,
            duration_secs: None,
            keep_iterations: false,
        }
    }
}

impl BatchConfig {
    /// Create config for a specific scenario
    pub fn new(scenario: &str, iterations: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            iterations,
            ..Default::default()
        }
    }

    /// Set output directory
    pub fn with_output(mut self, dir: PathBuf) -> Self {
        self.output_dir = dir;
        self
    }

    /// Set base seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set encounter length
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Set worker thread count
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Keep per-iteration metrics in the results
    pub fn keeping_iterations(mut self) -> Self {
        self.keep_iterations = true;
        self
    }

    /// Apply the overrides of this config to a scenario.
    pub fn apply(&self, scenario: &Scenario) -> Result<Scenario, ScenarioError> {
        let mut scenario = scenario.clone();
        if let Some(seed) = self.seed {
            scenario.simulation.base_seed = seed;
        }
        if let Some(secs) = self.duration_secs {
            scenario.simulation.duration = Duration::try_from_secs_f64(secs)
                .map_err(|e| ScenarioError::Invalid(format!("duration {secs}: {e}")))?;
        }
        Ok(scenario)
    }
}

/// Results from a batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResults {
    /// Configuration used
    pub config: BatchConfig,
    /// Scenario name
    pub scenario: String,
    /// Base seed the iterations were derived from
    pub base_seed: u64,
    /// Individual iteration metrics, when kept
    pub iterations: Vec<IterationMetrics>,
    /// Aggregate summary
    pub summary: BatchSummary,
    /// Total runtime
    pub duration_seconds: f64,
    /// Errors encountered
    pub errors: Vec<BatchError>,
}

impl BatchResults {
    /// Save results to JSON file
    pub fn save(&self, path: &std::path::Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// Load results from JSON file
    pub fn load(path: &std::path::Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

/// Error during batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchError {
    /// Iteration index
    pub iteration: u64,
    /// Seed used
    pub seed: u64,
    /// Error message
    pub message: String,
}

/// Progress tracking for batch runs
#[derive(Debug)]
pub struct BatchProgress {
    /// Total iterations
    pub total: u64,
    /// Completed iterations
    pub completed: Arc<AtomicU64>,
    /// Failed iterations
    pub failed: Arc<AtomicU64>,
    /// Start time
    pub start_time: Instant,
}

impl BatchProgress {
    /// Create new progress tracker
    pub fn new(total: u64) -> Self {
        Self {
            total,
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    /// Record a finished iteration
    pub fn record_completion(&self, ok: bool) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current completion count
    pub fn current(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Get completion percentage
    pub fn percentage(&self) -> f64 {
        self.current() as f64 / self.total.max(1) as f64 * 100.0
    }

    /// Get estimated time remaining
    pub fn eta(&self) -> Duration {
        let completed = self.current();
        if completed == 0 {
            return Duration::from_secs(0);
        }

        let elapsed = self.start_time.elapsed();
        let per_iteration = elapsed.as_secs_f64() / completed as f64;
        let remaining = self.total.saturating_sub(completed);
        Duration::from_secs_f64(per_iteration * remaining as f64)
    }

    /// Log progress
    pub fn report(&self) {
        let eta = self.eta();
        info!(
            completed = self.current(),
            total = self.total,
            failed = self.failed.load(Ordering::Relaxed),
            percent = format!("{:.1}", self.percentage()),
            eta = format!("{}m {}s", eta.as_secs() / 60, eta.as_secs() % 60),
            "Batch progress"
        );
    }
}

/// Run a single iteration of a scenario.
pub fn run_single(scenario: &Scenario, iteration: u64) -> Result<IterationMetrics, ScenarioError> {
    let mut sim = build_simulation(scenario)?;
    Ok(sim.run_iteration(iteration)?)
}

/// Run a batch of iterations.
pub fn run_batch(scenario: &Scenario, config: BatchConfig) -> Result<BatchResults, BatchRunError> {
    let scenario = config.apply(scenario)?;
    // Fail fast on content the engine rejects, before spawning workers.
    build_simulation(&scenario)?;

    let start = Instant::now();
    let progress = BatchProgress::new(config.iterations);
    let base_seed = scenario.simulation.base_seed;

    info!(
        scenario = %scenario.name,
        iterations = config.iterations,
        threads = config.threads,
        base_seed,
        "Starting batch run"
    );

    let work = || {
        (0..config.iterations)
            .into_par_iter()
            .map_init(
                || build_simulation(&scenario),
                |sim, i| {
                    let result = run_iteration(sim, i);
                    progress.record_completion(result.is_ok());
                    let completed = progress.current();
                    if completed % 100 == 0 {
                        debug!("Progress: {}/{}", completed, config.iterations);
                    }
                    if completed % 1_000 == 0 {
                        progress.report();
                    }
                    result.map_err(|message| {
                        warn!(iteration = i, %message, "Iteration failed");
                        BatchError {
                            iteration: i,
                            seed: base_seed.wrapping_add(i),
                            message,
                        }
                    })
                },
            )
            .collect::<Vec<_>>()
    };

    let results = if config.threads > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .build()?
            .install(work)
    } else {
        work()
    };

    let (iterations, errors): (Vec<_>, Vec<_>) = results.into_iter().partition(Result::is_ok);
    let iterations: Vec<IterationMetrics> = iterations.into_iter().filter_map(Result::ok).collect();
    let errors: Vec<BatchError> = errors.into_iter().filter_map(Result::err).collect();

    let summary = BatchSummary::from_iterations(&iterations);
    let duration_seconds = start.elapsed().as_secs_f64();

    info!(
        "Batch complete: {} iterations in {:.2}s ({:.0} iterations/sec)",
        iterations.len(),
        duration_seconds,
        iterations.len() as f64 / duration_seconds.max(f64::EPSILON)
    );

    Ok(BatchResults {
        scenario: scenario.name.clone(),
        base_seed,
        iterations: if config.keep_iterations {
            iterations
        } else {
            Vec::new()
        },
        config,
        summary,
        duration_seconds,
        errors,
    })
}

fn run_iteration(
    sim: &mut Result<Simulation, ScenarioError>,
    iteration: u64,
) -> Result<IterationMetrics, String> {
    match sim {
        Ok(sim) => sim.run_iteration(iteration).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    }
}

/// Outcome of a determinism check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeterminismReport {
    /// Iteration index checked
    pub iteration: u64,
    /// Fingerprint of every run
    pub fingerprints: Vec<u64>,
    /// Whether all fingerprints matched
    pub deterministic: bool,
}

/// Verify determinism by running the same iteration several times, each in
/// a freshly built simulation and once more in a reused one.
pub fn verify_determinism(
    scenario: &Scenario,
    iteration: u64,
    runs: u32,
) -> Result<DeterminismReport, ScenarioError> {
    let mut fingerprints = Vec::with_capacity(runs as usize + 1);
    for _ in 0..runs {
        fingerprints.push(run_single(scenario, iteration)?.fingerprint);
    }

    let mut reused = build_simulation(scenario)?;
    reused.run_iteration(iteration.wrapping_add(1))?;
    fingerprints.push(reused.run_iteration(iteration)?.fingerprint);

    let deterministic = fingerprints.windows(2).all(|pair| pair[0] == pair[1]);
    Ok(DeterminismReport {
        iteration,
        fingerprints,
        deterministic,
    })
}
