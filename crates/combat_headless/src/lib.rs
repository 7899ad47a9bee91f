//! Headless batch runner for combat scenarios.
//!
//! Loads a scenario (caster, targets, spells, buffs and a priority
//! rotation) from RON, builds it into a [`combat_core`] simulation and runs
//! many iterations in parallel, producing DPS statistics as JSON.
//!
//! - **Scenarios**: data-driven content, see [`scenario`]
//! - **Decision layer**: priority-list rotation, see [`rotation`]
//! - **Batches**: parallel iterations and JSON reports, see [`batch`]
//!
//! # Example
//!
//! ```bash
//! # One iteration of a built-in scenario, metrics on stdout
//! cargo run -p combat_headless -- run --scenario fire_mage
//!
//! # 10k iterations in parallel
//! cargo run -p combat_headless -- batch --scenario scenarios/fire_mage.ron --count 10000
//!
//! # Same seed replayed, fingerprints compared
//! cargo run -p combat_headless -- verify --scenario arcane_mage --runs 5
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod batch;
pub mod content;
pub mod metrics;
pub mod rotation;
pub mod scenario;

pub use batch::{run_batch, run_single, verify_determinism, BatchConfig, BatchResults};
pub use content::{build_encounter, build_simulation, Encounter};
pub use metrics::BatchSummary;
pub use rotation::{PriorityRotation, RotationStep, StepCondition};
pub use scenario::{Scenario, ScenarioError};
