//! Determinism testing utilities.
//!
//! Provides a harness for verifying that the simulation produces identical
//! results given identical inputs.
//!
//! # Testing Strategy
//!
//! An iteration must be a pure function of its content and seed. Sources of
//! non-determinism include:
//!
//! - **HashMap iteration order**: Rust's default hasher is randomized.
//!   Metrics use `BTreeMap` and arenas are iterated in registration order.
//!
//! - **System randomness**: All draws come from the seeded stream of
//!   [`combat_core::rng::RngEngine`].
//!
//! - **Leftover state**: A reused `Simulation` must reset every component
//!   between iterations.
//!
//! # Test Levels
//!
//! 1. **Unit tests**: Individual mechanics (auras, dots, casts)
//! 2. **Property tests**: Random seeds must still produce reproducible outputs
//! 3. **Integration tests**: Full encounters are reproducible
//! 4. **Parallel tests**: Running N simulations on threads all match

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::thread;
use std::time::Duration;

use combat_core::simulation::Simulation;

/// Result of a determinism test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeterminismResult {
    /// Whether all runs produced identical results.
    pub is_deterministic: bool,
    /// Fingerprints from each run.
    pub hashes: Vec<u64>,
    /// Iteration index that was replayed.
    pub iteration: u64,
}

impl DeterminismResult {
    /// Get all unique hashes (should be 1 for deterministic simulation).
    #[must_use]
    pub fn unique_hashes(&self) -> Vec<u64> {
        let mut unique: Vec<u64> = self.hashes.clone();
        unique.sort_unstable();
        unique.dedup();
        unique
    }

    /// Assert that the simulation was deterministic, with a detailed error message.
    ///
    /// # Panics
    ///
    /// Panics if the simulation produced different hashes across runs.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic {
            let unique = self.unique_hashes();
            panic!(
                "Simulation is non-deterministic!\n\
                 Runs: {}\n\
                 Iteration: {}\n\
                 Unique hashes: {} (expected 1)\n\
                 All hashes: {:?}",
                self.hashes.len(),
                self.iteration,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run iteration `iteration` on `runs` freshly built simulations and compare
/// their metric fingerprints.
///
/// # Panics
///
/// Panics if an iteration fails.
///
/// # Example
///
/// ```
/// use combat_test_utils::determinism::verify_determinism;
/// use combat_test_utils::fixtures::{fire_mage, short_config};
///
/// let result = verify_determinism(3, 5, || fire_mage(short_config(30, 9)));
/// result.assert_deterministic();
/// ```
pub fn verify_determinism<F>(runs: usize, iteration: u64, setup: F) -> DeterminismResult
where
    F: Fn() -> Simulation,
{
    let hashes: Vec<u64> = (0..runs)
        .map(|_| {
            setup()
                .run_iteration(iteration)
                .expect("iteration failed")
                .fingerprint
        })
        .collect();
    let is_deterministic = hashes.windows(2).all(|w| w[0] == w[1]);

    DeterminismResult {
        is_deterministic,
        hashes,
        iteration,
    }
}

/// Run the same iteration twice on one simulation instance.
///
/// Catches state that survives the reset between iterations.
///
/// # Panics
///
/// Panics if an iteration fails.
pub fn verify_reset_determinism(sim: &mut Simulation, iteration: u64) -> bool {
    let first = sim.run_iteration(iteration).expect("iteration failed");
    // Run a different iteration in between to dirty every component.
    sim.run_iteration(iteration.wrapping_add(1))
        .expect("iteration failed");
    let second = sim.run_iteration(iteration).expect("iteration failed");
    first == second
}

/// Result of parallel simulation runs.
#[derive(Debug, Clone)]
pub struct ParallelSimResult {
    /// Fingerprint from each simulation.
    pub hashes: Vec<u64>,
    /// Number of simulations run.
    pub num_sims: usize,
}

impl ParallelSimResult {
    /// Check if all simulations produced identical results.
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.hashes.windows(2).all(|w| w[0] == w[1])
    }

    /// Assert all simulations matched.
    ///
    /// # Panics
    ///
    /// Panics if simulations produced different hashes.
    pub fn assert_deterministic(&self) {
        if !self.is_deterministic() {
            let mut unique: Vec<u64> = self.hashes.clone();
            unique.sort_unstable();
            unique.dedup();
            panic!(
                "Parallel simulations diverged!\n\
                 Simulations: {}\n\
                 Unique hashes: {}\n\
                 All hashes: {:?}",
                self.num_sims,
                unique.len(),
                self.hashes
            );
        }
    }
}

/// Run N simulations on scoped threads and collect their fingerprints.
///
/// Each thread builds its own simulation; `Simulation` itself never crosses
/// a thread boundary.
///
/// # Panics
///
/// Panics if a thread panics or an iteration fails.
pub fn run_parallel_simulations<F>(setup_fn: F, num_sims: usize, iteration: u64) -> ParallelSimResult
where
    F: Fn() -> Simulation + Sync,
{
    let hashes = thread::scope(|s| {
        let handles: Vec<_> = (0..num_sims)
            .map(|_| {
                s.spawn(|| {
                    setup_fn()
                        .run_iteration(iteration)
                        .expect("iteration failed")
                        .fingerprint
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect()
    });

    ParallelSimResult { hashes, num_sims }
}

/// Step two simulations event by event, finding the first divergence.
///
/// Both are reset with `seed` and driven until `until`.
///
/// # Returns
///
/// `None` if they stay in lockstep, `Some(time)` of the first event after
/// which their state hashes differ.
///
/// # Panics
///
/// Panics if a reset or an event fails.
pub fn find_first_divergence<F>(setup_fn: F, seed: u64, until: Duration) -> Option<Duration>
where
    F: Fn() -> Simulation,
{
    let mut sim1 = setup_fn();
    let mut sim2 = setup_fn();
    sim1.reset(seed).expect("reset failed");
    sim2.reset(seed).expect("reset failed");

    if sim1.state_hash() != sim2.state_hash() {
        return Some(Duration::ZERO);
    }

    loop {
        let stepped1 = sim1.advance_to_next(until).expect("event failed");
        let stepped2 = sim2.advance_to_next(until).expect("event failed");
        if stepped1 != stepped2 || sim1.state_hash() != sim2.state_hash() {
            return Some(sim1.now());
        }
        if !stepped1 {
            return None;
        }
    }
}

/// Compute a simple hash for any hashable value.
pub fn compute_hash<T: Hash>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Proptest strategies for determinism testing.
pub mod strategies {
    use proptest::prelude::*;

    use combat_core::data::CombatStats;
    use combat_core::simulation::SimulationConfig;
    use std::time::Duration;

    /// Generate an iteration seed.
    pub fn arb_seed() -> impl Strategy<Value = u64> {
        any::<u64>()
    }

    /// Generate a short encounter configuration (10 to 60 seconds).
    pub fn arb_config() -> impl Strategy<Value = SimulationConfig> {
        (10u64..60, 0u64..5, any::<u64>()).prop_map(|(secs, variation, seed)| {
            SimulationConfig {
                duration: Duration::from_secs(secs),
                duration_variation: Duration::from_secs(variation),
                base_seed: seed,
                iterations: 1,
            }
        })
    }

    /// Generate caster stats in a plausible range.
    pub fn arb_caster_stats() -> impl Strategy<Value = CombatStats> {
        (0.0..1_000.0f64, 0.0..0.1f64, 0.0..0.4f64, 0.0..0.3f64).prop_map(
            |(spell_power, spell_hit, spell_crit, spell_haste)| CombatStats {
                level: 60,
                spell_power,
                spell_hit,
                spell_crit,
                spell_haste,
                mana: Some(8_000.0),
                ..CombatStats::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{fire_mage, short_config};

    #[test]
    fn test_verify_determinism_matches() {
        let result = verify_determinism(3, 0, || fire_mage(short_config(30, 1)));
        result.assert_deterministic();
        assert_eq!(result.unique_hashes().len(), 1);
    }

    #[test]
    fn test_reset_determinism() {
        let mut sim = fire_mage(short_config(30, 4));
        assert!(verify_reset_determinism(&mut sim, 2));
    }

    #[test]
    fn test_parallel_simulations_match() {
        run_parallel_simulations(|| fire_mage(short_config(20, 3)), 4, 1).assert_deterministic();
    }

    #[test]
    fn test_no_divergence_in_lockstep() {
        assert_eq!(
            find_first_divergence(|| fire_mage(short_config(20, 0)), 11, Duration::from_secs(20)),
            None
        );
    }

    #[test]
    fn test_compute_hash_stable() {
        assert_eq!(compute_hash(&(1u64, "a")), compute_hash(&(1u64, "a")));
    }
}
