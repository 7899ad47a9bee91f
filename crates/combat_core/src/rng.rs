//! Seeded random source and named proc gates.
//!
//! Every probabilistic decision in the engine goes through [`RngEngine`].
//! [`RngEngine::proc`] is the single chokepoint for probability-gated effects,
//! which makes it the seam for deterministic replay and statistical tests.
//!
//! Iterations are seeded with `base_seed + iteration_index`, so any iteration
//! can be replayed in isolation.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Attempt and success counters for one proc key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcStats {
    /// Number of times the proc was checked (including ICD-blocked checks).
    pub attempts: u64,
    /// Number of times the proc fired.
    pub successes: u64,
    /// Number of checks rejected because the internal cooldown was not ready.
    pub blocked: u64,
}

impl ProcStats {
    /// Observed success rate over all attempts.
    #[must_use]
    pub fn rate(&self) -> f64 {
        if self.attempts == 0 {
            return 0.0;
        }
        self.successes as f64 / self.attempts as f64
    }
}

#[derive(Debug, Clone, Default)]
struct ProcGate {
    icd: Option<Duration>,
    ready_at: Duration,
    stats: ProcStats,
}

/// Named internal-cooldown gates for procs.
///
/// ICD durations are setup-time configuration and survive [`reset`](Self::reset);
/// readiness and counters do not.
#[derive(Debug, Clone, Default)]
pub struct ProcRegistry {
    gates: BTreeMap<String, ProcGate>,
}

impl ProcRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an internal cooldown for a proc key.
    pub fn register_icd(&mut self, key: impl Into<String>, icd: Duration) {
        self.gates.entry(key.into()).or_default().icd = Some(icd);
    }

    /// Whether the key's internal cooldown allows a proc at `now`.
    #[must_use]
    pub fn is_ready(&self, key: &str, now: Duration) -> bool {
        self.gates.get(key).map_or(true, |gate| now >= gate.ready_at)
    }

    /// Counters for a key, if it was ever checked.
    #[must_use]
    pub fn stats(&self, key: &str) -> Option<ProcStats> {
        self.gates.get(key).map(|gate| gate.stats)
    }

    /// Counters for every key, in key order.
    pub fn all_stats(&self) -> impl Iterator<Item = (&str, ProcStats)> {
        self.gates
            .iter()
            .map(|(key, gate)| (key.as_str(), gate.stats))
    }

    /// Clear readiness and counters, keeping registered ICDs.
    pub fn reset(&mut self) {
        for gate in self.gates.values_mut() {
            gate.ready_at = Duration::ZERO;
            gate.stats = ProcStats::default();
        }
    }

    fn gate_mut(&mut self, key: &str) -> &mut ProcGate {
        if !self.gates.contains_key(key) {
            self.gates.insert(key.to_owned(), ProcGate::default());
        }
        self.gates
            .get_mut(key)
            .unwrap_or_else(|| unreachable!("gate inserted above"))
    }
}

/// Seeded deterministic random source.
#[derive(Debug, Clone)]
pub struct RngEngine {
    seed: u64,
    rng: ChaCha8Rng,
    procs: ProcRegistry,
}

impl RngEngine {
    /// Create a random source from a seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            procs: ProcRegistry::new(),
        }
    }

    /// Seed currently in use.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Reseed for a new iteration and clear proc gates.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng = ChaCha8Rng::seed_from_u64(seed);
        self.procs.reset();
    }

    /// Uniform draw in `[0, 1)`.
    pub fn rand_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform draw in `[low, high]`. Returns `low` for an empty range.
    pub fn roll(&mut self, low: f64, high: f64) -> f64 {
        if high <= low {
            return low;
        }
        low + (high - low) * self.rand_f64()
    }

    /// Boolean proc check for a named effect.
    ///
    /// Chances at or above 1 always succeed and at or below 0 always fail,
    /// without consuming a draw. A key whose internal cooldown is still
    /// running fails without drawing.
    pub fn proc(&mut self, chance: f64, key: &str, now: Duration) -> bool {
        let gate = self.procs.gate_mut(key);
        gate.stats.attempts += 1;
        if now < gate.ready_at {
            gate.stats.blocked += 1;
            return false;
        }
        let icd = gate.icd;

        let success = if chance >= 1.0 {
            true
        } else if chance <= 0.0 {
            false
        } else {
            self.rng.gen::<f64>() < chance
        };

        if success {
            let gate = self.procs.gate_mut(key);
            gate.stats.successes += 1;
            if let Some(icd) = icd {
                gate.ready_at = now.saturating_add(icd);
            }
        }
        success
    }

    /// Proc registry, for ICD registration and statistics.
    #[must_use]
    pub fn procs(&self) -> &ProcRegistry {
        &self.procs
    }

    /// Mutable proc registry.
    pub fn procs_mut(&mut self) -> &mut ProcRegistry {
        &mut self.procs
    }
}
