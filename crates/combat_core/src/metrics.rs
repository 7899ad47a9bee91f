//! Per-iteration metrics and cross-iteration aggregates.
//!
//! Collected at the end of every iteration from unit state, then folded
//! into [`AggregateStats`]. All maps are ordered so serialized output and
//! fingerprints are stable.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ledger::{ResourceFlow, ResourceKind};
use crate::outcome::{Outcome, SpellResult};
use crate::rng::ProcStats;
use crate::simulation::Simulation;
use crate::spell::ActionId;
use crate::time;

/// Counters for one action of one unit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionMetrics {
    /// Casts started.
    pub casts: u64,
    /// Landed results.
    pub hits: u64,
    /// Landed crits (also counted in `hits`).
    pub crits: u64,
    /// Physical misses.
    pub misses: u64,
    /// Full resists, including magic misses.
    pub resists: u64,
    /// Dodges.
    pub dodges: u64,
    /// Total damage.
    pub damage: f64,
}

impl ActionMetrics {
    pub(crate) fn record(&mut self, result: &SpellResult) {
        match result.outcome {
            Outcome::Hit => {
                self.hits += 1;
                if result.crit {
                    self.crits += 1;
                }
            }
            Outcome::Miss => self.misses += 1,
            Outcome::Dodge => self.dodges += 1,
            Outcome::Resist => self.resists += 1,
        }
        self.damage += result.damage;
    }

    /// Outcomes recorded.
    #[must_use]
    pub const fn attempts(&self) -> u64 {
        self.hits + self.misses + self.resists + self.dodges
    }

    /// Crits per landed hit.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn crit_rate(&self) -> f64 {
        if self.hits == 0 {
            0.0
        } else {
            self.crits as f64 / self.hits as f64
        }
    }
}

/// Uptime of one aura.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuraMetrics {
    /// Aura label.
    pub label: String,
    /// Time active.
    #[serde(with = "time::secs")]
    pub uptime: Duration,
    /// Activations.
    pub activations: u64,
}

/// Metrics of one unit for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitMetrics {
    /// Unit name.
    pub name: String,
    /// Damage dealt across every action.
    pub total_damage: f64,
    /// Damage per second over the iteration.
    pub dps: f64,
    /// Per-action counters.
    pub actions: BTreeMap<ActionId, ActionMetrics>,
    /// Mana flow per tag.
    pub mana: BTreeMap<ActionId, ResourceFlow>,
    /// Health flow per tag.
    pub health: BTreeMap<ActionId, ResourceFlow>,
    /// Aura uptimes, in registration order.
    pub auras: Vec<AuraMetrics>,
}

/// Everything one iteration produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    /// Iteration index.
    pub iteration: u64,
    /// Seed used.
    pub seed: u64,
    /// Encounter length.
    #[serde(with = "time::secs")]
    pub duration: Duration,
    /// Per-unit metrics, in creation order.
    pub units: Vec<UnitMetrics>,
    /// Proc counters by key.
    pub procs: BTreeMap<String, ProcStats>,
    /// Hash of the outcome, equal across reruns of the same seed.
    pub fingerprint: u64,
}

impl IterationMetrics {
    /// Metrics of the unit with `name`.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitMetrics> {
        self.units.iter().find(|unit| unit.name == name)
    }

    fn compute_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        self.duration.hash(&mut hasher);
        for unit in &self.units {
            unit.name.hash(&mut hasher);
            unit.total_damage.to_bits().hash(&mut hasher);
            for (action, metrics) in &unit.actions {
                action.hash(&mut hasher);
                metrics.casts.hash(&mut hasher);
                metrics.hits.hash(&mut hasher);
                metrics.crits.hash(&mut hasher);
                metrics.misses.hash(&mut hasher);
                metrics.resists.hash(&mut hasher);
                metrics.dodges.hash(&mut hasher);
                metrics.damage.to_bits().hash(&mut hasher);
            }
            for (tag, flow) in unit.mana.iter().chain(&unit.health) {
                tag.hash(&mut hasher);
                flow.gained.to_bits().hash(&mut hasher);
                flow.spent.to_bits().hash(&mut hasher);
                flow.events.hash(&mut hasher);
            }
            for aura in &unit.auras {
                aura.uptime.hash(&mut hasher);
                aura.activations.hash(&mut hasher);
            }
        }
        for (key, stats) in &self.procs {
            key.hash(&mut hasher);
            stats.attempts.hash(&mut hasher);
            stats.successes.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Distribution of one unit's DPS across iterations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DpsSummary {
    /// Mean.
    pub mean: f64,
    /// Sample standard deviation.
    pub stdev: f64,
    /// Lowest iteration.
    pub min: f64,
    /// Highest iteration.
    pub max: f64,
}

impl DpsSummary {
    /// Summarize a sample.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = if samples.len() > 1 {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0)
        } else {
            0.0
        };
        Self {
            mean,
            stdev: variance.sqrt(),
            min: samples.iter().copied().fold(f64::INFINITY, f64::min),
            max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

/// Aggregate of one unit across iterations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitAggregate {
    /// Unit name.
    pub name: String,
    /// DPS distribution.
    pub dps: DpsSummary,
    /// Mean damage per iteration, per action.
    pub action_damage: BTreeMap<ActionId, f64>,
    /// Mean casts per iteration, per action.
    pub action_casts: BTreeMap<ActionId, f64>,
}

/// Statistics over many iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Iterations folded in.
    pub iterations: usize,
    /// Per-unit aggregates, in creation order.
    pub units: Vec<UnitAggregate>,
}

impl AggregateStats {
    /// Fold iteration metrics. Units are matched by name.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_iterations(iterations: &[IterationMetrics]) -> Self {
        let Some(first) = iterations.first() else {
            return Self::default();
        };
        let n = iterations.len() as f64;
        let units = first
            .units
            .iter()
            .map(|template| {
                let per_iteration: Vec<&UnitMetrics> = iterations
                    .iter()
                    .filter_map(|it| it.unit(&template.name))
                    .collect();
                let dps: Vec<f64> = per_iteration.iter().map(|unit| unit.dps).collect();
                let mut action_damage = BTreeMap::new();
                let mut action_casts = BTreeMap::new();
                for unit in &per_iteration {
                    for (action, metrics) in &unit.actions {
                        *action_damage.entry(*action).or_insert(0.0) += metrics.damage / n;
                        *action_casts.entry(*action).or_insert(0.0) += metrics.casts as f64 / n;
                    }
                }
                UnitAggregate {
                    name: template.name.clone(),
                    dps: DpsSummary::from_samples(&dps),
                    action_damage,
                    action_casts,
                }
            })
            .collect();
        Self {
            iterations: iterations.len(),
            units,
        }
    }

    /// Aggregate of the unit with `name`.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitAggregate> {
        self.units.iter().find(|unit| unit.name == name)
    }
}

impl Simulation {
    /// Snapshot metrics of the current iteration.
    #[must_use]
    pub fn collect_metrics(&self) -> IterationMetrics {
        let now = self.now();
        let secs = self.end_time.as_secs_f64();
        let units = self
            .units
            .iter()
            .map(|unit| {
                let total_damage = unit.actions.values().map(|m| m.damage).sum::<f64>();
                let mut mana = BTreeMap::new();
                let mut health = BTreeMap::new();
                for (kind, tag, flow) in unit.ledger.flows() {
                    match kind {
                        ResourceKind::Mana => mana.insert(tag, flow),
                        ResourceKind::Health => health.insert(tag, flow),
                    };
                }
                UnitMetrics {
                    name: unit.config.name.clone(),
                    total_damage,
                    dps: if secs > 0.0 { total_damage / secs } else { 0.0 },
                    actions: unit.actions.clone(),
                    mana,
                    health,
                    auras: unit
                        .auras
                        .iter()
                        .map(|handle| {
                            let aura = &self.auras[handle.0];
                            AuraMetrics {
                                label: aura.label().to_owned(),
                                uptime: aura.uptime(now),
                                activations: aura.activations(),
                            }
                        })
                        .collect(),
                }
            })
            .collect();

        let mut metrics = IterationMetrics {
            iteration: self.iteration,
            seed: self.rng.seed(),
            duration: self.end_time,
            units,
            procs: self
                .rng
                .procs()
                .all_stats()
                .map(|(key, stats)| (key.to_owned(), stats))
                .collect(),
            fingerprint: 0,
        };
        metrics.fingerprint = metrics.compute_fingerprint();
        metrics
    }
}
