//! Batch-level summaries for damage analysis.
//!
//! Folds the per-iteration metrics of a batch into per-unit DPS
//! distributions and per-action breakdowns, ordered by damage.

use std::collections::BTreeMap;

use combat_core::metrics::{AggregateStats, DpsSummary, IterationMetrics};
use combat_core::spell::ActionId;
use serde::{Deserialize, Serialize};

/// Normal quantile for a two-sided 95% interval.
const Z_95: f64 = 1.96;

/// One action of one unit, averaged over a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Action the numbers belong to.
    pub action: ActionId,
    /// Mean damage per iteration.
    pub damage: f64,
    /// Mean casts per iteration.
    pub casts: f64,
    /// Fraction of the unit's damage.
    pub share: f64,
    /// Crit rate over all landed results of the batch.
    pub crit_rate: f64,
}

/// One unit across a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSummary {
    /// Unit name.
    pub name: String,
    /// DPS distribution.
    pub dps: DpsSummary,
    /// Half-width of the 95% confidence interval of the mean DPS.
    pub dps_error: f64,
    /// Actions, highest damage first.
    pub actions: Vec<ActionSummary>,
    /// Mean uptime fraction per aura label.
    pub aura_uptime: BTreeMap<String, f64>,
    /// Mean mana spent per iteration.
    pub mana_spent: f64,
}

/// Summary statistics across a batch of iterations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Iterations summarized.
    pub total_iterations: usize,
    /// Mean encounter length in seconds.
    pub avg_duration_secs: f64,
    /// Shortest encounter in seconds.
    pub min_duration_secs: f64,
    /// Longest encounter in seconds.
    pub max_duration_secs: f64,
    /// Per-unit summaries, in creation order. Units that dealt no damage
    /// are left out.
    pub units: Vec<UnitSummary>,
    /// Observed proc rate per proc key.
    pub proc_rates: BTreeMap<String, f64>,
}

impl BatchSummary {
    /// Calculate summary from a list of iteration metrics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_iterations(iterations: &[IterationMetrics]) -> Self {
        if iterations.is_empty() {
            return Self::default();
        }
        let n = iterations.len() as f64;
        let aggregate = AggregateStats::from_iterations(iterations);

        let durations: Vec<f64> = iterations
            .iter()
            .map(|it| it.duration.as_secs_f64())
            .collect();

        let units = aggregate
            .units
            .iter()
            .filter(|unit| unit.dps.mean > 0.0)
            .map(|unit| {
                let per_iteration = iterations
                    .iter()
                    .filter_map(|it| it.unit(&unit.name).map(|metrics| (metrics, it)));
                let mut crits: BTreeMap<ActionId, (u64, u64)> = BTreeMap::new();
                let mut aura_uptime: BTreeMap<String, f64> = BTreeMap::new();
                let mut mana_spent = 0.0;
                for (metrics, it) in per_iteration {
                    for (action, counters) in &metrics.actions {
                        let entry = crits.entry(*action).or_default();
                        entry.0 += counters.crits;
                        entry.1 += counters.hits;
                    }
                    let secs = it.duration.as_secs_f64();
                    for aura in &metrics.auras {
                        if secs > 0.0 {
                            *aura_uptime.entry(aura.label.clone()).or_default() +=
                                aura.uptime.as_secs_f64() / secs / n;
                        }
                    }
                    mana_spent += metrics.mana.values().map(|flow| flow.spent).sum::<f64>() / n;
                }

                let total: f64 = unit.action_damage.values().sum();
                let mut actions: Vec<ActionSummary> = unit
                    .action_damage
                    .iter()
                    .map(|(action, damage)| {
                        let (crit, hits) = crits.get(action).copied().unwrap_or_default();
                        ActionSummary {
                            action: *action,
                            damage: *damage,
                            casts: unit.action_casts.get(action).copied().unwrap_or_default(),
                            share: if total > 0.0 { damage / total } else { 0.0 },
                            crit_rate: if hits > 0 {
                                crit as f64 / hits as f64
                            } else {
                                0.0
                            },
                        }
                    })
                    .collect();
                actions.sort_by(|a, b| {
                    b.damage
                        .total_cmp(&a.damage)
                        .then_with(|| a.action.cmp(&b.action))
                });

                UnitSummary {
                    name: unit.name.clone(),
                    dps: unit.dps,
                    dps_error: Z_95 * unit.dps.stdev / n.sqrt(),
                    actions,
                    aura_uptime,
                    mana_spent,
                }
            })
            .collect();

        let mut procs: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for it in iterations {
            for (key, stats) in &it.procs {
                let entry = procs.entry(key.clone()).or_default();
                entry.0 += stats.successes;
                entry.1 += stats.attempts;
            }
        }
        let proc_rates = procs
            .into_iter()
            .filter(|(_, (_, attempts))| *attempts > 0)
            .map(|(key, (successes, attempts))| (key, successes as f64 / attempts as f64))
            .collect();

        Self {
            total_iterations: iterations.len(),
            avg_duration_secs: durations.iter().sum::<f64>() / n,
            min_duration_secs: durations.iter().copied().fold(f64::INFINITY, f64::min),
            max_duration_secs: durations.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            units,
            proc_rates,
        }
    }

    /// Summary of the unit with `name`.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitSummary> {
        self.units.iter().find(|unit| unit.name == name)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use combat_core::metrics::{ActionMetrics, AuraMetrics, UnitMetrics};
    use combat_core::rng::ProcStats;

    use super::*;

    fn iteration(index: u64, secs: u64, bolt: f64, blast: f64) -> IterationMetrics {
        let mut actions = BTreeMap::new();
        actions.insert(
            ActionId::spell(1),
            ActionMetrics {
                casts: 10,
                hits: 10,
                crits: 2,
                damage: bolt,
                ..ActionMetrics::default()
            },
        );
        actions.insert(
            ActionId::spell(2),
            ActionMetrics {
                casts: 4,
                hits: 4,
                crits: 2,
                damage: blast,
                ..ActionMetrics::default()
            },
        );
        let total = bolt + blast;
        let mut procs = BTreeMap::new();
        procs.insert(
            "Ignite".to_string(),
            ProcStats {
                attempts: 10,
                successes: 3,
                blocked: 0,
            },
        );
        IterationMetrics {
            iteration: index,
            seed: index,
            duration: Duration::from_secs(secs),
            units: vec![
                UnitMetrics {
                    name: "Mage".into(),
                    total_damage: total,
                    dps: total / secs as f64,
                    actions,
                    mana: BTreeMap::new(),
                    health: BTreeMap::new(),
                    auras: vec![AuraMetrics {
                        label: "Arcane Power".into(),
                        uptime: Duration::from_secs(secs / 2),
                        activations: 1,
                    }],
                },
                UnitMetrics {
                    name: "Boss".into(),
                    total_damage: 0.0,
                    dps: 0.0,
                    actions: BTreeMap::new(),
                    mana: BTreeMap::new(),
                    health: BTreeMap::new(),
                    auras: Vec::new(),
                },
            ],
            procs,
            fingerprint: index,
        }
    }

    #[test]
    fn test_empty_batch() {
        let summary = BatchSummary::from_iterations(&[]);
        assert_eq!(summary.total_iterations, 0);
        assert!(summary.units.is_empty());
    }

    #[test]
    fn test_batch_summary() {
        let iterations = vec![
            iteration(0, 100, 6_000.0, 4_000.0),
            iteration(1, 120, 9_000.0, 3_000.0),
        ];
        let summary = BatchSummary::from_iterations(&iterations);

        assert_eq!(summary.total_iterations, 2);
        assert!((summary.avg_duration_secs - 110.0).abs() < 1e-9);
        assert!((summary.min_duration_secs - 100.0).abs() < 1e-9);
        assert!((summary.max_duration_secs - 120.0).abs() < 1e-9);
        assert!(summary.unit("Boss").is_none());

        let mage = summary.unit("Mage").unwrap();
        assert!((mage.dps.mean - 100.0).abs() < 1e-9);
        assert!(mage.dps_error.abs() < 1e-9);
        assert_eq!(mage.actions[0].action, ActionId::spell(1));
        assert!((mage.actions[0].damage - 7_500.0).abs() < 1e-9);
        assert!((mage.actions[0].share - 7_500.0 / 11_000.0).abs() < 1e-9);
        assert!((mage.actions[0].crit_rate - 0.2).abs() < 1e-9);
        assert!((mage.actions[1].crit_rate - 0.5).abs() < 1e-9);
        assert!((mage.aura_uptime["Arcane Power"] - 0.5).abs() < 1e-9);
        assert!((summary.proc_rates["Ignite"] - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_actions_sorted_by_damage() {
        let summary = BatchSummary::from_iterations(&[iteration(0, 60, 1_000.0, 5_000.0)]);
        let mage = summary.unit("Mage").unwrap();
        assert_eq!(mage.actions[0].action, ActionId::spell(2));
        assert_eq!(mage.actions[1].action, ActionId::spell(1));
    }
}
