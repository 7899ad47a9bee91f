//! Actor units: casters and targets.
//!
//! A unit owns its resource ledger, its registered auras and spells, its GCD
//! timer and its per-action metrics. Everything mutable is restored from the
//! unit's configuration at the start of each iteration.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aura::AuraHandle;
use crate::cooldown::TimerHandle;
use crate::data::{CombatStats, UnitConfig};
use crate::dot::DotHandle;
use crate::error::{Result, SimError};
use crate::ledger::ResourceLedger;
use crate::metrics::ActionMetrics;
use crate::periodic::PeriodicHandle;
use crate::queue::PendingActionHandle;
use crate::rotation::Rotation;
use crate::simulation::Simulation;
use crate::spell::{ActionId, SpellHandle, SpellSchool};

/// Unique identifier for units within one simulation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct UnitId(pub usize);

/// Role of a unit in the encounter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitKind {
    /// Acts through a rotation.
    Player,
    /// Enemy target; receives enemy aura arrays.
    Target,
}

/// Multipliers content adjusts at runtime. Restored at reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PseudoStats {
    /// Cast speed; cast times and affected dot cadences divide by it.
    pub cast_speed: f64,
    /// Multiplier on all damage dealt.
    pub damage_dealt_multiplier: f64,
    /// Multiplier on mana gained.
    pub mana_gain_multiplier: f64,
    /// Per-school cost multiplier in percent (100 = normal, 0 = free).
    pub school_cost_pct: [i32; SpellSchool::COUNT],
}

impl PseudoStats {
    /// Neutral pseudo-stats for a unit with the given haste.
    #[must_use]
    pub fn with_haste(spell_haste: f64) -> Self {
        Self {
            cast_speed: 1.0 + spell_haste,
            damage_dealt_multiplier: 1.0,
            mana_gain_multiplier: 1.0,
            school_cost_pct: [100; SpellSchool::COUNT],
        }
    }

    /// Cost multiplier in percent for a school.
    #[must_use]
    pub const fn cost_pct(&self, school: SpellSchool) -> i32 {
        self.school_cost_pct[school.index()]
    }
}

impl Default for PseudoStats {
    fn default() -> Self {
        Self::with_haste(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Hardcast {
    pub(crate) spell: SpellHandle,
    pub(crate) target: UnitId,
    pub(crate) started_at: Duration,
    pub(crate) completes_at: Duration,
    pub(crate) pending: PendingActionHandle,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Channel {
    pub(crate) spell: SpellHandle,
    pub(crate) dot: DotHandle,
}

/// An actor in the simulation.
pub struct Unit {
    pub(crate) id: UnitId,
    pub(crate) config: UnitConfig,
    pub(crate) base_stats: CombatStats,
    pub(crate) stats: CombatStats,
    pub(crate) pseudo: PseudoStats,
    pub(crate) ledger: ResourceLedger,
    pub(crate) gcd: TimerHandle,
    pub(crate) auras: Vec<AuraHandle>,
    pub(crate) aura_labels: HashMap<String, AuraHandle>,
    pub(crate) spells: Vec<SpellHandle>,
    pub(crate) major_cooldowns: Vec<SpellHandle>,
    pub(crate) hardcast: Option<Hardcast>,
    pub(crate) channel: Option<Channel>,
    pub(crate) rotation: Option<Box<dyn Rotation>>,
    pub(crate) rotation_done: bool,
    pub(crate) pending_decision: Option<(Duration, PendingActionHandle)>,
    pub(crate) regen: Option<PeriodicHandle>,
    pub(crate) actions: BTreeMap<ActionId, ActionMetrics>,
}

impl Unit {
    /// Identifier of this unit.
    #[must_use]
    pub const fn id(&self) -> UnitId {
        self.id
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Role in the encounter.
    #[must_use]
    pub const fn kind(&self) -> UnitKind {
        self.config.kind
    }

    /// Configuration the unit was created from.
    #[must_use]
    pub const fn config(&self) -> &UnitConfig {
        &self.config
    }

    /// Current combat statistics.
    #[must_use]
    pub const fn stats(&self) -> &CombatStats {
        &self.stats
    }

    /// Mutable combat statistics, for buffs. Restored at reset.
    pub fn stats_mut(&mut self) -> &mut CombatStats {
        &mut self.stats
    }

    /// Current pseudo-stats.
    #[must_use]
    pub const fn pseudo(&self) -> &PseudoStats {
        &self.pseudo
    }

    /// Mutable pseudo-stats. Restored at reset.
    pub fn pseudo_mut(&mut self) -> &mut PseudoStats {
        &mut self.pseudo
    }

    /// Multiply cast speed by `factor`; divide by the same factor to undo.
    pub fn multiply_cast_speed(&mut self, factor: f64) {
        self.pseudo.cast_speed *= factor;
    }

    /// Resource state.
    #[must_use]
    pub const fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    /// Global cooldown timer.
    #[must_use]
    pub const fn gcd(&self) -> TimerHandle {
        self.gcd
    }

    /// Auras registered on this unit, in registration order.
    #[must_use]
    pub fn auras(&self) -> &[AuraHandle] {
        &self.auras
    }

    /// Spells registered by this unit, in registration order.
    #[must_use]
    pub fn spells(&self) -> &[SpellHandle] {
        &self.spells
    }

    /// Whether a hardcast is in flight.
    #[must_use]
    pub const fn is_casting(&self) -> bool {
        self.hardcast.is_some()
    }

    /// Time the in-flight hardcast completes.
    #[must_use]
    pub fn cast_completes_at(&self) -> Option<Duration> {
        self.hardcast.map(|cast| cast.completes_at)
    }

    /// Whether the unit is channeling.
    #[must_use]
    pub const fn is_channeling(&self) -> bool {
        self.channel.is_some()
    }

    /// Spell being channeled, if any.
    #[must_use]
    pub fn channeled_spell(&self) -> Option<SpellHandle> {
        self.channel.map(|channel| channel.spell)
    }

    pub(crate) fn reset(&mut self) {
        self.stats = self.base_stats.clone();
        self.pseudo = PseudoStats::with_haste(self.base_stats.spell_haste);
        self.ledger.reset();
        self.hardcast = None;
        self.channel = None;
        self.rotation_done = false;
        self.pending_decision = None;
        self.regen = None;
        self.actions.clear();
    }
}

impl std::fmt::Debug for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Unit")
            .field("id", &self.id)
            .field("name", &self.config.name)
            .field("kind", &self.config.kind)
            .field("auras", &self.auras.len())
            .field("spells", &self.spells.len())
            .field("casting", &self.hardcast.is_some())
            .field("channeling", &self.channel.is_some())
            .finish_non_exhaustive()
    }
}

impl Simulation {
    /// Add a unit built from its configuration.
    ///
    /// Items are applied to the base stats here, once; the engine never
    /// revisits them during a run. Spells already registered with a dot get
    /// a dot on the new unit.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] for a duplicate name, an item the unit's class
    /// cannot equip, or when called while an iteration is running.
    pub fn add_unit(&mut self, config: UnitConfig) -> Result<UnitId> {
        self.ensure_setup("add_unit")?;
        if self.units.iter().any(|unit| unit.config.name == config.name) {
            return Err(SimError::setup(format!(
                "duplicate unit name '{}'",
                config.name
            )));
        }
        if let Some(class) = config.class {
            if let Some(item) = config.items.iter().find(|item| !item.allows(class.mask())) {
                return Err(SimError::setup(format!(
                    "unit '{}' cannot equip item {} ({})",
                    config.name, item.id, item.name
                )));
            }
        }
        if let Some(regen) = config.mana_regen {
            if regen.interval.is_zero() {
                return Err(SimError::setup(format!(
                    "unit '{}': mana regen interval must be positive",
                    config.name
                )));
            }
        }

        let id = UnitId(self.units.len());
        let gcd = self.new_timer()?;
        let stats = config.effective_stats();
        let ledger = ResourceLedger::new(stats.mana, stats.health);
        tracing::debug!(unit = id.0, name = %config.name, "Added unit");
        self.units.push(Unit {
            id,
            base_stats: stats.clone(),
            pseudo: PseudoStats::with_haste(stats.spell_haste),
            stats,
            config,
            ledger,
            gcd,
            auras: Vec::new(),
            aura_labels: HashMap::new(),
            spells: Vec::new(),
            major_cooldowns: Vec::new(),
            hardcast: None,
            channel: None,
            rotation: None,
            rotation_done: false,
            pending_decision: None,
            regen: None,
            actions: BTreeMap::new(),
        });

        let dot_spells: Vec<SpellHandle> = (0..self.spells.len())
            .map(SpellHandle)
            .filter(|spell| self.spells[spell.0].config.dot.is_some())
            .collect();
        for spell in dot_spells {
            self.create_dot(spell, id)?;
        }
        Ok(id)
    }

    /// Unit by id.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for an unknown id.
    pub fn unit(&self, id: UnitId) -> Result<&Unit> {
        self.units
            .get(id.0)
            .ok_or_else(|| SimError::NotFound(format!("unit #{}", id.0)))
    }

    /// Mutable unit by id.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for an unknown id.
    pub fn unit_mut(&mut self, id: UnitId) -> Result<&mut Unit> {
        self.units
            .get_mut(id.0)
            .ok_or_else(|| SimError::NotFound(format!("unit #{}", id.0)))
    }

    /// Look up a unit by name.
    #[must_use]
    pub fn unit_by_name(&self, name: &str) -> Option<UnitId> {
        self.units
            .iter()
            .find(|unit| unit.config.name == name)
            .map(|unit| unit.id)
    }

    /// All units in creation order.
    #[must_use]
    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    /// Ids of every target unit, in creation order.
    #[must_use]
    pub fn targets(&self) -> Vec<UnitId> {
        self.units
            .iter()
            .filter(|unit| unit.config.kind == UnitKind::Target)
            .map(|unit| unit.id)
            .collect()
    }

    /// Whether the unit's GCD is ready now.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for an unknown id.
    pub fn is_gcd_ready(&self, unit: UnitId) -> Result<bool> {
        let gcd = self.unit(unit)?.gcd;
        Ok(self.timer(gcd)?.is_ready(self.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ClassMask, ItemData, ItemSlot, StatVector, UnitClass};
    use crate::simulation::SimulationConfig;

    #[test]
    fn test_add_unit_and_lookup() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let mage = sim
            .add_unit(UnitConfig::player("Mage", CombatStats::default()))
            .unwrap();
        let dummy = sim
            .add_unit(UnitConfig::target("Dummy", CombatStats::default()))
            .unwrap();

        assert_eq!(sim.unit_by_name("Mage"), Some(mage));
        assert_eq!(sim.targets(), vec![dummy]);
        assert_eq!(sim.unit(mage).unwrap().kind(), UnitKind::Player);
        assert!(sim.unit(UnitId(9)).is_err());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut sim = Simulation::new(SimulationConfig::default());
        sim.add_unit(UnitConfig::player("Mage", CombatStats::default()))
            .unwrap();
        let err = sim
            .add_unit(UnitConfig::player("Mage", CombatStats::default()))
            .unwrap_err();
        assert!(err.is_fatal_setup());
    }

    #[test]
    fn test_class_restricted_item_rejected() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let mut config = UnitConfig::player("Mage", CombatStats::default());
        config.class = Some(UnitClass::Mage);
        config.items.push(ItemData {
            id: 7,
            name: "Plate Helm".into(),
            slot: ItemSlot::Head,
            armor: None,
            weapon: None,
            allowable_classes: ClassMask::WARRIOR | ClassMask::PALADIN,
            stats: StatVector::default(),
        });
        assert!(sim.add_unit(config).is_err());
    }

    #[test]
    fn test_haste_sets_cast_speed() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let mage = sim
            .add_unit(UnitConfig::player(
                "Mage",
                CombatStats {
                    spell_haste: 0.1,
                    ..CombatStats::default()
                },
            ))
            .unwrap();
        let unit = sim.unit_mut(mage).unwrap();
        assert!((unit.pseudo().cast_speed - 1.1).abs() < 1e-12);

        unit.multiply_cast_speed(1.3);
        unit.reset();
        assert!((unit.pseudo().cast_speed - 1.1).abs() < 1e-12);
    }
}
