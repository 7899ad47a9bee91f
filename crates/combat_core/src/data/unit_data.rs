//! Unit data structures for data-driven encounter definitions.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::item_data::{ClassMask, ItemData};
use crate::spell::SpellSchool;
use crate::time;
use crate::unit::UnitKind;

/// Combat statistics for a unit. Chances are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombatStats {
    /// Character level, used for level-difference miss and resist tables.
    pub level: u32,
    /// Spell power for every school.
    pub spell_power: f64,
    /// Extra spell power for single schools.
    pub school_power: BTreeMap<SpellSchool, f64>,
    /// Bonus spell hit chance.
    pub spell_hit: f64,
    /// Spell crit chance.
    pub spell_crit: f64,
    /// Spell haste; cast speed is `1 + spell_haste`.
    pub spell_haste: f64,
    /// Bonus physical hit chance.
    pub physical_hit: f64,
    /// Physical crit chance.
    pub physical_crit: f64,
    /// Chance to dodge physical attacks.
    pub dodge: f64,
    /// Resistances by school.
    pub resistances: BTreeMap<SpellSchool, f64>,
    /// Mana pool, `None` for no mana.
    pub mana: Option<f64>,
    /// Health pool, `None` for unlimited health.
    pub health: Option<f64>,
    /// Mana per five seconds.
    pub mp5: f64,
}

impl Default for CombatStats {
    fn default() -> Self {
        Self {
            level: 60,
            spell_power: 0.0,
            school_power: BTreeMap::new(),
            spell_hit: 0.0,
            spell_crit: 0.0,
            spell_haste: 0.0,
            physical_hit: 0.0,
            physical_crit: 0.0,
            dodge: 0.0,
            resistances: BTreeMap::new(),
            mana: None,
            health: None,
            mp5: 0.0,
        }
    }
}

impl CombatStats {
    /// Spell power applying to a school.
    #[must_use]
    pub fn spell_power_for(&self, school: SpellSchool) -> f64 {
        self.spell_power + self.school_power.get(&school).copied().unwrap_or(0.0)
    }

    /// Resistance against a school.
    #[must_use]
    pub fn resistance(&self, school: SpellSchool) -> f64 {
        self.resistances.get(&school).copied().unwrap_or(0.0)
    }

    /// Add an item's stat vector.
    ///
    /// Flat mana and health only extend pools that exist.
    pub fn apply_item(&mut self, item: &ItemData) {
        let stats = &item.stats;
        self.spell_power += stats.spell_power;
        for (school, power) in &stats.school_power {
            *self.school_power.entry(*school).or_default() += power;
        }
        for (school, resistance) in &stats.resistances {
            *self.resistances.entry(*school).or_default() += resistance;
        }
        self.spell_hit += stats.spell_hit / 100.0;
        self.spell_crit += stats.spell_crit / 100.0;
        self.spell_haste += stats.spell_haste / 100.0;
        self.dodge += stats.dodge / 100.0;
        self.mp5 += stats.mp5;
        if let Some(mana) = self.mana.as_mut() {
            *mana += stats.mana;
        }
        if let Some(health) = self.health.as_mut() {
            *health += stats.health;
        }
    }
}

/// Character class, used to check item restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitClass {
    /// Warrior.
    Warrior,
    /// Paladin.
    Paladin,
    /// Hunter.
    Hunter,
    /// Rogue.
    Rogue,
    /// Priest.
    Priest,
    /// Shaman.
    Shaman,
    /// Mage.
    Mage,
    /// Warlock.
    Warlock,
    /// Druid.
    Druid,
}

impl UnitClass {
    /// Bit for this class in an item's allowable-class mask.
    #[must_use]
    pub const fn mask(self) -> ClassMask {
        match self {
            Self::Warrior => ClassMask::WARRIOR,
            Self::Paladin => ClassMask::PALADIN,
            Self::Hunter => ClassMask::HUNTER,
            Self::Rogue => ClassMask::ROGUE,
            Self::Priest => ClassMask::PRIEST,
            Self::Shaman => ClassMask::SHAMAN,
            Self::Mage => ClassMask::MAGE,
            Self::Warlock => ClassMask::WARLOCK,
            Self::Druid => ClassMask::DRUID,
        }
    }
}

/// Periodic mana regeneration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ManaRegen {
    /// Mana restored per tick.
    pub per_tick: f64,
    /// Time between ticks.
    #[serde(with = "time::secs")]
    pub interval: Duration,
}

fn default_distance() -> f64 {
    20.0
}

/// Data-driven unit definition.
///
/// # Example RON
///
/// ```ron
/// UnitConfig(
///     name: "Mage",
///     kind: Player,
///     class: Some(Mage),
///     stats: (level: 60, spell_power: 600, spell_crit: 0.15, mana: Some(8000)),
///     mana_regen: Some((per_tick: 40, interval: 2.0)),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Display name, also the metrics key.
    pub name: String,

    /// Whether the unit acts or is acted upon.
    pub kind: UnitKind,

    /// Class for item restrictions; `None` skips the check.
    #[serde(default)]
    pub class: Option<UnitClass>,

    /// Base statistics before items.
    #[serde(default)]
    pub stats: CombatStats,

    /// Equipped items.
    #[serde(default)]
    pub items: Vec<ItemData>,

    /// Distance from its target in yards, for projectile travel time.
    #[serde(default = "default_distance")]
    pub distance: f64,

    /// Periodic mana regeneration.
    #[serde(default)]
    pub mana_regen: Option<ManaRegen>,
}

impl UnitConfig {
    /// Player unit with the given stats.
    #[must_use]
    pub fn player(name: impl Into<String>, stats: CombatStats) -> Self {
        Self {
            name: name.into(),
            kind: UnitKind::Player,
            class: None,
            stats,
            items: Vec::new(),
            distance: default_distance(),
            mana_regen: None,
        }
    }

    /// Target unit with the given stats.
    #[must_use]
    pub fn target(name: impl Into<String>, stats: CombatStats) -> Self {
        Self {
            kind: UnitKind::Target,
            ..Self::player(name, stats)
        }
    }

    /// Stats with every item applied.
    #[must_use]
    pub fn effective_stats(&self) -> CombatStats {
        let mut stats = self.stats.clone();
        for item in &self.items {
            stats.apply_item(item);
        }
        stats
    }
}
