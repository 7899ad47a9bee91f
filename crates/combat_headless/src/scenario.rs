//! Scenario loading and configuration.
//!
//! A scenario describes one encounter numerically: the caster and its
//! targets, spell and buff definitions, the rotation priority list and the
//! simulation settings. [`crate::content`] turns it into a
//! [`Simulation`](combat_core::simulation::Simulation).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use combat_core::data::{CombatStats, ManaRegen, UnitConfig};
use combat_core::error::SimError;
use combat_core::outcome::OutcomeKind;
use combat_core::simulation::SimulationConfig;
use combat_core::spell::{SpellFlags, SpellSchool};
use combat_core::time;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for scenario operations.
#[derive(Error, Debug)]
pub enum ScenarioError {
    /// File not found.
    #[error("Scenario file not found: {0}")]
    FileNotFound(String),
    /// Failed to read file.
    #[error("Failed to read scenario file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse RON.
    #[error("Failed to parse scenario: {0}")]
    ParseError(#[from] ron::error::SpannedError),
    /// Content refers to something that does not exist or is inconsistent.
    #[error("Invalid scenario: {0}")]
    Invalid(String),
    /// The engine rejected the content.
    #[error("Simulation setup failed: {0}")]
    Setup(#[from] SimError),
}

/// A complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Encounter settings.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// The acting unit.
    pub caster: UnitConfig,
    /// Enemy units; the rotation attacks the first.
    pub targets: Vec<UnitConfig>,
    /// Spells known to the caster.
    pub spells: Vec<SpellDef>,
    /// Buffs and procs on the caster.
    #[serde(default)]
    pub buffs: Vec<BuffDef>,
    /// Decision layer.
    pub rotation: RotationDef,
}

impl Default for Scenario {
    fn default() -> Self {
        Self::fire_mage()
    }
}

impl Scenario {
    /// Load a scenario from a RON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_ron_str(&contents)
    }

    /// Load from a RON string (useful for embedded scenarios).
    pub fn from_ron_str(ron: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = ron::from_str(ron)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Resolve a scenario argument: a path to a `.ron` file, or the name of
    /// a built-in scenario.
    pub fn resolve(name_or_path: &str) -> Result<Self, ScenarioError> {
        match name_or_path {
            "fire_mage" => Ok(Self::fire_mage()),
            "arcane_mage" => Ok(Self::arcane_mage()),
            path => Self::load(path),
        }
    }

    /// Check cross-references between spells, buffs and the rotation.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.targets.is_empty() {
            return Err(ScenarioError::Invalid("scenario has no targets".into()));
        }

        let mut spell_names = HashSet::new();
        for spell in &self.spells {
            if !spell_names.insert(spell.name.as_str()) {
                return Err(ScenarioError::Invalid(format!(
                    "duplicate spell '{}'",
                    spell.name
                )));
            }
            if let Some(buff) = &spell.applies_buff {
                if !self.buffs.iter().any(|b| &b.name == buff) {
                    return Err(ScenarioError::Invalid(format!(
                        "spell '{}' applies unknown buff '{buff}'",
                        spell.name
                    )));
                }
            }
        }

        for buff in &self.buffs {
            if let BuffTrigger::OnCastComplete { spell: Some(name) }
            | BuffTrigger::OnSpellHit {
                spell: Some(name), ..
            } = &buff.trigger
            {
                if !spell_names.contains(name.as_str()) {
                    return Err(ScenarioError::Invalid(format!(
                        "buff '{}' is triggered by unknown spell '{name}'",
                        buff.name
                    )));
                }
            }
        }

        for entry in &self.rotation.priorities {
            if !spell_names.contains(entry.spell.as_str()) {
                return Err(ScenarioError::Invalid(format!(
                    "rotation casts unknown spell '{}'",
                    entry.spell
                )));
            }
            if let Condition::BuffActive(buff) | Condition::BuffInactive(buff) = &entry.condition
            {
                if !self.buffs.iter().any(|b| &b.name == buff) {
                    return Err(ScenarioError::Invalid(format!(
                        "rotation checks unknown buff '{buff}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// A fire caster weaving an instant between hardcasts, with a
    /// crit-triggered buff and an on-use damage cooldown.
    #[must_use]
    pub fn fire_mage() -> Self {
        Self {
            name: "fire_mage".to_string(),
            description: "Fire caster against a raid boss".to_string(),
            simulation: SimulationConfig {
                duration: Duration::from_secs(180),
                duration_variation: Duration::from_secs(15),
                base_seed: 0,
                iterations: 1_000,
            },
            caster: UnitConfig {
                mana_regen: Some(ManaRegen {
                    per_tick: 24.0,
                    interval: Duration::from_secs(2),
                }),
                ..UnitConfig::player(
                    "Mage",
                    CombatStats {
                        level: 60,
                        spell_power: 650.0,
                        spell_hit: 0.08,
                        spell_crit: 0.18,
                        mana: Some(8_500.0),
                        mp5: 30.0,
                        ..CombatStats::default()
                    },
                )
            },
            targets: vec![UnitConfig::target(
                "Boss",
                CombatStats {
                    level: 63,
                    ..CombatStats::default()
                },
            )],
            spells: vec![
                SpellDef {
                    cast_time: Duration::from_millis(3_000),
                    mana_cost: 410.0,
                    base_damage: Some((596.0, 760.0)),
                    bonus_coefficient: 1.0,
                    missile_speed: Some(24.0),
                    ..SpellDef::new(25_306, "Fireball", SpellSchool::Fire)
                },
                SpellDef {
                    cooldown: Some(Duration::from_secs(8)),
                    mana_cost: 340.0,
                    base_damage: Some((446.0, 524.0)),
                    bonus_coefficient: 0.43,
                    ..SpellDef::new(10_199, "Fire Blast", SpellSchool::Fire)
                },
                SpellDef {
                    gcd: Duration::ZERO,
                    cooldown: Some(Duration::from_secs(180)),
                    applies_buff: Some("Combustion".to_string()),
                    major_cooldown: true,
                    ..SpellDef::new(11_129, "Combustion", SpellSchool::Fire)
                },
            ],
            buffs: vec![
                BuffDef {
                    duration: Some(Duration::from_secs(10)),
                    effect: BuffEffect::CritChance(0.1),
                    trigger: BuffTrigger::OnUse,
                    ..BuffDef::new("Combustion")
                },
                BuffDef {
                    duration: Some(Duration::from_secs(6)),
                    max_stacks: 5,
                    effect: BuffEffect::SpellPower(30.0),
                    trigger: BuffTrigger::OnSpellHit {
                        spell: None,
                        crit_only: true,
                    },
                    icd: Some(Duration::from_secs(1)),
                    ..BuffDef::new("Ignition")
                },
            ],
            rotation: RotationDef {
                use_major_cooldowns: true,
                priorities: vec![
                    PriorityEntry::always("Fire Blast"),
                    PriorityEntry::always("Fireball"),
                ],
            },
        }
    }

    /// An arcane caster channeling missiles when a free-cast buff procs.
    #[must_use]
    pub fn arcane_mage() -> Self {
        let mut scenario = Self::fire_mage();
        scenario.name = "arcane_mage".to_string();
        scenario.description = "Arcane caster with a clearcasting proc".to_string();
        scenario.spells = vec![
            SpellDef {
                flags: SpellFlags::CHANNELED,
                gcd: Duration::from_millis(1_500),
                mana_cost: 655.0,
                base_damage: Some((230.0, 230.0)),
                bonus_coefficient: 0.24,
                dot: Some(DotDef {
                    ticks: 5,
                    tick_length: Duration::from_secs(1),
                    affected_by_cast_speed: true,
                }),
                ..SpellDef::new(25_345, "Arcane Missiles", SpellSchool::Arcane)
            },
            SpellDef {
                cast_time: Duration::from_millis(2_500),
                mana_cost: 260.0,
                base_damage: Some((440.0, 475.0)),
                bonus_coefficient: 0.81,
                ..SpellDef::new(25_304, "Frostbolt", SpellSchool::Frost)
            },
        ];
        scenario.buffs = vec![BuffDef {
            duration: Some(Duration::from_secs(15)),
            effect: BuffEffect::NextCastFree,
            trigger: BuffTrigger::OnSpellHit {
                spell: Some("Frostbolt".to_string()),
                crit_only: false,
            },
            proc_chance: 0.1,
            consume_on_cast: true,
            ..BuffDef::new("Clearcasting")
        }];
        scenario.rotation = RotationDef {
            use_major_cooldowns: false,
            priorities: vec![
                PriorityEntry {
                    spell: "Arcane Missiles".to_string(),
                    condition: Condition::BuffActive("Clearcasting".to_string()),
                },
                PriorityEntry::always("Frostbolt"),
            ],
        };
        scenario
    }
}

fn default_gcd() -> Duration {
    Duration::from_millis(1_500)
}

fn default_multiplier() -> f64 {
    1.0
}

/// Numeric spell definition.
///
/// # Example RON
///
/// ```ron
/// (
///     id: 25306,
///     name: "Fireball",
///     school: Fire,
///     flags: SpellFlags(""),
///     cast_time: 3.0,
///     mana_cost: 410,
///     base_damage: Some((596, 760)),
///     bonus_coefficient: 1.0,
///     missile_speed: Some(24.0),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellDef {
    /// Spell id, used as the metrics key.
    pub id: u32,
    /// Name the rotation and buffs refer to.
    pub name: String,
    /// Damage school.
    #[serde(default)]
    pub school: SpellSchool,
    /// Behavioral flags.
    #[serde(default)]
    pub flags: SpellFlags,
    /// Base cast time.
    #[serde(default, with = "time::secs")]
    pub cast_time: Duration,
    /// Global cooldown; zero for off-GCD spells.
    #[serde(default = "default_gcd", with = "time::secs")]
    pub gcd: Duration,
    /// Own cooldown.
    #[serde(default, with = "time::option_secs")]
    pub cooldown: Option<Duration>,
    /// Flat mana cost.
    #[serde(default)]
    pub mana_cost: f64,
    /// Base damage range; per tick for dots.
    #[serde(default)]
    pub base_damage: Option<(f64, f64)>,
    /// Spell power coefficient.
    #[serde(default)]
    pub bonus_coefficient: f64,
    /// Spell-specific damage multiplier.
    #[serde(default = "default_multiplier")]
    pub damage_multiplier: f64,
    /// Crit damage multiplier override.
    #[serde(default)]
    pub crit_multiplier: Option<f64>,
    /// Projectile speed in yards per second.
    #[serde(default)]
    pub missile_speed: Option<f64>,
    /// Roll policy.
    #[serde(default)]
    pub outcome: OutcomeKind,
    /// Periodic component.
    #[serde(default)]
    pub dot: Option<DotDef>,
    /// Buff activated on the caster when the cast completes.
    #[serde(default)]
    pub applies_buff: Option<String>,
    /// Fired by the rotation's major-cooldown step.
    #[serde(default)]
    pub major_cooldown: bool,
}

impl SpellDef {
    /// Instant, on-GCD spell with no effect.
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>, school: SpellSchool) -> Self {
        Self {
            id,
            name: name.into(),
            school,
            flags: SpellFlags::empty(),
            cast_time: Duration::ZERO,
            gcd: default_gcd(),
            cooldown: None,
            mana_cost: 0.0,
            base_damage: None,
            bonus_coefficient: 0.0,
            damage_multiplier: 1.0,
            crit_multiplier: None,
            missile_speed: None,
            outcome: OutcomeKind::default(),
            dot: None,
            applies_buff: None,
            major_cooldown: false,
        }
    }
}

/// Periodic component of a spell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DotDef {
    /// Number of ticks.
    pub ticks: u32,
    /// Time between ticks.
    #[serde(with = "time::secs")]
    pub tick_length: Duration,
    /// Whether haste shortens the cadence.
    #[serde(default)]
    pub affected_by_cast_speed: bool,
}

/// What a buff does per stack.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BuffEffect {
    /// Flat spell power.
    SpellPower(f64),
    /// Spell crit chance.
    CritChance(f64),
    /// Cast speed multiplier.
    CastSpeed(f64),
    /// Damage dealt multiplier.
    DamageMultiplier(f64),
    /// Spells cost no mana.
    NextCastFree,
}

/// What activates a buff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BuffTrigger {
    /// A spell with `applies_buff` naming it.
    OnUse,
    /// The caster completes a cast (of the given spell, or any).
    OnCastComplete {
        /// Restrict to one spell.
        spell: Option<String>,
    },
    /// A caster's spell hits (of the given spell, or any).
    OnSpellHit {
        /// Restrict to one spell.
        spell: Option<String>,
        /// Only critical hits.
        crit_only: bool,
    },
}

/// Buff or proc on the caster.
///
/// # Example RON
///
/// ```ron
/// (
///     name: "Ignition",
///     duration: Some(6.0),
///     max_stacks: 5,
///     effect: SpellPower(30),
///     trigger: OnSpellHit(spell: None, crit_only: true),
///     icd: Some(1.0),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuffDef {
    /// Aura label.
    pub name: String,
    /// Duration; `None` never expires.
    #[serde(default, with = "time::option_secs")]
    pub duration: Option<Duration>,
    /// Stack cap. Triggers while active add a stack.
    #[serde(default = "default_max_stacks")]
    pub max_stacks: u32,
    /// Per-stack effect.
    pub effect: BuffEffect,
    /// Activation source.
    pub trigger: BuffTrigger,
    /// Chance per trigger.
    #[serde(default = "default_multiplier")]
    pub proc_chance: f64,
    /// Internal cooldown between procs.
    #[serde(default, with = "time::option_secs")]
    pub icd: Option<Duration>,
    /// Removed by the next completed cast after the one that granted it.
    #[serde(default)]
    pub consume_on_cast: bool,
}

fn default_max_stacks() -> u32 {
    1
}

impl BuffDef {
    /// Single-stack, never-expiring, on-use buff with no effect.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration: None,
            max_stacks: 1,
            effect: BuffEffect::SpellPower(0.0),
            trigger: BuffTrigger::OnUse,
            proc_chance: 1.0,
            icd: None,
            consume_on_cast: false,
        }
    }
}

/// Priority-list rotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RotationDef {
    /// Fire every ready major cooldown before the priority list.
    #[serde(default)]
    pub use_major_cooldowns: bool,
    /// Spells in priority order.
    pub priorities: Vec<PriorityEntry>,
}

/// One rotation step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorityEntry {
    /// Spell name.
    pub spell: String,
    /// Gate in addition to cast eligibility.
    #[serde(default)]
    pub condition: Condition,
}

impl PriorityEntry {
    /// Entry gated by eligibility only.
    #[must_use]
    pub fn always(spell: impl Into<String>) -> Self {
        Self {
            spell: spell.into(),
            condition: Condition::Always,
        }
    }
}

/// Extra gate on a rotation step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// No extra gate.
    #[default]
    Always,
    /// The named buff is active on the caster.
    BuffActive(String),
    /// The named buff is not active on the caster.
    BuffInactive(String),
    /// The spell's own dot is not ticking on the target.
    DotInactive,
    /// Caster mana is at least this fraction of its pool.
    ManaAbove(f64),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scenarios_validate() {
        Scenario::fire_mage().validate().unwrap();
        Scenario::arcane_mage().validate().unwrap();
    }

    #[test]
    fn test_resolve_builtin() {
        assert_eq!(Scenario::resolve("arcane_mage").unwrap().name, "arcane_mage");
        assert!(matches!(
            Scenario::resolve("no/such/file.ron"),
            Err(ScenarioError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_parse_from_ron() {
        let ron = r#"
            Scenario(
                name: "Test",
                simulation: (duration: 60.0, base_seed: 3),
                caster: (name: "Mage", kind: Player, stats: (spell_power: 500.0, mana: Some(5000.0))),
                targets: [(name: "Dummy", kind: Target)],
                spells: [
                    (id: 116, name: "Frostbolt", school: Frost, cast_time: 2.5,
                     mana_cost: 260.0, base_damage: Some((440.0, 475.0)), bonus_coefficient: 0.81),
                ],
                rotation: (priorities: [(spell: "Frostbolt")]),
            )
        "#;

        let scenario = Scenario::from_ron_str(ron).unwrap();
        assert_eq!(scenario.name, "Test");
        assert!(scenario.spells[0].flags.is_empty());
        assert_eq!(scenario.simulation.duration, Duration::from_secs(60));
        assert_eq!(scenario.simulation.base_seed, 3);
        assert_eq!(scenario.spells[0].cast_time, Duration::from_millis(2_500));
        assert_eq!(scenario.spells[0].gcd, Duration::from_millis(1_500));
        assert_eq!(scenario.rotation.priorities[0].condition, Condition::Always);
    }

    #[test]
    fn test_spell_flags_from_ron() {
        let ron = r#"
            (
                id: 25345,
                name: "Arcane Missiles",
                school: Arcane,
                flags: SpellFlags("CHANNELED | BINARY"),
                dot: Some((ticks: 5, tick_length: 1.0)),
            )
        "#;
        let spell: SpellDef = ron::from_str(ron).unwrap();
        assert_eq!(spell.flags, SpellFlags::CHANNELED | SpellFlags::BINARY);
    }

    #[test]
    fn test_unknown_spell_in_rotation_rejected() {
        let mut scenario = Scenario::fire_mage();
        scenario.rotation.priorities.push(PriorityEntry::always("Pyroblast"));
        assert!(matches!(
            scenario.validate(),
            Err(ScenarioError::Invalid(_))
        ));
    }

    #[test]
    fn test_ron_round_trip() {
        let scenario = Scenario::arcane_mage();
        let text = ron::ser::to_string_pretty(&scenario, ron::ser::PrettyConfig::default())
            .unwrap();
        let parsed = Scenario::from_ron_str(&text).unwrap();
        assert_eq!(parsed.spells, scenario.spells);
        assert_eq!(parsed.buffs, scenario.buffs);
        assert_eq!(parsed.rotation, scenario.rotation);
    }
}
