//! Outcome rolls and damage resolution.
//!
//! An attempt is first classified against the target's avoidance table
//! (hit, miss, dodge or resist), then independently rolled for a crit.
//! Magic damage that lands is reduced by the target's average partial
//! resistance, capped at 75%. Binary spells instead convert that average
//! into an extra chance to be fully resisted.
//!
//! Every draw goes through the simulation's [`RngEngine`](crate::rng::RngEngine)
//! in a fixed order, so the same seed reproduces the same outcomes.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::ledger::ResourceKind;
use crate::simulation::Simulation;
use crate::spell::{DefenseType, SpellFlags, SpellHandle, SpellSchool};
use crate::unit::UnitId;

/// Average partial resistance never exceeds this fraction.
pub const RESISTANCE_CAP: f64 = 0.75;

/// Magic miss chance never drops below this.
pub const MIN_SPELL_MISS: f64 = 0.01;

/// Which rolls an attempt makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutcomeKind {
    /// Spell hit table, then crit.
    #[default]
    MagicHitAndCrit,
    /// Spell hit table only.
    MagicHit,
    /// Always lands; crit roll only.
    MagicCrit,
    /// Melee/ranged miss and dodge, then crit.
    PhysicalHitAndCrit,
    /// Always lands, never crits.
    AlwaysHit,
    /// Expected value of `MagicHitAndCrit` without drawing.
    ExpectedMagicHitAndCrit,
}

impl OutcomeKind {
    /// Whether this kind rolls the avoidance table.
    #[must_use]
    pub const fn rolls_hit(self) -> bool {
        matches!(
            self,
            Self::MagicHitAndCrit | Self::MagicHit | Self::PhysicalHitAndCrit
        )
    }

    /// Whether this kind rolls for a crit.
    #[must_use]
    pub const fn rolls_crit(self) -> bool {
        matches!(
            self,
            Self::MagicHitAndCrit | Self::MagicCrit | Self::PhysicalHitAndCrit
        )
    }
}

/// Classification of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    /// Landed.
    Hit,
    /// Missed a physical attack.
    Miss,
    /// Dodged.
    Dodge,
    /// Fully resisted (includes magic misses).
    Resist,
}

/// Resolved result of one damage attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpellResult {
    /// Spell that produced it.
    pub spell: SpellHandle,
    /// Attacking unit.
    pub caster: UnitId,
    /// Unit hit.
    pub target: UnitId,
    /// Avoidance classification.
    pub outcome: Outcome,
    /// Whether the crit roll succeeded.
    pub crit: bool,
    /// Final damage.
    pub damage: f64,
    /// Fraction removed by partial resistance.
    pub resisted_fraction: f64,
}

impl SpellResult {
    /// Whether the attempt landed.
    #[must_use]
    pub fn landed(&self) -> bool {
        self.outcome == Outcome::Hit
    }
}

/// Chance for a spell to miss a target `level_diff` levels above the caster.
///
/// 4% against equal or lower level, 5% and 6% at +1 and +2, 17% at +3 and
/// 11% more per further level, reduced by hit and floored at 1%.
#[must_use]
pub fn spell_miss_chance(level_diff: i32, spell_hit: f64) -> f64 {
    let base = match level_diff {
        i32::MIN..=0 => 0.04,
        1 => 0.05,
        2 => 0.06,
        diff => 0.17 + 0.11 * f64::from(diff - 3),
    };
    (base - spell_hit).clamp(MIN_SPELL_MISS, 1.0)
}

/// Chance for a melee or ranged attack to miss.
#[must_use]
pub fn physical_miss_chance(level_diff: i32, physical_hit: f64) -> f64 {
    (0.05 + 0.01 * f64::from(level_diff) - physical_hit).clamp(0.0, 1.0)
}

/// Average fraction of magic damage resisted.
#[must_use]
pub fn average_resistance(resistance: f64, caster_level: u32) -> f64 {
    if resistance <= 0.0 {
        return 0.0;
    }
    let ceiling = f64::from(caster_level.max(1) * 5);
    (resistance / ceiling).min(1.0) * RESISTANCE_CAP
}

#[allow(clippy::cast_possible_wrap)]
fn level_diff(caster: u32, target: u32) -> i32 {
    target as i32 - caster as i32
}

struct Table {
    school: SpellSchool,
    defense: DefenseType,
    binary: bool,
    ignore_resistances: bool,
    crit_multiplier: f64,
    raw_damage: f64,
    miss: f64,
    dodge: f64,
    crit: f64,
    resist: f64,
}

impl Simulation {
    fn attack_table(&self, spell: SpellHandle, target: UnitId, base_damage: f64) -> Result<Table> {
        let spell = self.spell(spell)?;
        let config = &spell.config;
        let caster = self.unit(spell.unit)?;
        let defender = self.unit(target)?;
        let diff = level_diff(caster.stats.level, defender.stats.level);

        let raw_damage = (base_damage
            + config.bonus_coefficient * caster.stats.spell_power_for(config.school))
            * config.damage_multiplier
            * (1.0 + spell.modifiers.damage_additive)
            * caster.pseudo.damage_dealt_multiplier;

        let (miss, dodge, base_crit) = match config.defense_type {
            DefenseType::None => (0.0, 0.0, caster.stats.spell_crit),
            DefenseType::Magic => (
                spell_miss_chance(diff, caster.stats.spell_hit),
                0.0,
                caster.stats.spell_crit,
            ),
            DefenseType::Melee | DefenseType::Ranged => (
                physical_miss_chance(diff, caster.stats.physical_hit),
                defender.stats.dodge.max(0.0),
                caster.stats.physical_crit,
            ),
        };
        let ignore_resistances = config.flags.contains(SpellFlags::IGNORE_RESISTANCES)
            || config.school == SpellSchool::Physical;
        let resist = if ignore_resistances {
            0.0
        } else {
            average_resistance(defender.stats.resistance(config.school), caster.stats.level)
        };

        Ok(Table {
            school: config.school,
            defense: config.defense_type,
            binary: config.flags.contains(SpellFlags::BINARY),
            ignore_resistances,
            crit_multiplier: config.effective_crit_multiplier(),
            raw_damage,
            miss,
            dodge,
            crit: (base_crit + config.bonus_crit_chance + spell.modifiers.bonus_crit_chance)
                .clamp(0.0, 1.0),
            resist,
        })
    }

    /// Roll the outcome of `base_damage` from `spell` against `target`.
    ///
    /// Draws, in order: avoidance, binary resist, crit. Kinds that skip a
    /// roll do not consume its draw.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`](crate::error::SimError::NotFound) for foreign
    /// handles.
    pub fn calc_damage(
        &mut self,
        spell: SpellHandle,
        target: UnitId,
        base_damage: f64,
        kind: OutcomeKind,
    ) -> Result<SpellResult> {
        let table = self.attack_table(spell, target, base_damage)?;
        let caster = self.spells[spell.0].unit;
        let mut result = SpellResult {
            spell,
            caster,
            target,
            outcome: Outcome::Hit,
            crit: false,
            damage: 0.0,
            resisted_fraction: 0.0,
        };

        if kind == OutcomeKind::ExpectedMagicHitAndCrit {
            let land = if table.binary {
                (1.0 - table.miss) * (1.0 - table.resist)
            } else {
                1.0 - table.miss
            };
            let crit_factor = 1.0 + table.crit * (table.crit_multiplier - 1.0);
            let partial = if table.binary { 0.0 } else { table.resist };
            result.damage = table.raw_damage * land * crit_factor * (1.0 - partial);
            result.resisted_fraction = partial;
            return Ok(result);
        }

        if kind.rolls_hit() && table.defense != DefenseType::None {
            let roll = self.rng.rand_f64();
            if roll < table.miss {
                result.outcome = if table.defense.is_physical() {
                    Outcome::Miss
                } else {
                    Outcome::Resist
                };
            } else if roll < table.miss + table.dodge {
                result.outcome = Outcome::Dodge;
            } else if table.binary
                && !table.ignore_resistances
                && table.resist > 0.0
                && self.rng.rand_f64() < table.resist
            {
                result.outcome = Outcome::Resist;
            }
        }
        if !result.landed() {
            return Ok(result);
        }

        if kind.rolls_crit() && table.crit > 0.0 {
            result.crit = self.rng.rand_f64() < table.crit;
        }

        let mut damage = table.raw_damage;
        if result.crit {
            damage *= table.crit_multiplier;
        }
        if !table.binary && table.school != SpellSchool::Physical {
            result.resisted_fraction = table.resist;
            damage *= 1.0 - table.resist;
        }
        result.damage = damage.max(0.0);
        Ok(result)
    }

    /// Apply a resolved result: record metrics, reduce the target's health
    /// and fire hit hooks (dealt on the caster, then taken on the target).
    ///
    /// # Errors
    ///
    /// Any hook error.
    pub fn deal_damage(&mut self, result: &SpellResult) -> Result<()> {
        let config = &self.spells[result.spell.0].config;
        let action_id = config.action_id;
        if !config.flags.contains(SpellFlags::NO_METRICS) {
            self.units[result.caster.0]
                .actions
                .entry(action_id)
                .or_default()
                .record(result);
        }
        if result.damage > 0.0 {
            self.spend_forced(result.target, ResourceKind::Health, result.damage, action_id)?;
        }
        tracing::trace!(
            action = %action_id,
            outcome = ?result.outcome,
            crit = result.crit,
            damage = result.damage,
            now = ?self.now(),
            "Damage dealt"
        );
        self.fire_spell_hit(result)
    }

    /// Roll and deal in one step.
    ///
    /// # Errors
    ///
    /// Any error from [`calc_damage`](Self::calc_damage) or
    /// [`deal_damage`](Self::deal_damage).
    pub fn calc_and_deal_damage(
        &mut self,
        spell: SpellHandle,
        target: UnitId,
        base_damage: f64,
        kind: OutcomeKind,
    ) -> Result<SpellResult> {
        let result = self.calc_damage(spell, target, base_damage, kind)?;
        self.deal_damage(&result)?;
        Ok(result)
    }

    /// Expected damage of one cast (or tick) of `spell` on `target`.
    ///
    /// Uses the spell's expected-damage hook when set; otherwise the mean of
    /// its base damage range under [`OutcomeKind::ExpectedMagicHitAndCrit`].
    /// Never draws from the random source.
    ///
    /// # Errors
    ///
    /// Hook errors, or [`SimError::NotFound`](crate::error::SimError::NotFound)
    /// for foreign handles.
    pub fn expected_damage(&mut self, spell: SpellHandle, target: UnitId) -> Result<f64> {
        let config = &self.spell(spell)?.config;
        if let Some(hook) = config.expected_tick_damage.clone() {
            return hook(self, spell, target);
        }
        let Some((low, high)) = config.base_damage else {
            return Ok(0.0);
        };
        let result = self.calc_damage(
            spell,
            target,
            (low + high) / 2.0,
            OutcomeKind::ExpectedMagicHitAndCrit,
        )?;
        Ok(result.damage)
    }
}
