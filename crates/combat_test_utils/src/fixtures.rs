//! Test fixtures and helpers.
//!
//! Pre-built units, spells and encounters for consistent testing.

use std::time::Duration;

use combat_core::aura::AuraConfig;
use combat_core::data::{CombatStats, UnitConfig};
use combat_core::dot::DotConfig;
use combat_core::outcome::OutcomeKind;
use combat_core::rotation::Decision;
use combat_core::simulation::{Simulation, SimulationConfig};
use combat_core::spell::{ActionId, CastConfig, SpellConfig, SpellFlags, SpellSchool};
use combat_core::unit::UnitId;

/// Spell id of [`fireball`].
pub const FIREBALL: ActionId = ActionId::spell(25_306);
/// Spell id of [`arcane_missiles`].
pub const ARCANE_MISSILES: ActionId = ActionId::spell(25_345);
/// Spell id of [`fire_blast`].
pub const FIRE_BLAST: ActionId = ActionId::spell(10_199);

/// A level 60 caster with a large mana pool.
#[must_use]
pub fn mage_stats() -> CombatStats {
    CombatStats {
        level: 60,
        spell_power: 600.0,
        spell_hit: 0.06,
        spell_crit: 0.15,
        mana: Some(8_000.0),
        mp5: 40.0,
        ..CombatStats::default()
    }
}

/// A level 63 target with no resistances.
#[must_use]
pub fn boss_stats() -> CombatStats {
    CombatStats {
        level: 63,
        ..CombatStats::default()
    }
}

/// 3.5 s fire hardcast.
#[must_use]
pub fn fireball() -> SpellConfig {
    let mut config = SpellConfig::new(FIREBALL);
    config.school = SpellSchool::Fire;
    config.default_cast = CastConfig::with_cast_time(Duration::from_millis(3_500));
    config.mana_cost = 410.0;
    config.bonus_coefficient = 1.0;
    config.base_damage = Some((596.0, 760.0));
    config
}

/// Instant fire spell on an 8 s cooldown.
#[must_use]
pub fn fire_blast() -> SpellConfig {
    let mut config = SpellConfig::new(FIRE_BLAST);
    config.school = SpellSchool::Fire;
    config.mana_cost = 340.0;
    config.bonus_coefficient = 0.43;
    config.base_damage = Some((446.0, 524.0));
    config.cooldown = Some(combat_core::spell::CooldownConfig {
        duration: Duration::from_secs(8),
        shared_timer: None,
    });
    config
}

/// Five 1 s ticks channeled; every tick always lands.
#[must_use]
pub fn arcane_missiles() -> SpellConfig {
    let mut config = SpellConfig::new(ARCANE_MISSILES);
    config.school = SpellSchool::Arcane;
    config.flags = SpellFlags::CHANNELED;
    config.mana_cost = 655.0;
    config.bonus_coefficient = 0.24;
    config.base_damage = Some((230.0, 230.0));
    config.outcome = OutcomeKind::AlwaysHit;
    config.dot = Some(DotConfig::new(
        AuraConfig::new("Arcane Missiles", Duration::ZERO),
        5,
        Duration::from_secs(1),
    ));
    config
}

/// An encounter of one caster and one target, without a rotation.
///
/// # Panics
///
/// Panics if the fixture content is rejected.
#[must_use]
pub fn duel(config: SimulationConfig) -> (Simulation, UnitId, UnitId) {
    let mut sim = Simulation::new(config);
    let mage = sim
        .add_unit(UnitConfig::player("Mage", mage_stats()))
        .expect("fixture caster");
    let boss = sim
        .add_unit(UnitConfig::target("Boss", boss_stats()))
        .expect("fixture target");
    (sim, mage, boss)
}

/// A caster spamming [`fireball`] at a target, weaving [`fire_blast`] when ready.
///
/// # Panics
///
/// Panics if the fixture content is rejected.
#[must_use]
pub fn fire_mage(config: SimulationConfig) -> Simulation {
    let (mut sim, mage, boss) = duel(config);
    let fireball = sim.register_spell(mage, fireball()).expect("fireball");
    let fire_blast = sim.register_spell(mage, fire_blast()).expect("fire blast");
    sim.set_rotation(mage, move |sim: &mut Simulation, unit: UnitId| {
        if sim.is_gcd_ready(unit)? && sim.try_cast(fire_blast, boss)?.is_success() {
            return Ok(Decision::Continue);
        }
        sim.try_cast(fireball, boss)?;
        Ok(Decision::Continue)
    })
    .expect("rotation");
    sim
}

/// A fixed-length configuration with the given seed.
#[must_use]
pub fn short_config(seconds: u64, base_seed: u64) -> SimulationConfig {
    SimulationConfig {
        duration: Duration::from_secs(seconds),
        base_seed,
        iterations: 1,
        ..SimulationConfig::default()
    }
}
