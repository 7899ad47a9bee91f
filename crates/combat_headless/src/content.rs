//! Builds a [`Simulation`] from a [`Scenario`].
//!
//! Registration order is fixed so that two builds of the same scenario are
//! identical: units, buffs, spells, then the trigger auras that grant buffs.

use std::collections::BTreeMap;
use std::time::Duration;

use combat_core::aura::{AuraConfig, AuraHandle};
use combat_core::dot::DotConfig;
use combat_core::error::Result as SimResult;
use combat_core::simulation::Simulation;
use combat_core::spell::{ActionId, CastConfig, CooldownConfig, SpellConfig, SpellHandle};
use combat_core::unit::UnitId;
use tracing::debug;

use crate::rotation::{PriorityRotation, RotationStep, StepCondition};
use crate::scenario::{BuffDef, BuffEffect, BuffTrigger, Condition, Scenario, ScenarioError, SpellDef};

/// A built encounter and the handles content was registered under.
#[derive(Debug)]
pub struct Encounter {
    /// Ready-to-run simulation.
    pub sim: Simulation,
    /// The acting unit.
    pub caster: UnitId,
    /// Enemy units in scenario order.
    pub targets: Vec<UnitId>,
    /// Spells by name.
    pub spells: BTreeMap<String, SpellHandle>,
    /// Buffs by name.
    pub buffs: BTreeMap<String, AuraHandle>,
}

/// Build a runnable simulation from a scenario.
pub fn build_simulation(scenario: &Scenario) -> Result<Simulation, ScenarioError> {
    build_encounter(scenario).map(|encounter| encounter.sim)
}

/// Build a scenario, keeping the handles for inspection.
pub fn build_encounter(scenario: &Scenario) -> Result<Encounter, ScenarioError> {
    scenario.validate()?;

    let mut sim = Simulation::new(scenario.simulation.clone());
    let caster = sim.add_unit(scenario.caster.clone())?;
    let targets = scenario
        .targets
        .iter()
        .map(|target| sim.add_unit(target.clone()))
        .collect::<SimResult<Vec<_>>>()?;
    let target = targets[0];

    let mut buffs = BTreeMap::new();
    for def in &scenario.buffs {
        let aura = register_buff(&mut sim, caster, def)?;
        buffs.insert(def.name.clone(), aura);
    }

    let mut spells = BTreeMap::new();
    for def in &scenario.spells {
        let handle = sim.register_spell(caster, spell_config(def, &buffs)?)?;
        if def.major_cooldown {
            sim.add_major_cooldown(caster, handle)?;
        }
        spells.insert(def.name.clone(), handle);
    }

    for def in &scenario.buffs {
        register_trigger(&mut sim, caster, def, buffs[&def.name], &spells)?;
    }

    let steps = scenario
        .rotation
        .priorities
        .iter()
        .map(|entry| RotationStep {
            spell: spells[&entry.spell],
            condition: match &entry.condition {
                Condition::Always => StepCondition::Always,
                Condition::BuffActive(name) => StepCondition::BuffActive(buffs[name]),
                Condition::BuffInactive(name) => StepCondition::BuffInactive(buffs[name]),
                Condition::DotInactive => StepCondition::DotInactive,
                Condition::ManaAbove(fraction) => StepCondition::ManaAbove(*fraction),
            },
        })
        .collect();
    sim.set_rotation(
        caster,
        PriorityRotation::new(target, scenario.rotation.use_major_cooldowns, steps),
    )?;

    debug!(
        scenario = %scenario.name,
        spells = spells.len(),
        buffs = buffs.len(),
        targets = targets.len(),
        "Built encounter"
    );

    Ok(Encounter {
        sim,
        caster,
        targets,
        spells,
        buffs,
    })
}

fn spell_config(
    def: &SpellDef,
    buffs: &BTreeMap<String, AuraHandle>,
) -> Result<SpellConfig, ScenarioError> {
    let mut config = SpellConfig::new(ActionId::spell(def.id));
    config.school = def.school;
    config.flags = def.flags;
    config.default_cast = CastConfig {
        cast_time: def.cast_time,
        gcd: def.gcd,
    };
    config.cooldown = def.cooldown.map(|duration| CooldownConfig {
        duration,
        shared_timer: None,
    });
    config.mana_cost = def.mana_cost;
    config.base_damage = def.base_damage;
    config.bonus_coefficient = def.bonus_coefficient;
    config.damage_multiplier = def.damage_multiplier;
    config.crit_multiplier = def.crit_multiplier;
    config.missile_speed = def.missile_speed;
    config.outcome = def.outcome;
    config.dot = def.dot.map(|dot| {
        let dot_config = DotConfig::new(
            AuraConfig::new(def.name.clone(), Duration::ZERO),
            dot.ticks,
            dot.tick_length,
        );
        if dot.affected_by_cast_speed {
            dot_config.affected_by_cast_speed()
        } else {
            dot_config
        }
    });

    if let Some(name) = &def.applies_buff {
        let aura = *buffs
            .get(name)
            .ok_or_else(|| ScenarioError::Invalid(format!("unknown buff '{name}'")))?;
        let damage = def.base_damage;
        let outcome = def.outcome;
        config = config.with_apply_effects(move |sim, spell, target| {
            trigger_buff(sim, aura)?;
            if let Some((low, high)) = damage {
                let base = sim.roll(low, high);
                let result = sim.calc_damage(spell, target, base, outcome)?;
                sim.wait_travel_time(result)?;
            }
            Ok(())
        });
    }
    Ok(config)
}

fn register_buff(sim: &mut Simulation, caster: UnitId, def: &BuffDef) -> SimResult<AuraHandle> {
    let effect = def.effect;
    let mut config = match def.duration {
        Some(duration) => AuraConfig::new(def.name.clone(), duration),
        None => AuraConfig::never_expires(def.name.clone()),
    }
    .with_max_stacks(def.max_stacks)
    .with_initial_stacks(0)
    .on_gain(|sim, aura| sim.add_stack(aura).map(|_| ()))
    .on_stacks_change(move |sim, aura, old, new| apply_effect(sim, aura, effect, old, new));

    if def.consume_on_cast {
        config = config.on_cast_complete(|sim, aura, _| {
            if !sim.gained_this_instant(aura)? {
                sim.deactivate_aura(aura)?;
            }
            Ok(())
        });
    }
    if let Some(icd) = def.icd {
        sim.register_proc_icd(def.name.clone(), icd)?;
    }
    sim.register_aura(caster, config)
}

fn register_trigger(
    sim: &mut Simulation,
    caster: UnitId,
    def: &BuffDef,
    buff: AuraHandle,
    spells: &BTreeMap<String, SpellHandle>,
) -> Result<(), ScenarioError> {
    let lookup = |name: &Option<String>| -> Result<Option<SpellHandle>, ScenarioError> {
        name.as_ref()
            .map(|name| {
                spells
                    .get(name)
                    .copied()
                    .ok_or_else(|| ScenarioError::Invalid(format!("unknown spell '{name}'")))
            })
            .transpose()
    };
    let key = def.name.clone();
    let chance = def.proc_chance;
    let label = format!("{} Trigger", def.name);

    let config = match &def.trigger {
        BuffTrigger::OnUse => return Ok(()),
        BuffTrigger::OnCastComplete { spell } => {
            let only = lookup(spell)?;
            AuraConfig::never_expires(label).on_cast_complete(move |sim, _, cast| {
                if only.map_or(true, |only| only == cast) && sim.proc(chance, &key) {
                    trigger_buff(sim, buff)?;
                }
                Ok(())
            })
        }
        BuffTrigger::OnSpellHit { spell, crit_only } => {
            let only = lookup(spell)?;
            let crit_only = *crit_only;
            AuraConfig::never_expires(label).on_spell_hit_dealt(move |sim, _, result| {
                let matches = result.landed()
                    && only.map_or(true, |only| only == result.spell)
                    && (!crit_only || result.crit);
                if matches && sim.proc(chance, &key) {
                    trigger_buff(sim, buff)?;
                }
                Ok(())
            })
        }
    };
    sim.register_aura(caster, config.on_reset(|sim, aura| sim.activate_aura(aura)))?;
    Ok(())
}

/// Activate a buff, or refresh it and add a stack when already active.
fn trigger_buff(sim: &mut Simulation, aura: AuraHandle) -> SimResult<()> {
    let was_active = sim.aura(aura)?.is_active();
    sim.activate_aura(aura)?;
    if was_active {
        sim.add_stack(aura)?;
    }
    Ok(())
}

fn apply_effect(
    sim: &mut Simulation,
    aura: AuraHandle,
    effect: BuffEffect,
    old: u32,
    new: u32,
) -> SimResult<()> {
    let delta = i64::from(new) - i64::from(old);
    let unit = sim.aura(aura)?.unit();
    let unit = sim.unit_mut(unit)?;
    match effect {
        BuffEffect::SpellPower(amount) => unit.stats_mut().spell_power += amount * delta as f64,
        BuffEffect::CritChance(amount) => unit.stats_mut().spell_crit += amount * delta as f64,
        BuffEffect::CastSpeed(factor) => unit.multiply_cast_speed(factor.powi(delta as i32)),
        BuffEffect::DamageMultiplier(factor) => {
            unit.pseudo_mut().damage_dealt_multiplier *= factor.powi(delta as i32);
        }
        BuffEffect::NextCastFree => {
            for pct in &mut unit.pseudo_mut().school_cost_pct {
                *pct -= 100 * delta as i32;
            }
        }
    }
    Ok(())
}
