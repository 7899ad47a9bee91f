//! The cast state machine.
//!
//! ```text
//! Idle --try_cast--> Casting --complete--> Idle
//!   |                   |
//!   |                   +--interrupt--> Idle
//!   +--(instant)--> complete synchronously
//! ```
//!
//! Eligibility failures are ordinary [`CastStatus::Failed`] values and never
//! touch the ledger. The cost is paid when the cast starts, so an
//! interrupted hardcast keeps its cost spent.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::ledger::ResourceKind;
use crate::simulation::{ScheduledAction, Simulation};
use crate::spell::{SpellFlags, SpellHandle};
use crate::time;
use crate::unit::{Channel, Hardcast, UnitId};

/// Why a cast could not start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CastFailure {
    /// Mid-hardcast, channeling, or GCD locked.
    NotReady,
    /// Spell cooldown running.
    OnCooldown,
    /// Cost exceeds the caster's mana.
    InsufficientResource {
        /// Cost after multipliers.
        required: f64,
        /// Mana available.
        available: f64,
    },
    /// The spell's own predicate refused.
    ConditionNotMet,
}

/// Result of [`Simulation::try_cast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CastStatus {
    /// Resolved synchronously.
    Completed,
    /// Hardcast in flight.
    Casting {
        /// When the cast completes.
        completes_at: Duration,
    },
    /// Did not start.
    Failed(CastFailure),
}

impl CastStatus {
    /// Whether the cast started.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

impl Simulation {
    /// Mana cost of a spell for its caster, after every multiplier.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle.
    pub fn spell_cost(&self, spell: SpellHandle) -> Result<f64> {
        let spell = self.spell(spell)?;
        let pseudo = &self.unit(spell.unit)?.pseudo;
        let cost = spell.config.mana_cost
            * f64::from(spell.modifiers.cost_multiplier_pct)
            / 100.0
            * f64::from(pseudo.cost_pct(spell.config.school))
            / 100.0;
        Ok(cost.max(0.0))
    }

    /// Effective cast time of a spell for its caster.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle.
    pub fn cast_time(&self, spell: SpellHandle) -> Result<Duration> {
        let spell = self.spell(spell)?;
        let cast_speed = self.unit(spell.unit)?.pseudo.cast_speed;
        let base = spell.config.default_cast.cast_time;
        if base.is_zero() {
            return Ok(Duration::ZERO);
        }
        Ok(time::scale(
            base,
            spell.modifiers.cast_time_multiplier / cast_speed,
        ))
    }

    /// Check whether `spell` could be cast on `target` now.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for foreign handles.
    pub fn check_cast(&self, spell: SpellHandle, target: UnitId) -> Result<Option<CastFailure>> {
        self.unit(target)?;
        let handle = spell;
        let spell = self.spell(spell)?;
        let caster = self.unit(spell.unit)?;
        let uses_gcd = spell.uses_gcd();
        let has_cast_time = !spell.config.default_cast.cast_time.is_zero();

        if caster.hardcast.is_some() {
            return Ok(Some(CastFailure::NotReady));
        }
        if caster.channel.is_some() && (uses_gcd || has_cast_time) {
            return Ok(Some(CastFailure::NotReady));
        }
        if uses_gcd && !self.timer(caster.gcd)?.is_ready(self.now()) {
            return Ok(Some(CastFailure::NotReady));
        }
        if let Some(cooldown) = spell.cooldown {
            if !self.is_cooldown_ready(cooldown)? {
                return Ok(Some(CastFailure::OnCooldown));
            }
        }
        let required = self.spell_cost(handle)?;
        let available = caster.ledger.available(ResourceKind::Mana);
        if required > available {
            return Ok(Some(CastFailure::InsufficientResource {
                required,
                available,
            }));
        }
        if let Some(condition) = &spell.config.extra_cast_condition {
            if !condition(self, handle, target) {
                return Ok(Some(CastFailure::ConditionNotMet));
            }
        }
        Ok(None)
    }

    /// Attempt to cast `spell` on `target`.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for foreign handles, or any error raised while
    /// resolving an instant cast.
    pub fn try_cast(&mut self, spell: SpellHandle, target: UnitId) -> Result<CastStatus> {
        if let Some(failure) = self.check_cast(spell, target)? {
            tracing::debug!(
                action = %self.spells[spell.0].config.action_id,
                ?failure,
                now = ?self.now(),
                "Cast failed"
            );
            return Ok(CastStatus::Failed(failure));
        }

        let caster = self.spells[spell.0].unit;
        let action_id = self.spells[spell.0].config.action_id;
        let cost = self.spell_cost(spell)?;
        if cost > 0.0 && !self.spend(caster, ResourceKind::Mana, cost, action_id)? {
            return Err(SimError::invariant(format!(
                "spell {action_id}: affordable cost {cost} could not be spent"
            )));
        }
        if !self.spells[spell.0].flags().contains(SpellFlags::NO_METRICS) {
            self.units[caster.0]
                .actions
                .entry(action_id)
                .or_default()
                .casts += 1;
        }

        let cast_time = self.cast_time(spell)?;
        let now = self.now();
        if cast_time.is_zero() {
            self.complete_cast(spell, target, now)?;
            return Ok(CastStatus::Completed);
        }

        let completes_at = self.time_after(cast_time)?;
        let pending = self
            .queue
            .schedule(completes_at, ScheduledAction::CompleteCast { unit: caster })?;
        self.units[caster.0].hardcast = Some(Hardcast {
            spell,
            target,
            started_at: now,
            completes_at,
            pending,
        });
        tracing::trace!(action = %action_id, ?now, ?completes_at, "Cast started");
        Ok(CastStatus::Casting { completes_at })
    }

    pub(crate) fn finish_hardcast(&mut self, unit: UnitId) -> Result<()> {
        let Some(cast) = self.units[unit.0].hardcast.take() else {
            return Ok(());
        };
        self.complete_cast(cast.spell, cast.target, cast.started_at)?;
        let now = self.now();
        self.request_decision(unit, now)
    }

    fn complete_cast(
        &mut self,
        spell: SpellHandle,
        target: UnitId,
        started_at: Duration,
    ) -> Result<()> {
        let caster = self.spells[spell.0].unit;
        self.apply_effects(spell, target)?;

        let config = &self.spells[spell.0].config;
        let flags = config.flags;
        let gcd = config.default_cast.gcd;
        if flags.contains(SpellFlags::CHANNELED) {
            if let Some(dot) = self.spells[spell.0].dot(target) {
                if self.auras[self.dots[dot.0].aura().0].is_active() {
                    self.units[caster.0].channel = Some(Channel { spell, dot });
                }
            }
        }
        if !flags.contains(SpellFlags::NO_ON_CAST_COMPLETE) {
            self.fire_cast_complete(caster, spell)?;
        }
        if let Some(cooldown) = self.spells[spell.0].cooldown {
            self.use_cooldown(cooldown)?;
        }
        if !gcd.is_zero() {
            let gcd_timer = self.units[caster.0].gcd;
            let timer = self.timer_mut(gcd_timer)?;
            let ready_at = (started_at + gcd).max(timer.ready_at());
            timer.set(ready_at);
        }
        tracing::trace!(
            action = %self.spells[spell.0].config.action_id,
            now = ?self.now(),
            "Cast completed"
        );
        Ok(())
    }

    /// Apply a spell's effects to `target`.
    ///
    /// Runs the custom hook when set; otherwise applies the spell's dot, or
    /// rolls its base damage and delivers it (after travel time for
    /// projectiles).
    ///
    /// # Errors
    ///
    /// Any hook or scheduling error.
    pub fn apply_effects(&mut self, spell: SpellHandle, target: UnitId) -> Result<()> {
        let config = &self.spell(spell)?.config;
        if let Some(hook) = config.apply_effects.clone() {
            return hook(self, spell, target);
        }
        if config.dot.is_some() {
            let dot = self.spells[spell.0].dot(target).ok_or_else(|| {
                SimError::NotFound(format!("dot of spell #{} on unit #{}", spell.0, target.0))
            })?;
            return self.apply_dot(dot);
        }
        let Some((low, high)) = config.base_damage else {
            return Ok(());
        };
        let kind = config.outcome;
        let base = self.rng.roll(low, high);
        let result = self.calc_damage(spell, target, base, kind)?;
        self.wait_travel_time(result)
    }

    /// Deliver a resolved result after the spell's travel time.
    ///
    /// Delivery is immediate for spells without a missile speed.
    ///
    /// # Errors
    ///
    /// Any error from [`deal_damage`](Self::deal_damage) for immediate
    /// delivery.
    pub fn wait_travel_time(&mut self, result: crate::outcome::SpellResult) -> Result<()> {
        let speed = self.spells[result.spell.0].config.missile_speed;
        let distance = self.units[result.caster.0].config.distance;
        match speed {
            Some(speed) if distance > 0.0 => {
                let travel = Duration::try_from_secs_f64(distance / speed).map_err(|err| {
                    SimError::invariant(format!("invalid travel time: {err}"))
                })?;
                let due = self.time_after(travel)?;
                self.queue.schedule(due, ScheduledAction::Deliver(result))?;
                Ok(())
            }
            _ => self.deal_damage(&result),
        }
    }

    /// Stop whatever the unit is casting or channeling.
    ///
    /// A hardcast is dropped without refund. A channel ends by deactivating
    /// its dot's aura, which fires any outstanding tick first. Either way the
    /// unit's rotation is asked for a decision now. Returns `false` when the
    /// unit was idle.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for an unknown unit, or hook errors.
    pub fn interrupt(&mut self, unit: UnitId) -> Result<bool> {
        let state = self.unit_mut(unit)?;
        if let Some(cast) = state.hardcast.take() {
            self.queue.cancel(cast.pending);
            tracing::trace!(unit = unit.0, now = ?self.now(), "Cast interrupted");
        } else if let Some(channel) = state.channel.take() {
            let aura = self.dots[channel.dot.0].aura();
            self.deactivate_aura(aura)?;
            tracing::trace!(unit = unit.0, now = ?self.now(), "Channel interrupted");
        } else {
            return Ok(false);
        }
        self.request_decision(unit, self.now())?;
        Ok(true)
    }

    /// Register a spell the decision layer may fire whenever it is ready.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] while running; [`SimError::NotFound`] for foreign
    /// handles.
    pub fn add_major_cooldown(&mut self, unit: UnitId, spell: SpellHandle) -> Result<()> {
        self.ensure_setup("add_major_cooldown")?;
        self.spell(spell)?;
        let unit = self.unit_mut(unit)?;
        if !unit.major_cooldowns.contains(&spell) {
            unit.major_cooldowns.push(spell);
        }
        Ok(())
    }

    /// Cast every ready major cooldown of `unit` at `target`, in
    /// registration order. Returns how many were cast.
    ///
    /// # Errors
    ///
    /// Any error raised while casting.
    pub fn use_ready_major_cooldowns(&mut self, unit: UnitId, target: UnitId) -> Result<usize> {
        let mut used = 0;
        for spell in self.unit(unit)?.major_cooldowns.clone() {
            if self.try_cast(spell, target)?.is_success() {
                used += 1;
            }
        }
        Ok(used)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::aura::AuraConfig;
    use crate::data::{CombatStats, UnitConfig};
    use crate::dot::DotConfig;
    use crate::outcome::OutcomeKind;
    use crate::simulation::SimulationConfig;
    use crate::spell::{ActionId, CastConfig, CooldownConfig, SpellConfig, SpellSchool};
    use crate::time::ms;

    fn setup(mana: Option<f64>) -> (Simulation, UnitId, UnitId) {
        let mut sim = Simulation::new(SimulationConfig::default());
        let mage = sim
            .add_unit(UnitConfig::player(
                "Mage",
                CombatStats {
                    mana,
                    ..CombatStats::default()
                },
            ))
            .unwrap();
        let dummy = sim
            .add_unit(UnitConfig::target("Dummy", CombatStats::default()))
            .unwrap();
        (sim, mage, dummy)
    }

    fn frostbolt() -> SpellConfig {
        let mut config = SpellConfig::new(ActionId::spell(116));
        config.school = SpellSchool::Frost;
        config.default_cast = CastConfig::with_cast_time(ms(2_500));
        config.mana_cost = 260.0;
        config.base_damage = Some((400.0, 400.0));
        config.outcome = OutcomeKind::AlwaysHit;
        config
    }

    #[test]
    fn test_hardcast_completes_after_cast_time() {
        let (mut sim, mage, dummy) = setup(Some(1_000.0));
        let bolt = sim.register_spell(mage, frostbolt()).unwrap();

        let status = sim.try_cast(bolt, dummy).unwrap();
        assert_eq!(status, CastStatus::Casting { completes_at: ms(2_500) });
        assert!((sim.available(mage, ResourceKind::Mana).unwrap() - 740.0).abs() < 1e-9);
        assert_eq!(
            sim.try_cast(bolt, dummy).unwrap(),
            CastStatus::Failed(CastFailure::NotReady)
        );

        sim.run(ms(5_000)).unwrap();
        let metrics = &sim.unit(mage).unwrap().actions[&ActionId::spell(116)];
        assert_eq!(metrics.casts, 1);
        assert_eq!(metrics.hits, 1);
        // The GCD started with the cast, so nothing is left of it.
        assert!(sim.is_gcd_ready(mage).unwrap());
    }

    #[test]
    fn test_insufficient_mana_leaves_ledger_untouched() {
        let (mut sim, mage, dummy) = setup(Some(100.0));
        let bolt = sim.register_spell(mage, frostbolt()).unwrap();
        let before = sim.unit(mage).unwrap().ledger().clone();

        let status = sim.try_cast(bolt, dummy).unwrap();
        assert_eq!(
            status,
            CastStatus::Failed(CastFailure::InsufficientResource {
                required: 260.0,
                available: 100.0,
            })
        );
        assert_eq!(sim.unit(mage).unwrap().ledger(), &before);
        assert!(!sim.unit(mage).unwrap().is_casting());
    }

    #[test]
    fn test_instant_locks_gcd() {
        let (mut sim, mage, dummy) = setup(None);
        let mut config = SpellConfig::new(ActionId::spell(2_136));
        config.base_damage = Some((100.0, 100.0));
        config.outcome = OutcomeKind::AlwaysHit;
        let blast = sim.register_spell(mage, config).unwrap();

        assert_eq!(sim.try_cast(blast, dummy).unwrap(), CastStatus::Completed);
        assert_eq!(
            sim.try_cast(blast, dummy).unwrap(),
            CastStatus::Failed(CastFailure::NotReady)
        );
        sim.schedule(ms(1_500), move |sim| {
            assert!(sim.try_cast(blast, dummy)?.is_success());
            Ok(())
        })
        .unwrap();
        sim.run(ms(2_000)).unwrap();
    }

    #[test]
    fn test_cooldown_blocks_until_ready() {
        let (mut sim, mage, dummy) = setup(None);
        let mut config = SpellConfig::new(ActionId::spell(12_042));
        config.default_cast = CastConfig::off_gcd();
        config.cooldown = Some(CooldownConfig {
            duration: ms(8_000),
            shared_timer: None,
        });
        let power = sim.register_spell(mage, config).unwrap();

        assert!(sim.try_cast(power, dummy).unwrap().is_success());
        let statuses = Rc::new(RefCell::new(Vec::new()));
        for at in [7_999, 8_000] {
            let log = Rc::clone(&statuses);
            sim.schedule(ms(at), move |sim| {
                log.borrow_mut().push(sim.try_cast(power, dummy)?);
                Ok(())
            })
            .unwrap();
        }
        sim.run(ms(9_000)).unwrap();

        assert_eq!(
            *statuses.borrow(),
            vec![
                CastStatus::Failed(CastFailure::OnCooldown),
                CastStatus::Completed
            ]
        );
    }

    #[test]
    fn test_condition_checked_last() {
        let (mut sim, mage, dummy) = setup(None);
        let config = SpellConfig::new(ActionId::spell(1)).with_cast_condition(|_, _, _| false);
        let spell = sim.register_spell(mage, config).unwrap();
        assert_eq!(
            sim.try_cast(spell, dummy).unwrap(),
            CastStatus::Failed(CastFailure::ConditionNotMet)
        );
    }

    #[test]
    fn test_interrupt_drops_hardcast_without_refund() {
        let (mut sim, mage, dummy) = setup(Some(1_000.0));
        let bolt = sim.register_spell(mage, frostbolt()).unwrap();
        sim.try_cast(bolt, dummy).unwrap();
        sim.schedule(ms(1_000), move |sim| sim.interrupt(mage).map(|_| ()))
            .unwrap();
        sim.run(ms(5_000)).unwrap();

        let metrics = &sim.unit(mage).unwrap().actions[&ActionId::spell(116)];
        assert_eq!(metrics.hits, 0);
        assert!((sim.available(mage, ResourceKind::Mana).unwrap() - 740.0).abs() < 1e-9);
    }

    #[test]
    fn test_collapsed_cast_speed_is_invariant_violation() {
        let (mut sim, mage, dummy) = setup(None);
        let bolt = sim.register_spell(mage, frostbolt()).unwrap();
        sim.unit_mut(mage).unwrap().multiply_cast_speed(1e-30);
        assert_eq!(sim.cast_time(bolt).unwrap(), Duration::MAX);

        sim.schedule(ms(1_000), move |sim| sim.try_cast(bolt, dummy).map(|_| ()))
            .unwrap();
        assert!(matches!(
            sim.run(ms(5_000)),
            Err(SimError::InvariantViolation(_))
        ));
        assert!(!sim.unit(mage).unwrap().is_casting());
    }

    #[test]
    fn test_projectile_delivers_after_travel_time() {
        let (mut sim, mage, dummy) = setup(None);
        let hits = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&hits);
        sim.register_aura(
            dummy,
            AuraConfig::never_expires("Target Log").on_spell_hit_taken(move |sim, _, _| {
                log.borrow_mut().push(sim.now());
                Ok(())
            }),
        )
        .unwrap();
        let log_aura = sim.get_aura(dummy, "Target Log").unwrap();
        sim.activate_aura(log_aura).unwrap();

        let mut config = SpellConfig::new(ActionId::spell(5_143).with_tag(1));
        config.default_cast = CastConfig::off_gcd();
        config.base_damage = Some((50.0, 50.0));
        config.missile_speed = Some(20.0);
        let missile = sim.register_spell(mage, config).unwrap();

        sim.try_cast(missile, dummy).unwrap();
        assert!(hits.borrow().is_empty());
        sim.run(ms(5_000)).unwrap();
        assert_eq!(*hits.borrow(), vec![ms(1_000)]);
    }

    #[test]
    fn test_channel_keeps_unit_busy_until_dot_ends() {
        let (mut sim, mage, dummy) = setup(None);
        let mut config = SpellConfig::new(ActionId::spell(10_212));
        config.school = SpellSchool::Arcane;
        config.flags = SpellFlags::CHANNELED;
        config.dot = Some(DotConfig::new(
            AuraConfig::new("Arcane Missiles", Duration::ZERO),
            5,
            ms(1_000),
        ));
        let channel = sim.register_spell(mage, config).unwrap();

        assert_eq!(sim.try_cast(channel, dummy).unwrap(), CastStatus::Completed);
        assert!(sim.unit(mage).unwrap().is_channeling());
        sim.run(ms(4_000)).unwrap();
        assert!(sim.unit(mage).unwrap().is_channeling());
        sim.run(ms(5_000)).unwrap();
        assert!(!sim.unit(mage).unwrap().is_channeling());
    }

    #[test]
    fn test_major_cooldowns_fire_when_ready() {
        let (mut sim, mage, dummy) = setup(None);
        let mut config = SpellConfig::new(ActionId::spell(12_042));
        config.default_cast = CastConfig::off_gcd();
        config.cooldown = Some(CooldownConfig {
            duration: Duration::from_secs(180),
            shared_timer: None,
        });
        let power = sim.register_spell(mage, config).unwrap();
        sim.add_major_cooldown(mage, power).unwrap();

        assert_eq!(sim.use_ready_major_cooldowns(mage, dummy).unwrap(), 1);
        assert_eq!(sim.use_ready_major_cooldowns(mage, dummy).unwrap(), 0);
    }

    #[test]
    fn test_school_cost_multiplier() {
        let (mut sim, mage, _) = setup(Some(1_000.0));
        let bolt = sim.register_spell(mage, frostbolt()).unwrap();
        sim.unit_mut(mage).unwrap().pseudo_mut().school_cost_pct[SpellSchool::Frost.index()] -= 100;
        assert!(sim.spell_cost(bolt).unwrap().abs() < f64::EPSILON);
    }
}
