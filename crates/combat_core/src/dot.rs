//! Damage-over-time effects riding on auras.
//!
//! Every dot-bearing spell gets one [`Dot`] per unit, each backed by an aura
//! registered on that unit. Applying the dot activates the aura for
//! `number_of_ticks * tick_length` and schedules ticks one at a time.
//!
//! The aura's expiry and the final tick share a due time, and the expiry is
//! always scheduled first. Deactivation therefore fires the outstanding tick
//! synchronously while the aura is still active, before stacks are torn down
//! and before `on_expire` runs. The same catch-up applies to early removal
//! once part of an interval has elapsed; removal in the instant of a tick
//! (or of the application) adds nothing.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::aura::{AuraConfig, AuraHandle};
use crate::error::{Result, SimError};
use crate::queue::PendingActionHandle;
use crate::simulation::{ScheduledAction, Simulation};
use crate::spell::{ActionId, SpellHandle};
use crate::time;
use crate::unit::UnitId;

/// Handle to a (spell, target) dot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DotHandle(pub(crate) usize);

/// Tick handler.
pub type DotTickFn = Rc<dyn Fn(&mut Simulation, DotHandle) -> Result<()>>;

/// Periodic effect template carried by a spell.
#[derive(Clone)]
pub struct DotConfig {
    /// Aura registered on each target; its duration is replaced at apply.
    pub aura: AuraConfig,
    /// Ticks per application.
    pub number_of_ticks: u32,
    /// Base time between ticks.
    pub tick_length: Option<Duration>,
    /// Whether the caster's cast speed shortens the cadence.
    pub affected_by_cast_speed: bool,
    /// Tick handler; `None` deals the spell's base damage per tick.
    pub on_tick: Option<DotTickFn>,
}

impl DotConfig {
    /// Dot of `number_of_ticks` ticks every `tick_length`.
    #[must_use]
    pub fn new(aura: AuraConfig, number_of_ticks: u32, tick_length: Duration) -> Self {
        Self {
            aura,
            number_of_ticks,
            tick_length: Some(tick_length),
            affected_by_cast_speed: false,
            on_tick: None,
        }
    }

    /// Divide the cadence by the caster's cast speed at application.
    #[must_use]
    pub fn affected_by_cast_speed(mut self) -> Self {
        self.affected_by_cast_speed = true;
        self
    }

    /// Set the tick handler.
    #[must_use]
    pub fn with_on_tick(
        mut self,
        hook: impl Fn(&mut Simulation, DotHandle) -> Result<()> + 'static,
    ) -> Self {
        self.on_tick = Some(Rc::new(hook));
        self
    }

    pub(crate) fn validate(&self, action_id: ActionId) -> Result<()> {
        match self.tick_length {
            None => Err(SimError::setup(format!(
                "spell {action_id}: dot has no tick length"
            ))),
            Some(length) if length.is_zero() => Err(SimError::setup(format!(
                "spell {action_id}: dot tick length must be positive"
            ))),
            Some(_) if self.number_of_ticks == 0 => Err(SimError::setup(format!(
                "spell {action_id}: dot must tick at least once"
            ))),
            Some(_) => Ok(()),
        }
    }
}

impl fmt::Debug for DotConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DotConfig")
            .field("aura", &self.aura)
            .field("number_of_ticks", &self.number_of_ticks)
            .field("tick_length", &self.tick_length)
            .field("affected_by_cast_speed", &self.affected_by_cast_speed)
            .finish_non_exhaustive()
    }
}

/// A dot bound to one spell and one target.
pub struct Dot {
    spell: SpellHandle,
    caster: UnitId,
    target: UnitId,
    aura: AuraHandle,
    number_of_ticks: u32,
    base_tick_length: Duration,
    affected_by_cast_speed: bool,
    on_tick: Option<DotTickFn>,
    tick_length: Duration,
    tick_count: u32,
    last_tick_at: Duration,
    next_tick: Option<PendingActionHandle>,
}

impl Dot {
    /// Spell that applies this dot.
    #[must_use]
    pub const fn spell(&self) -> SpellHandle {
        self.spell
    }

    /// Casting unit.
    #[must_use]
    pub const fn caster(&self) -> UnitId {
        self.caster
    }

    /// Unit the dot ticks on.
    #[must_use]
    pub const fn target(&self) -> UnitId {
        self.target
    }

    /// Backing aura on the target.
    #[must_use]
    pub const fn aura(&self) -> AuraHandle {
        self.aura
    }

    /// Ticks per application.
    #[must_use]
    pub const fn number_of_ticks(&self) -> u32 {
        self.number_of_ticks
    }

    /// Ticks fired in the current application.
    #[must_use]
    pub const fn tick_count(&self) -> u32 {
        self.tick_count
    }

    /// Cadence fixed at the last application.
    #[must_use]
    pub const fn tick_length(&self) -> Duration {
        self.tick_length
    }

    /// Whether the tick being processed is the last one.
    #[must_use]
    pub const fn is_final_tick(&self) -> bool {
        self.tick_count == self.number_of_ticks
    }
}

impl fmt::Debug for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dot")
            .field("spell", &self.spell)
            .field("target", &self.target)
            .field("tick_count", &self.tick_count)
            .field("number_of_ticks", &self.number_of_ticks)
            .field("tick_length", &self.tick_length)
            .finish_non_exhaustive()
    }
}

impl Simulation {
    pub(crate) fn create_dot(&mut self, spell: SpellHandle, target: UnitId) -> Result<()> {
        let (caster, config) = {
            let spell = self.spell(spell)?;
            match &spell.config.dot {
                Some(config) => (spell.unit, config.clone()),
                None => return Ok(()),
            }
        };
        let base_tick_length = config
            .tick_length
            .ok_or_else(|| SimError::setup("dot has no tick length"))?;

        let aura = self.register_aura(target, config.aura)?;
        let handle = DotHandle(self.dots.len());
        self.auras[aura.0].dot = Some(handle);
        self.dots.push(Dot {
            spell,
            caster,
            target,
            aura,
            number_of_ticks: config.number_of_ticks,
            base_tick_length,
            affected_by_cast_speed: config.affected_by_cast_speed,
            on_tick: config.on_tick,
            tick_length: base_tick_length,
            tick_count: 0,
            last_tick_at: Duration::ZERO,
            next_tick: None,
        });

        let dots = &mut self.spells[spell.0].dots;
        if dots.len() <= target.0 {
            dots.resize(target.0 + 1, None);
        }
        dots[target.0] = Some(handle);
        Ok(())
    }

    /// Dot by handle.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a handle from another simulation.
    pub fn dot(&self, handle: DotHandle) -> Result<&Dot> {
        self.dots
            .get(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("dot #{}", handle.0)))
    }

    /// Apply (or reapply) a dot.
    ///
    /// Reapplying an active dot restarts its tick sequence without a
    /// catch-up tick and refreshes the aura.
    ///
    /// # Errors
    ///
    /// [`SimError::InvariantViolation`] if the caster's cast speed collapses
    /// the cadence to zero, or any hook error.
    pub fn apply_dot(&mut self, handle: DotHandle) -> Result<()> {
        let dot = self.dot(handle)?;
        let tick_length = if dot.affected_by_cast_speed {
            let cast_speed = self.units[dot.caster.0].pseudo.cast_speed;
            time::scale(dot.base_tick_length, 1.0 / cast_speed)
        } else {
            dot.base_tick_length
        };
        if tick_length.is_zero() {
            return Err(SimError::invariant(format!(
                "dot #{}: tick length scaled to zero",
                handle.0
            )));
        }
        let aura = dot.aura;
        let duration = tick_length * dot.number_of_ticks;

        let now = self.now();
        let dot = &mut self.dots[handle.0];
        let pending = dot.next_tick.take();
        dot.tick_count = 0;
        dot.last_tick_at = now;
        dot.tick_length = tick_length;
        if let Some(pending) = pending {
            self.queue.cancel(pending);
        }

        self.activate_aura_for(aura, Some(duration))?;
        if self.auras[aura.0].is_active() && self.dots[handle.0].next_tick.is_none() {
            self.schedule_dot_tick(handle)?;
        }
        Ok(())
    }

    fn schedule_dot_tick(&mut self, handle: DotHandle) -> Result<()> {
        let due = self.time_after(self.dots[handle.0].tick_length)?;
        let pending = self.queue.schedule(due, ScheduledAction::TickDot(handle))?;
        self.dots[handle.0].next_tick = Some(pending);
        Ok(())
    }

    pub(crate) fn fire_dot_tick(&mut self, handle: DotHandle) -> Result<()> {
        self.dots[handle.0].next_tick = None;
        self.tick_dot(handle, true)
    }

    fn tick_dot(&mut self, handle: DotHandle, reschedule: bool) -> Result<()> {
        let dot = &mut self.dots[handle.0];
        if dot.tick_count >= dot.number_of_ticks {
            return Err(SimError::invariant(format!(
                "dot #{}: tick {} exceeds {} ticks",
                handle.0,
                dot.tick_count + 1,
                dot.number_of_ticks
            )));
        }
        dot.tick_count += 1;
        dot.last_tick_at = self.queue.now();
        let (spell, target, on_tick) = (dot.spell, dot.target, dot.on_tick.clone());
        tracing::trace!(
            dot = handle.0,
            tick = dot.tick_count,
            of = dot.number_of_ticks,
            now = ?self.queue.now(),
            "Dot tick"
        );

        match on_tick {
            Some(on_tick) => on_tick(self, handle)?,
            None => self.deal_tick_damage(spell, target)?,
        }

        let dot = &self.dots[handle.0];
        if reschedule
            && dot.tick_count < dot.number_of_ticks
            && dot.next_tick.is_none()
            && self.auras[dot.aura.0].is_active()
        {
            self.schedule_dot_tick(handle)?;
        }
        Ok(())
    }

    fn deal_tick_damage(&mut self, spell: SpellHandle, target: UnitId) -> Result<()> {
        let config = &self.spells[spell.0].config;
        let Some((low, high)) = config.base_damage else {
            return Ok(());
        };
        let kind = config.outcome;
        let base = self.rng.roll(low, high);
        let result = self.calc_damage(spell, target, base, kind)?;
        self.deal_damage(&result)
    }

    /// Fire the outstanding tick of a deactivating dot, if any remain and
    /// time has passed since the last tick.
    pub(crate) fn catch_up_dot(&mut self, handle: DotHandle) -> Result<()> {
        let now = self.queue.now();
        let dot = &mut self.dots[handle.0];
        let pending = dot.next_tick.take();
        let behind = dot.tick_count < dot.number_of_ticks && now > dot.last_tick_at;
        if let Some(pending) = pending {
            self.queue.cancel(pending);
        }
        if behind {
            self.tick_dot(handle, false)?;
        }
        Ok(())
    }

    /// Final teardown once the dot's aura is inactive.
    pub(crate) fn finish_dot(&mut self, handle: DotHandle) -> Result<()> {
        if let Some(pending) = self.dots[handle.0].next_tick.take() {
            self.queue.cancel(pending);
        }
        let caster = self.dots[handle.0].caster;
        let channeling_this = self.units[caster.0]
            .channel
            .is_some_and(|channel| channel.dot == handle);
        if channeling_this {
            self.units[caster.0].channel = None;
            tracing::trace!(unit = caster.0, now = ?self.now(), "Channel ended");
            self.request_decision(caster, self.now())?;
        }
        Ok(())
    }

    pub(crate) fn reset_dots(&mut self) {
        for dot in &mut self.dots {
            dot.tick_count = 0;
            dot.last_tick_at = Duration::ZERO;
            dot.next_tick = None;
            dot.tick_length = dot.base_tick_length;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use proptest::prelude::*;

    use super::*;
    use crate::data::{CombatStats, UnitConfig};
    use crate::simulation::SimulationConfig;
    use crate::spell::SpellConfig;
    use crate::time::ms;

    struct Fixture {
        sim: Simulation,
        caster: UnitId,
        target: UnitId,
        spell: SpellHandle,
        ticks: Rc<RefCell<Vec<(Duration, u32)>>>,
    }

    fn fixture(ticks: u32, tick_length: Duration) -> Fixture {
        let mut sim = Simulation::new(SimulationConfig::default());
        let caster = sim
            .add_unit(UnitConfig::player("Warlock", CombatStats::default()))
            .unwrap();
        let target = sim
            .add_unit(UnitConfig::target("Dummy", CombatStats::default()))
            .unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let tick_log = Rc::clone(&log);
        let mut config = SpellConfig::new(ActionId::spell(172));
        config.dot = Some(
            DotConfig::new(
                AuraConfig::new("Corruption", Duration::ZERO),
                ticks,
                tick_length,
            )
            .with_on_tick(move |sim, dot| {
                let count = sim.dot(dot)?.tick_count();
                tick_log.borrow_mut().push((sim.now(), count));
                Ok(())
            }),
        );
        let spell = sim.register_spell(caster, config).unwrap();
        Fixture {
            sim,
            caster,
            target,
            spell,
            ticks: log,
        }
    }

    #[test]
    fn test_dot_ticks_on_cadence_with_final_catch_up() {
        let mut fx = fixture(6, ms(3_000));
        let dot = fx.sim.spell(fx.spell).unwrap().dot(fx.target).unwrap();
        fx.sim.apply_dot(dot).unwrap();
        fx.sim.run(Duration::from_secs(60)).unwrap();

        let times: Vec<Duration> = fx.ticks.borrow().iter().map(|(at, _)| *at).collect();
        assert_eq!(
            times,
            (1..=6).map(|n| ms(3_000 * n)).collect::<Vec<_>>()
        );
        assert_eq!(fx.sim.dot(dot).unwrap().tick_count(), 6);
        assert!(!fx.sim.aura(fx.sim.dot(dot).unwrap().aura()).unwrap().is_active());
    }

    #[test]
    fn test_early_removal_fires_one_catch_up_tick() {
        let mut fx = fixture(5, ms(2_000));
        let dot = fx.sim.spell(fx.spell).unwrap().dot(fx.target).unwrap();
        let aura = fx.sim.dot(dot).unwrap().aura();
        fx.sim.apply_dot(dot).unwrap();
        fx.sim
            .schedule(ms(4_500), move |sim| sim.deactivate_aura(aura).map(|_| ()))
            .unwrap();
        fx.sim.run(Duration::from_secs(30)).unwrap();

        assert_eq!(
            *fx.ticks.borrow(),
            vec![(ms(2_000), 1), (ms(4_000), 2), (ms(4_500), 3)]
        );
    }

    #[test]
    fn test_removal_in_tick_instant_adds_no_catch_up() {
        let mut fx = fixture(5, ms(2_000));
        let dot = fx.sim.spell(fx.spell).unwrap().dot(fx.target).unwrap();
        let aura = fx.sim.dot(dot).unwrap().aura();
        fx.sim.apply_dot(dot).unwrap();
        // Queued after the first tick, so it runs right behind it.
        fx.sim
            .schedule(ms(2_000), move |sim| sim.deactivate_aura(aura).map(|_| ()))
            .unwrap();
        fx.sim.run(Duration::from_secs(30)).unwrap();

        assert_eq!(*fx.ticks.borrow(), vec![(ms(2_000), 1)]);
        assert!(!fx.sim.aura(aura).unwrap().is_active());
    }

    #[test]
    fn test_removal_at_application_adds_no_tick() {
        let mut fx = fixture(3, ms(1_000));
        let dot = fx.sim.spell(fx.spell).unwrap().dot(fx.target).unwrap();
        let aura = fx.sim.dot(dot).unwrap().aura();
        fx.sim.apply_dot(dot).unwrap();
        fx.sim.deactivate_aura(aura).unwrap();
        fx.sim.run(Duration::from_secs(10)).unwrap();

        assert!(fx.ticks.borrow().is_empty());
        assert_eq!(fx.sim.dot(dot).unwrap().tick_count(), 0);
    }

    #[test]
    fn test_reapply_restarts_without_catch_up() {
        let mut fx = fixture(3, ms(1_000));
        let dot = fx.sim.spell(fx.spell).unwrap().dot(fx.target).unwrap();
        fx.sim.apply_dot(dot).unwrap();
        fx.sim
            .schedule(ms(1_500), move |sim| sim.apply_dot(dot))
            .unwrap();
        fx.sim.run(Duration::from_secs(10)).unwrap();

        let times: Vec<Duration> = fx.ticks.borrow().iter().map(|(at, _)| *at).collect();
        assert_eq!(times, vec![ms(1_000), ms(2_500), ms(3_500), ms(4_500)]);
    }

    #[test]
    fn test_cast_speed_shortens_cadence() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let caster = sim
            .add_unit(UnitConfig::player(
                "Priest",
                CombatStats {
                    spell_haste: 0.25,
                    ..CombatStats::default()
                },
            ))
            .unwrap();
        let target = sim
            .add_unit(UnitConfig::target("Dummy", CombatStats::default()))
            .unwrap();
        let mut config = SpellConfig::new(ActionId::spell(15_407));
        config.dot = Some(
            DotConfig::new(AuraConfig::new("Mind Flay", Duration::ZERO), 3, ms(1_000))
                .affected_by_cast_speed(),
        );
        let spell = sim.register_spell(caster, config).unwrap();
        let dot = sim.spell(spell).unwrap().dot(target).unwrap();

        sim.apply_dot(dot).unwrap();
        assert_eq!(sim.dot(dot).unwrap().tick_length(), ms(800));
        let aura = sim.dot(dot).unwrap().aura();
        assert_eq!(sim.aura(aura).unwrap().expires_at(), Some(ms(2_400)));
    }

    #[test]
    fn test_missing_tick_length_rejected() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let caster = sim
            .add_unit(UnitConfig::player("Warlock", CombatStats::default()))
            .unwrap();
        let mut config = SpellConfig::new(ActionId::spell(172));
        let mut dot = DotConfig::new(AuraConfig::new("Corruption", Duration::ZERO), 6, ms(3_000));
        dot.tick_length = None;
        config.dot = Some(dot);
        assert!(matches!(
            sim.register_spell(caster, config),
            Err(SimError::Setup(_))
        ));
    }

    #[test]
    fn test_dot_exists_for_units_added_later() {
        let mut fx = fixture(2, ms(1_000));
        let late = fx
            .sim
            .add_unit(UnitConfig::target("Add", CombatStats::default()))
            .unwrap();
        assert!(fx.sim.spell(fx.spell).unwrap().dot(late).is_some());
        assert!(fx.sim.spell(fx.spell).unwrap().dot(fx.caster).is_some());
    }

    proptest! {
        #[test]
        fn prop_tick_count_never_exceeds_ticks(
            ticks in 1u32..8,
            tick_ms in 200u64..3_000,
            removal in proptest::option::of(0u64..20_000),
            reapply in proptest::option::of(0u64..20_000),
        ) {
            let mut fx = fixture(ticks, ms(tick_ms));
            let dot = fx.sim.spell(fx.spell).unwrap().dot(fx.target).unwrap();
            let aura = fx.sim.dot(dot).unwrap().aura();
            fx.sim.apply_dot(dot).unwrap();
            if let Some(at) = removal {
                fx.sim.schedule(ms(at), move |sim| sim.deactivate_aura(aura).map(|_| ())).unwrap();
            }
            if let Some(at) = reapply {
                fx.sim.schedule(ms(at), move |sim| sim.apply_dot(dot)).unwrap();
            }
            fx.sim.run(Duration::from_secs(60)).unwrap();

            for (_, count) in fx.ticks.borrow().iter() {
                prop_assert!(*count >= 1 && *count <= ticks);
            }
            prop_assert!(fx.sim.dot(dot).unwrap().tick_count() <= ticks);
        }
    }
}
