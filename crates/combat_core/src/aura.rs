//! Timed status effects with stacks and lifecycle hooks.
//!
//! An aura is registered once at setup and then activated and deactivated
//! any number of times during a run:
//!
//! ```text
//! Inactive --activate--> Active(stacks) --deactivate/expire--> Inactive
//!              ^             |   ^
//!              |             +---+ refresh / add_stack / remove_stack
//! ```
//!
//! # Hooks
//!
//! Each lifecycle point holds an ordered list of handlers, invoked in the
//! order they were added. Handlers receive `&mut Simulation` and may schedule
//! actions, change other auras or cast spells; everything they trigger runs
//! to completion before control returns to the event loop.
//!
//! # Teardown order
//!
//! Deactivation cancels the pending expiry, fires a dot's outstanding final
//! tick while the aura is still active, drops stacks to zero (firing
//! `on_stacks_change`), and only then fires `on_expire`.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::dot::DotHandle;
use crate::error::{Result, SimError};
use crate::outcome::SpellResult;
use crate::simulation::{ScheduledAction, Simulation};
use crate::spell::{ActionId, SpellHandle};
use crate::unit::UnitId;

/// Handle to a registered aura.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AuraHandle(pub(crate) usize);

/// Hook taking only the aura.
pub type AuraHook = Rc<dyn Fn(&mut Simulation, AuraHandle) -> Result<()>>;

/// Hook observing a stack change `(old, new)`.
pub type StacksChangeHook = Rc<dyn Fn(&mut Simulation, AuraHandle, u32, u32) -> Result<()>>;

/// Hook observing a completed cast by the aura's owner.
pub type CastCompleteHook = Rc<dyn Fn(&mut Simulation, AuraHandle, SpellHandle) -> Result<()>>;

/// Hook observing a resolved outcome dealt or taken by the aura's owner.
pub type SpellHitHook = Rc<dyn Fn(&mut Simulation, AuraHandle, &SpellResult) -> Result<()>>;

/// Ordered handler lists for every lifecycle point.
#[derive(Clone, Default)]
pub struct AuraHooks {
    /// Fired on activation, and on refresh when refresh-as-new.
    pub on_gain: Vec<AuraHook>,
    /// Fired on deactivation or expiry, after stacks drop to zero.
    pub on_expire: Vec<AuraHook>,
    /// Fired when the stack count changes.
    pub on_stacks_change: Vec<StacksChangeHook>,
    /// Fired at the start of every iteration, active or not.
    pub on_reset: Vec<AuraHook>,
    /// Fired after the owner completes a cast, while active.
    pub on_cast_complete: Vec<CastCompleteHook>,
    /// Fired for every outcome the owner deals, while active.
    pub on_spell_hit_dealt: Vec<SpellHitHook>,
    /// Fired for every outcome the owner takes, while active.
    pub on_spell_hit_taken: Vec<SpellHitHook>,
}

/// Aura template.
#[derive(Clone)]
pub struct AuraConfig {
    /// Label, unique per unit.
    pub label: String,
    /// Linked action identity, for metrics.
    pub action_id: Option<ActionId>,
    /// Duration, or `None` to never expire.
    pub duration: Option<Duration>,
    /// Maximum stacks.
    pub max_stacks: u32,
    /// Stacks on activation, clamped to `max_stacks`.
    pub initial_stacks: u32,
    /// Whether a refresh fires `on_gain` again.
    pub refresh_as_new: bool,
    /// Whether adding a stack refreshes the duration.
    pub stacks_refresh_duration: bool,
    /// Lifecycle hooks.
    pub hooks: AuraHooks,
}

impl AuraConfig {
    /// Aura lasting `duration`.
    #[must_use]
    pub fn new(label: impl Into<String>, duration: Duration) -> Self {
        Self {
            label: label.into(),
            action_id: None,
            duration: Some(duration),
            max_stacks: 1,
            initial_stacks: 1,
            refresh_as_new: false,
            stacks_refresh_duration: false,
            hooks: AuraHooks::default(),
        }
    }

    /// Aura that stays active until deactivated.
    #[must_use]
    pub fn never_expires(label: impl Into<String>) -> Self {
        Self {
            duration: None,
            ..Self::new(label, Duration::ZERO)
        }
    }

    /// Link an action identity.
    #[must_use]
    pub const fn with_action_id(mut self, action_id: ActionId) -> Self {
        self.action_id = Some(action_id);
        self
    }

    /// Set the stack cap.
    #[must_use]
    pub const fn with_max_stacks(mut self, max_stacks: u32) -> Self {
        self.max_stacks = max_stacks;
        self
    }

    /// Set the stack count on activation.
    #[must_use]
    pub const fn with_initial_stacks(mut self, stacks: u32) -> Self {
        self.initial_stacks = stacks;
        self
    }

    /// Fire `on_gain` again on refresh.
    #[must_use]
    pub const fn refresh_as_new(mut self) -> Self {
        self.refresh_as_new = true;
        self
    }

    /// Refresh the duration whenever a stack is added.
    #[must_use]
    pub const fn stacks_refresh_duration(mut self) -> Self {
        self.stacks_refresh_duration = true;
        self
    }

    /// Add an `on_gain` handler.
    #[must_use]
    pub fn on_gain(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_gain.push(Rc::new(hook));
        self
    }

    /// Add an `on_expire` handler.
    #[must_use]
    pub fn on_expire(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_expire.push(Rc::new(hook));
        self
    }

    /// Add an `on_stacks_change` handler.
    #[must_use]
    pub fn on_stacks_change(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle, u32, u32) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_stacks_change.push(Rc::new(hook));
        self
    }

    /// Add an `on_reset` handler.
    #[must_use]
    pub fn on_reset(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_reset.push(Rc::new(hook));
        self
    }

    /// Add an `on_cast_complete` handler.
    #[must_use]
    pub fn on_cast_complete(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle, SpellHandle) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_cast_complete.push(Rc::new(hook));
        self
    }

    /// Add an `on_spell_hit_dealt` handler.
    #[must_use]
    pub fn on_spell_hit_dealt(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle, &SpellResult) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_spell_hit_dealt.push(Rc::new(hook));
        self
    }

    /// Add an `on_spell_hit_taken` handler.
    #[must_use]
    pub fn on_spell_hit_taken(
        mut self,
        hook: impl Fn(&mut Simulation, AuraHandle, &SpellResult) -> Result<()> + 'static,
    ) -> Self {
        self.hooks.on_spell_hit_taken.push(Rc::new(hook));
        self
    }

    fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(SimError::setup("aura label must not be empty"));
        }
        if self.max_stacks == 0 {
            return Err(SimError::setup(format!(
                "aura '{}': max_stacks must be at least 1",
                self.label
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for AuraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuraConfig")
            .field("label", &self.label)
            .field("action_id", &self.action_id)
            .field("duration", &self.duration)
            .field("max_stacks", &self.max_stacks)
            .field("initial_stacks", &self.initial_stacks)
            .field("refresh_as_new", &self.refresh_as_new)
            .finish_non_exhaustive()
    }
}

/// A registered aura and its runtime state.
pub struct Aura {
    label: String,
    action_id: Option<ActionId>,
    duration: Option<Duration>,
    max_stacks: u32,
    initial_stacks: u32,
    refresh_as_new: bool,
    stacks_refresh_duration: bool,
    hooks: Rc<AuraHooks>,
    unit: UnitId,
    pub(crate) dot: Option<DotHandle>,
    active: bool,
    stacks: u32,
    active_since: Duration,
    gained_at: Option<Duration>,
    expires_at: Option<Duration>,
    expiry: Option<crate::queue::PendingActionHandle>,
    uptime: Duration,
    activations: u64,
}

impl Aura {
    /// Label, unique on its unit.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Linked action identity.
    #[must_use]
    pub const fn action_id(&self) -> Option<ActionId> {
        self.action_id
    }

    /// Owning unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// Whether the aura is active.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Current stack count.
    #[must_use]
    pub const fn stacks(&self) -> u32 {
        self.stacks
    }

    /// Stack cap.
    #[must_use]
    pub const fn max_stacks(&self) -> u32 {
        self.max_stacks
    }

    /// Configured duration, `None` for never-expiring auras.
    #[must_use]
    pub const fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Scheduled expiry time of the current activation.
    #[must_use]
    pub const fn expires_at(&self) -> Option<Duration> {
        self.expires_at
    }

    /// Dot riding on this aura.
    #[must_use]
    pub const fn dot(&self) -> Option<DotHandle> {
        self.dot
    }

    /// Number of inactive-to-active transitions this iteration.
    #[must_use]
    pub const fn activations(&self) -> u64 {
        self.activations
    }

    /// Total active time this iteration, up to `now`.
    #[must_use]
    pub fn uptime(&self, now: Duration) -> Duration {
        if self.active {
            self.uptime + now.saturating_sub(self.active_since)
        } else {
            self.uptime
        }
    }

    fn reset(&mut self) {
        self.active = false;
        self.stacks = 0;
        self.active_since = Duration::ZERO;
        self.gained_at = None;
        self.expires_at = None;
        self.expiry = None;
        self.uptime = Duration::ZERO;
        self.activations = 0;
    }
}

impl fmt::Debug for Aura {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aura")
            .field("label", &self.label)
            .field("unit", &self.unit)
            .field("active", &self.active)
            .field("stacks", &self.stacks)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// One aura per enemy unit, indexed by unit.
#[derive(Debug, Clone, Default)]
pub struct AuraArray {
    auras: Vec<Option<AuraHandle>>,
}

impl AuraArray {
    /// Aura on `unit`, if the array covers it.
    #[must_use]
    pub fn get(&self, unit: UnitId) -> Option<AuraHandle> {
        self.auras.get(unit.0).copied().flatten()
    }

    /// Every aura in the array, in unit order.
    pub fn iter(&self) -> impl Iterator<Item = AuraHandle> + '_ {
        self.auras.iter().filter_map(|aura| *aura)
    }
}

impl Simulation {
    /// Register an aura on a unit.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] for a duplicate label on the unit, an invalid
    /// stack configuration, or when called while an iteration is running.
    pub fn register_aura(&mut self, unit: UnitId, config: AuraConfig) -> Result<AuraHandle> {
        self.ensure_setup("register_aura")?;
        config.validate()?;
        if self.unit(unit)?.aura_labels.contains_key(&config.label) {
            return Err(SimError::setup(format!(
                "unit #{} already has an aura labelled '{}'",
                unit.0, config.label
            )));
        }

        let handle = AuraHandle(self.auras.len());
        let initial_stacks = config.initial_stacks.min(config.max_stacks);
        self.auras.push(Aura {
            label: config.label.clone(),
            action_id: config.action_id,
            duration: config.duration,
            max_stacks: config.max_stacks,
            initial_stacks,
            refresh_as_new: config.refresh_as_new,
            stacks_refresh_duration: config.stacks_refresh_duration,
            hooks: Rc::new(config.hooks),
            unit,
            dot: None,
            active: false,
            stacks: 0,
            active_since: Duration::ZERO,
            gained_at: None,
            expires_at: None,
            expiry: None,
            uptime: Duration::ZERO,
            activations: 0,
        });
        let owner = &mut self.units[unit.0];
        owner.auras.push(handle);
        owner.aura_labels.insert(config.label, handle);
        Ok(handle)
    }

    /// Build one aura per target unit.
    ///
    /// # Errors
    ///
    /// Whatever `factory` returns.
    pub fn new_enemy_aura_array(
        &mut self,
        factory: impl Fn(&mut Simulation, UnitId) -> Result<AuraHandle>,
    ) -> Result<AuraArray> {
        let mut auras = vec![None; self.units.len()];
        for target in self.targets() {
            auras[target.0] = Some(factory(self, target)?);
        }
        Ok(AuraArray { auras })
    }

    /// Aura by handle.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a handle from another simulation.
    pub fn aura(&self, handle: AuraHandle) -> Result<&Aura> {
        self.auras
            .get(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("aura #{}", handle.0)))
    }

    fn aura_mut(&mut self, handle: AuraHandle) -> Result<&mut Aura> {
        self.auras
            .get_mut(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("aura #{}", handle.0)))
    }

    /// Look up a unit's aura by label.
    #[must_use]
    pub fn get_aura(&self, unit: UnitId, label: &str) -> Option<AuraHandle> {
        self.units.get(unit.0)?.aura_labels.get(label).copied()
    }

    /// Activate with the configured duration, or refresh if already active.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle, or any hook error.
    pub fn activate_aura(&mut self, handle: AuraHandle) -> Result<()> {
        let duration = self.aura(handle)?.duration;
        self.activate_aura_for(handle, duration)
    }

    pub(crate) fn activate_aura_for(
        &mut self,
        handle: AuraHandle,
        duration: Option<Duration>,
    ) -> Result<()> {
        let now = self.now();
        let aura = self.aura_mut(handle)?;

        if aura.active {
            aura.gained_at = Some(now);
            let refresh_as_new = aura.refresh_as_new;
            tracing::trace!(aura = %aura.label, ?now, "Aura refreshed");
            if duration == Some(Duration::ZERO) {
                self.deactivate_aura(handle)?;
                return Ok(());
            }
            self.schedule_expiry(handle, duration)?;
            if refresh_as_new {
                self.fire_aura_hooks(handle, |hooks| &hooks.on_gain)?;
            }
            return Ok(());
        }

        aura.active = true;
        aura.stacks = aura.initial_stacks;
        aura.active_since = now;
        aura.gained_at = Some(now);
        aura.activations += 1;
        tracing::trace!(aura = %aura.label, ?now, "Aura gained");

        if duration == Some(Duration::ZERO) {
            self.fire_aura_hooks(handle, |hooks| &hooks.on_gain)?;
            self.deactivate_aura(handle)?;
            return Ok(());
        }
        self.schedule_expiry(handle, duration)?;
        self.fire_aura_hooks(handle, |hooks| &hooks.on_gain)
    }

    fn schedule_expiry(&mut self, handle: AuraHandle, duration: Option<Duration>) -> Result<()> {
        if let Some(previous) = self.auras[handle.0].expiry.take() {
            self.queue.cancel(previous);
        }
        let (expiry, expires_at) = match duration {
            Some(duration) => {
                let due = self.time_after(duration)?;
                let pending = self.queue.schedule(due, ScheduledAction::ExpireAura(handle))?;
                (Some(pending), Some(due))
            }
            None => (None, None),
        };
        let aura = &mut self.auras[handle.0];
        aura.expiry = expiry;
        aura.expires_at = expires_at;
        Ok(())
    }

    /// Deactivate an aura. Returns `false` if it was already inactive.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle, or any hook error.
    pub fn deactivate_aura(&mut self, handle: AuraHandle) -> Result<bool> {
        let aura = self.aura_mut(handle)?;
        if !aura.active {
            return Ok(false);
        }
        let pending = aura.expiry.take();
        aura.expires_at = None;
        let dot = aura.dot;
        if let Some(pending) = pending {
            self.queue.cancel(pending);
        }

        if let Some(dot) = dot {
            self.catch_up_dot(dot)?;
            if !self.auras[handle.0].active {
                // A tick handler tore the aura down already.
                return Ok(true);
            }
        }

        let now = self.now();
        let aura = &mut self.auras[handle.0];
        aura.active = false;
        aura.uptime += now.saturating_sub(aura.active_since);
        let old_stacks = std::mem::take(&mut aura.stacks);
        tracing::trace!(aura = %aura.label, ?now, "Aura expired");

        if old_stacks != 0 {
            self.fire_stacks_change(handle, old_stacks, 0)?;
        }
        self.fire_aura_hooks(handle, |hooks| &hooks.on_expire)?;

        if let Some(dot) = dot {
            self.finish_dot(dot)?;
        }
        Ok(true)
    }

    pub(crate) fn expire_aura(&mut self, handle: AuraHandle) -> Result<()> {
        self.aura_mut(handle)?.expiry = None;
        self.deactivate_aura(handle)?;
        Ok(())
    }

    /// Add one stack, up to the cap.
    ///
    /// Returns `false` without firing any hook when the aura is inactive or
    /// already at its cap.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle, or any hook error.
    pub fn add_stack(&mut self, handle: AuraHandle) -> Result<bool> {
        let aura = self.aura(handle)?;
        if !aura.active || aura.stacks >= aura.max_stacks {
            return Ok(false);
        }
        let old = aura.stacks;
        let refresh = aura.stacks_refresh_duration;
        let duration = aura.duration;
        self.auras[handle.0].stacks = old + 1;
        if refresh {
            self.auras[handle.0].gained_at = Some(self.now());
            self.schedule_expiry(handle, duration)?;
        }
        self.fire_stacks_change(handle, old, old + 1)?;
        Ok(true)
    }

    /// Remove one stack. The aura stays active at zero stacks.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle, or any hook error.
    pub fn remove_stack(&mut self, handle: AuraHandle) -> Result<bool> {
        let aura = self.aura(handle)?;
        if !aura.active || aura.stacks == 0 {
            return Ok(false);
        }
        let old = aura.stacks;
        self.auras[handle.0].stacks = old - 1;
        self.fire_stacks_change(handle, old, old - 1)?;
        Ok(true)
    }

    /// Set the stack count directly. No-op on inactive auras.
    ///
    /// # Errors
    ///
    /// [`SimError::InvariantViolation`] when `stacks` exceeds the cap.
    pub fn set_stacks(&mut self, handle: AuraHandle, stacks: u32) -> Result<()> {
        let aura = self.aura(handle)?;
        if stacks > aura.max_stacks {
            return Err(SimError::invariant(format!(
                "aura '{}': {stacks} stacks exceeds max {}",
                aura.label, aura.max_stacks
            )));
        }
        if !aura.active || aura.stacks == stacks {
            return Ok(());
        }
        let old = aura.stacks;
        self.auras[handle.0].stacks = stacks;
        self.fire_stacks_change(handle, old, stacks)
    }

    /// Time left on the current activation.
    ///
    /// `None` for a never-expiring active aura; zero when inactive.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle.
    pub fn remaining_duration(&self, handle: AuraHandle) -> Result<Option<Duration>> {
        let aura = self.aura(handle)?;
        if !aura.active {
            return Ok(Some(Duration::ZERO));
        }
        Ok(aura
            .expires_at
            .map(|expires_at| expires_at.saturating_sub(self.now())))
    }

    /// Whether the aura was activated or refreshed at the current instant.
    ///
    /// Lets `on_cast_complete` handlers skip the cast that granted them.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign handle.
    pub fn gained_this_instant(&self, handle: AuraHandle) -> Result<bool> {
        let aura = self.aura(handle)?;
        Ok(aura.active && aura.gained_at == Some(self.now()))
    }

    pub(crate) fn reset_auras(&mut self) {
        for aura in &mut self.auras {
            aura.reset();
        }
    }

    pub(crate) fn fire_on_reset(&mut self) -> Result<()> {
        for index in 0..self.auras.len() {
            self.fire_aura_hooks(AuraHandle(index), |hooks| &hooks.on_reset)?;
        }
        Ok(())
    }

    pub(crate) fn fire_cast_complete(&mut self, unit: UnitId, spell: SpellHandle) -> Result<()> {
        for handle in self.units[unit.0].auras.clone() {
            if !self.auras[handle.0].active {
                continue;
            }
            let hooks = Rc::clone(&self.auras[handle.0].hooks);
            for hook in &hooks.on_cast_complete {
                hook(self, handle, spell)?;
            }
        }
        Ok(())
    }

    pub(crate) fn fire_spell_hit(&mut self, result: &SpellResult) -> Result<()> {
        for handle in self.units[result.caster.0].auras.clone() {
            if !self.auras[handle.0].active {
                continue;
            }
            let hooks = Rc::clone(&self.auras[handle.0].hooks);
            for hook in &hooks.on_spell_hit_dealt {
                hook(self, handle, result)?;
            }
        }
        for handle in self.units[result.target.0].auras.clone() {
            if !self.auras[handle.0].active {
                continue;
            }
            let hooks = Rc::clone(&self.auras[handle.0].hooks);
            for hook in &hooks.on_spell_hit_taken {
                hook(self, handle, result)?;
            }
        }
        Ok(())
    }

    fn fire_aura_hooks(
        &mut self,
        handle: AuraHandle,
        select: fn(&AuraHooks) -> &[AuraHook],
    ) -> Result<()> {
        let hooks = Rc::clone(&self.auras[handle.0].hooks);
        for hook in select(&hooks) {
            hook(self, handle)?;
        }
        Ok(())
    }

    fn fire_stacks_change(&mut self, handle: AuraHandle, old: u32, new: u32) -> Result<()> {
        let hooks = Rc::clone(&self.auras[handle.0].hooks);
        for hook in &hooks.on_stacks_change {
            hook(self, handle, old, new)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use proptest::prelude::*;

    use super::*;
    use crate::data::{CombatStats, UnitConfig};
    use crate::simulation::SimulationConfig;
    use crate::time::ms;

    fn sim_with_unit() -> (Simulation, UnitId) {
        let mut sim = Simulation::new(SimulationConfig::default());
        let unit = sim
            .add_unit(UnitConfig::player("Mage", CombatStats::default()))
            .unwrap();
        (sim, unit)
    }

    #[test]
    fn test_refresh_moves_expiry() {
        let (mut sim, unit) = sim_with_unit();
        let expired_at = Rc::new(RefCell::new(Vec::new()));
        let gains = Rc::new(Cell::new(0));
        let log = Rc::clone(&expired_at);
        let counter = Rc::clone(&gains);
        let buff = sim
            .register_aura(
                unit,
                AuraConfig::new("Arcane Power", Duration::from_secs(20))
                    .on_gain(move |_, _| {
                        counter.set(counter.get() + 1);
                        Ok(())
                    })
                    .on_expire(move |sim, _| {
                        log.borrow_mut().push(sim.now());
                        Ok(())
                    }),
            )
            .unwrap();

        sim.schedule(Duration::ZERO, move |sim| sim.activate_aura(buff))
            .unwrap();
        sim.schedule(ms(10_000), move |sim| sim.activate_aura(buff))
            .unwrap();
        sim.run(Duration::from_secs(60)).unwrap();

        assert_eq!(*expired_at.borrow(), vec![ms(30_000)]);
        assert_eq!(gains.get(), 1);
        assert!(!sim.aura(buff).unwrap().is_active());
        assert_eq!(sim.aura(buff).unwrap().uptime(sim.now()), ms(30_000));
    }

    #[test]
    fn test_refresh_as_new_fires_gain_again() {
        let (mut sim, unit) = sim_with_unit();
        let gains = Rc::new(Cell::new(0));
        let counter = Rc::clone(&gains);
        let buff = sim
            .register_aura(
                unit,
                AuraConfig::new("Presence of Mind", Duration::from_secs(10))
                    .refresh_as_new()
                    .on_gain(move |_, _| {
                        counter.set(counter.get() + 1);
                        Ok(())
                    }),
            )
            .unwrap();

        sim.activate_aura(buff).unwrap();
        sim.activate_aura(buff).unwrap();
        assert_eq!(gains.get(), 2);
        assert_eq!(sim.aura(buff).unwrap().activations(), 1);
    }

    #[test]
    fn test_stacks_clamp_at_max() {
        let (mut sim, unit) = sim_with_unit();
        let changes = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&changes);
        let buff = sim
            .register_aura(
                unit,
                AuraConfig::new("Arcane Blast", Duration::from_secs(20))
                    .with_max_stacks(3)
                    .with_initial_stacks(0)
                    .on_stacks_change(move |_, _, old, new| {
                        log.borrow_mut().push((old, new));
                        Ok(())
                    }),
            )
            .unwrap();

        sim.activate_aura(buff).unwrap();
        for _ in 0..5 {
            sim.add_stack(buff).unwrap();
        }

        assert_eq!(sim.aura(buff).unwrap().stacks(), 3);
        assert_eq!(*changes.borrow(), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_zero_duration_gains_and_expires_synchronously() {
        let (mut sim, unit) = sim_with_unit();
        let events = Rc::new(RefCell::new(Vec::new()));
        let on_gain = Rc::clone(&events);
        let on_expire = Rc::clone(&events);
        let flash = sim
            .register_aura(
                unit,
                AuraConfig::new("Flash", Duration::ZERO)
                    .on_gain(move |_, _| {
                        on_gain.borrow_mut().push("gain");
                        Ok(())
                    })
                    .on_expire(move |_, _| {
                        on_expire.borrow_mut().push("expire");
                        Ok(())
                    }),
            )
            .unwrap();

        sim.activate_aura(flash).unwrap();
        assert_eq!(*events.borrow(), vec!["gain", "expire"]);
        assert!(!sim.aura(flash).unwrap().is_active());
        assert_eq!(sim.queue_len(), 0);
    }

    #[test]
    fn test_deactivate_is_idempotent() {
        let (mut sim, unit) = sim_with_unit();
        let expires = Rc::new(Cell::new(0));
        let counter = Rc::clone(&expires);
        let buff = sim
            .register_aura(
                unit,
                AuraConfig::never_expires("Armor").on_expire(move |_, _| {
                    counter.set(counter.get() + 1);
                    Ok(())
                }),
            )
            .unwrap();

        sim.activate_aura(buff).unwrap();
        assert!(sim.deactivate_aura(buff).unwrap());
        assert!(!sim.deactivate_aura(buff).unwrap());
        assert_eq!(expires.get(), 1);
    }

    #[test]
    fn test_deactivate_drops_stacks_before_expire() {
        let (mut sim, unit) = sim_with_unit();
        let events = Rc::new(RefCell::new(Vec::new()));
        let on_stacks = Rc::clone(&events);
        let on_expire = Rc::clone(&events);
        let buff = sim
            .register_aura(
                unit,
                AuraConfig::new("Stacking", Duration::from_secs(5))
                    .with_max_stacks(4)
                    .on_stacks_change(move |_, _, old, new| {
                        on_stacks.borrow_mut().push(format!("{old}->{new}"));
                        Ok(())
                    })
                    .on_expire(move |sim, aura| {
                        let stacks = sim.aura(aura)?.stacks();
                        on_expire.borrow_mut().push(format!("expire@{stacks}"));
                        Ok(())
                    }),
            )
            .unwrap();

        sim.activate_aura(buff).unwrap();
        sim.add_stack(buff).unwrap();
        sim.run(Duration::from_secs(10)).unwrap();

        assert_eq!(*events.borrow(), vec!["1->2", "2->0", "expire@0"]);
    }

    #[test]
    fn test_never_expires_has_no_remaining_duration() {
        let (mut sim, unit) = sim_with_unit();
        let passive = sim
            .register_aura(unit, AuraConfig::never_expires("Talent"))
            .unwrap();
        assert_eq!(sim.remaining_duration(passive).unwrap(), Some(Duration::ZERO));
        sim.activate_aura(passive).unwrap();
        assert_eq!(sim.remaining_duration(passive).unwrap(), None);
        assert!(sim.gained_this_instant(passive).unwrap());
    }

    #[test]
    fn test_duplicate_label_rejected() {
        let (mut sim, unit) = sim_with_unit();
        sim.register_aura(unit, AuraConfig::never_expires("Same"))
            .unwrap();
        assert!(sim
            .register_aura(unit, AuraConfig::never_expires("Same"))
            .is_err());
    }

    #[test]
    fn test_set_stacks_beyond_cap_is_invariant_violation() {
        let (mut sim, unit) = sim_with_unit();
        let buff = sim
            .register_aura(
                unit,
                AuraConfig::new("Capped", Duration::from_secs(5)).with_max_stacks(2),
            )
            .unwrap();
        sim.activate_aura(buff).unwrap();
        assert!(matches!(
            sim.set_stacks(buff, 3),
            Err(SimError::InvariantViolation(_))
        ));
        assert_eq!(sim.aura(buff).unwrap().stacks(), 1);
    }

    #[test]
    fn test_simultaneous_expiries_follow_activation_order() {
        let (mut sim, unit) = sim_with_unit();
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut auras = Vec::new();
        for label in ["first", "second", "third"] {
            let log = Rc::clone(&order);
            auras.push(
                sim.register_aura(
                    unit,
                    AuraConfig::new(label, Duration::from_secs(3)).on_expire(move |_, _| {
                        log.borrow_mut().push(label);
                        Ok(())
                    }),
                )
                .unwrap(),
            );
        }
        // Activate in reverse registration order; expiry follows activation.
        for aura in auras.iter().rev() {
            sim.activate_aura(*aura).unwrap();
        }
        sim.run(Duration::from_secs(5)).unwrap();
        assert_eq!(*order.borrow(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_enemy_aura_array_covers_targets_only() {
        let (mut sim, player) = sim_with_unit();
        let boss = sim
            .add_unit(UnitConfig::target("Boss", CombatStats::default()))
            .unwrap();
        let array = sim
            .new_enemy_aura_array(|sim, target| {
                sim.register_aura(target, AuraConfig::new("Scorch", Duration::from_secs(30)))
            })
            .unwrap();

        assert!(array.get(boss).is_some());
        assert!(array.get(player).is_none());
        assert_eq!(array.iter().count(), 1);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Activate,
        AddStack,
        RemoveStack,
        Deactivate,
        Advance(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Activate),
            Just(Op::AddStack),
            Just(Op::RemoveStack),
            Just(Op::Deactivate),
            (1u64..4_000).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn prop_stacks_stay_within_bounds(
            max in 1u32..6,
            ops in proptest::collection::vec(op_strategy(), 1..60)
        ) {
            let (mut sim, unit) = sim_with_unit();
            let expires = Rc::new(Cell::new(0u64));
            let counter = Rc::clone(&expires);
            let buff = sim.register_aura(
                unit,
                AuraConfig::new("Prop", Duration::from_secs(3))
                    .with_max_stacks(max)
                    .on_expire(move |_, _| {
                        counter.set(counter.get() + 1);
                        Ok(())
                    }),
            ).unwrap();

            for op in ops {
                match op {
                    Op::Activate => sim.activate_aura(buff).unwrap(),
                    Op::AddStack => { sim.add_stack(buff).unwrap(); }
                    Op::RemoveStack => { sim.remove_stack(buff).unwrap(); }
                    Op::Deactivate => { sim.deactivate_aura(buff).unwrap(); }
                    Op::Advance(millis) => {
                        let until = sim.now() + ms(millis);
                        sim.run(until).unwrap();
                    }
                }
                let aura = sim.aura(buff).unwrap();
                prop_assert!(aura.stacks() <= max);
                if !aura.is_active() {
                    prop_assert_eq!(aura.stacks(), 0);
                }
                let closed = aura.activations() - u64::from(aura.is_active());
                prop_assert_eq!(expires.get(), closed);
            }
        }
    }
}
