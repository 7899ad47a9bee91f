//! Core simulation loop.
//!
//! A [`Simulation`] owns one encounter: the clock and event queue, the
//! seeded random source, and arenas of units, spells, auras, dots, timers
//! and periodic actions addressed by typed handles. Content is registered
//! once at setup; each iteration then restores every component, fires
//! `on_reset` hooks, and drives the queue until the encounter end time.
//!
//! # Determinism
//!
//! - All randomness comes from a ChaCha stream seeded with
//!   `base_seed + iteration`
//! - Actions due at the same time fire in scheduling order
//! - Hooks fire in registration order
//! - Same seed and content always produce the same [`IterationMetrics`]
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use combat_core::prelude::*;
//!
//! let mut sim = Simulation::new(SimulationConfig {
//!     duration: Duration::from_secs(30),
//!     ..SimulationConfig::default()
//! });
//! let mage = sim.add_unit(UnitConfig::player(
//!     "Mage",
//!     CombatStats { spell_power: 300.0, ..CombatStats::default() },
//! ))?;
//! let dummy = sim.add_unit(UnitConfig::target("Dummy", CombatStats::default()))?;
//!
//! let mut fireball = SpellConfig::new(ActionId::spell(133));
//! fireball.school = SpellSchool::Fire;
//! fireball.default_cast = CastConfig::with_cast_time(Duration::from_millis(3_500));
//! fireball.base_damage = Some((596.0, 760.0));
//! fireball.bonus_coefficient = 1.0;
//! let fireball = sim.register_spell(mage, fireball)?;
//!
//! sim.set_rotation(mage, move |sim: &mut Simulation, _: UnitId| {
//!     sim.try_cast(fireball, dummy)?;
//!     Ok(Decision::Continue)
//! })?;
//!
//! let metrics = sim.run_iteration(0)?;
//! assert!(metrics.unit("Mage").map_or(0.0, |m| m.total_damage) > 0.0);
//! # Ok::<(), combat_core::error::SimError>(())
//! ```

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::aura::{Aura, AuraHandle};
use crate::cooldown::Timer;
use crate::dot::{Dot, DotHandle};
use crate::error::{Result, SimError};
use crate::ledger::ResourceKind;
use crate::metrics::{AggregateStats, IterationMetrics};
use crate::outcome::SpellResult;
use crate::periodic::{PeriodicAction, PeriodicHandle};
use crate::queue::{EventQueue, PendingActionHandle};
use crate::rng::RngEngine;
use crate::rotation::DecisionGuard;
use crate::spell::{Spell, SpellRegisteredFn};
use crate::time;
use crate::unit::{Unit, UnitId};

/// Encounter settings.
///
/// # Example RON
///
/// ```ron
/// SimulationConfig(
///     duration: 180.0,
///     duration_variation: 15.0,
///     base_seed: 42,
///     iterations: 1000,
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Nominal encounter length.
    #[serde(with = "time::secs")]
    pub duration: Duration,
    /// Each iteration's length is drawn uniformly within this of nominal.
    #[serde(with = "time::secs")]
    pub duration_variation: Duration,
    /// Seed of iteration 0; iteration `i` uses `base_seed + i`.
    pub base_seed: u64,
    /// Iterations in a full run.
    pub iterations: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(180),
            duration_variation: Duration::ZERO,
            base_seed: 0,
            iterations: 1_000,
        }
    }
}

/// Callback scheduled through [`Simulation::schedule`].
pub type ScheduledFn = Box<dyn FnOnce(&mut Simulation) -> Result<()>>;

/// Everything the event queue can hold.
pub(crate) enum ScheduledAction {
    ExpireAura(AuraHandle),
    TickDot(DotHandle),
    CompleteCast { unit: UnitId },
    Deliver(SpellResult),
    Periodic(PeriodicHandle),
    Decide(UnitId),
    Callback(ScheduledFn),
}

impl ScheduledAction {
    const fn name(&self) -> &'static str {
        match self {
            Self::ExpireAura(_) => "expire_aura",
            Self::TickDot(_) => "tick_dot",
            Self::CompleteCast { .. } => "complete_cast",
            Self::Deliver(_) => "deliver",
            Self::Periodic(_) => "periodic",
            Self::Decide(_) => "decide",
            Self::Callback(_) => "callback",
        }
    }
}

/// One encounter and everything registered in it.
pub struct Simulation {
    pub(crate) config: SimulationConfig,
    pub(crate) queue: EventQueue<ScheduledAction>,
    pub(crate) rng: RngEngine,
    pub(crate) units: Vec<Unit>,
    pub(crate) spells: Vec<Spell>,
    pub(crate) auras: Vec<Aura>,
    pub(crate) dots: Vec<Dot>,
    pub(crate) timers: Vec<Timer>,
    pub(crate) periodics: Vec<PeriodicAction>,
    pub(crate) spell_registered: Vec<(UnitId, SpellRegisteredFn)>,
    pub(crate) decision_guard: DecisionGuard,
    pub(crate) end_time: Duration,
    pub(crate) iteration: u64,
    running: bool,
}

impl Simulation {
    /// Create an empty encounter.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            rng: RngEngine::new(config.base_seed),
            end_time: config.duration,
            config,
            queue: EventQueue::new(),
            units: Vec::new(),
            spells: Vec::new(),
            auras: Vec::new(),
            dots: Vec::new(),
            timers: Vec::new(),
            periodics: Vec::new(),
            spell_registered: Vec::new(),
            decision_guard: DecisionGuard::default(),
            iteration: 0,
            running: false,
        }
    }

    /// Encounter settings.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Current simulation time.
    #[must_use]
    pub const fn now(&self) -> Duration {
        self.queue.now()
    }

    /// End time of the current iteration.
    #[must_use]
    pub const fn end_time(&self) -> Duration {
        self.end_time
    }

    /// Time left in the current iteration.
    #[must_use]
    pub fn remaining_time(&self) -> Duration {
        self.end_time.saturating_sub(self.now())
    }

    /// Absolute time `delay` from now.
    ///
    /// # Errors
    ///
    /// [`SimError::InvariantViolation`] when the sum overflows.
    pub fn time_after(&self, delay: Duration) -> Result<Duration> {
        self.now().checked_add(delay).ok_or_else(|| {
            SimError::invariant(format!("{delay:?} after {:?} overflows", self.now()))
        })
    }

    /// Index of the current iteration.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Whether the queue is being driven.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Number of live pending actions.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn ensure_setup(&self, operation: &str) -> Result<()> {
        if self.running {
            return Err(SimError::setup(format!(
                "{operation} is only allowed before a run starts"
            )));
        }
        Ok(())
    }

    // ========================================================================
    // Randomness
    // ========================================================================

    /// Uniform draw in `[0, 1)`.
    pub fn rand_f64(&mut self) -> f64 {
        self.rng.rand_f64()
    }

    /// Uniform draw in `[low, high]`.
    pub fn roll(&mut self, low: f64, high: f64) -> f64 {
        self.rng.roll(low, high)
    }

    /// Probability gate for the effect named `key`, honoring its ICD.
    pub fn proc(&mut self, chance: f64, key: &str) -> bool {
        let now = self.now();
        self.rng.proc(chance, key, now)
    }

    /// Register an internal cooldown for a proc key.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] while running.
    pub fn register_proc_icd(&mut self, key: impl Into<String>, icd: Duration) -> Result<()> {
        self.ensure_setup("register_proc_icd")?;
        self.rng.procs_mut().register_icd(key, icd);
        Ok(())
    }

    /// The random source, for statistics.
    #[must_use]
    pub const fn rng(&self) -> &RngEngine {
        &self.rng
    }

    // ========================================================================
    // Scheduling
    // ========================================================================

    /// Schedule a callback at `due`.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidSchedule`] when `due` is before now.
    pub fn schedule(
        &mut self,
        due: Duration,
        callback: impl FnOnce(&mut Simulation) -> Result<()> + 'static,
    ) -> Result<PendingActionHandle> {
        self.queue
            .schedule(due, ScheduledAction::Callback(Box::new(callback)))
    }

    /// Schedule a callback `delay` from now.
    ///
    /// # Errors
    ///
    /// [`SimError::InvariantViolation`] when the due time overflows.
    pub fn schedule_after(
        &mut self,
        delay: Duration,
        callback: impl FnOnce(&mut Simulation) -> Result<()> + 'static,
    ) -> Result<PendingActionHandle> {
        let due = self.time_after(delay)?;
        self.schedule(due, callback)
    }

    /// Cancel a pending action. Returns `false` if it already fired.
    pub fn cancel(&mut self, handle: PendingActionHandle) -> bool {
        self.queue.cancel(handle)
    }

    /// Whether an action is still pending.
    #[must_use]
    pub fn is_pending(&self, handle: PendingActionHandle) -> bool {
        self.queue.is_pending(handle)
    }

    /// Fire the next action due at or before `until`.
    ///
    /// Returns `false` when nothing is due.
    ///
    /// # Errors
    ///
    /// Whatever the fired action returns.
    pub fn advance_to_next(&mut self, until: Duration) -> Result<bool> {
        let Some(fired) = self.queue.pop_next(until) else {
            return Ok(false);
        };
        tracing::trace!(
            due = ?fired.due,
            seq = fired.handle.sequence(),
            action = fired.action.name(),
            "Fired action"
        );
        self.dispatch(fired.action)?;
        #[cfg(feature = "debug-validation")]
        self.validate_pools()?;
        Ok(true)
    }

    /// Check every resource pool stays within `[0, capacity]`.
    #[cfg(feature = "debug-validation")]
    fn validate_pools(&self) -> Result<()> {
        use crate::ledger::ResourceKind;

        for unit in &self.units {
            for kind in [ResourceKind::Mana, ResourceKind::Health] {
                if let Some(pool) = unit.ledger().pool(kind) {
                    if pool.current < 0.0 || pool.current > pool.capacity {
                        return Err(SimError::invariant(format!(
                            "{kind:?} of '{}' out of range: {} / {}",
                            unit.name(),
                            pool.current,
                            pool.capacity
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Fire actions until the queue is empty or the next lies beyond `until`.
    ///
    /// # Errors
    ///
    /// The first error any action returns; the remaining queue is left as is.
    pub fn run(&mut self, until: Duration) -> Result<()> {
        let was_running = std::mem::replace(&mut self.running, true);
        let mut outcome = Ok(());
        while outcome.is_ok() {
            match self.advance_to_next(until) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => outcome = Err(err),
            }
        }
        self.running = was_running;
        outcome
    }

    fn dispatch(&mut self, action: ScheduledAction) -> Result<()> {
        match action {
            ScheduledAction::ExpireAura(aura) => self.expire_aura(aura),
            ScheduledAction::TickDot(dot) => self.fire_dot_tick(dot),
            ScheduledAction::CompleteCast { unit } => self.finish_hardcast(unit),
            ScheduledAction::Deliver(result) => self.deal_damage(&result),
            ScheduledAction::Periodic(periodic) => self.fire_periodic(periodic),
            ScheduledAction::Decide(unit) => self.decide(unit),
            ScheduledAction::Callback(callback) => callback(self),
        }
    }

    // ========================================================================
    // Iterations
    // ========================================================================

    /// Restore every component for a new iteration seeded with `seed`.
    ///
    /// Order: random source, queue and clock, timers, spells, units, auras,
    /// dots, periodic actions. Then the end time is drawn, mana regeneration
    /// starts, `on_reset` fires for every aura in registration order, and
    /// units with a rotation get a decision at time zero.
    ///
    /// # Errors
    ///
    /// Any `on_reset` or rotation reset error.
    pub fn reset(&mut self, seed: u64) -> Result<()> {
        self.rng.reseed(seed);
        self.queue.reset();
        self.decision_guard.reset();
        self.reset_timers();
        self.reset_spells();
        for unit in &mut self.units {
            unit.reset();
        }
        self.reset_auras();
        self.reset_dots();
        self.reset_periodics();

        self.end_time = self.draw_end_time();
        self.start_mana_regen()?;
        self.fire_on_reset()?;
        self.reset_rotations()
    }

    fn draw_end_time(&mut self) -> Duration {
        let variation = self.config.duration_variation.as_secs_f64();
        if variation <= 0.0 {
            return self.config.duration;
        }
        let secs = self.config.duration.as_secs_f64() + self.rng.roll(-variation, variation);
        time::ms((secs.max(0.0) * 1_000.0).round() as u64)
    }

    /// Run iteration `index` to its end time and collect its metrics.
    ///
    /// # Errors
    ///
    /// Any error raised during the iteration; the iteration is abandoned and
    /// the next [`reset`](Self::reset) restores a clean state.
    pub fn run_iteration(&mut self, index: u64) -> Result<IterationMetrics> {
        let seed = self.config.base_seed.wrapping_add(index);
        self.running = true;
        let outcome = self.drive_iteration(index, seed);
        self.running = false;
        outcome
    }

    fn drive_iteration(&mut self, index: u64, seed: u64) -> Result<IterationMetrics> {
        self.iteration = index;
        self.reset(seed)?;
        while self.advance_to_next(self.end_time)? {}
        self.queue.advance_to(self.end_time);

        let metrics = self.collect_metrics();
        tracing::debug!(
            iteration = index,
            seed,
            end = ?self.end_time,
            fingerprint = metrics.fingerprint,
            "Iteration complete"
        );
        Ok(metrics)
    }

    /// Run iterations `0..count` sequentially and aggregate them.
    ///
    /// # Errors
    ///
    /// The first iteration error.
    pub fn run_iterations(&mut self, count: u64) -> Result<AggregateStats> {
        let iterations = (0..count)
            .map(|index| self.run_iteration(index))
            .collect::<Result<Vec<_>>>()?;
        Ok(AggregateStats::from_iterations(&iterations))
    }

    /// Hash of the live state, for lockstep comparison mid-iteration.
    #[must_use]
    pub fn state_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();

        self.now().hash(&mut hasher);
        self.rng.seed().hash(&mut hasher);
        self.queue.len().hash(&mut hasher);

        for unit in &self.units {
            unit.id.hash(&mut hasher);
            for kind in [ResourceKind::Mana, ResourceKind::Health] {
                unit.ledger.available(kind).to_bits().hash(&mut hasher);
            }
            unit.cast_completes_at().hash(&mut hasher);
            unit.is_channeling().hash(&mut hasher);
            for (action, metrics) in &unit.actions {
                action.hash(&mut hasher);
                metrics.casts.hash(&mut hasher);
                metrics.damage.to_bits().hash(&mut hasher);
            }
        }
        for aura in &self.auras {
            aura.is_active().hash(&mut hasher);
            aura.stacks().hash(&mut hasher);
            aura.expires_at().hash(&mut hasher);
        }
        for dot in &self.dots {
            dot.tick_count().hash(&mut hasher);
        }
        for timer in &self.timers {
            timer.ready_at().hash(&mut hasher);
        }

        hasher.finish()
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(SimulationConfig::default())
    }
}

impl fmt::Debug for Simulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulation")
            .field("now", &self.now())
            .field("iteration", &self.iteration)
            .field("end_time", &self.end_time)
            .field("units", &self.units.len())
            .field("spells", &self.spells.len())
            .field("auras", &self.auras.len())
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}
