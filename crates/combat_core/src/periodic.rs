//! Fixed-period repeating actions.
//!
//! Used for mana regeneration and aura-driven drains. Periodic actions are
//! iteration-scoped: the list is cleared at every reset, so they are
//! scheduled from `on_reset`/`on_gain` hooks rather than at setup.

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Result, SimError};
use crate::ledger::ResourceKind;
use crate::queue::PendingActionHandle;
use crate::simulation::{ScheduledAction, Simulation};
use crate::spell::ActionId;
use crate::unit::UnitId;

/// Tag under which mana regeneration is recorded.
pub const MANA_REGEN: ActionId = ActionId::other(1);

/// Interval used when a unit has mp5 but no explicit regen.
pub const DEFAULT_REGEN_INTERVAL: Duration = Duration::from_secs(2);

/// Handle to a scheduled periodic action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodicHandle(pub(crate) usize);

/// Periodic callback, given the tick number starting at 1.
pub type PeriodicFn = Rc<dyn Fn(&mut Simulation, u32) -> Result<()>>;

/// Options for [`Simulation::schedule_periodic`].
#[derive(Clone)]
pub struct PeriodicOptions {
    /// Time between ticks.
    pub period: Duration,
    /// Number of ticks, `None` to repeat until cancelled.
    pub num_ticks: Option<u32>,
    /// Fire the first tick now instead of after one period.
    pub tick_immediately: bool,
    /// Callback.
    pub on_tick: PeriodicFn,
}

impl PeriodicOptions {
    /// Repeat `on_tick` every `period` until cancelled.
    #[must_use]
    pub fn new(
        period: Duration,
        on_tick: impl Fn(&mut Simulation, u32) -> Result<()> + 'static,
    ) -> Self {
        Self {
            period,
            num_ticks: None,
            tick_immediately: false,
            on_tick: Rc::new(on_tick),
        }
    }

    /// Stop after `ticks` ticks.
    #[must_use]
    pub const fn with_num_ticks(mut self, ticks: u32) -> Self {
        self.num_ticks = Some(ticks);
        self
    }

    /// Fire the first tick immediately.
    #[must_use]
    pub const fn tick_immediately(mut self) -> Self {
        self.tick_immediately = true;
        self
    }
}

impl fmt::Debug for PeriodicOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicOptions")
            .field("period", &self.period)
            .field("num_ticks", &self.num_ticks)
            .field("tick_immediately", &self.tick_immediately)
            .finish_non_exhaustive()
    }
}

pub(crate) struct PeriodicAction {
    options: PeriodicOptions,
    ticks: u32,
    pending: Option<PendingActionHandle>,
    stopped: bool,
}

impl Simulation {
    /// Schedule a repeating action.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] for a zero period; callback errors when ticking
    /// immediately.
    pub fn schedule_periodic(&mut self, options: PeriodicOptions) -> Result<PeriodicHandle> {
        if options.period.is_zero() {
            return Err(SimError::setup("periodic action needs a positive period"));
        }
        let handle = PeriodicHandle(self.periodics.len());
        let immediate = options.tick_immediately;
        self.periodics.push(PeriodicAction {
            options,
            ticks: 0,
            pending: None,
            stopped: false,
        });
        if immediate {
            self.fire_periodic(handle)?;
        } else {
            self.schedule_next_period(handle)?;
        }
        Ok(handle)
    }

    /// Stop a periodic action. Returns `false` if it had already finished
    /// or was cancelled before.
    pub fn cancel_periodic(&mut self, handle: PeriodicHandle) -> bool {
        let Some(action) = self.periodics.get_mut(handle.0) else {
            return false;
        };
        if action.stopped {
            return false;
        }
        action.stopped = true;
        match action.pending.take() {
            Some(pending) => self.queue.cancel(pending),
            // Cancelled from inside its own callback.
            None => true,
        }
    }

    /// Whether a periodic action still has ticks pending.
    #[must_use]
    pub fn is_periodic_active(&self, handle: PeriodicHandle) -> bool {
        self.periodics
            .get(handle.0)
            .is_some_and(|action| !action.stopped && action.pending.is_some())
    }

    fn schedule_next_period(&mut self, handle: PeriodicHandle) -> Result<()> {
        let action = &self.periodics[handle.0];
        if action.stopped
            || action
                .options
                .num_ticks
                .is_some_and(|limit| action.ticks >= limit)
        {
            return Ok(());
        }
        let due = self.time_after(action.options.period)?;
        let pending = self
            .queue
            .schedule(due, ScheduledAction::Periodic(handle))?;
        self.periodics[handle.0].pending = Some(pending);
        Ok(())
    }

    pub(crate) fn fire_periodic(&mut self, handle: PeriodicHandle) -> Result<()> {
        let action = &mut self.periodics[handle.0];
        action.pending = None;
        action.ticks += 1;
        let tick = action.ticks;
        let on_tick = Rc::clone(&action.options.on_tick);
        on_tick(self, tick)?;
        if self.periodics[handle.0].pending.is_none() {
            self.schedule_next_period(handle)?;
        }
        Ok(())
    }

    /// Start mana regeneration for every unit configured with it.
    pub(crate) fn start_mana_regen(&mut self) -> Result<()> {
        for index in 0..self.units.len() {
            let unit = &self.units[index];
            let regen = match unit.config.mana_regen {
                Some(regen) => Some((regen.per_tick, regen.interval)),
                None if unit.stats.mp5 > 0.0 => Some((0.0, DEFAULT_REGEN_INTERVAL)),
                None => None,
            };
            let Some((per_tick, interval)) = regen else {
                continue;
            };
            if unit.ledger.pool(ResourceKind::Mana).is_none() {
                continue;
            }
            let id = UnitId(index);
            let handle = self.schedule_periodic(PeriodicOptions::new(interval, move |sim, _| {
                let mp5 = sim.unit(id)?.stats.mp5;
                let amount = per_tick + mp5 * interval.as_secs_f64() / 5.0;
                sim.gain(id, ResourceKind::Mana, amount, MANA_REGEN)?;
                Ok(())
            }))?;
            self.units[index].regen = Some(handle);
        }
        Ok(())
    }

    pub(crate) fn reset_periodics(&mut self) {
        self.periodics.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::data::{CombatStats, ManaRegen, UnitConfig};
    use crate::simulation::SimulationConfig;
    use crate::time::ms;

    #[test]
    fn test_periodic_fires_fixed_number_of_ticks() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let ticks = Rc::clone(&log);
        sim.schedule_periodic(
            PeriodicOptions::new(ms(1_000), move |sim, tick| {
                ticks.borrow_mut().push((sim.now(), tick));
                Ok(())
            })
            .with_num_ticks(3),
        )
        .unwrap();
        sim.run(Duration::from_secs(10)).unwrap();

        assert_eq!(
            *log.borrow(),
            vec![(ms(1_000), 1), (ms(2_000), 2), (ms(3_000), 3)]
        );
    }

    #[test]
    fn test_tick_immediately_fires_at_start() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let ticks = Rc::clone(&log);
        sim.schedule_periodic(
            PeriodicOptions::new(ms(500), move |sim, _| {
                ticks.borrow_mut().push(sim.now());
                Ok(())
            })
            .with_num_ticks(2)
            .tick_immediately(),
        )
        .unwrap();
        sim.run(Duration::from_secs(5)).unwrap();

        assert_eq!(*log.borrow(), vec![Duration::ZERO, ms(500)]);
    }

    #[test]
    fn test_cancel_stops_ticks() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let log = Rc::new(RefCell::new(0));
        let ticks = Rc::clone(&log);
        let handle = sim
            .schedule_periodic(PeriodicOptions::new(ms(1_000), move |_, _| {
                *ticks.borrow_mut() += 1;
                Ok(())
            }))
            .unwrap();
        sim.schedule(ms(2_500), move |sim| {
            sim.cancel_periodic(handle);
            Ok(())
        })
        .unwrap();
        sim.run(Duration::from_secs(10)).unwrap();

        assert_eq!(*log.borrow(), 2);
        assert!(!sim.is_periodic_active(handle));
    }

    #[test]
    fn test_zero_period_rejected() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let err = sim
            .schedule_periodic(PeriodicOptions::new(Duration::ZERO, |_, _| Ok(())))
            .unwrap_err();
        assert!(err.is_fatal_setup());
    }

    #[test]
    fn test_mana_regen_restores_mana() {
        let mut sim = Simulation::new(SimulationConfig::default());
        let mut config = UnitConfig::player(
            "Mage",
            CombatStats {
                mana: Some(1_000.0),
                mp5: 10.0,
                ..CombatStats::default()
            },
        );
        config.mana_regen = Some(ManaRegen {
            per_tick: 20.0,
            interval: ms(2_000),
        });
        let mage = sim.add_unit(config).unwrap();
        sim.spend(mage, ResourceKind::Mana, 500.0, ActionId::spell(133))
            .unwrap();
        sim.start_mana_regen().unwrap();
        sim.run(ms(4_000)).unwrap();

        // Two ticks of 20 + 10 * 2 / 5.
        let mana = sim.available(mage, ResourceKind::Mana).unwrap();
        assert!((mana - 548.0).abs() < 1e-9);
    }
}
