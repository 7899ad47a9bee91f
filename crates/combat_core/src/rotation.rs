//! Decision-layer seam.
//!
//! A [`Rotation`] picks what a unit does next. The engine invokes it at
//! iteration start and whenever the unit becomes free again (cast
//! completion, channel end, interrupt, GCD ready, or the time it asked to
//! wait for).

use std::time::Duration;

use crate::error::{Result, SimError};
use crate::simulation::{ScheduledAction, Simulation};
use crate::unit::UnitId;

/// Decisions in one instant beyond which a rotation is considered stuck.
pub const MAX_DECISIONS_PER_INSTANT: u32 = 1_000;

/// What the engine should do after a rotation acted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Call again when the unit is next free.
    Continue,
    /// Call again at the given time.
    WaitUntil(Duration),
    /// Stop calling for the rest of the iteration.
    Done,
}

/// Per-unit decision logic.
pub trait Rotation {
    /// Prepare for a new iteration.
    ///
    /// # Errors
    ///
    /// Implementation-defined.
    fn reset(&mut self, _sim: &mut Simulation, _unit: UnitId) -> Result<()> {
        Ok(())
    }

    /// Act for `unit` at the current time.
    ///
    /// # Errors
    ///
    /// Implementation-defined; an error aborts the iteration.
    fn act(&mut self, sim: &mut Simulation, unit: UnitId) -> Result<Decision>;
}

impl<F> Rotation for F
where
    F: FnMut(&mut Simulation, UnitId) -> Result<Decision>,
{
    fn act(&mut self, sim: &mut Simulation, unit: UnitId) -> Result<Decision> {
        self(sim, unit)
    }
}

impl Simulation {
    /// Install the decision logic of a unit.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] while running; [`SimError::NotFound`] for an
    /// unknown unit.
    pub fn set_rotation(&mut self, unit: UnitId, rotation: impl Rotation + 'static) -> Result<()> {
        self.ensure_setup("set_rotation")?;
        self.unit_mut(unit)?.rotation = Some(Box::new(rotation));
        Ok(())
    }

    /// Ask for a decision of `unit` at `at`, keeping an earlier request.
    ///
    /// No-op for units without a rotation or whose rotation is done.
    ///
    /// # Errors
    ///
    /// [`SimError::InvalidSchedule`] when `at` is in the past.
    pub fn request_decision(&mut self, unit: UnitId, at: Duration) -> Result<()> {
        let state = self.unit(unit)?;
        if state.rotation_done || (state.rotation.is_none() && !self.deciding(unit)) {
            return Ok(());
        }
        if let Some((pending_at, pending)) = state.pending_decision {
            if pending_at <= at && self.queue.is_pending(pending) {
                return Ok(());
            }
            self.queue.cancel(pending);
        }
        let pending = self.queue.schedule(at, ScheduledAction::Decide(unit))?;
        self.units[unit.0].pending_decision = Some((at, pending));
        Ok(())
    }

    fn deciding(&self, unit: UnitId) -> bool {
        self.decision_guard.unit == Some(unit)
    }

    pub(crate) fn reset_rotations(&mut self) -> Result<()> {
        for index in 0..self.units.len() {
            let id = UnitId(index);
            let Some(mut rotation) = self.units[index].rotation.take() else {
                continue;
            };
            let result = rotation.reset(self, id);
            self.units[index].rotation = Some(rotation);
            result?;
            self.request_decision(id, self.now())?;
        }
        Ok(())
    }

    pub(crate) fn decide(&mut self, unit: UnitId) -> Result<()> {
        self.units[unit.0].pending_decision = None;
        if self.units[unit.0].rotation_done {
            return Ok(());
        }
        let now = self.now();
        self.decision_guard.record(now)?;

        let Some(mut rotation) = self.units[unit.0].rotation.take() else {
            return Ok(());
        };
        self.decision_guard.unit = Some(unit);
        let result = rotation.act(self, unit);
        self.decision_guard.unit = None;
        self.units[unit.0].rotation = Some(rotation);

        match result? {
            Decision::Continue => self.wake_when_free(unit),
            Decision::WaitUntil(at) => self.request_decision(unit, at.max(now)),
            Decision::Done => {
                let state = &mut self.units[unit.0];
                state.rotation_done = true;
                if let Some((_, pending)) = state.pending_decision.take() {
                    self.queue.cancel(pending);
                }
                Ok(())
            }
        }
    }

    fn wake_when_free(&mut self, unit: UnitId) -> Result<()> {
        let now = self.now();
        let state = &self.units[unit.0];
        if let Some(completes_at) = state.cast_completes_at() {
            return self.request_decision(unit, completes_at);
        }
        if state.is_channeling() {
            // The channel's end requests the next decision.
            return Ok(());
        }
        let gcd_ready = self.timer(state.gcd)?.ready_at();
        if gcd_ready > now {
            return self.request_decision(unit, gcd_ready);
        }
        match self.queue.peek_time() {
            Some(next) => self.request_decision(unit, next.max(now)),
            None => Ok(()),
        }
    }
}

/// Detects rotations that keep deciding without time passing.
#[derive(Debug, Default)]
pub(crate) struct DecisionGuard {
    at: Duration,
    count: u32,
    unit: Option<UnitId>,
}

impl DecisionGuard {
    fn record(&mut self, now: Duration) -> Result<()> {
        if now == self.at {
            self.count += 1;
        } else {
            self.at = now;
            self.count = 1;
        }
        if self.count > MAX_DECISIONS_PER_INSTANT {
            return Err(SimError::invariant(format!(
                "more than {MAX_DECISIONS_PER_INSTANT} decisions at {now:?}"
            )));
        }
        Ok(())
    }

    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
