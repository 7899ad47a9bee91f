//! Readiness gates: cooldowns and the global cooldown.
//!
//! Timers live in an arena owned by the simulation, so several spells can
//! gate on one shared timer by holding the same [`TimerHandle`].

use std::time::Duration;

use crate::error::{Result, SimError};
use crate::simulation::Simulation;

/// Handle to a timer in the simulation's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(pub(crate) usize);

/// A ready-at timestamp.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timer {
    ready_at: Duration,
}

impl Timer {
    /// Timer that is ready immediately.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ready_at: Duration::ZERO,
        }
    }

    /// Time at which the timer becomes ready.
    #[must_use]
    pub const fn ready_at(&self) -> Duration {
        self.ready_at
    }

    /// Whether the timer is ready at `now`.
    #[must_use]
    pub fn is_ready(&self, now: Duration) -> bool {
        now >= self.ready_at
    }

    /// Time remaining until ready, zero when already ready.
    #[must_use]
    pub fn time_to_ready(&self, now: Duration) -> Duration {
        self.ready_at.saturating_sub(now)
    }

    /// Push the ready time to `now + duration`.
    pub fn use_for(&mut self, now: Duration, duration: Duration) {
        self.ready_at = now.saturating_add(duration);
    }

    /// Set the ready time directly.
    pub fn set(&mut self, ready_at: Duration) {
        self.ready_at = ready_at;
    }

    /// Clear the timer so it is ready at `now`.
    pub fn reset(&mut self, now: Duration) {
        self.ready_at = now;
    }
}

/// A fixed cooldown duration bound to a (possibly shared) timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    /// Timer gating the ability.
    pub timer: TimerHandle,
    /// Time between uses.
    pub duration: Duration,
}

impl Simulation {
    /// Allocate a timer, typically to share between several spells.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] while an iteration is running.
    pub fn new_timer(&mut self) -> Result<TimerHandle> {
        self.ensure_setup("new_timer")?;
        let handle = TimerHandle(self.timers.len());
        self.timers.push(Timer::new());
        Ok(handle)
    }

    /// Timer by handle.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a handle from another simulation.
    pub fn timer(&self, handle: TimerHandle) -> Result<&Timer> {
        self.timers
            .get(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("timer #{}", handle.0)))
    }

    /// Mutable timer by handle.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a handle from another simulation.
    pub fn timer_mut(&mut self, handle: TimerHandle) -> Result<&mut Timer> {
        self.timers
            .get_mut(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("timer #{}", handle.0)))
    }

    /// Whether a cooldown is ready now.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign timer handle.
    pub fn is_cooldown_ready(&self, cooldown: Cooldown) -> Result<bool> {
        Ok(self.timer(cooldown.timer)?.is_ready(self.now()))
    }

    /// Start a cooldown at the current time.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a foreign timer handle.
    pub fn use_cooldown(&mut self, cooldown: Cooldown) -> Result<()> {
        let now = self.now();
        self.timer_mut(cooldown.timer)?
            .use_for(now, cooldown.duration);
        Ok(())
    }

    pub(crate) fn reset_timers(&mut self) {
        for timer in &mut self.timers {
            timer.reset(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ms;

    #[test]
    fn test_eight_second_cooldown_boundary() {
        let mut timer = Timer::new();
        timer.use_for(Duration::ZERO, Duration::from_secs(8));

        assert!(!timer.is_ready(ms(7_999)));
        assert!(timer.is_ready(ms(8_000)));
        assert_eq!(timer.time_to_ready(ms(7_999)), ms(1));
        assert_eq!(timer.time_to_ready(ms(9_000)), Duration::ZERO);
    }

    #[test]
    fn test_reset_makes_ready_now() {
        let mut timer = Timer::new();
        timer.use_for(ms(1_000), Duration::from_secs(30));
        assert!(!timer.is_ready(ms(2_000)));

        timer.reset(ms(2_000));
        assert!(timer.is_ready(ms(2_000)));
        assert_eq!(timer.ready_at(), ms(2_000));
    }

    #[test]
    fn test_new_timer_is_ready() {
        assert!(Timer::new().is_ready(Duration::ZERO));
    }
}
