//! Priority-list rotation for scripted casters.
//!
//! The caster walks its priority list top to bottom and casts the first
//! spell whose condition holds and which the engine accepts. Off-GCD
//! casts do not end the walk, so an instant cooldown can be paired with a
//! filler in the same instant.

use combat_core::aura::AuraHandle;
use combat_core::error::Result;
use combat_core::ledger::ResourceKind;
use combat_core::rotation::{Decision, Rotation};
use combat_core::simulation::Simulation;
use combat_core::spell::SpellHandle;
use combat_core::unit::UnitId;

/// Gate on a single priority entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepCondition {
    /// Always eligible.
    Always,
    /// Only while the buff is up.
    BuffActive(AuraHandle),
    /// Only while the buff is down.
    BuffInactive(AuraHandle),
    /// Only while the spell's dot is not ticking on the target.
    DotInactive,
    /// Only while mana is at or above this fraction of the pool.
    ManaAbove(f64),
}

/// One entry of the priority list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RotationStep {
    /// Spell to cast.
    pub spell: SpellHandle,
    /// When it may be cast.
    pub condition: StepCondition,
}

/// Casts the highest-priority eligible spell on a fixed target.
#[derive(Debug, Clone)]
pub struct PriorityRotation {
    target: UnitId,
    use_major_cooldowns: bool,
    steps: Vec<RotationStep>,
}

impl PriorityRotation {
    /// Create a rotation over `steps`, highest priority first.
    #[must_use]
    pub fn new(target: UnitId, use_major_cooldowns: bool, steps: Vec<RotationStep>) -> Self {
        Self {
            target,
            use_major_cooldowns,
            steps,
        }
    }

    /// Priority entries, highest first.
    #[must_use]
    pub fn steps(&self) -> &[RotationStep] {
        &self.steps
    }

    fn eligible(&self, sim: &Simulation, unit: UnitId, step: &RotationStep) -> Result<bool> {
        Ok(match step.condition {
            StepCondition::Always => true,
            StepCondition::BuffActive(aura) => sim.aura(aura)?.is_active(),
            StepCondition::BuffInactive(aura) => !sim.aura(aura)?.is_active(),
            StepCondition::DotInactive => match sim.spell(step.spell)?.dot(self.target) {
                Some(dot) => !sim.aura(sim.dot(dot)?.aura())?.is_active(),
                None => true,
            },
            StepCondition::ManaAbove(fraction) => sim
                .unit(unit)?
                .ledger()
                .pool(ResourceKind::Mana)
                .map_or(true, |pool| pool.current >= fraction * pool.capacity),
        })
    }

    /// Whether the unit can still act in this instant.
    fn is_free(sim: &Simulation, unit: UnitId) -> Result<bool> {
        let state = sim.unit(unit)?;
        if state.is_casting() || state.is_channeling() {
            return Ok(false);
        }
        sim.is_gcd_ready(unit)
    }
}

impl Rotation for PriorityRotation {
    fn act(&mut self, sim: &mut Simulation, unit: UnitId) -> Result<Decision> {
        if self.use_major_cooldowns {
            sim.use_ready_major_cooldowns(unit, self.target)?;
        }
        for step in &self.steps {
            if !Self::is_free(sim, unit)? {
                break;
            }
            if !self.eligible(sim, unit, step)? {
                continue;
            }
            if sim.try_cast(step.spell, self.target)?.is_success() {
                tracing::trace!(?unit, spell = ?step.spell, now = ?sim.now(), "Rotation cast");
            }
        }
        Ok(Decision::Continue)
    }
}
