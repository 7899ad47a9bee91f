//! # Combat Core
//!
//! Discrete-event engine for estimating the damage output of spell-casting
//! units over a fixed-length encounter.
//!
//! This crate contains **only** deterministic logic:
//! - No rendering
//! - No IO
//! - No system randomness (one seeded ChaCha stream per iteration)
//! - No wall-clock time (an event queue drives a virtual clock)
//!
//! This separation enables:
//! - Monte Carlo batches that are reproducible from a seed
//! - Headless batch runners fanning iterations out over threads
//! - Determinism testing
//!
//! ## Crate Structure
//!
//! - [`simulation`] - Encounter loop, iteration reset and run control
//! - [`queue`] - Time-ordered action queue with cancellation
//! - [`rng`] - Seeded random source and proc bookkeeping
//! - [`unit`] - Units, their stats and cast state
//! - [`spell`] - Spell definitions and per-unit registration
//! - [`cast`] - Cast validation, hardcasts, channels and travel time
//! - [`outcome`] - Hit tables, resistances and damage application
//! - [`aura`] - Timed effects with stacks and lifecycle hooks
//! - [`dot`] - Periodic damage bound to an aura
//! - [`periodic`] - Repeating actions and mana regeneration
//! - [`cooldown`] - Timers and cooldowns
//! - [`ledger`] - Resource pools with per-source accounting
//! - [`rotation`] - The decision seam
//! - [`metrics`] - Per-iteration metrics and aggregates
//! - [`data`] - RON-backed unit and item data

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod aura;
pub mod cast;
pub mod cooldown;
pub mod data;
pub mod dot;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod outcome;
pub mod periodic;
pub mod queue;
pub mod rng;
pub mod rotation;
pub mod simulation;
pub mod spell;
pub mod time;
pub mod unit;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::aura::{AuraArray, AuraConfig, AuraHandle};
    pub use crate::cast::{CastFailure, CastStatus};
    pub use crate::cooldown::{Cooldown, TimerHandle};
    pub use crate::data::{CombatStats, ItemData, ManaRegen, UnitClass, UnitConfig};
    pub use crate::dot::{DotConfig, DotHandle};
    pub use crate::error::{Result, SimError};
    pub use crate::ledger::ResourceKind;
    pub use crate::metrics::{AggregateStats, DpsSummary, IterationMetrics, UnitMetrics};
    pub use crate::outcome::{Outcome, OutcomeKind, SpellResult};
    pub use crate::periodic::{PeriodicHandle, PeriodicOptions};
    pub use crate::queue::PendingActionHandle;
    pub use crate::rotation::{Decision, Rotation};
    pub use crate::simulation::{Simulation, SimulationConfig};
    pub use crate::spell::{
        ActionId, CastConfig, CooldownConfig, DefenseType, ProcMask, SpellConfig, SpellFlags,
        SpellHandle, SpellSchool,
    };
    pub use crate::unit::{UnitId, UnitKind};
}
