//! Data structures for unit and equipment configuration.
//!
//! Pure data types deserialized from RON. This module contains no IO; file
//! loading is handled by the headless runner.

mod item_data;
mod unit_data;

pub use item_data::{ArmorSubclass, ClassMask, ItemData, ItemSlot, StatVector, WeaponSubclass};
pub use unit_data::{CombatStats, ManaRegen, UnitClass, UnitConfig};
