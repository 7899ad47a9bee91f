//! Per-unit resource pools and their metric flows.
//!
//! Each unit owns one [`ResourceLedger`]. A pool of a given kind may be
//! absent, which means the unit has an unlimited supply of it (a training
//! dummy's health, for example). Every mutation is recorded under the
//! [`ActionId`] that caused it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::simulation::Simulation;
use crate::spell::ActionId;
use crate::unit::UnitId;

/// Kinds of depletable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Spell casting resource.
    Mana,
    /// Hit points.
    Health,
}

/// A bounded pool of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourcePool {
    /// Current amount.
    pub current: f64,
    /// Maximum amount.
    pub capacity: f64,
}

impl ResourcePool {
    /// Full pool with the given capacity.
    #[must_use]
    pub const fn full(capacity: f64) -> Self {
        Self {
            current: capacity,
            capacity,
        }
    }

    /// Room left before the pool is full.
    #[must_use]
    pub fn headroom(&self) -> f64 {
        (self.capacity - self.current).max(0.0)
    }
}

/// Gained and spent totals recorded under one tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceFlow {
    /// Total gained after clamping.
    pub gained: f64,
    /// Total spent, at nominal value for forced spends.
    pub spent: f64,
    /// Number of mutations recorded.
    pub events: u64,
}

/// Resource state of one unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLedger {
    mana: Option<ResourcePool>,
    health: Option<ResourcePool>,
    initial_mana: Option<ResourcePool>,
    initial_health: Option<ResourcePool>,
    flows: BTreeMap<(ResourceKind, ActionId), ResourceFlow>,
}

impl ResourceLedger {
    /// Create a ledger with optional full pools.
    #[must_use]
    pub fn new(mana: Option<f64>, health: Option<f64>) -> Self {
        let mana = mana.map(ResourcePool::full);
        let health = health.map(ResourcePool::full);
        Self {
            mana,
            health,
            initial_mana: mana,
            initial_health: health,
            flows: BTreeMap::new(),
        }
    }

    /// Pool of a kind, `None` when unlimited.
    #[must_use]
    pub const fn pool(&self, kind: ResourceKind) -> Option<&ResourcePool> {
        match kind {
            ResourceKind::Mana => self.mana.as_ref(),
            ResourceKind::Health => self.health.as_ref(),
        }
    }

    fn pool_mut(&mut self, kind: ResourceKind) -> Option<&mut ResourcePool> {
        match kind {
            ResourceKind::Mana => self.mana.as_mut(),
            ResourceKind::Health => self.health.as_mut(),
        }
    }

    /// Amount currently available; infinite when the pool is unlimited.
    #[must_use]
    pub fn available(&self, kind: ResourceKind) -> f64 {
        self.pool(kind).map_or(f64::INFINITY, |pool| pool.current)
    }

    /// Check whether a cost can be paid.
    #[must_use]
    pub fn can_afford(&self, kind: ResourceKind, amount: f64) -> bool {
        self.available(kind) >= amount
    }

    /// Spend if available.
    ///
    /// Returns `true` if the transaction succeeded. A failed spend leaves the
    /// ledger untouched; negative and NaN amounts always fail.
    pub fn spend(&mut self, kind: ResourceKind, amount: f64, tag: ActionId) -> bool {
        if !is_amount(amount) || !self.can_afford(kind, amount) {
            return false;
        }
        if let Some(pool) = self.pool_mut(kind) {
            pool.current -= amount;
        }
        self.record(kind, tag, 0.0, amount);
        true
    }

    /// Spend unconditionally, flooring the pool at zero.
    ///
    /// The nominal amount is recorded under `tag` even when the pool could
    /// not cover it. Negative and NaN amounts are ignored.
    pub fn spend_forced(&mut self, kind: ResourceKind, amount: f64, tag: ActionId) {
        if !is_amount(amount) {
            return;
        }
        if let Some(pool) = self.pool_mut(kind) {
            pool.current = (pool.current - amount).max(0.0);
        }
        self.record(kind, tag, 0.0, amount);
    }

    /// Gain up to capacity.
    ///
    /// Returns the amount actually gained; negative and NaN amounts gain
    /// nothing.
    pub fn gain(&mut self, kind: ResourceKind, amount: f64, tag: ActionId) -> f64 {
        if !is_amount(amount) {
            return 0.0;
        }
        let gained = match self.pool_mut(kind) {
            Some(pool) => {
                let gained = amount.min(pool.headroom());
                pool.current += gained;
                gained
            }
            None => amount,
        };
        self.record(kind, tag, gained, 0.0);
        gained
    }

    /// Flows recorded this iteration.
    pub fn flows(&self) -> impl Iterator<Item = (ResourceKind, ActionId, ResourceFlow)> + '_ {
        self.flows
            .iter()
            .map(|(&(kind, tag), &flow)| (kind, tag, flow))
    }

    /// Restore initial pools and clear flows.
    pub fn reset(&mut self) {
        self.mana = self.initial_mana;
        self.health = self.initial_health;
        self.flows.clear();
    }

    fn record(&mut self, kind: ResourceKind, tag: ActionId, gained: f64, spent: f64) {
        let flow = self.flows.entry((kind, tag)).or_default();
        flow.gained += gained;
        flow.spent += spent;
        flow.events += 1;
    }
}

fn is_amount(amount: f64) -> bool {
    amount >= 0.0
}

impl Simulation {
    /// Spend a unit's resource if it can afford it.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`](crate::error::SimError::NotFound) for an unknown unit.
    pub fn spend(
        &mut self,
        unit: UnitId,
        kind: ResourceKind,
        amount: f64,
        tag: ActionId,
    ) -> Result<bool> {
        Ok(self.unit_mut(unit)?.ledger.spend(kind, amount, tag))
    }

    /// Spend a unit's resource unconditionally, flooring at zero.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`](crate::error::SimError::NotFound) for an unknown unit.
    pub fn spend_forced(
        &mut self,
        unit: UnitId,
        kind: ResourceKind,
        amount: f64,
        tag: ActionId,
    ) -> Result<()> {
        self.unit_mut(unit)?.ledger.spend_forced(kind, amount, tag);
        Ok(())
    }

    /// Grant a unit a resource, scaled by its mana-gain multiplier for mana.
    ///
    /// Returns the amount actually gained.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`](crate::error::SimError::NotFound) for an unknown unit.
    pub fn gain(
        &mut self,
        unit: UnitId,
        kind: ResourceKind,
        amount: f64,
        tag: ActionId,
    ) -> Result<f64> {
        let unit = self.unit_mut(unit)?;
        let amount = match kind {
            ResourceKind::Mana => amount * unit.pseudo.mana_gain_multiplier,
            ResourceKind::Health => amount,
        };
        Ok(unit.ledger.gain(kind, amount, tag))
    }

    /// Current amount of a unit's resource; infinite when unlimited.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`](crate::error::SimError::NotFound) for an unknown unit.
    pub fn available(&self, unit: UnitId, kind: ResourceKind) -> Result<f64> {
        Ok(self.unit(unit)?.ledger.available(kind))
    }
}
