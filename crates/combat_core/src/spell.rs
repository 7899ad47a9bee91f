//! Spell templates and their registration.
//!
//! A [`SpellConfig`] is immutable content: school, flags, cast policy, cost,
//! damage parameters and the named callback hooks. Registering it binds it to
//! a casting unit and returns a [`SpellHandle`], the only way the rest of the
//! engine refers to it. Runtime modifiers on a [`Spell`] are restored at the
//! start of every iteration.

use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::cooldown::{Cooldown, TimerHandle};
use crate::dot::{DotConfig, DotHandle};
use crate::error::{Result, SimError};
use crate::outcome::OutcomeKind;
use crate::simulation::Simulation;
use crate::unit::UnitId;

/// Default global cooldown interval.
pub const DEFAULT_GCD: Duration = Duration::from_millis(1500);

/// Crit multiplier for magic damage when a spell does not override it.
pub const DEFAULT_SPELL_CRIT_MULTIPLIER: f64 = 1.5;

/// Crit multiplier for physical damage when a spell does not override it.
pub const DEFAULT_PHYSICAL_CRIT_MULTIPLIER: f64 = 2.0;

// ============================================================================
// Identity
// ============================================================================

/// What an [`ActionId`] identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActionKind {
    /// A spell id.
    Spell(u32),
    /// An item id.
    Item(u32),
    /// Anything else (regeneration, encounter effects).
    Other(u32),
}

/// Identity of an action, used as metric tag and spell dedupe key.
///
/// The tag distinguishes sub-actions sharing an id, such as the per-tick
/// missile of a channeled spell. Displayed as `spell:5143` or `spell:5143#1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId {
    /// Identified entity.
    pub kind: ActionKind,
    /// Sub-action tag, zero when unused.
    pub tag: i32,
}

impl ActionId {
    /// Identity of a spell.
    #[must_use]
    pub const fn spell(id: u32) -> Self {
        Self {
            kind: ActionKind::Spell(id),
            tag: 0,
        }
    }

    /// Identity of an item.
    #[must_use]
    pub const fn item(id: u32) -> Self {
        Self {
            kind: ActionKind::Item(id),
            tag: 0,
        }
    }

    /// Identity of a non-spell, non-item source.
    #[must_use]
    pub const fn other(id: u32) -> Self {
        Self {
            kind: ActionKind::Other(id),
            tag: 0,
        }
    }

    /// Same identity with a different tag.
    #[must_use]
    pub const fn with_tag(self, tag: i32) -> Self {
        Self {
            kind: self.kind,
            tag,
        }
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::other(0)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActionKind::Spell(id) => write!(f, "spell:{id}")?,
            ActionKind::Item(id) => write!(f, "item:{id}")?,
            ActionKind::Other(id) => write!(f, "other:{id}")?,
        }
        if self.tag != 0 {
            write!(f, "#{}", self.tag)?;
        }
        Ok(())
    }
}

/// Error parsing an [`ActionId`] from text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid action id '{0}': expected kind:id or kind:id#tag")]
pub struct ParseActionIdError(String);

impl FromStr for ActionId {
    type Err = ParseActionIdError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ParseActionIdError(s.to_owned());
        let (kind, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (id, tag) = match rest.split_once('#') {
            Some((id, tag)) => (id, tag.parse::<i32>().map_err(|_| invalid())?),
            None => (rest, 0),
        };
        let id = id.parse::<u32>().map_err(|_| invalid())?;
        let kind = match kind {
            "spell" => ActionKind::Spell(id),
            "item" => ActionKind::Item(id),
            "other" => ActionKind::Other(id),
            _ => return Err(invalid()),
        };
        Ok(Self { kind, tag })
    }
}

impl Serialize for ActionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ActionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Damage school of a spell.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum SpellSchool {
    /// Physical damage.
    #[default]
    Physical,
    /// Arcane magic.
    Arcane,
    /// Fire magic.
    Fire,
    /// Frost magic.
    Frost,
    /// Holy magic.
    Holy,
    /// Nature magic.
    Nature,
    /// Shadow magic.
    Shadow,
}

impl SpellSchool {
    /// Number of schools.
    pub const COUNT: usize = 7;

    /// Every school in declaration order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Physical,
        Self::Arcane,
        Self::Fire,
        Self::Frost,
        Self::Holy,
        Self::Nature,
        Self::Shadow,
    ];

    /// Dense index for per-school tables.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Which avoidance table an attempt is rolled against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DefenseType {
    /// No avoidance (self-buffs, utility).
    None,
    /// Spell hit and resistance.
    #[default]
    Magic,
    /// Melee miss and dodge.
    Melee,
    /// Ranged miss and dodge.
    Ranged,
}

impl DefenseType {
    /// Whether this defense type uses the physical attack table.
    #[must_use]
    pub const fn is_physical(self) -> bool {
        matches!(self, Self::Melee | Self::Ranged)
    }
}

bitflags! {
    /// Behavioral flags of a spell.
    ///
    /// Written in RON as `SpellFlags("CHANNELED | BINARY")`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct SpellFlags: u32 {
        /// Applies its dot as a channel; the caster is busy until it ends.
        const CHANNELED           = 1 << 0;
        /// Fully resisted or not at all; no partial resists.
        const BINARY              = 1 << 1;
        /// Does not fire `on_cast_complete` hooks.
        const NO_ON_CAST_COMPLETE = 1 << 2;
        /// Not recorded in per-action metrics.
        const NO_METRICS          = 1 << 3;
        /// Skips resistance entirely.
        const IGNORE_RESISTANCES  = 1 << 4;
    }
}

bitflags! {
    /// Categories of events a spell can trigger procs from.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ProcMask: u32 {
        /// Direct spell damage.
        const SPELL_DAMAGE    = 1 << 0;
        /// Periodic damage ticks.
        const PERIODIC_DAMAGE = 1 << 1;
        /// Melee attacks.
        const MELEE           = 1 << 2;
        /// Ranged attacks.
        const RANGED          = 1 << 3;
        /// Effects that are themselves procs.
        const PROC            = 1 << 4;
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Cast timing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastConfig {
    /// Base cast time; zero for instants and channels.
    pub cast_time: Duration,
    /// Global cooldown locked at completion; zero for off-GCD spells.
    pub gcd: Duration,
}

impl CastConfig {
    /// Instant cast on the default GCD.
    #[must_use]
    pub const fn instant() -> Self {
        Self {
            cast_time: Duration::ZERO,
            gcd: DEFAULT_GCD,
        }
    }

    /// Hardcast with the given cast time on the default GCD.
    #[must_use]
    pub const fn with_cast_time(cast_time: Duration) -> Self {
        Self {
            cast_time,
            gcd: DEFAULT_GCD,
        }
    }

    /// Instant cast that ignores and does not trigger the GCD.
    #[must_use]
    pub const fn off_gcd() -> Self {
        Self {
            cast_time: Duration::ZERO,
            gcd: Duration::ZERO,
        }
    }
}

impl Default for CastConfig {
    fn default() -> Self {
        Self::instant()
    }
}

/// Per-spell cooldown policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownConfig {
    /// Time between uses.
    pub duration: Duration,
    /// Timer shared with other spells, or `None` for a private timer.
    pub shared_timer: Option<TimerHandle>,
}

/// Custom effect application, replacing the default damage roll.
pub type ApplyEffectsFn = Rc<dyn Fn(&mut Simulation, SpellHandle, UnitId) -> Result<()>>;

/// Expected damage of one tick (or cast), for decision layers.
pub type ExpectedTickDamageFn = Rc<dyn Fn(&mut Simulation, SpellHandle, UnitId) -> Result<f64>>;

/// Extra eligibility predicate evaluated after the built-in checks.
pub type CastConditionFn = Rc<dyn Fn(&Simulation, SpellHandle, UnitId) -> bool>;

/// Callback invoked for every spell a unit registers.
pub type SpellRegisteredFn = Rc<dyn Fn(&mut Simulation, SpellHandle) -> Result<()>>;

/// Immutable spell template.
#[derive(Clone)]
pub struct SpellConfig {
    /// Identity; also the metric tag.
    pub action_id: ActionId,
    /// Damage school.
    pub school: SpellSchool,
    /// Avoidance table used by outcome rolls.
    pub defense_type: DefenseType,
    /// Proc categories this spell triggers.
    pub proc_mask: ProcMask,
    /// Behavioral flags.
    pub flags: SpellFlags,
    /// Cast time and GCD.
    pub default_cast: CastConfig,
    /// Optional cooldown.
    pub cooldown: Option<CooldownConfig>,
    /// Flat mana cost before multipliers.
    pub mana_cost: f64,
    /// Multiplicative damage modifier.
    pub damage_multiplier: f64,
    /// Spell power coefficient.
    pub bonus_coefficient: f64,
    /// Crit multiplier; defaults by defense type when `None`.
    pub crit_multiplier: Option<f64>,
    /// Extra crit chance for this spell only.
    pub bonus_crit_chance: f64,
    /// Projectile speed in yards per second; `None` for immediate delivery.
    pub missile_speed: Option<f64>,
    /// Base damage range for the default effect.
    pub base_damage: Option<(f64, f64)>,
    /// Outcome table for the default effect.
    pub outcome: OutcomeKind,
    /// Periodic effect applied by this spell.
    pub dot: Option<DotConfig>,
    /// Custom effect hook.
    pub apply_effects: Option<ApplyEffectsFn>,
    /// Expected damage hook.
    pub expected_tick_damage: Option<ExpectedTickDamageFn>,
    /// Custom eligibility predicate.
    pub extra_cast_condition: Option<CastConditionFn>,
}

impl SpellConfig {
    /// Template with neutral multipliers and no effect.
    #[must_use]
    pub fn new(action_id: ActionId) -> Self {
        Self {
            action_id,
            school: SpellSchool::default(),
            defense_type: DefenseType::default(),
            proc_mask: ProcMask::empty(),
            flags: SpellFlags::empty(),
            default_cast: CastConfig::default(),
            cooldown: None,
            mana_cost: 0.0,
            damage_multiplier: 1.0,
            bonus_coefficient: 0.0,
            crit_multiplier: None,
            bonus_crit_chance: 0.0,
            missile_speed: None,
            base_damage: None,
            outcome: OutcomeKind::default(),
            dot: None,
            apply_effects: None,
            expected_tick_damage: None,
            extra_cast_condition: None,
        }
    }

    /// Set the custom effect hook.
    #[must_use]
    pub fn with_apply_effects(
        mut self,
        hook: impl Fn(&mut Simulation, SpellHandle, UnitId) -> Result<()> + 'static,
    ) -> Self {
        self.apply_effects = Some(Rc::new(hook));
        self
    }

    /// Set the expected damage hook.
    #[must_use]
    pub fn with_expected_tick_damage(
        mut self,
        hook: impl Fn(&mut Simulation, SpellHandle, UnitId) -> Result<f64> + 'static,
    ) -> Self {
        self.expected_tick_damage = Some(Rc::new(hook));
        self
    }

    /// Set the custom eligibility predicate.
    #[must_use]
    pub fn with_cast_condition(
        mut self,
        predicate: impl Fn(&Simulation, SpellHandle, UnitId) -> bool + 'static,
    ) -> Self {
        self.extra_cast_condition = Some(Rc::new(predicate));
        self
    }

    /// Crit multiplier after applying the defense-type default.
    #[must_use]
    pub fn effective_crit_multiplier(&self) -> f64 {
        self.crit_multiplier.unwrap_or(if self.defense_type.is_physical() {
            DEFAULT_PHYSICAL_CRIT_MULTIPLIER
        } else {
            DEFAULT_SPELL_CRIT_MULTIPLIER
        })
    }

    fn validate(&self) -> Result<()> {
        if let Some((low, high)) = self.base_damage {
            if low > high || low < 0.0 {
                return Err(SimError::setup(format!(
                    "spell {}: invalid base damage range {low}..{high}",
                    self.action_id
                )));
            }
        }
        if self.flags.contains(SpellFlags::CHANNELED) && self.dot.is_none() {
            return Err(SimError::setup(format!(
                "spell {}: channeled spell has no dot",
                self.action_id
            )));
        }
        if self.flags.contains(SpellFlags::CHANNELED) && !self.default_cast.cast_time.is_zero() {
            return Err(SimError::setup(format!(
                "spell {}: channeled spell cannot have a cast time",
                self.action_id
            )));
        }
        if let Some(speed) = self.missile_speed {
            if speed <= 0.0 {
                return Err(SimError::setup(format!(
                    "spell {}: missile speed must be positive",
                    self.action_id
                )));
            }
        }
        if self.mana_cost < 0.0 {
            return Err(SimError::setup(format!(
                "spell {}: negative mana cost",
                self.action_id
            )));
        }
        if let Some(dot) = &self.dot {
            dot.validate(self.action_id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SpellConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpellConfig")
            .field("action_id", &self.action_id)
            .field("school", &self.school)
            .field("defense_type", &self.defense_type)
            .field("flags", &self.flags)
            .field("default_cast", &self.default_cast)
            .field("cooldown", &self.cooldown)
            .field("mana_cost", &self.mana_cost)
            .field("base_damage", &self.base_damage)
            .field("dot", &self.dot.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Runtime
// ============================================================================

/// Handle to a registered spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpellHandle(pub(crate) usize);

/// Modifiers content may change during an iteration. Restored at reset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpellModifiers {
    /// Summed additive damage bonus (0.3 = +30%).
    pub damage_additive: f64,
    /// Cast time multiplier.
    pub cast_time_multiplier: f64,
    /// Cost multiplier in percent (100 = normal cost).
    pub cost_multiplier_pct: i32,
    /// Extra crit chance.
    pub bonus_crit_chance: f64,
}

impl Default for SpellModifiers {
    fn default() -> Self {
        Self {
            damage_additive: 0.0,
            cast_time_multiplier: 1.0,
            cost_multiplier_pct: 100,
            bonus_crit_chance: 0.0,
        }
    }
}

/// A spell template bound to its caster.
#[derive(Debug)]
pub struct Spell {
    pub(crate) config: SpellConfig,
    pub(crate) unit: UnitId,
    pub(crate) cooldown: Option<Cooldown>,
    /// Dot per target unit, indexed by unit.
    pub(crate) dots: Vec<Option<DotHandle>>,
    pub(crate) modifiers: SpellModifiers,
}

impl Spell {
    /// Template this spell was registered from.
    #[must_use]
    pub const fn config(&self) -> &SpellConfig {
        &self.config
    }

    /// Identity of the spell.
    #[must_use]
    pub const fn action_id(&self) -> ActionId {
        self.config.action_id
    }

    /// Casting unit.
    #[must_use]
    pub const fn unit(&self) -> UnitId {
        self.unit
    }

    /// Behavioral flags.
    #[must_use]
    pub const fn flags(&self) -> SpellFlags {
        self.config.flags
    }

    /// Cooldown, if the spell has one.
    #[must_use]
    pub const fn cooldown(&self) -> Option<Cooldown> {
        self.cooldown
    }

    /// Dot this spell maintains on `target`.
    #[must_use]
    pub fn dot(&self, target: UnitId) -> Option<DotHandle> {
        self.dots.get(target.0).copied().flatten()
    }

    /// Current runtime modifiers.
    #[must_use]
    pub const fn modifiers(&self) -> &SpellModifiers {
        &self.modifiers
    }

    /// Mutable runtime modifiers.
    pub fn modifiers_mut(&mut self) -> &mut SpellModifiers {
        &mut self.modifiers
    }

    /// Whether the spell triggers the GCD.
    #[must_use]
    pub fn uses_gcd(&self) -> bool {
        !self.config.default_cast.gcd.is_zero()
    }
}

impl Simulation {
    /// Register a spell cast by `unit`.
    ///
    /// A dot-bearing spell gets one dot per unit, each backed by an aura on
    /// that unit. Registered `on_spell_registered` callbacks for the caster
    /// run before this returns.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] for malformed configuration or when called while
    /// an iteration is running; [`SimError::NotFound`] for an unknown unit.
    pub fn register_spell(&mut self, unit: UnitId, config: SpellConfig) -> Result<SpellHandle> {
        self.ensure_setup("register_spell")?;
        self.unit(unit)?;
        config.validate()?;

        let handle = SpellHandle(self.spells.len());
        let cooldown = match config.cooldown {
            Some(cd) => Some(Cooldown {
                timer: match cd.shared_timer {
                    Some(timer) => {
                        self.timer(timer)?;
                        timer
                    }
                    None => self.new_timer()?,
                },
                duration: cd.duration,
            }),
            None => None,
        };
        let has_dot = config.dot.is_some();
        tracing::debug!(unit = unit.0, action = %config.action_id, "Registered spell");
        self.spells.push(Spell {
            config,
            unit,
            cooldown,
            dots: Vec::new(),
            modifiers: SpellModifiers::default(),
        });
        self.units[unit.0].spells.push(handle);

        if has_dot {
            for target in 0..self.units.len() {
                self.create_dot(handle, UnitId(target))?;
            }
        }

        let callbacks: Vec<SpellRegisteredFn> = self
            .spell_registered
            .iter()
            .filter(|(owner, _)| *owner == unit)
            .map(|(_, callback)| Rc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(self, handle)?;
        }
        Ok(handle)
    }

    /// Return the unit's spell with the same action id, registering it first
    /// if absent.
    ///
    /// # Errors
    ///
    /// Same as [`register_spell`](Self::register_spell).
    pub fn get_or_register_spell(
        &mut self,
        unit: UnitId,
        config: SpellConfig,
    ) -> Result<SpellHandle> {
        if let Some(existing) = self.find_spell(unit, config.action_id) {
            return Ok(existing);
        }
        self.register_spell(unit, config)
    }

    /// Look up a unit's spell by action id.
    #[must_use]
    pub fn find_spell(&self, unit: UnitId, action_id: ActionId) -> Option<SpellHandle> {
        self.units
            .get(unit.0)?
            .spells
            .iter()
            .copied()
            .find(|handle| self.spells[handle.0].config.action_id == action_id)
    }

    /// Run `callback` for every spell `unit` has registered and every spell
    /// it registers later.
    ///
    /// # Errors
    ///
    /// [`SimError::Setup`] while an iteration is running, or whatever the
    /// callback returns for an existing spell.
    pub fn on_spell_registered(
        &mut self,
        unit: UnitId,
        callback: impl Fn(&mut Simulation, SpellHandle) -> Result<()> + 'static,
    ) -> Result<()> {
        self.ensure_setup("on_spell_registered")?;
        let callback: SpellRegisteredFn = Rc::new(callback);
        let existing = self.unit(unit)?.spells.clone();
        self.spell_registered.push((unit, Rc::clone(&callback)));
        for spell in existing {
            callback(self, spell)?;
        }
        Ok(())
    }

    /// Registered spell by handle.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a handle from another simulation.
    pub fn spell(&self, handle: SpellHandle) -> Result<&Spell> {
        self.spells
            .get(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("spell #{}", handle.0)))
    }

    /// Mutable registered spell, for runtime modifiers.
    ///
    /// # Errors
    ///
    /// [`SimError::NotFound`] for a handle from another simulation.
    pub fn spell_mut(&mut self, handle: SpellHandle) -> Result<&mut Spell> {
        self.spells
            .get_mut(handle.0)
            .ok_or_else(|| SimError::NotFound(format!("spell #{}", handle.0)))
    }

    pub(crate) fn reset_spells(&mut self) {
        for spell in &mut self.spells {
            spell.modifiers = SpellModifiers::default();
        }
    }
}
