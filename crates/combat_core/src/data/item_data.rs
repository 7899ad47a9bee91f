//! Static equipment data consumed when a unit is created.
//!
//! Items arrive already mapped into this schema; the engine only reads the
//! stat vector and the categorical fields, and never consults them mid-run.

use std::collections::BTreeMap;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::spell::SpellSchool;

/// Equipment slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemSlot {
    /// Head.
    Head,
    /// Neck.
    Neck,
    /// Shoulder.
    Shoulder,
    /// Back.
    Back,
    /// Chest.
    Chest,
    /// Wrist.
    Wrist,
    /// Hands.
    Hands,
    /// Waist.
    Waist,
    /// Legs.
    Legs,
    /// Feet.
    Feet,
    /// Finger.
    Finger,
    /// Trinket.
    Trinket,
    /// Main hand weapon.
    MainHand,
    /// Off hand weapon or held item.
    OffHand,
    /// Two-handed weapon.
    TwoHand,
    /// Ranged weapon, wand or relic.
    Ranged,
}

/// Armor subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArmorSubclass {
    /// Cloth.
    Cloth,
    /// Leather.
    Leather,
    /// Mail.
    Mail,
    /// Plate.
    Plate,
    /// Shield.
    Shield,
}

/// Weapon subclass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeaponSubclass {
    /// Axe.
    Axe,
    /// Mace.
    Mace,
    /// Sword.
    Sword,
    /// Polearm.
    Polearm,
    /// Staff.
    Staff,
    /// Dagger.
    Dagger,
    /// Fist weapon.
    Fist,
    /// Bow.
    Bow,
    /// Gun.
    Gun,
    /// Crossbow.
    Crossbow,
    /// Thrown.
    Thrown,
    /// Wand.
    Wand,
}

bitflags! {
    /// Classes allowed to equip an item. An empty mask allows every class.
    ///
    /// Written in RON as `ClassMask("MAGE | PRIEST")`.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct ClassMask: u16 {
        /// Warrior.
        const WARRIOR = 1 << 1;
        /// Paladin.
        const PALADIN = 1 << 2;
        /// Hunter.
        const HUNTER  = 1 << 3;
        /// Rogue.
        const ROGUE   = 1 << 4;
        /// Priest.
        const PRIEST  = 1 << 5;
        /// Shaman.
        const SHAMAN  = 1 << 6;
        /// Mage.
        const MAGE    = 1 << 7;
        /// Warlock.
        const WARLOCK = 1 << 8;
        /// Druid.
        const DRUID   = 1 << 9;
    }
}

/// Flat stat contributions of one item.
///
/// Percent stats (`spell_hit`, `spell_crit`, `spell_haste`) are whole
/// percentages, as item tooltips state them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatVector {
    /// Stamina.
    pub stamina: f64,
    /// Intellect.
    pub intellect: f64,
    /// Spirit.
    pub spirit: f64,
    /// Armor.
    pub armor: f64,
    /// Mana per five seconds.
    pub mp5: f64,
    /// Spell hit, in percent.
    pub spell_hit: f64,
    /// Spell crit, in percent.
    pub spell_crit: f64,
    /// Spell haste, in percent.
    pub spell_haste: f64,
    /// Spell power for every school.
    pub spell_power: f64,
    /// Extra spell power for single schools.
    pub school_power: BTreeMap<SpellSchool, f64>,
    /// Resistances by school.
    pub resistances: BTreeMap<SpellSchool, f64>,
    /// Dodge, in percent.
    pub dodge: f64,
    /// Flat mana.
    pub mana: f64,
    /// Flat health.
    pub health: f64,
}

/// One piece of equipment.
///
/// # Example RON
///
/// ```ron
/// ItemData(
///     id: 19379,
///     name: "Neltharion's Tear",
///     slot: Trinket,
///     allowable_classes: ClassMask("MAGE | WARLOCK | PRIEST"),
///     stats: (spell_power: 44.0, spell_hit: 2.0),
/// )
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemData {
    /// Item id.
    pub id: u32,
    /// Display name.
    pub name: String,
    /// Slot the item occupies.
    pub slot: ItemSlot,
    /// Armor subclass, for armor.
    #[serde(default)]
    pub armor: Option<ArmorSubclass>,
    /// Weapon subclass, for weapons.
    #[serde(default)]
    pub weapon: Option<WeaponSubclass>,
    /// Classes allowed to equip it.
    #[serde(default)]
    pub allowable_classes: ClassMask,
    /// Stat contributions.
    #[serde(default)]
    pub stats: StatVector,
}

impl ItemData {
    /// Whether a class with `mask` may equip this item.
    #[must_use]
    pub fn allows(&self, mask: ClassMask) -> bool {
        self.allowable_classes.is_empty() || self.allowable_classes.intersects(mask)
    }
}
