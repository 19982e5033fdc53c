//! Replicated state records.
//!
//! `Fixed` records are sent whole; `Tagged` records carry only the fields that
//! differ from their defaults.

use crate::codec::Layout;
use crate::math::{Vec3, Vec4};
use crate::registry::Uuid;

state_record! {
    /// Transform of a character.
    pub struct PhysicalState("PhysicalState", Layout::Fixed) {
        position: Vec3,
        rotation: Vec3,
        scale: Vec3 = Vec3::ONE,
    }
}

state_record! {
    /// What a client asks for when entering the world.
    pub struct LoginState("LoginState", Layout::Fixed) {
        name: String = "Adventurer".to_string(),
        color: Vec4 = Vec4::new(1.0, 1.0, 1.0, 1.0),
        static_health: i32 = 100,
        static_energy: i32 = 50,
        armor: i32,
        strength as "str": i32 = 5,
        dexterity as "dex": i32 = 5,
        reflex as "ref": i32 = 5,
        haste: i32,
        speed: i32,
        /// Item template per equipment slot, in slot order.
        equipment: Vec<Option<u32>>,
        /// Item template per inventory slot.
        inventory: Vec<Option<u32>>,
        /// Power templates granted on spawn.
        powers: Vec<u32>,
    }
}

state_record! {
    /// Full combat state, sent only to the owning client.
    pub struct PcCombatState("PcCombatState", Layout::Fixed) {
        name: String,
        health: i32,
        max_health: i32,
        energy: i32,
        max_energy: i32,
        static_health: i32,
        static_energy: i32,
        armor: i32,
        strength as "str": i32,
        dexterity as "dex": i32,
        reflex as "ref": i32,
        haste: i32,
        speed: i32,
        alive: bool = true,
        in_combat: bool,
        target: Option<Uuid>,
    }
}

state_record! {
    /// Restricted combat state visible to other clients.
    pub struct NpcCombatState("NpcCombatState", Layout::Fixed) {
        name: String,
        health: i32,
        max_health: i32,
        armor: i32,
        alive: bool = true,
        in_combat: bool,
        target: Option<Uuid>,
    }
}

state_record! {
    /// Stat deltas carried by persistent effects and equipped items.
    pub struct StatDelta("StatDelta", Layout::Tagged) {
        health: i32,
        energy: i32,
        static_health: i32,
        static_energy: i32,
        armor: i32,
        strength as "str": i32,
        dexterity as "dex": i32,
        reflex as "ref": i32,
        haste: i32,
        speed: i32,
    }
}

state_record! {
    /// Skill levels by name.
    pub struct SkillsState("SkillsState", Layout::Tagged) {
        fists: i32,
        swords: i32,
        axes: i32,
        maces: i32,
        daggers: i32,
        spears: i32,
        staves: i32,
        bows: i32,
    }
}

impl StatDelta {
    pub fn is_empty(&self) -> bool {
        *self == StatDelta::default()
    }
}
