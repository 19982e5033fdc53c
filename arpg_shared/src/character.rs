//! The simulation entity shared by host and client.
//!
//! A `Character` exposes its attributes by wire name (`str`, `dex`, `ref`, ...)
//! so state records can be populated from it and applied onto it directly.

use std::collections::BTreeMap;

use crate::codec::{AttrSource, AttrTarget, Value, Wire, WireState};
use crate::math::{Vec3, Vec4};
use crate::movement::{Body, MovementConfig};
use crate::registry::{InstanceId, Uuid};
use crate::states::{LoginState, NpcCombatState, PcCombatState, PhysicalState, SkillsState};

/// Per-character combat clocks, in seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CombatTimers {
    pub main_hand: f64,
    pub off_hand: f64,
    /// Remaining global cooldown.
    pub gcd: f64,
    pub queued_power: Option<InstanceId>,
}

impl CombatTimers {
    pub fn reset_attacks(&mut self) {
        self.main_hand = 0.0;
        self.off_hand = 0.0;
    }
}

#[derive(Debug, Clone)]
pub struct Character {
    pub uuid: Uuid,
    pub name: String,
    pub color: Vec4,
    pub body: Body,

    pub health: i32,
    pub max_health: i32,
    pub energy: i32,
    pub max_energy: i32,
    pub static_health: i32,
    pub static_energy: i32,
    pub armor: i32,
    pub strength: i32,
    pub dexterity: i32,
    pub reflex: i32,
    pub haste: i32,
    pub speed: i32,

    pub alive: bool,
    pub in_combat: bool,
    pub target: Option<Uuid>,

    pub equipment: Option<InstanceId>,
    pub inventory: Option<InstanceId>,
    pub skills: BTreeMap<String, i32>,
    pub powers: Vec<InstanceId>,
    pub effects: Vec<InstanceId>,
    pub combat: CombatTimers,
    /// Fractional energy not yet credited.
    pub energy_carry: f64,
    /// Take maximums as received instead of deriving them. Set on
    /// client-side copies of characters the client does not own.
    pub mirror: bool,
}

impl Character {
    pub fn new(uuid: Uuid, cfg: &MovementConfig) -> Self {
        let login = LoginState::default();
        let mut c = Self {
            uuid,
            name: login.name.clone(),
            color: login.color,
            body: Body::new(Vec3::ZERO, Vec3::ZERO, cfg),
            health: 0,
            max_health: 0,
            energy: 0,
            max_energy: 0,
            static_health: 0,
            static_energy: 0,
            armor: 0,
            strength: 0,
            dexterity: 0,
            reflex: 0,
            haste: 0,
            speed: 0,
            alive: true,
            in_combat: false,
            target: None,
            equipment: None,
            inventory: None,
            skills: SkillsState::schema()
                .into_iter()
                .map(|(name, _)| (name.to_string(), 0))
                .collect(),
            powers: Vec::new(),
            effects: Vec::new(),
            combat: CombatTimers::default(),
            energy_carry: 0.0,
            mirror: false,
        };
        login.apply(&mut c);
        c.fill_vitals();
        c
    }

    /// A fresh character from a login record, at full health and energy.
    pub fn from_login(uuid: Uuid, login: &LoginState, cfg: &MovementConfig) -> Self {
        let mut c = Self::new(uuid, cfg);
        login.apply(&mut c);
        c.fill_vitals();
        c
    }

    pub fn fill_vitals(&mut self) {
        self.health = self.max_health;
        self.energy = self.max_energy;
    }

    pub fn pc_state(&self) -> PcCombatState {
        PcCombatState::populate(self)
    }

    pub fn npc_state(&self) -> NpcCombatState {
        NpcCombatState::populate(self)
    }

    pub fn physical_state(&self) -> PhysicalState {
        PhysicalState::populate(self)
    }

    pub fn skills_state(&self) -> SkillsState {
        SkillsState::populate(&self.skills)
    }

    pub fn position(&self) -> Vec3 {
        self.body.position
    }

    fn int_mut(&mut self, name: &str) -> Option<&mut i32> {
        Some(match name {
            "health" => &mut self.health,
            "max_health" => &mut self.max_health,
            "energy" => &mut self.energy,
            "max_energy" => &mut self.max_energy,
            "static_health" => &mut self.static_health,
            "static_energy" => &mut self.static_energy,
            "armor" => &mut self.armor,
            "str" => &mut self.strength,
            "dex" => &mut self.dexterity,
            "ref" => &mut self.reflex,
            "haste" => &mut self.haste,
            "speed" => &mut self.speed,
            _ => return None,
        })
    }
}

impl AttrSource for Character {
    fn attr(&self, name: &str) -> Option<Value> {
        let v = match name {
            "name" => self.name.to_value(),
            "color" => self.color.to_value(),
            "health" => self.health.to_value(),
            "max_health" => self.max_health.to_value(),
            "energy" => self.energy.to_value(),
            "max_energy" => self.max_energy.to_value(),
            "static_health" => self.static_health.to_value(),
            "static_energy" => self.static_energy.to_value(),
            "armor" => self.armor.to_value(),
            "str" => self.strength.to_value(),
            "dex" => self.dexterity.to_value(),
            "ref" => self.reflex.to_value(),
            "haste" => self.haste.to_value(),
            "speed" => self.speed.to_value(),
            "alive" => self.alive.to_value(),
            "in_combat" => self.in_combat.to_value(),
            "target" => self.target.to_value(),
            "position" => self.body.position.to_value(),
            "rotation" => self.body.rotation.to_value(),
            "scale" => self.body.scale.to_value(),
            _ => return None,
        };
        Some(v)
    }
}

impl AttrTarget for Character {
    fn set_attr(&mut self, name: &str, value: Value) -> bool {
        if let Some(slot) = self.int_mut(name) {
            return match i32::from_value(&value) {
                Some(v) => {
                    *slot = v;
                    true
                }
                None => false,
            };
        }
        fn store<T: Wire>(slot: &mut T, value: &Value) -> bool {
            match T::from_value(value) {
                Some(v) => {
                    *slot = v;
                    true
                }
                None => false,
            }
        }
        match name {
            "name" => store(&mut self.name, &value),
            "color" => store(&mut self.color, &value),
            "alive" => store(&mut self.alive, &value),
            "in_combat" => store(&mut self.in_combat, &value),
            "target" => store(&mut self.target, &value),
            "position" => store(&mut self.body.position, &value),
            "rotation" => store(&mut self.body.rotation, &value),
            "scale" => store(&mut self.body.scale, &value),
            _ => false,
        }
    }

    /// Maximums only. Current health and energy may sit above them until
    /// the delta that lowered them is removed.
    fn rederive(&mut self) {
        if self.mirror {
            return;
        }
        self.max_health = self.static_health;
        self.max_energy = self.static_energy;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::states::StatDelta;

    fn fresh() -> Character {
        Character::new(Uuid(1), &MovementConfig::default())
    }

    #[test]
    fn login_populates_and_fills_vitals() {
        let login = LoginState {
            name: "Ysolde".into(),
            static_health: 80,
            static_energy: 30,
            strength: 9,
            ..Default::default()
        };
        let c = Character::from_login(Uuid(4), &login, &MovementConfig::default());
        assert_eq!(c.name, "Ysolde");
        assert_eq!((c.health, c.max_health), (80, 80));
        assert_eq!((c.energy, c.max_energy), (30, 30));
        assert_eq!(c.strength, 9);
        assert_eq!(c.skills.get("fists"), Some(&0));
    }

    #[test]
    fn combat_states_read_character_attributes() {
        let mut c = fresh();
        c.target = Some(Uuid(9));
        c.in_combat = true;
        c.dexterity = 12;
        let pc = c.pc_state();
        assert_eq!(pc.dexterity, 12);
        assert_eq!(pc.target, Some(Uuid(9)));
        assert_eq!(pc.max_health, c.max_health);

        let npc = c.npc_state();
        assert_eq!(npc.name, c.name);
        assert!(npc.in_combat);

        c.body.position = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(c.physical_state().position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(c.physical_state().scale, Vec3::ONE);
    }

    #[test]
    fn persistent_delta_nets_to_zero() {
        let mut c = fresh();
        c.health = 60;
        let before = (c.health, c.max_health, c.static_health, c.armor, c.strength, c.speed);
        let delta = StatDelta {
            static_health: 25,
            armor: 5,
            strength: -3,
            speed: -30,
            ..Default::default()
        };
        delta.apply_diff(&mut c, false);
        assert_eq!(c.max_health, before.1 + 25);
        assert_eq!(c.armor, before.3 + 5);
        delta.apply_diff(&mut c, true);
        let after = (c.health, c.max_health, c.static_health, c.armor, c.strength, c.speed);
        assert_eq!(after, before);
    }

    #[test]
    fn lowering_maximums_at_full_vitals_is_undone_exactly() {
        let mut c = fresh();
        c.static_health = 100;
        c.static_energy = 50;
        c.rederive();
        c.health = 100;
        c.energy = 50;
        let vitals = |c: &Character| (c.health, c.max_health, c.energy, c.max_energy);
        let before = vitals(&c);

        let delta = StatDelta {
            static_health: -10,
            static_energy: -10,
            ..Default::default()
        };
        delta.apply_diff(&mut c, false);
        assert_eq!(vitals(&c), (100, 90, 50, 40));
        delta.apply_diff(&mut c, true);
        assert_eq!(vitals(&c), before);
    }

    #[test]
    fn rederive_tracks_static_maximums_only() {
        let mut c = fresh();
        c.health = 30;
        c.static_health = 20;
        c.rederive();
        assert_eq!((c.health, c.max_health), (30, 20));

        c.static_health = 50;
        c.health = -4;
        c.rederive();
        assert_eq!((c.health, c.max_health), (-4, 50));
    }

    #[test]
    fn mirrored_character_keeps_received_maximums() {
        let mut c = fresh();
        c.mirror = true;
        let state = NpcCombatState {
            name: "Goblin".into(),
            health: 12,
            max_health: 40,
            ..Default::default()
        };
        state.apply(&mut c);
        assert_eq!((c.health, c.max_health), (12, 40));
        assert!(c.alive);
    }

    #[test]
    fn set_attr_rejects_unknown_and_mistyped() {
        let mut c = fresh();
        assert!(!c.set_attr("luck", Value::Int(3)));
        assert!(!c.set_attr("armor", Value::Str("thick".into())));
        assert!(c.set_attr("armor", Value::Str("4".into())));
        assert_eq!(c.armor, 4);
    }
}
