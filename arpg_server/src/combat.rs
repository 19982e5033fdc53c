//! Melee auto-attacks.
//!
//! Each hand runs its own timer while the character is in combat. A timer
//! that reaches its weapon's delay fires one attack attempt at the current
//! target and keeps the remainder.

use std::time::Instant;

use arpg_shared::{
    items::{EquipSlot, ItemTemplate},
    movement::Raycaster,
    net::{ConnectionId, Transport},
    protocol::{RequestSetTarget, RequestToggleCombat, UpdatePcSkill},
    registry::Uuid,
    rules::{
        haste_modifier, in_range, miss_chance, off_hand_damage, roll_damage, ATTACK_RANGE,
        FISTS_DAMAGE, FISTS_SKILL, OFF_HAND_SLOWDOWN, SKILL_UP_CHANCE, UNARMED_DELAY,
    },
};
use rand::Rng;
use tracing::debug;

use crate::host::Host;

const TIMER_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hand {
    Main,
    Off,
}

/// What a hand swings with.
#[derive(Debug, Clone, PartialEq)]
pub struct Weapon {
    pub damage: i32,
    pub delay: f64,
    pub style: String,
    pub two_handed: bool,
}

impl Weapon {
    pub fn fists() -> Self {
        Self {
            damage: FISTS_DAMAGE,
            delay: UNARMED_DELAY,
            style: FISTS_SKILL.to_string(),
            two_handed: false,
        }
    }
}

/// What a character holds, as far as attacking goes.
#[derive(Debug, Clone, PartialEq)]
pub struct Loadout {
    pub main_hand: Weapon,
    /// `None` when the off hand cannot attack.
    pub off_hand: Option<Weapon>,
}

impl<T: Transport> Host<T> {
    pub(crate) fn on_toggle_combat(
        &mut self,
        conn: ConnectionId,
        _at: Instant,
        _rpc: RequestToggleCombat,
    ) {
        let Some(uuid) = self.world.character_of(conn) else {
            return;
        };
        let Some(c) = self.world.characters.get_mut(&uuid) else {
            return;
        };
        c.in_combat = !c.in_combat;
        c.combat.reset_attacks();
        debug!(uuid = %uuid, in_combat = c.in_combat, "Combat toggled");
        self.world.mark_dirty(uuid);
    }

    pub(crate) fn on_set_target(&mut self, conn: ConnectionId, _at: Instant, rpc: RequestSetTarget) {
        let Some(uuid) = self.world.character_of(conn) else {
            return;
        };
        if let Some(target) = rpc.target {
            if !self.world.characters.contains_key(&target) {
                debug!(uuid = %uuid, target = %target, "Unknown target ignored");
                return;
            }
        }
        if let Some(c) = self.world.characters.get_mut(&uuid) {
            c.target = rpc.target;
            self.world.mark_dirty(uuid);
        }
    }

    /// Weapons in the main and off hand, with the dual-wield rule applied.
    pub fn loadout(&self, uuid: Uuid) -> Loadout {
        let weapon_in = |slot: EquipSlot| {
            self.world
                .equipped_template(uuid, slot.index())
                .and_then(|id| self.templates.item(id))
        };
        let main = weapon_in(EquipSlot::Mh);
        let off = weapon_in(EquipSlot::Oh);

        let as_weapon = |t: &ItemTemplate| Weapon {
            damage: t.damage,
            delay: if t.delay > 0.0 { t.delay } else { UNARMED_DELAY },
            style: t.style.clone().unwrap_or_else(|| FISTS_SKILL.to_string()),
            two_handed: t.is_two_handed(),
        };
        let main_hand = main
            .filter(|t| t.is_weapon())
            .map(as_weapon)
            .unwrap_or_else(Weapon::fists);
        let off_hand = if main_hand.two_handed {
            None
        } else {
            match off {
                None => Some(Weapon::fists()),
                Some(t) if t.is_weapon() => Some(as_weapon(t)),
                Some(_) => None,
            }
        };
        Loadout {
            main_hand,
            off_hand,
        }
    }

    /// Advances attack timers and swings whatever came due.
    pub(crate) fn attacks_tick(&mut self, dt: f64) {
        let uuids: Vec<Uuid> = self.world.characters.keys().copied().collect();
        for uuid in uuids {
            let loadout = self.loadout(uuid);
            let Some(c) = self.world.characters.get_mut(&uuid) else {
                continue;
            };
            if !c.in_combat || !c.alive {
                continue;
            }
            let rate = haste_modifier(c.haste) * dt;
            let mut swings = Vec::new();

            c.combat.main_hand += rate;
            if c.combat.main_hand + TIMER_EPS >= loadout.main_hand.delay {
                c.combat.main_hand -= loadout.main_hand.delay;
                swings.push((Hand::Main, loadout.main_hand.clone()));
            }
            if let Some(off) = &loadout.off_hand {
                c.combat.off_hand += rate / OFF_HAND_SLOWDOWN;
                if c.combat.off_hand + TIMER_EPS >= off.delay {
                    c.combat.off_hand -= off.delay;
                    swings.push((Hand::Off, off.clone()));
                }
            }
            for (hand, weapon) in swings {
                self.attack(uuid, hand, &weapon);
            }
        }
    }

    /// One attack attempt from `source` at its current target.
    pub fn attack(&mut self, source: Uuid, hand: Hand, weapon: &Weapon) {
        let Some(attacker) = self.world.characters.get(&source) else {
            return;
        };
        let Some(target) = attacker.target else {
            return;
        };
        let Some(defender) = self.world.characters.get(&target) else {
            debug!(source = %source, target = %target, "Attack at missing target");
            return;
        };
        if !defender.alive {
            return;
        }
        let (from, to) = (attacker.position(), defender.position());
        let (strength, dexterity) = (attacker.strength, attacker.dexterity);
        let (armor, reflex) = (defender.armor, defender.reflex);
        let defender_name = defender.name.clone();
        let attacker_name = attacker.name.clone();

        if !in_range(from, to, ATTACK_RANGE) {
            self.print(source, "Your target is too far away.");
            self.print(target, format!("{attacker_name} is too far away to hit you."));
            return;
        }
        if !self.line_of_sight(source, target) {
            self.print(source, "You can't see your target.");
            self.print(target, format!("{attacker_name} can't see you."));
            return;
        }

        if self.rng.gen::<f64>() < miss_chance(dexterity, reflex) {
            self.print(source, format!("You miss {defender_name}."));
            return;
        }

        let mut damage = roll_damage(&mut self.rng, weapon.damage, strength, armor);
        if hand == Hand::Off {
            damage = off_hand_damage(damage);
        }
        if let Some(defender) = self.world.characters.get_mut(&target) {
            defender.health -= damage;
        }
        self.world.mark_dirty(target);
        debug!(source = %source, target = %target, damage, hand = ?hand, "Hit");

        if self.rng.gen_bool(SKILL_UP_CHANCE) {
            self.raise_skill(source, &weapon.style);
        }
    }

    fn raise_skill(&mut self, uuid: Uuid, skill: &str) {
        let Some(c) = self.world.characters.get_mut(&uuid) else {
            return;
        };
        let level = c.skills.entry(skill.to_string()).or_insert(0);
        *level += 1;
        let level = *level;
        self.send_to(
            uuid,
            &UpdatePcSkill {
                skill: skill.to_string(),
                level,
            },
        );
    }

    /// Clear sight between chest heights. Characters other than the two
    /// involved block the ray.
    pub fn line_of_sight(&self, from: Uuid, to: Uuid) -> bool {
        if from == to {
            return true;
        }
        let cfg = &self.cfg.movement;
        let (Some(a), Some(b)) = (
            self.world.characters.get(&from),
            self.world.characters.get(&to),
        ) else {
            return false;
        };
        let eye = a.body.chest(cfg);
        if b.body.bounds(cfg).contains(eye) {
            return true;
        }
        let delta = b.body.chest(cfg) - eye;
        let distance = delta.len();
        if distance <= f32::EPSILON {
            return true;
        }
        match self.world.collision.raycast(eye, delta, distance, Some(from)) {
            None => true,
            Some(hit) => hit.entity == Some(to),
        }
    }
}
