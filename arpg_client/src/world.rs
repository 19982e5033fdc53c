//! Client-side registry.
//!
//! Mirrors what the host has told this client: its own character, every
//! observed character, and the item/power/container views of the player.

use std::collections::{BTreeMap, VecDeque};

use arpg_shared::{
    character::Character,
    items::{Container, ContainerKind},
    movement::{CollisionWorld, MovementConfig},
    registry::{InstanceId, Uuid},
};
use tracing::debug;

use crate::interp::ObserverBuffer;

/// Host prints kept before the oldest is dropped.
pub const MAX_MESSAGES: usize = 200;

#[derive(Default)]
pub struct ClientWorld {
    pub zone: Option<String>,
    pub collision: CollisionWorld,
    pub characters: BTreeMap<Uuid, Character>,
    /// The character this client owns.
    pub player: Option<Uuid>,
    pub observers: BTreeMap<Uuid, ObserverBuffer>,
    /// Last animation flag per observed character.
    pub moving: BTreeMap<Uuid, bool>,
    pub containers: BTreeMap<InstanceId, Container>,
    /// Item instance → template.
    pub items: BTreeMap<InstanceId, u32>,
    /// Power instance → template.
    pub powers: BTreeMap<InstanceId, u32>,
    /// Most recent host prints, oldest first.
    pub messages: VecDeque<String>,
    /// Prints received over the session, including dropped ones.
    pub messages_received: u64,
}

impl ClientWorld {
    pub fn player(&self) -> Option<&Character> {
        self.player.and_then(|uuid| self.characters.get(&uuid))
    }

    pub fn player_mut(&mut self) -> Option<&mut Character> {
        let uuid = self.player?;
        self.characters.get_mut(&uuid)
    }

    /// Registers a character and its collision body.
    pub fn insert(&mut self, c: Character, cfg: &MovementConfig) {
        self.collision.set_body(c.uuid, c.body.bounds(cfg));
        self.characters.insert(c.uuid, c);
    }

    /// Creates an empty view of one of the player's containers. Its length
    /// comes with the first container update.
    pub fn track_container(&mut self, id: InstanceId, kind: ContainerKind, owner: Uuid) {
        self.containers
            .entry(id)
            .or_insert_with(|| Container::new(id, kind, owner, 0));
    }

    /// Removes a character and everything that points at it.
    pub fn remove(&mut self, uuid: Uuid) -> Option<Character> {
        let removed = self.characters.remove(&uuid);
        if removed.is_none() {
            debug!(uuid = %uuid, "Removal of unknown character");
        }
        self.observers.remove(&uuid);
        self.moving.remove(&uuid);
        self.collision.remove_body(uuid);
        for c in self.characters.values_mut() {
            if c.target == Some(uuid) {
                c.target = None;
            }
        }
        if self.player == Some(uuid) {
            self.player = None;
            self.containers.clear();
            self.items.clear();
            self.powers.clear();
        }
        removed
    }

    pub fn push_message(&mut self, message: String) {
        self.messages.push_back(message);
        self.messages_received += 1;
        while self.messages.len() > MAX_MESSAGES {
            self.messages.pop_front();
        }
    }

    /// Forgets every character and view. Used when the host goes away.
    pub fn clear(&mut self) {
        let n = self.characters.len();
        self.characters.clear();
        self.player = None;
        self.observers.clear();
        self.moving.clear();
        self.containers.clear();
        self.items.clear();
        self.powers.clear();
        self.collision.clear_bodies();
        debug!(characters = n, "Client registry cleared");
    }
}

#[cfg(test)]
mod tests {
    use arpg_shared::math::Vec3;

    use super::*;

    fn character(uuid: u32) -> Character {
        Character::new(Uuid(uuid), &MovementConfig::default())
    }

    #[test]
    fn removing_the_player_drops_its_views() {
        let cfg = MovementConfig::default();
        let mut world = ClientWorld::default();
        world.insert(character(3), &cfg);
        let mut other = character(4);
        other.target = Some(Uuid(3));
        world.insert(other, &cfg);
        world.player = Some(Uuid(3));
        world.track_container(InstanceId(1), ContainerKind::Equipment, Uuid(3));
        world.items.insert(InstanceId(1), 1);

        assert!(world.remove(Uuid(3)).is_some());
        assert!(world.player().is_none());
        assert!(world.containers.is_empty() && world.items.is_empty());
        assert_eq!(world.characters[&Uuid(4)].target, None);
        assert!(world.remove(Uuid(3)).is_none());
    }

    #[test]
    fn message_log_is_bounded() {
        let mut world = ClientWorld::default();
        for i in 0..MAX_MESSAGES + 5 {
            world.push_message(format!("line {i}"));
        }
        assert_eq!(world.messages.len(), MAX_MESSAGES);
        assert_eq!(world.messages_received, (MAX_MESSAGES + 5) as u64);
        assert_eq!(world.messages.front().map(String::as_str), Some("line 5"));
    }

    #[test]
    fn clear_forgets_bodies() {
        use arpg_shared::movement::Raycaster;

        let cfg = MovementConfig::default();
        let mut world = ClientWorld::default();
        let mut c = character(9);
        c.body.position = Vec3::new(0.0, 0.0, 5.0);
        world.insert(c, &cfg);
        let from = Vec3::new(0.0, 1.0, 0.0);
        let dir = Vec3::new(0.0, 0.0, 1.0);
        assert!(world.collision.raycast(from, dir, 10.0, None).is_some());

        world.clear();
        assert!(world.characters.is_empty());
        assert!(world.collision.raycast(from, dir, 10.0, None).is_none());
    }
}
