//! Host-side world registry.
//!
//! Owns every character, container, item, power and effect. Entities refer to
//! each other only by id; [`HostWorld::destroy_character`] is the single
//! cleanup path for death and disconnect alike.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use arpg_shared::{
    character::Character,
    items::{Container, ContainerKind, Item, SlotRef},
    movement::{CollisionWorld, MoveInput, MovementConfig},
    net::ConnectionId,
    registry::{ConnectionTable, IdCounter, InstanceCounters, InstanceId, Uuid},
    states::StatDelta,
};
use tracing::debug;

/// A permanent ability owned by one character.
#[derive(Debug, Clone, PartialEq)]
pub struct Power {
    pub id: InstanceId,
    pub template: u32,
    pub owner: Uuid,
    /// Seconds until usable again.
    pub cooldown: f64,
}

impl Power {
    pub fn on_cooldown(&self) -> bool {
        self.cooldown > 0.0
    }
}

/// A live effect on a character.
#[derive(Debug, Clone, PartialEq)]
pub struct Effect {
    pub id: InstanceId,
    pub template: u32,
    pub source: Uuid,
    pub target: Uuid,
    pub duration: f64,
    pub elapsed: f64,
    pub tick_timer: f64,
    /// Stat delta applied at creation, removed on expiry.
    pub persistent: StatDelta,
}

/// Queued client input, integrated in arrival order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PendingInput {
    Move { seq: u32, input: MoveInput },
    Jump,
}

#[derive(Debug, Clone, Default)]
pub struct MovementState {
    /// Sequence number of the last integrated move.
    pub last_seq: u32,
    /// Sequence number last echoed to the owner.
    pub acked_seq: u32,
    pub queue: VecDeque<PendingInput>,
    /// Moving flag as last announced to observers.
    pub moving: bool,
    /// Position changed since the last flush.
    pub moved: bool,
    /// Position or rotation changed since the last flush.
    pub changed: bool,
}

impl MovementState {
    /// Newest move sequence number accepted so far.
    pub fn newest_seq(&self) -> u32 {
        self.queue
            .iter()
            .rev()
            .find_map(|p| match p {
                PendingInput::Move { seq, .. } => Some(*seq),
                PendingInput::Jump => None,
            })
            .unwrap_or(self.last_seq)
    }
}

#[derive(Debug, Default)]
pub struct HostWorld {
    pub characters: BTreeMap<Uuid, Character>,
    pub conns: ConnectionTable,
    pub movement: BTreeMap<Uuid, MovementState>,
    pub containers: BTreeMap<InstanceId, Container>,
    pub items: BTreeMap<InstanceId, Item>,
    pub powers: BTreeMap<InstanceId, Power>,
    pub effects: BTreeMap<InstanceId, Effect>,
    pub collision: CollisionWorld,
    /// Characters whose combat state must be broadcast on the next flush.
    pub dirty: BTreeSet<Uuid>,
    uuids: IdCounter,
    pub ids: InstanceCounters,
}

impl HostWorld {
    pub fn new(collision: CollisionWorld) -> Self {
        Self {
            collision,
            ..Default::default()
        }
    }

    pub fn next_uuid(&mut self) -> Uuid {
        Uuid(self.uuids.next_id())
    }

    /// Registers a character and its movement state.
    pub fn insert_character(&mut self, character: Character, cfg: &MovementConfig) -> Uuid {
        let uuid = character.uuid;
        self.collision.set_body(uuid, character.body.bounds(cfg));
        self.characters.insert(uuid, character);
        self.movement.insert(uuid, MovementState::default());
        uuid
    }

    pub fn character_of(&self, conn: ConnectionId) -> Option<Uuid> {
        self.conns.uuid_of(conn)
    }

    pub fn create_container(&mut self, kind: ContainerKind, owner: Uuid, len: usize) -> InstanceId {
        let id = self.ids.next_container();
        self.containers.insert(id, Container::new(id, kind, owner, len));
        id
    }

    /// Creates an item in a free slot. Returns `None` if the slot is taken or
    /// the container is unknown.
    pub fn create_item(&mut self, template: u32, at: SlotRef) -> Option<InstanceId> {
        let container = self.containers.get_mut(&at.container)?;
        if at.slot >= container.len() || container.get(at.slot).is_some() {
            return None;
        }
        let id = self.ids.next_item();
        container.slots[at.slot] = Some(id);
        self.items.insert(
            id,
            Item {
                id,
                template,
                location: Some(at),
            },
        );
        Some(id)
    }

    pub fn grant_power(&mut self, owner: Uuid, template: u32) -> Option<InstanceId> {
        let id = self.ids.next_power();
        let character = self.characters.get_mut(&owner)?;
        character.powers.push(id);
        self.powers.insert(
            id,
            Power {
                id,
                template,
                owner,
                cooldown: 0.0,
            },
        );
        Some(id)
    }

    /// Template of the item in `slot` of a character's equipment.
    pub fn equipped_template(&self, uuid: Uuid, slot: usize) -> Option<u32> {
        let character = self.characters.get(&uuid)?;
        let equipment = self.containers.get(&character.equipment?)?;
        let item = equipment.get(slot)?;
        self.items.get(&item).map(|i| i.template)
    }

    pub fn mark_dirty(&mut self, uuid: Uuid) {
        if self.characters.contains_key(&uuid) {
            self.dirty.insert(uuid);
        }
    }

    /// Removes a character and everything that belongs to or points at it.
    /// Returns the connection it was bound to.
    pub fn destroy_character(&mut self, uuid: Uuid) -> Option<ConnectionId> {
        let character = self.characters.remove(&uuid)?;
        let conn = self.conns.unbind_uuid(uuid);
        self.movement.remove(&uuid);
        self.dirty.remove(&uuid);
        self.collision.remove_body(uuid);

        for container in [character.equipment, character.inventory].into_iter().flatten() {
            if let Some(c) = self.containers.remove(&container) {
                for item in c.items() {
                    self.items.remove(&item);
                }
            }
        }
        for power in &character.powers {
            self.powers.remove(power);
        }
        self.effects.retain(|_, e| e.target != uuid);

        for other in self.characters.values_mut() {
            if other.target == Some(uuid) {
                other.target = None;
                self.dirty.insert(other.uuid);
            }
        }

        debug!(uuid = %uuid, conn = ?conn, "Character destroyed");
        conn
    }
}
