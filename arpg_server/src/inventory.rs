//! Item moves between a character's equipment and inventory.

use std::time::Instant;

use arpg_shared::{
    codec::WireState,
    items::{apply_moves, plan_move, ItemMove, SlotRef, SlotRules},
    net::{ConnectionId, Transport},
    protocol::{RemoteUpdateContainer, RequestMoveItem},
    registry::{InstanceId, Uuid},
    states::StatDelta,
};
use tracing::{debug, info};

use crate::host::Host;

impl<T: Transport> Host<T> {
    pub(crate) fn on_move_item(&mut self, conn: ConnectionId, _at: Instant, rpc: RequestMoveItem) {
        let Some(uuid) = self.world.character_of(conn) else {
            return;
        };
        let to = SlotRef {
            container: rpc.to_container,
            slot: rpc.to_slot as usize,
        };
        self.move_item(uuid, rpc.item, to);
    }

    pub(crate) fn slot_rules(&self, item: InstanceId) -> SlotRules {
        self.world
            .items
            .get(&item)
            .and_then(|i| self.templates.item(i.template))
            .map(|t| t.rules())
            .unwrap_or_default()
    }

    /// Plans and applies a move atomically. A rejected move changes nothing
    /// and prints the reason to the owner.
    pub fn move_item(&mut self, uuid: Uuid, item: InstanceId, to: SlotRef) -> bool {
        let Some(c) = self.world.characters.get(&uuid) else {
            return false;
        };
        let (Some(eq_id), Some(inv_id)) = (c.equipment, c.inventory) else {
            debug!(uuid = %uuid, "Character has no containers");
            return false;
        };
        let (Some(equipment), Some(inventory)) = (
            self.world.containers.get(&eq_id),
            self.world.containers.get(&inv_id),
        ) else {
            return false;
        };

        let planned = plan_move(equipment, inventory, item, to, |id| self.slot_rules(id));
        let moves = match planned {
            Ok(moves) => moves,
            Err(rejection) => {
                info!(uuid = %uuid, item = %item, reason = %rejection, "Item move rejected");
                self.print(uuid, rejection.to_string());
                return false;
            }
        };
        if moves.is_empty() {
            return true;
        }

        if let (Some(mut equipment), Some(mut inventory)) = (
            self.world.containers.remove(&eq_id),
            self.world.containers.remove(&inv_id),
        ) {
            apply_moves(&mut equipment, &mut inventory, &moves);
            self.world.containers.insert(eq_id, equipment);
            self.world.containers.insert(inv_id, inventory);
        }
        for m in &moves {
            if let Some(i) = self.world.items.get_mut(&m.item) {
                i.location = Some(m.to);
            }
        }
        self.apply_equip_stats(uuid, eq_id, &moves);

        for container in [eq_id, inv_id] {
            if moves
                .iter()
                .any(|m| m.from.container == container || m.to.container == container)
            {
                self.send_container(uuid, container);
            }
        }
        debug!(uuid = %uuid, item = %item, steps = moves.len(), "Item moved");
        true
    }

    fn apply_equip_stats(&mut self, uuid: Uuid, equipment: InstanceId, moves: &[ItemMove]) {
        let mut diffs: Vec<(StatDelta, bool)> = Vec::new();
        for m in moves {
            let remove = if m.equips(equipment) {
                false
            } else if m.unequips(equipment) {
                true
            } else {
                continue;
            };
            let stats = self
                .world
                .items
                .get(&m.item)
                .and_then(|i| self.templates.item(i.template))
                .map(|t| t.stats.clone());
            if let Some(stats) = stats.filter(|s| !s.is_empty()) {
                diffs.push((stats, remove));
            }
        }
        if diffs.is_empty() {
            return;
        }
        if let Some(c) = self.world.characters.get_mut(&uuid) {
            for (stats, remove) in &diffs {
                stats.apply_diff(c, *remove);
            }
        }
        self.world.mark_dirty(uuid);
    }

    pub(crate) fn send_container(&mut self, uuid: Uuid, container: InstanceId) {
        let Some(items) = self.world.containers.get(&container).map(|c| c.slots.clone()) else {
            return;
        };
        self.send_to(uuid, &RemoteUpdateContainer { container, items });
    }
}

#[cfg(test)]
mod tests {
    use arpg_shared::{
        items::EquipSlot,
        protocol::{RemotePrint, RemoteUpdateContainer},
    };

    use super::*;
    use crate::test_support::Harness;

    fn containers(h: &Harness, uuid: Uuid) -> (InstanceId, InstanceId) {
        let c = &h.host.world().characters[&uuid];
        (c.equipment.unwrap(), c.inventory.unwrap())
    }

    fn slots(h: &Harness, id: InstanceId) -> Vec<Option<InstanceId>> {
        h.host.world().containers[&id].slots.clone()
    }

    #[test]
    fn equipping_a_two_hander_moves_sword_and_shield_out() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("Brute");
        let (eq, inv) = containers(&h, uuid);
        let axe_slot = 0;
        let axe = slots(&h, inv)[axe_slot].unwrap();
        let sword = slots(&h, eq)[EquipSlot::Mh.index()].unwrap();
        let shield = slots(&h, eq)[EquipSlot::Oh.index()].unwrap();
        let (armor, strength) = {
            let c = &h.host.world().characters[&uuid];
            (c.armor, c.strength)
        };
        h.drain();

        let to = SlotRef {
            container: eq,
            slot: EquipSlot::Mh.index(),
        };
        h.send(
            conn,
            &RequestMoveItem {
                item: axe,
                to_container: eq,
                to_slot: to.slot as u32,
            },
        );

        let eq_slots = slots(&h, eq);
        assert_eq!(eq_slots[EquipSlot::Mh.index()], Some(axe));
        assert_eq!(eq_slots[EquipSlot::Oh.index()], None);
        let inv_slots = slots(&h, inv);
        assert_eq!(inv_slots[axe_slot], Some(sword));
        assert!(inv_slots.contains(&Some(shield)));
        assert_eq!(h.host.world().items[&axe].location, Some(to));

        let c = &h.host.world().characters[&uuid];
        assert_eq!(c.armor, armor - 5);
        assert_eq!(c.strength, strength + 2);

        let updates: Vec<RemoteUpdateContainer> = h.drain().calls(conn);
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].container, eq);
        assert_eq!(updates[1].items, slots(&h, inv));
    }

    #[test]
    fn full_inventory_rejects_atomically() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login_with(|login| {
            login.inventory = vec![Some(3), Some(4), Some(5)];
        });
        let (eq, inv) = containers(&h, uuid);
        // Fill every free inventory slot.
        for slot in 0..h.host.world().containers[&inv].len() {
            let _ = h.host.world_mut().create_item(7, SlotRef { container: inv, slot });
        }
        let axe = slots(&h, inv)[0].unwrap();
        let before = (slots(&h, eq), slots(&h, inv));
        let armor = h.host.world().characters[&uuid].armor;
        h.drain();

        // The sword swaps into the axe's slot, but the shield has nowhere to go.
        assert!(!h.host.move_item(
            uuid,
            axe,
            SlotRef {
                container: eq,
                slot: EquipSlot::Mh.index(),
            },
        ));
        assert_eq!((slots(&h, eq), slots(&h, inv)), before);
        assert_eq!(h.host.world().characters[&uuid].armor, armor);
        let sent = h.drain();
        assert!(sent.calls::<RemoteUpdateContainer>(conn).is_empty());
        let prints: Vec<RemotePrint> = sent.calls(conn);
        assert!(prints[0].message.starts_with("No room"));
    }

    #[test]
    fn wrong_slot_and_foreign_containers_are_refused() {
        let mut h = Harness::new();
        let (conn, uuid) = h.login("A");
        let (_, other) = h.login("B");
        let (eq, inv) = containers(&h, uuid);
        let (other_eq, _) = containers(&h, other);
        let cap = slots(&h, inv)[2].unwrap();
        h.drain();

        assert!(!h.host.move_item(
            uuid,
            cap,
            SlotRef {
                container: eq,
                slot: EquipSlot::Feet.index(),
            },
        ));
        assert!(!h.host.move_item(
            uuid,
            cap,
            SlotRef {
                container: other_eq,
                slot: EquipSlot::Head.index(),
            },
        ));
        let prints: Vec<RemotePrint> = h.drain().calls(conn);
        assert_eq!(prints.len(), 2);
        assert_eq!(prints[0].message, "That item can't go in the feet slot.");

        assert!(h.host.move_item(
            uuid,
            cap,
            SlotRef {
                container: eq,
                slot: EquipSlot::Head.index(),
            },
        ));
        assert_eq!(h.host.world().characters[&uuid].armor, 5 + 2);
    }
}
