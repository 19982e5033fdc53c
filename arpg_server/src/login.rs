//! World entry.
//!
//! `request_enter_world` creates the character with its containers, items and
//! powers, binds it to the connection, then bootstraps the client's view of
//! the world. Everyone already in the world learns about the newcomer.

use std::time::Instant;

use arpg_shared::{
    character::Character,
    codec::WireState,
    items::{ContainerKind, EquipSlot, SlotRef, SlotRules, EQUIPMENT_SLOTS},
    net::{ConnectionId, Transport},
    protocol::{LoadZone, RemoteAddItem, RemoteAddPower, RequestEnterWorld, SpawnPc},
    registry::Uuid,
    states::LoginState,
};
use tracing::{debug, info, warn};

use crate::host::Host;

impl<T: Transport> Host<T> {
    pub(crate) fn on_enter_world(&mut self, conn: ConnectionId, _at: Instant, rpc: RequestEnterWorld) {
        if !self.entered.insert(conn) {
            warn!(conn = ?conn, "Second enter-world request ignored");
            return;
        }
        let uuid = self.create_player(&rpc.login);
        if let Err(e) = self.world.conns.bind(conn, uuid) {
            warn!(conn = ?conn, uuid = %uuid, error = ?e, "Connection already bound");
            self.world.destroy_character(uuid);
            return;
        }
        info!(conn = ?conn, uuid = %uuid, name = %rpc.login.name, "Entered world");
        self.bootstrap_client(conn, uuid);

        if let Some(c) = self.world.characters.get(&uuid) {
            let spawn = Self::spawn_npc_message(c);
            self.broadcast_world(&spawn, Some(uuid));
        }
    }

    /// Creates a player character from a login request.
    pub fn create_player(&mut self, login: &LoginState) -> Uuid {
        let uuid = self.world.next_uuid();
        let mut c = Character::from_login(uuid, login, &self.cfg.movement);
        c.body.position = self.zone.spawn;

        let eq = self
            .world
            .create_container(ContainerKind::Equipment, uuid, EQUIPMENT_SLOTS);
        let inv = self
            .world
            .create_container(ContainerKind::Inventory, uuid, self.cfg.inventory_slots);
        c.equipment = Some(eq);
        c.inventory = Some(inv);
        self.world.insert_character(c, &self.cfg.movement);

        for (slot, template) in login.inventory.iter().enumerate() {
            let Some(template) = template.filter(|t| self.templates.item(*t).is_some()) else {
                continue;
            };
            if self.world.create_item(template, SlotRef { container: inv, slot }).is_none() {
                debug!(uuid = %uuid, template, slot, "Inventory item dropped");
            }
        }

        let mut equipped: Vec<(EquipSlot, SlotRules)> = Vec::new();
        for (index, template) in login.equipment.iter().enumerate() {
            let Some(tpl) = template.and_then(|t| self.templates.item(t)).cloned() else {
                continue;
            };
            let rules = tpl.rules();
            let fits = EquipSlot::from_index(index).filter(|slot| {
                rules.valid.contains_slot(*slot)
                    && equipped.iter().all(|(other, other_rules)| {
                        !other_rules.excluded.contains_slot(*slot)
                            && !rules.excluded.contains_slot(*other)
                    })
            });
            let placed = match fits {
                Some(slot) => {
                    let at = SlotRef {
                        container: eq,
                        slot: slot.index(),
                    };
                    let placed = self.world.create_item(tpl.id, at).is_some();
                    if placed {
                        equipped.push((slot, rules));
                        if let Some(c) = self.world.characters.get_mut(&uuid) {
                            tpl.stats.apply_diff(c, false);
                        }
                    }
                    placed
                }
                None => false,
            };
            if placed {
                continue;
            }
            let free = self.world.containers.get(&inv).and_then(|c| c.first_free());
            let stored = free.and_then(|slot| {
                self.world
                    .create_item(tpl.id, SlotRef { container: inv, slot })
            });
            if stored.is_none() {
                debug!(uuid = %uuid, template = tpl.id, "Equipment item dropped");
            }
        }

        for template in &login.powers {
            if self.templates.power(*template).is_some() {
                self.world.grant_power(uuid, *template);
            } else {
                debug!(uuid = %uuid, template, "Unknown power template");
            }
        }

        if let Some(c) = self.world.characters.get_mut(&uuid) {
            c.fill_vitals();
        }
        uuid
    }

    /// Everything a freshly entered client needs, in order.
    fn bootstrap_client(&mut self, conn: ConnectionId, uuid: Uuid) {
        let Some(c) = self.world.characters.get(&uuid) else {
            return;
        };
        let (Some(eq), Some(inv)) = (c.equipment, c.inventory) else {
            return;
        };
        let spawn = SpawnPc {
            uuid,
            color: c.color,
            combat: c.pc_state(),
            physical: c.physical_state(),
            skills: c.skills_state(),
            equipment: eq,
            inventory: inv,
            powers: c.powers.clone(),
        };
        let items: Vec<RemoteAddItem> = [eq, inv]
            .iter()
            .filter_map(|id| self.world.containers.get(id))
            .flat_map(|container| container.items())
            .filter_map(|item| self.world.items.get(&item))
            .map(|item| RemoteAddItem {
                item: item.id,
                template: item.template,
            })
            .collect();
        let powers: Vec<RemoteAddPower> = c
            .powers
            .iter()
            .filter_map(|id| self.world.powers.get(id))
            .map(|p| RemoteAddPower {
                power: p.id,
                template: p.template,
            })
            .collect();
        let others: Vec<_> = self
            .world
            .characters
            .values()
            .filter(|other| other.uuid != uuid)
            .map(Self::spawn_npc_message)
            .collect();

        self.endpoint.call(
            conn,
            &LoadZone {
                zone: self.zone.id.clone(),
            },
        );
        self.endpoint.call(conn, &spawn);
        for rpc in &items {
            self.endpoint.call(conn, rpc);
        }
        for rpc in &powers {
            self.endpoint.call(conn, rpc);
        }
        self.send_container(uuid, eq);
        self.send_container(uuid, inv);
        for rpc in &others {
            self.endpoint.call(conn, rpc);
        }
    }
}
