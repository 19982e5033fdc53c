//! Items, containers and item-move planning.
//!
//! A move is planned against the current container contents first and only
//! applied once every displaced item has somewhere to go. Either every slot
//! changes or none does.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::registry::{InstanceId, Uuid};
use crate::states::StatDelta;

/// Equipment slots, in container order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EquipSlot {
    Mh,
    Oh,
    Head,
    Chest,
    Hands,
    Legs,
    Feet,
    Neck,
    Ring,
}

impl EquipSlot {
    pub const ALL: [EquipSlot; 9] = [
        EquipSlot::Mh,
        EquipSlot::Oh,
        EquipSlot::Head,
        EquipSlot::Chest,
        EquipSlot::Hands,
        EquipSlot::Legs,
        EquipSlot::Feet,
        EquipSlot::Neck,
        EquipSlot::Ring,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn mask(self) -> SlotMask {
        SlotMask::from_bits_truncate(1 << self.index())
    }

    pub fn name(self) -> &'static str {
        match self {
            EquipSlot::Mh => "mh",
            EquipSlot::Oh => "oh",
            EquipSlot::Head => "head",
            EquipSlot::Chest => "chest",
            EquipSlot::Hands => "hands",
            EquipSlot::Legs => "legs",
            EquipSlot::Feet => "feet",
            EquipSlot::Neck => "neck",
            EquipSlot::Ring => "ring",
        }
    }
}

/// Number of slots in an equipment container.
pub const EQUIPMENT_SLOTS: usize = EquipSlot::ALL.len();

bitflags::bitflags! {
    /// Set of equipment slots.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SlotMask: u16 {
        const MH = 1 << 0;
        const OH = 1 << 1;
        const HEAD = 1 << 2;
        const CHEST = 1 << 3;
        const HANDS = 1 << 4;
        const LEGS = 1 << 5;
        const FEET = 1 << 6;
        const NECK = 1 << 7;
        const RING = 1 << 8;
    }
}

impl Default for SlotMask {
    fn default() -> Self {
        SlotMask::empty()
    }
}

impl SlotMask {
    pub fn contains_slot(self, slot: EquipSlot) -> bool {
        self.contains(slot.mask())
    }

    pub fn slots(self) -> impl Iterator<Item = EquipSlot> {
        EquipSlot::ALL.into_iter().filter(move |s| self.contains_slot(*s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Weapon,
    Armor,
    #[default]
    Misc,
}

/// Immutable item data shared by every instance of a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemTemplate {
    pub id: u32,
    pub name: String,
    pub kind: ItemKind,
    /// Skill trained by hits with this weapon.
    pub style: Option<String>,
    pub damage: i32,
    /// Seconds between attacks.
    pub delay: f64,
    /// Applied while equipped.
    pub stats: StatDelta,
    pub valid_slots: SlotMask,
    pub excluded_slots: SlotMask,
}

impl Default for ItemTemplate {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            kind: ItemKind::Misc,
            style: None,
            damage: 0,
            delay: crate::rules::UNARMED_DELAY,
            stats: StatDelta::default(),
            valid_slots: SlotMask::empty(),
            excluded_slots: SlotMask::empty(),
        }
    }
}

impl ItemTemplate {
    pub fn is_weapon(&self) -> bool {
        self.kind == ItemKind::Weapon
    }

    pub fn is_two_handed(&self) -> bool {
        self.excluded_slots.contains_slot(EquipSlot::Oh)
    }

    pub fn rules(&self) -> SlotRules {
        SlotRules {
            valid: self.valid_slots,
            excluded: self.excluded_slots,
        }
    }
}

/// Where an item sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotRef {
    pub container: InstanceId,
    pub slot: usize,
}

/// One item instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    pub id: InstanceId,
    pub template: u32,
    pub location: Option<SlotRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Equipment,
    Inventory,
}

/// Fixed-length ordered slots of optional items.
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub id: InstanceId,
    pub kind: ContainerKind,
    pub owner: Uuid,
    pub slots: Vec<Option<InstanceId>>,
}

impl Container {
    pub fn new(id: InstanceId, kind: ContainerKind, owner: Uuid, len: usize) -> Self {
        Self {
            id,
            kind,
            owner,
            slots: vec![None; len],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<InstanceId> {
        self.slots.get(slot).copied().flatten()
    }

    pub fn find(&self, item: InstanceId) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(item))
    }

    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    pub fn items(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.slots.iter().filter_map(|s| *s)
    }

    /// Item in an equipment slot.
    pub fn equipped(&self, slot: EquipSlot) -> Option<InstanceId> {
        match self.kind {
            ContainerKind::Equipment => self.get(slot.index()),
            ContainerKind::Inventory => None,
        }
    }
}

/// Slot constraints of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotRules {
    pub valid: SlotMask,
    pub excluded: SlotMask,
}

/// Why an item move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    ItemNotOwned(InstanceId),
    ContainerNotOwned(InstanceId),
    NoSuchSlot(usize),
    InvalidSlot(EquipSlot),
    NoFreeSlot(InstanceId),
}

impl fmt::Display for MoveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MoveRejection::ItemNotOwned(id) => write!(f, "You don't have item {id}."),
            MoveRejection::ContainerNotOwned(id) => write!(f, "Container {id} is not yours."),
            MoveRejection::NoSuchSlot(slot) => write!(f, "There is no slot {slot}."),
            MoveRejection::InvalidSlot(slot) => {
                write!(f, "That item can't go in the {} slot.", slot.name())
            }
            MoveRejection::NoFreeSlot(id) => {
                write!(f, "No room in your inventory for item {id}.")
            }
        }
    }
}

impl std::error::Error for MoveRejection {}

/// One step of a planned move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemMove {
    pub item: InstanceId,
    pub from: SlotRef,
    pub to: SlotRef,
}

impl ItemMove {
    /// True when the item enters `equipment` from elsewhere.
    pub fn equips(&self, equipment: InstanceId) -> bool {
        self.to.container == equipment && self.from.container != equipment
    }

    /// True when the item leaves `equipment`.
    pub fn unequips(&self, equipment: InstanceId) -> bool {
        self.from.container == equipment && self.to.container != equipment
    }
}

struct Working<'a> {
    equipment: &'a Container,
    eq: Vec<Option<InstanceId>>,
    inv: Vec<Option<InstanceId>>,
}

impl Working<'_> {
    fn slots_mut(&mut self, container: InstanceId) -> &mut Vec<Option<InstanceId>> {
        if container == self.equipment.id {
            &mut self.eq
        } else {
            &mut self.inv
        }
    }

    fn take(&mut self, at: SlotRef) -> Option<InstanceId> {
        self.slots_mut(at.container)[at.slot].take()
    }

    fn put(&mut self, at: SlotRef, item: InstanceId) {
        self.slots_mut(at.container)[at.slot] = Some(item);
    }

    /// Takes out every equipped item that conflicts with `entering` in
    /// `slot`, in either direction, and queues it for the inventory.
    fn clear_conflicts(
        &mut self,
        entering: InstanceId,
        slot: EquipSlot,
        rules: &impl Fn(InstanceId) -> SlotRules,
        displaced: &mut Vec<(InstanceId, SlotRef)>,
    ) {
        let equipment = self.equipment.id;
        for excluded in rules(entering).excluded.slots() {
            let at = SlotRef {
                container: equipment,
                slot: excluded.index(),
            };
            if let Some(other) = self.eq[excluded.index()] {
                if other != entering {
                    self.take(at);
                    displaced.push((other, at));
                }
            }
        }
        for (index, other) in self.eq.clone().into_iter().enumerate() {
            let Some(other) = other else { continue };
            if other == entering || index == slot.index() {
                continue;
            }
            if rules(other).excluded.contains_slot(slot) {
                let at = SlotRef {
                    container: equipment,
                    slot: index,
                };
                self.take(at);
                displaced.push((other, at));
            }
        }
    }
}

/// Plans moving `item` to `to` within one character's equipment and
/// inventory.
///
/// Items pushed out of the way go back to the vacated source slot when they
/// fit there, else to the first inventory slot that was free before the move
/// and not claimed earlier in the plan.
pub fn plan_move(
    equipment: &Container,
    inventory: &Container,
    item: InstanceId,
    to: SlotRef,
    rules: impl Fn(InstanceId) -> SlotRules,
) -> Result<Vec<ItemMove>, MoveRejection> {
    let from = if let Some(slot) = equipment.find(item) {
        SlotRef {
            container: equipment.id,
            slot,
        }
    } else if let Some(slot) = inventory.find(item) {
        SlotRef {
            container: inventory.id,
            slot,
        }
    } else {
        return Err(MoveRejection::ItemNotOwned(item));
    };

    let target = if to.container == equipment.id {
        equipment
    } else if to.container == inventory.id {
        inventory
    } else {
        return Err(MoveRejection::ContainerNotOwned(to.container));
    };
    if to.slot >= target.len() {
        return Err(MoveRejection::NoSuchSlot(to.slot));
    }
    if from == to {
        return Ok(Vec::new());
    }

    let moved = rules(item);
    let to_equip = equip_slot(equipment, to);
    if let Some(slot) = to_equip {
        if !moved.valid.contains_slot(slot) {
            return Err(MoveRejection::InvalidSlot(slot));
        }
    }

    let mut work = Working {
        equipment,
        eq: equipment.slots.clone(),
        inv: inventory.slots.clone(),
    };
    let mut moves = vec![ItemMove { item, from, to }];
    let mut displaced = Vec::new();

    work.take(from);
    let occupant = work.take(to);
    work.put(to, item);

    // Equipment slot the occupant swaps back into, if it does.
    let mut returned = None;
    if let Some(occ) = occupant {
        let back = equip_slot(equipment, from);
        let fits_back = match back {
            None => true,
            Some(slot) => {
                let occ_rules = rules(occ);
                // Neither of the two swapped items may exclude the other.
                let blocked = to_equip.is_some_and(|to_slot| {
                    moved.excluded.contains_slot(slot) || occ_rules.excluded.contains_slot(to_slot)
                });
                occ_rules.valid.contains_slot(slot) && !blocked
            }
        };
        if fits_back {
            work.put(from, occ);
            moves.push(ItemMove {
                item: occ,
                from: to,
                to: from,
            });
            returned = back.map(|slot| (occ, slot));
        } else {
            displaced.push((occ, to));
        }
    }

    if let Some(slot) = to_equip {
        work.clear_conflicts(item, slot, &rules, &mut displaced);
    }
    if let Some((occ, slot)) = returned {
        work.clear_conflicts(occ, slot, &rules, &mut displaced);
    }

    let mut claimed: BTreeSet<usize> = BTreeSet::new();
    if to.container == inventory.id {
        claimed.insert(to.slot);
    }
    for (other, at) in displaced {
        let free = inventory
            .slots
            .iter()
            .enumerate()
            .position(|(i, s)| s.is_none() && !claimed.contains(&i))
            .ok_or(MoveRejection::NoFreeSlot(other))?;
        claimed.insert(free);
        let dest = SlotRef {
            container: inventory.id,
            slot: free,
        };
        work.put(dest, other);
        moves.push(ItemMove {
            item: other,
            from: at,
            to: dest,
        });
    }

    Ok(moves)
}

fn equip_slot(equipment: &Container, at: SlotRef) -> Option<EquipSlot> {
    if at.container == equipment.id {
        EquipSlot::from_index(at.slot)
    } else {
        None
    }
}

/// Applies a plan produced by [`plan_move`]. Every source is cleared before
/// any destination is written, so swaps need no temporary slot.
pub fn apply_moves(equipment: &mut Container, inventory: &mut Container, moves: &[ItemMove]) {
    for m in moves {
        let slots = if m.from.container == equipment.id {
            &mut equipment.slots
        } else {
            &mut inventory.slots
        };
        if slots.get(m.from.slot) == Some(&Some(m.item)) {
            slots[m.from.slot] = None;
        }
    }
    for m in moves {
        let slots = if m.to.container == equipment.id {
            &mut equipment.slots
        } else {
            &mut inventory.slots
        };
        if let Some(slot) = slots.get_mut(m.to.slot) {
            *slot = Some(m.item);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const EQ: InstanceId = InstanceId(1);
    const INV: InstanceId = InstanceId(2);

    const SWORD: InstanceId = InstanceId(10);
    const SHIELD: InstanceId = InstanceId(11);
    const GREATAXE: InstanceId = InstanceId(12);
    const DAGGER: InstanceId = InstanceId(13);
    const HELM: InstanceId = InstanceId(14);

    fn rules_table() -> HashMap<InstanceId, SlotRules> {
        let mut t = HashMap::new();
        t.insert(
            SWORD,
            SlotRules {
                valid: SlotMask::MH | SlotMask::OH,
                excluded: SlotMask::empty(),
            },
        );
        t.insert(
            SHIELD,
            SlotRules {
                valid: SlotMask::OH,
                excluded: SlotMask::empty(),
            },
        );
        t.insert(
            GREATAXE,
            SlotRules {
                valid: SlotMask::MH,
                excluded: SlotMask::OH,
            },
        );
        t.insert(
            DAGGER,
            SlotRules {
                valid: SlotMask::MH | SlotMask::OH,
                excluded: SlotMask::empty(),
            },
        );
        t.insert(
            HELM,
            SlotRules {
                valid: SlotMask::HEAD,
                excluded: SlotMask::empty(),
            },
        );
        t
    }

    fn containers(inv_len: usize) -> (Container, Container) {
        (
            Container::new(EQ, ContainerKind::Equipment, Uuid(1), EQUIPMENT_SLOTS),
            Container::new(INV, ContainerKind::Inventory, Uuid(1), inv_len),
        )
    }

    fn at(container: InstanceId, slot: usize) -> SlotRef {
        SlotRef { container, slot }
    }

    fn plan(
        eq: &Container,
        inv: &Container,
        item: InstanceId,
        to: SlotRef,
    ) -> Result<Vec<ItemMove>, MoveRejection> {
        let table = rules_table();
        plan_move(eq, inv, item, to, |id| {
            table.get(&id).copied().unwrap_or_default()
        })
    }

    #[test]
    fn equip_from_inventory_into_empty_slot() {
        let (mut eq, mut inv) = containers(4);
        inv.slots[0] = Some(SWORD);
        let moves = plan(&eq, &inv, SWORD, at(EQ, EquipSlot::Mh.index())).unwrap();
        assert_eq!(moves.len(), 1);
        assert!(moves[0].equips(EQ));
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(eq.equipped(EquipSlot::Mh), Some(SWORD));
        assert!(inv.items().next().is_none());
    }

    #[test]
    fn occupant_swaps_back_into_source() {
        let (mut eq, mut inv) = containers(4);
        eq.slots[EquipSlot::Mh.index()] = Some(SWORD);
        inv.slots[2] = Some(DAGGER);
        let moves = plan(&eq, &inv, DAGGER, at(EQ, EquipSlot::Mh.index())).unwrap();
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(eq.equipped(EquipSlot::Mh), Some(DAGGER));
        assert_eq!(inv.get(2), Some(SWORD));
    }

    #[test]
    fn occupant_that_does_not_fit_goes_to_inventory() {
        let (mut eq, mut inv) = containers(4);
        eq.slots[EquipSlot::Mh.index()] = Some(SWORD);
        eq.slots[EquipSlot::Oh.index()] = Some(SHIELD);
        // Sword into oh: the shield can't go to mh.
        let moves = plan(&eq, &inv, SWORD, at(EQ, EquipSlot::Oh.index())).unwrap();
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(eq.equipped(EquipSlot::Oh), Some(SWORD));
        assert_eq!(eq.equipped(EquipSlot::Mh), None);
        assert_eq!(inv.get(0), Some(SHIELD));
    }

    #[test]
    fn two_hander_displaces_off_hand() {
        let (mut eq, mut inv) = containers(3);
        eq.slots[EquipSlot::Oh.index()] = Some(SHIELD);
        inv.slots[0] = Some(GREATAXE);
        inv.slots[1] = Some(HELM);
        let moves = plan(&eq, &inv, GREATAXE, at(EQ, EquipSlot::Mh.index())).unwrap();
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(eq.equipped(EquipSlot::Mh), Some(GREATAXE));
        assert_eq!(eq.equipped(EquipSlot::Oh), None);
        // The vacated source slot 0 is not offered; slot 2 was free.
        assert_eq!(inv.slots, vec![None, Some(HELM), Some(SHIELD)]);
    }

    #[test]
    fn two_hander_with_full_inventory_is_rejected_atomically() {
        let (eq, inv) = {
            let (mut eq, mut inv) = containers(2);
            eq.slots[EquipSlot::Oh.index()] = Some(SHIELD);
            inv.slots[0] = Some(GREATAXE);
            inv.slots[1] = Some(HELM);
            (eq, inv)
        };
        let before = (eq.clone(), inv.clone());
        let err = plan(&eq, &inv, GREATAXE, at(EQ, EquipSlot::Mh.index())).unwrap_err();
        assert_eq!(err, MoveRejection::NoFreeSlot(SHIELD));
        assert_eq!((eq, inv), before);
    }

    #[test]
    fn two_hander_swapped_in_by_unequip_clears_off_hand() {
        let (mut eq, mut inv) = containers(3);
        eq.slots[EquipSlot::Mh.index()] = Some(SWORD);
        eq.slots[EquipSlot::Oh.index()] = Some(SHIELD);
        inv.slots[0] = Some(GREATAXE);
        let moves = plan(&eq, &inv, SWORD, at(INV, 0)).unwrap();
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(eq.equipped(EquipSlot::Mh), Some(GREATAXE));
        assert_eq!(eq.equipped(EquipSlot::Oh), None);
        assert_eq!(inv.slots, vec![Some(SWORD), Some(SHIELD), None]);

        // Same swap with nowhere to put the shield.
        let (mut eq, mut inv) = containers(1);
        eq.slots[EquipSlot::Mh.index()] = Some(SWORD);
        eq.slots[EquipSlot::Oh.index()] = Some(SHIELD);
        inv.slots[0] = Some(GREATAXE);
        assert_eq!(
            plan(&eq, &inv, SWORD, at(INV, 0)),
            Err(MoveRejection::NoFreeSlot(SHIELD))
        );
    }

    #[test]
    fn off_hand_item_displaces_equipped_two_hander() {
        let (mut eq, mut inv) = containers(3);
        eq.slots[EquipSlot::Mh.index()] = Some(GREATAXE);
        inv.slots[0] = Some(SHIELD);
        let moves = plan(&eq, &inv, SHIELD, at(EQ, EquipSlot::Oh.index())).unwrap();
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(eq.equipped(EquipSlot::Oh), Some(SHIELD));
        assert_eq!(eq.equipped(EquipSlot::Mh), None);
        assert_eq!(inv.get(1), Some(GREATAXE));
    }

    #[test]
    fn rejects_invalid_slot_and_foreign_container() {
        let (eq, mut inv) = containers(2);
        inv.slots[0] = Some(HELM);
        assert_eq!(
            plan(&eq, &inv, HELM, at(EQ, EquipSlot::Mh.index())),
            Err(MoveRejection::InvalidSlot(EquipSlot::Mh))
        );
        assert_eq!(
            plan(&eq, &inv, HELM, at(InstanceId(99), 0)),
            Err(MoveRejection::ContainerNotOwned(InstanceId(99)))
        );
        assert_eq!(
            plan(&eq, &inv, SWORD, at(INV, 1)),
            Err(MoveRejection::ItemNotOwned(SWORD))
        );
        assert_eq!(
            plan(&eq, &inv, HELM, at(INV, 5)),
            Err(MoveRejection::NoSuchSlot(5))
        );
    }

    #[test]
    fn inventory_rearrange_swaps() {
        let (mut eq, mut inv) = containers(3);
        inv.slots[0] = Some(HELM);
        inv.slots[2] = Some(SWORD);
        let moves = plan(&eq, &inv, HELM, at(INV, 2)).unwrap();
        apply_moves(&mut eq, &mut inv, &moves);
        assert_eq!(inv.slots, vec![Some(SWORD), None, Some(HELM)]);
        assert!(moves.iter().all(|m| !m.equips(EQ) && !m.unequips(EQ)));
    }

    #[test]
    fn slot_mask_serde_and_iteration() {
        let mask = SlotMask::MH | SlotMask::OH;
        let json = serde_json::to_string(&mask).unwrap();
        let back: SlotMask = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mask);
        let slots: Vec<_> = mask.slots().collect();
        assert_eq!(slots, vec![EquipSlot::Mh, EquipSlot::Oh]);
        assert_eq!(EquipSlot::from_index(8), Some(EquipSlot::Ring));
        assert_eq!(EquipSlot::from_index(9), None);
    }
}
