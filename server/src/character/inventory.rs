//
// Copyright 2025-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Inventory manager
//!
//! Items live in two collections: instances (`item_instances`) and positions
//! (`character_inventory`). An item moving into the mailbox loses its
//! position but keeps its instance row.
//!
//! Every placement, whether replayed from stored rows at load time or made
//! during play, goes through [`Inventory::check_placement`]. Items that fail it
//! at load time are queued for the compensation mail instead of dropped.

use super::item::{Item, ItemId};
use crate::error::PlacementError;
use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::{LifecycleState, RecordMap};
use crate::persistence::table::Table;
use crate::reference::ReferenceData;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const EQUIPMENT_SLOTS: u8 = 19;
pub const BAG_SLOTS: u8 = 4;
pub const BACKPACK_SLOTS: u8 = 16;
pub const BANK_SLOTS: u8 = 28;
pub const BANK_BAG_SLOTS: u8 = 7;
pub const BUYBACK_SLOTS: u8 = 12;

/// Where an item sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemPosition {
    Equipment(u8),
    /// Equipped bag slot
    BagSlot(u8),
    Backpack(u8),
    Bank(u8),
    BankBagSlot(u8),
    Buyback(u8),
    /// Slot inside a container item
    Container { bag: ItemId, slot: u8 },
}

impl ItemPosition {
    /// Positions whose occupant may hold other items
    pub fn holds_contents(&self) -> bool {
        matches!(self, ItemPosition::BagSlot(_) | ItemPosition::BankBagSlot(_))
    }

    pub fn is_contained(&self) -> bool {
        matches!(self, ItemPosition::Container { .. })
    }
}

impl std::fmt::Display for ItemPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemPosition::Equipment(slot) => write!(f, "equipment:{}", slot),
            ItemPosition::BagSlot(slot) => write!(f, "bag-slot:{}", slot),
            ItemPosition::Backpack(slot) => write!(f, "backpack:{}", slot),
            ItemPosition::Bank(slot) => write!(f, "bank:{}", slot),
            ItemPosition::BankBagSlot(slot) => write!(f, "bank-bag-slot:{}", slot),
            ItemPosition::Buyback(slot) => write!(f, "buyback:{}", slot),
            ItemPosition::Container { bag, slot } => write!(f, "bag {}:{}", bag, slot),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Inventory {
    items: RecordMap<ItemId, Item>,
    positions: RecordMap<ItemId, ItemPosition>,
    /// Active positions only; rebuilt from `positions` as they change
    occupancy: BTreeMap<ItemPosition, ItemId>,
    compensation: Vec<ItemId>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn position(&self, id: ItemId) -> Option<ItemPosition> {
        self.positions.get(&id).copied()
    }

    pub fn item_at(&self, position: ItemPosition) -> Option<ItemId> {
        self.occupancy.get(&position).copied()
    }

    /// Every placed item with its position
    pub fn placed(&self) -> impl Iterator<Item = (ItemId, ItemPosition)> + '_ {
        self.occupancy.iter().map(|(position, id)| (*id, *position))
    }

    /// Every active item instance, placed or not
    pub fn items(&self) -> impl Iterator<Item = (&ItemId, &Item)> {
        self.items.active()
    }

    /// Items placed inside `bag`
    pub fn contents(&self, bag: ItemId) -> Vec<ItemId> {
        self.occupancy
            .iter()
            .filter(|(position, _)| matches!(position, ItemPosition::Container { bag: b, .. } if *b == bag))
            .map(|(_, id)| *id)
            .collect()
    }

    /// Active items with no position (attached to mail, or orphaned)
    pub fn unplaced(&self) -> Vec<ItemId> {
        self.items
            .keys()
            .filter(|id| !self.positions.contains(id))
            .copied()
            .collect()
    }

    pub fn first_free_backpack_slot(&self) -> Option<ItemPosition> {
        (0..BACKPACK_SLOTS)
            .map(ItemPosition::Backpack)
            .find(|position| !self.occupancy.contains_key(position))
    }

    /// Validate placing `item` (identified by `id`) at `position`
    pub fn check_placement(
        &self,
        id: ItemId,
        item: &Item,
        position: ItemPosition,
        reference: &ReferenceData,
    ) -> Result<(), PlacementError> {
        let template = reference
            .item(item.template)
            .ok_or(PlacementError::UnknownTemplate(item.template))?;

        let in_range = match position {
            ItemPosition::Equipment(slot) => slot < EQUIPMENT_SLOTS,
            ItemPosition::BagSlot(slot) => slot < BAG_SLOTS,
            ItemPosition::Backpack(slot) => slot < BACKPACK_SLOTS,
            ItemPosition::Bank(slot) => slot < BANK_SLOTS,
            ItemPosition::BankBagSlot(slot) => slot < BANK_BAG_SLOTS,
            ItemPosition::Buyback(slot) => slot < BUYBACK_SLOTS,
            ItemPosition::Container { bag, slot } => {
                let bag_placed = self
                    .positions
                    .get(&bag)
                    .is_some_and(ItemPosition::holds_contents);
                let slots = self
                    .items
                    .get(&bag)
                    .and_then(|bag_item| reference.item(bag_item.template))
                    .and_then(|bag_template| bag_template.container_slots());
                let Some(slots) = slots.filter(|_| bag_placed) else {
                    return Err(PlacementError::MissingContainer(bag));
                };
                if bag == id || template.container_slots().is_some() {
                    return Err(PlacementError::NestedContainer);
                }
                slot < slots
            }
        };
        if !in_range {
            return Err(PlacementError::InvalidSlot(position));
        }

        let fits = match position {
            ItemPosition::Equipment(slot) => template.equip_slots.contains(&slot),
            ItemPosition::BagSlot(_) | ItemPosition::BankBagSlot(_) => {
                template.container_slots().is_some()
            }
            _ => true,
        };
        if !fits {
            return Err(PlacementError::WrongItemClass {
                position,
                template: item.template,
            });
        }

        if let Some(occupant) = self.occupancy.get(&position) {
            if *occupant != id {
                return Err(PlacementError::Occupied {
                    position,
                    occupant: *occupant,
                });
            }
        }

        let is_full_bag = self
            .positions
            .get(&id)
            .is_some_and(ItemPosition::holds_contents)
            && !self.contents(id).is_empty();
        if is_full_bag && !position.holds_contents() {
            return Err(PlacementError::ContainerNotEmpty(id));
        }

        Ok(())
    }

    /// Create a new item at `position`
    pub fn store_new_item(
        &mut self,
        id: ItemId,
        item: Item,
        position: ItemPosition,
        reference: &ReferenceData,
    ) -> Result<(), PlacementError> {
        if self.items.contains(&id) {
            return Err(PlacementError::DuplicateItem(id));
        }
        self.check_placement(id, &item, position, reference)?;
        self.items.insert(id, item);
        self.positions.insert(id, position);
        self.occupancy.insert(position, id);
        Ok(())
    }

    /// Move a placed item, or place an unplaced one
    pub fn move_item(
        &mut self,
        id: ItemId,
        to: ItemPosition,
        reference: &ReferenceData,
    ) -> Result<(), PlacementError> {
        let item = self.items.get(&id).ok_or(PlacementError::UnknownItem(id))?;
        self.check_placement(id, item, to, reference)?;

        match self.positions.get(&id).copied() {
            Some(from) => {
                self.occupancy.remove(&from);
                self.positions.update(&id, |position| *position = to);
            }
            None => self.positions.insert(id, to),
        }
        self.occupancy.insert(to, id);
        Ok(())
    }

    /// Take an item out of its position, keeping the instance
    pub fn detach(&mut self, id: ItemId) -> Result<(), PlacementError> {
        let position = self
            .positions
            .get(&id)
            .copied()
            .ok_or(PlacementError::UnknownItem(id))?;
        if !self.contents(id).is_empty() {
            return Err(PlacementError::ContainerNotEmpty(id));
        }
        self.positions.remove(&id);
        self.occupancy.remove(&position);
        Ok(())
    }

    /// Remove an item entirely
    pub fn destroy(&mut self, id: ItemId) -> Result<Item, PlacementError> {
        let item = self
            .items
            .get(&id)
            .cloned()
            .ok_or(PlacementError::UnknownItem(id))?;
        if self.positions.contains(&id) {
            self.detach(id)?;
        }
        self.items.remove(&id);
        Ok(item)
    }

    /// Mutate an item instance in place
    pub fn update_item<R>(&mut self, id: ItemId, f: impl FnOnce(&mut Item) -> R) -> Option<R> {
        self.items.update(&id, f)
    }

    /// Add an instance that arrives without a position (mail attachments)
    pub fn insert_unplaced(&mut self, id: ItemId, item: Item) {
        self.items.insert(id, item);
    }

    pub fn load_item(&mut self, id: ItemId, item: Item) -> bool {
        self.items.load(id, item)
    }

    /// Keep a rejected instance only long enough to delete its row
    pub fn discard_item(&mut self, id: ItemId, item: Item) {
        self.items.load_discarded(id, item);
    }

    /// Replay a stored position through the live placement rules
    pub fn load_position(
        &mut self,
        id: ItemId,
        position: ItemPosition,
        reference: &ReferenceData,
    ) -> Result<(), PlacementError> {
        let item = self.items.get(&id).ok_or(PlacementError::UnknownItem(id))?;
        self.check_placement(id, item, position, reference)?;
        self.positions.load(id, position);
        self.occupancy.insert(position, id);
        Ok(())
    }

    pub fn discard_position(&mut self, id: ItemId, position: ItemPosition) {
        self.positions.load_discarded(id, position);
    }

    pub fn queue_compensation(&mut self, id: ItemId) {
        if !self.compensation.contains(&id) {
            self.compensation.push(id);
        }
    }

    pub fn pending_compensation(&self) -> &[ItemId] {
        &self.compensation
    }

    pub fn take_compensation(&mut self) -> Vec<ItemId> {
        std::mem::take(&mut self.compensation)
    }

    pub fn is_dirty(&self) -> bool {
        self.items.is_dirty() || self.positions.is_dirty()
    }

    pub fn save_instances(
        &mut self,
        phase: SavePhase,
        owner: Uuid,
        scope: &mut TransactionScope,
    ) -> usize {
        self.items.save(phase, Table::ItemInstances, owner, scope)
    }

    pub fn save_positions(
        &mut self,
        phase: SavePhase,
        owner: Uuid,
        scope: &mut TransactionScope,
    ) -> usize {
        if phase == SavePhase::Upsert {
            self.drop_inconsistent_positions(owner);
        }
        self.positions
            .save(phase, Table::CharacterInventory, owner, scope)
    }

    /// A dirty position must still be the occupant of its slot, and its item
    /// and container must still exist. Anything else is corruption; the write
    /// is skipped.
    fn drop_inconsistent_positions(&mut self, owner: Uuid) {
        let violations: Vec<(ItemId, ItemPosition, Option<ItemId>)> = self
            .positions
            .dirty()
            .filter(|(_, state)| matches!(state, LifecycleState::New | LifecycleState::Changed))
            .filter_map(|(id, _)| {
                let position = *self.positions.get(id)?;
                let occupant = self.occupancy.get(&position).copied();
                let container_ok = match position {
                    ItemPosition::Container { bag, .. } => {
                        self.items.contains(&bag) && self.positions.contains(&bag)
                    }
                    _ => true,
                };
                let consistent =
                    occupant == Some(*id) && self.items.contains(id) && container_ok;
                (!consistent).then_some((*id, position, occupant))
            })
            .collect();

        for (id, position, occupant) in violations {
            tracing::error!(
                "Character {} item {} recorded at {} but slot holds {:?}; position write skipped",
                owner,
                id,
                position,
                occupant
            );
            counter!("persistence.save.violations", "table" => Table::CharacterInventory.name())
                .increment(1);
            self.positions.forget(&id);
            if occupant == Some(id) {
                self.occupancy.remove(&position);
            }
        }
    }
}
