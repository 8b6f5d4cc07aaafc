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

//! Equipment set manager

use super::inventory::EQUIPMENT_SLOTS;
use super::item::ItemId;
use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentSet {
    pub name: String,
    #[serde(default)]
    pub icon: String,
    /// One entry per equipment slot
    pub items: Vec<Option<ItemId>>,
}

impl EquipmentSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            icon: String::new(),
            items: vec![None; EQUIPMENT_SLOTS as usize],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EquipmentSets {
    sets: RecordMap<u64, EquipmentSet>,
}

impl EquipmentSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&EquipmentSet> {
        self.sets.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u64, &EquipmentSet)> {
        self.sets.active()
    }

    pub fn save_set(&mut self, id: u64, set: EquipmentSet) {
        self.sets.insert(id, set);
    }

    pub fn delete_set(&mut self, id: u64) -> bool {
        self.sets.remove(&id)
    }

    /// Clear slots referencing items that fail `exists`. Returns the sets
    /// changed.
    pub fn clear_missing(&mut self, exists: impl Fn(ItemId) -> bool) -> Vec<u64> {
        let stale: Vec<u64> = self
            .sets
            .active()
            .filter(|(_, set)| {
                set.items.len() != EQUIPMENT_SLOTS as usize
                    || set.items.iter().flatten().any(|item| !exists(*item))
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            self.sets.update(id, |set| {
                set.items.resize(EQUIPMENT_SLOTS as usize, None);
                for slot in set.items.iter_mut() {
                    if slot.is_some_and(|item| !exists(item)) {
                        *slot = None;
                    }
                }
            });
        }
        stale
    }

    /// Forget an item in every set
    pub fn remove_item(&mut self, item: ItemId) -> usize {
        self.clear_missing(|candidate| candidate != item).len()
    }

    pub fn load(&mut self, id: u64, set: EquipmentSet) -> bool {
        self.sets.load(id, set)
    }

    pub fn is_dirty(&self) -> bool {
        self.sets.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.sets.save(phase, Table::CharacterEquipmentSets, owner, scope)
    }
}
