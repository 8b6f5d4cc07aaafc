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

//! Void storage manager
//!
//! Slot-positional like the inventory: every active entry owns one distinct
//! slot below [`VOID_STORAGE_SLOTS`].

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use realmkeep_common::CharacterId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

pub const VOID_STORAGE_SLOTS: u8 = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidItem {
    pub template: u32,
    pub slot: u8,
    #[serde(default)]
    pub creator: Option<CharacterId>,
}

/// What load-time validation did with an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoidPlacement {
    Kept,
    Relocated { from: u8, to: u8 },
    Dropped,
}

#[derive(Debug, Clone, Default)]
pub struct VoidStorage {
    items: RecordMap<u64, VoidItem>,
    slots: BTreeMap<u8, u64>,
}

impl VoidStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u64) -> Option<&VoidItem> {
        self.items.get(&id)
    }

    pub fn at(&self, slot: u8) -> Option<u64> {
        self.slots.get(&slot).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn first_free_slot(&self) -> Option<u8> {
        (0..VOID_STORAGE_SLOTS).find(|slot| !self.slots.contains_key(slot))
    }

    /// Store an item in the first free slot
    pub fn deposit(&mut self, id: u64, template: u32, creator: Option<CharacterId>) -> Option<u8> {
        let slot = self.first_free_slot()?;
        self.items.insert(
            id,
            VoidItem {
                template,
                slot,
                creator,
            },
        );
        self.slots.insert(slot, id);
        Some(slot)
    }

    pub fn withdraw(&mut self, id: u64) -> Option<VoidItem> {
        let item = *self.items.get(&id)?;
        self.items.remove(&id);
        self.slots.remove(&item.slot);
        Some(item)
    }

    /// Place a stored entry. Entries with an out-of-range or taken slot move
    /// to the first free slot, or are dropped when storage is full.
    pub fn load(&mut self, id: u64, item: VoidItem) -> VoidPlacement {
        let slot_ok = item.slot < VOID_STORAGE_SLOTS && !self.slots.contains_key(&item.slot);
        if slot_ok {
            self.items.load(id, item);
            self.slots.insert(item.slot, id);
            return VoidPlacement::Kept;
        }
        match self.first_free_slot() {
            Some(to) => {
                self.items.load(id, item);
                self.items.update(&id, |entry| entry.slot = to);
                self.slots.insert(to, id);
                VoidPlacement::Relocated {
                    from: item.slot,
                    to,
                }
            }
            None => {
                self.items.load_discarded(id, item);
                VoidPlacement::Dropped
            }
        }
    }

    pub fn discard(&mut self, id: u64, item: VoidItem) {
        self.items.load_discarded(id, item);
    }

    pub fn is_dirty(&self) -> bool {
        self.items.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.items.save(phase, Table::CharacterVoidStorage, owner, scope)
    }
}
