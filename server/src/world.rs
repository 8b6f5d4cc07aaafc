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

//! Live world state the load path consults
//!
//! Instances, transports and battlegrounds come and go while characters are
//! offline. The load path asks this state whether a saved reference still
//! resolves. Identifier sequences for new rows live here too.

use crate::persistence::store::RecordStore;
use crate::persistence::table::Table;
use crate::error::StoreError;
use dashmap::{DashMap, DashSet};
use realmkeep_common::WorldPosition;
use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic identifier source seeded from the store
#[derive(Debug, Default)]
pub struct Sequence(AtomicU64);

impl Sequence {
    pub fn new(last: u64) -> Self {
        Self(AtomicU64::new(last))
    }

    /// Next identifier; never returns zero
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Raise the sequence so it continues after `last`
    pub fn advance_to(&self, last: u64) {
        self.0.fetch_max(last, Ordering::Relaxed);
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A running battleground instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunningBattleground {
    pub map_id: u32,
}

#[derive(Debug, Default)]
pub struct WorldState {
    instances: DashSet<u32>,
    transports: DashMap<u32, WorldPosition>,
    battlegrounds: DashMap<u32, RunningBattleground>,
    holidays: DashSet<u32>,

    pub item_ids: Sequence,
    pub mail_ids: Sequence,
    pub equipment_set_ids: Sequence,
    pub void_item_ids: Sequence,
    pub battle_pet_ids: Sequence,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed every sequence from the largest key already stored
    pub async fn seed_sequences(
        &self,
        character_store: &dyn RecordStore,
        account_store: &dyn RecordStore,
    ) -> Result<(), StoreError> {
        let seeds = [
            (&self.item_ids, character_store, Table::ItemInstances),
            (&self.mail_ids, character_store, Table::Mail),
            (&self.equipment_set_ids, character_store, Table::CharacterEquipmentSets),
            (&self.void_item_ids, character_store, Table::CharacterVoidStorage),
            (&self.battle_pet_ids, account_store, Table::AccountBattlePets),
        ];
        for (sequence, store, table) in seeds {
            if let Some(last) = store.max_key(table).await? {
                sequence.advance_to(last);
            }
            tracing::debug!("Sequence for {} starts after {}", table, sequence.current());
        }
        Ok(())
    }

    pub fn open_instance(&self, instance_id: u32) {
        self.instances.insert(instance_id);
    }

    /// Instance reset or expired
    pub fn close_instance(&self, instance_id: u32) {
        self.instances.remove(&instance_id);
    }

    pub fn is_instance_live(&self, instance_id: u32) -> bool {
        self.instances.contains(&instance_id)
    }

    pub fn update_transport(&self, transport_id: u32, position: WorldPosition) {
        self.transports.insert(transport_id, position);
    }

    pub fn remove_transport(&self, transport_id: u32) {
        self.transports.remove(&transport_id);
    }

    pub fn transport_position(&self, transport_id: u32) -> Option<WorldPosition> {
        self.transports.get(&transport_id).map(|entry| *entry.value())
    }

    pub fn start_battleground(&self, instance_id: u32, map_id: u32) {
        self.battlegrounds
            .insert(instance_id, RunningBattleground { map_id });
    }

    pub fn end_battleground(&self, instance_id: u32) {
        self.battlegrounds.remove(&instance_id);
    }

    pub fn battleground(&self, instance_id: u32) -> Option<RunningBattleground> {
        self.battlegrounds
            .get(&instance_id)
            .map(|entry| *entry.value())
    }

    pub fn start_holiday(&self, holiday: u32) {
        self.holidays.insert(holiday);
    }

    pub fn end_holiday(&self, holiday: u32) {
        self.holidays.remove(&holiday);
    }

    pub fn is_holiday_active(&self, holiday: u32) -> bool {
        self.holidays.contains(&holiday)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryRecordStore;
    use crate::persistence::table::StoreTarget;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_sequence_never_repeats() {
        let sequence = Sequence::new(0);
        assert_eq!(sequence.next(), 1);
        assert_eq!(sequence.next(), 2);
        sequence.advance_to(10);
        assert_eq!(sequence.next(), 11);
        // Never moves backwards
        sequence.advance_to(3);
        assert_eq!(sequence.next(), 12);
    }

    #[test]
    fn test_instance_lifecycle() {
        let world = WorldState::new();
        world.open_instance(7);
        assert!(world.is_instance_live(7));
        world.close_instance(7);
        assert!(!world.is_instance_live(7));
    }

    #[tokio::test]
    async fn test_seed_sequences() {
        let characters = MemoryRecordStore::new(StoreTarget::Character);
        let accounts = MemoryRecordStore::new(StoreTarget::Account);
        characters
            .put(Table::ItemInstances, Uuid::new_v4(), "41", json!({}))
            .await;
        accounts
            .put(Table::AccountBattlePets, Uuid::new_v4(), "9", json!({}))
            .await;

        let world = WorldState::new();
        world.seed_sequences(&characters, &accounts).await.unwrap();
        assert_eq!(world.item_ids.next(), 42);
        assert_eq!(world.battle_pet_ids.next(), 10);
        assert_eq!(world.mail_ids.next(), 1);
    }
}
