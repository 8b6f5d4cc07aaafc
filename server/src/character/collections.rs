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

//! Account-wide collections
//!
//! Same record machinery as every character collection, but owned by the
//! account and written to the account store. Account data can always be
//! re-derived from character data, which is what makes a lagging account
//! commit tolerable.

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use realmkeep_common::CharacterId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toy {
    #[serde(default)]
    pub favorite: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heirloom {
    #[serde(default)]
    pub upgrade_level: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    #[serde(default)]
    pub favorite: bool,
}

/// Unlocked item appearance; remembers the template that unlocked it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppearanceUnlock {
    pub source_template: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattlePet {
    pub species: u32,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default)]
    pub name: Option<String>,
}

fn default_level() -> u8 {
    1
}

/// Battle pet summoned by one character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    pub pet: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AccountCollections {
    pub toys: RecordMap<u32, Toy>,
    pub heirlooms: RecordMap<u32, Heirloom>,
    pub mounts: RecordMap<u32, Mount>,
    pub appearances: RecordMap<u32, AppearanceUnlock>,
    pub battle_pets: RecordMap<u64, BattlePet>,
    /// Only this character's row of the account-wide table
    pub companion: RecordMap<CharacterId, Companion>,
}

impl AccountCollections {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_toy(&mut self, toy: u32) -> bool {
        if self.toys.contains(&toy) {
            return false;
        }
        self.toys.insert(toy, Toy::default());
        true
    }

    pub fn add_mount(&mut self, spell: u32) -> bool {
        if self.mounts.contains(&spell) {
            return false;
        }
        self.mounts.insert(spell, Mount::default());
        true
    }

    pub fn add_heirloom(&mut self, template: u32) -> bool {
        if self.heirlooms.contains(&template) {
            return false;
        }
        self.heirlooms.insert(template, Heirloom::default());
        true
    }

    pub fn upgrade_heirloom(&mut self, template: u32, level: u8) -> bool {
        self.heirlooms
            .update(&template, |heirloom| heirloom.upgrade_level = level)
            .is_some()
    }

    /// Unlock an appearance the first time an item carrying it is obtained
    pub fn unlock_appearance(&mut self, appearance: u32, source_template: u32) -> bool {
        if self.appearances.contains(&appearance) {
            return false;
        }
        self.appearances
            .insert(appearance, AppearanceUnlock { source_template });
        true
    }

    pub fn add_battle_pet(&mut self, id: u64, pet: BattlePet) {
        self.battle_pets.insert(id, pet);
    }

    pub fn release_battle_pet(&mut self, id: u64, character: CharacterId) -> bool {
        if !self.battle_pets.remove(&id) {
            return false;
        }
        if self.companion(character) == Some(id) {
            self.companion.remove(&character);
        }
        true
    }

    pub fn companion(&self, character: CharacterId) -> Option<u64> {
        self.companion.get(&character).map(|c| c.pet)
    }

    pub fn summon(&mut self, character: CharacterId, pet: u64) -> bool {
        if !self.battle_pets.contains(&pet) {
            return false;
        }
        self.companion.insert(character, Companion { pet });
        true
    }

    pub fn dismiss(&mut self, character: CharacterId) -> bool {
        self.companion.remove(&character)
    }

    pub fn is_dirty(&self) -> bool {
        self.toys.is_dirty()
            || self.heirlooms.is_dirty()
            || self.mounts.is_dirty()
            || self.appearances.is_dirty()
            || self.battle_pets.is_dirty()
            || self.companion.is_dirty()
    }

    pub fn save(
        &mut self,
        table: Table,
        phase: SavePhase,
        account: Uuid,
        scope: &mut TransactionScope,
    ) -> usize {
        match table {
            Table::AccountToys => self.toys.save(phase, table, account, scope),
            Table::AccountHeirlooms => self.heirlooms.save(phase, table, account, scope),
            Table::AccountMounts => self.mounts.save(phase, table, account, scope),
            Table::AccountItemAppearances => self.appearances.save(phase, table, account, scope),
            Table::AccountBattlePets => self.battle_pets.save(phase, table, account, scope),
            Table::AccountCharacterCompanion => self.companion.save(phase, table, account, scope),
            _ => 0,
        }
    }
}
