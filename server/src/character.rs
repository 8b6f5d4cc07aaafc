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

//! The in-memory character aggregate
//!
//! A [`Character`] owns every sub-collection of one online character and is
//! the unit of one save cycle. It is not internally synchronized; the session
//! that owns it serializes all mutation.

pub mod auras;
pub mod collections;
pub mod currency;
pub mod equipment_sets;
pub mod header;
pub mod inventory;
pub mod item;
pub mod mail;
pub mod quests;
pub mod skills;
pub mod social;
pub mod spells;
pub mod talents;
pub mod void_storage;

use crate::error::{PlacementError, SaveError};
use crate::persistence::batch::{SINGLETON_KEY, SavePhase, TransactionScope};
use crate::persistence::record::Record;
use crate::persistence::table::{StoreTarget, Table};
use crate::reference::ReferenceData;
use auras::Auras;
use collections::AccountCollections;
use currency::Currencies;
use equipment_sets::EquipmentSets;
use header::{CharacterHeader, Homebind, StatSnapshot};
use inventory::{Inventory, ItemPosition};
use item::{Item, ItemId};
use mail::Mailbox;
use quests::QuestLog;
use realmkeep_common::{AccountId, CharacterId, WorldPosition};
use skills::Skills;
use social::SocialList;
use spells::Spellbook;
use talents::{Talents, Traits};
use void_storage::VoidStorage;

/// Lifecycle of the container itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Loading,
    Active,
    Saving,
    SavingFinal,
    Destroyed,
}

#[derive(Debug, Clone)]
pub struct Character {
    id: CharacterId,
    account: AccountId,
    state: ContainerState,
    teleporting: bool,

    header: Record<CharacterHeader>,
    homebind: Record<Homebind>,
    stats: Option<Record<StatSnapshot>>,
    /// Rows that could not be decoded, deleted on the next save
    discarded: Vec<(Table, String)>,

    pub inventory: Inventory,
    pub mailbox: Mailbox,
    pub currencies: Currencies,
    pub skills: Skills,
    pub spells: Spellbook,
    pub talents: Talents,
    pub traits: Traits,
    pub quests: QuestLog,
    pub auras: Auras,
    pub equipment_sets: EquipmentSets,
    pub void_storage: VoidStorage,
    pub social: SocialList,
    pub collections: AccountCollections,
}

impl Character {
    /// A character that has never been saved
    pub fn create(id: CharacterId, header: CharacterHeader, homebind: Homebind) -> Self {
        let account = header.account;
        let mut character = Self::with_records(id, account, Record::new(header), Record::new(homebind));
        character.state = ContainerState::Active;
        character
    }

    /// Container for the load path; records arrive as stored
    pub(crate) fn loading(
        id: CharacterId,
        account: AccountId,
        header: Record<CharacterHeader>,
        homebind: Record<Homebind>,
    ) -> Self {
        let mut character = Self::with_records(id, account, header, homebind);
        character.state = ContainerState::Loading;
        character
    }

    fn with_records(
        id: CharacterId,
        account: AccountId,
        header: Record<CharacterHeader>,
        homebind: Record<Homebind>,
    ) -> Self {
        Self {
            id,
            account,
            state: ContainerState::Created,
            teleporting: false,
            header,
            homebind,
            stats: None,
            discarded: Vec::new(),
            inventory: Inventory::new(),
            mailbox: Mailbox::new(),
            currencies: Currencies::new(),
            skills: Skills::new(),
            spells: Spellbook::new(),
            talents: Talents::new(),
            traits: Traits::new(),
            quests: QuestLog::new(),
            auras: Auras::new(),
            equipment_sets: EquipmentSets::new(),
            void_storage: VoidStorage::new(),
            social: SocialList::new(),
            collections: AccountCollections::new(),
        }
    }

    pub fn id(&self) -> CharacterId {
        self.id
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    pub fn name(&self) -> &str {
        &self.header.value().name
    }

    pub fn header(&self) -> &CharacterHeader {
        self.header.value()
    }

    /// Mutable header; marks it changed
    pub fn header_mut(&mut self) -> &mut CharacterHeader {
        self.header.value_mut()
    }

    pub fn homebind(&self) -> &Homebind {
        self.homebind.value()
    }

    pub fn set_homebind(&mut self, homebind: Homebind) {
        if *self.homebind.value() != homebind {
            *self.homebind.value_mut() = homebind;
        }
    }

    pub fn stats(&self) -> Option<&StatSnapshot> {
        self.stats.as_ref().map(Record::value)
    }

    /// Publish a stat snapshot from the stat engine
    pub fn set_stats(&mut self, snapshot: StatSnapshot) {
        match self.stats.as_mut() {
            Some(record) if *record.value() == snapshot => {}
            Some(record) => *record.value_mut() = snapshot,
            None => self.stats = Some(Record::new(snapshot)),
        }
    }

    pub(crate) fn load_stats(&mut self, snapshot: StatSnapshot) {
        self.stats = Some(Record::loaded(snapshot));
    }

    pub fn is_teleporting(&self) -> bool {
        self.teleporting
    }

    pub fn begin_teleport(&mut self) {
        self.teleporting = true;
    }

    /// Land at `destination`; position fields are stable again
    pub fn finish_teleport(&mut self, destination: WorldPosition, instance_id: Option<u32>) {
        let header = self.header.value_mut();
        header.position = destination;
        header.instance_id = instance_id;
        header.transport = None;
        self.teleporting = false;
    }

    pub(crate) fn activate(&mut self) {
        self.state = ContainerState::Active;
    }

    /// Enter a save cycle
    pub(crate) fn begin_save(&mut self, final_save: bool) -> Result<(), SaveError> {
        match self.state {
            ContainerState::Active | ContainerState::Saving => {
                self.state = if final_save {
                    ContainerState::SavingFinal
                } else {
                    ContainerState::Saving
                };
                Ok(())
            }
            state => Err(SaveError::NotActive { id: self.id, state }),
        }
    }

    /// Leave a save cycle. A final save ends the container's life.
    pub(crate) fn finish_save(&mut self) {
        self.state = match self.state {
            ContainerState::SavingFinal => ContainerState::Destroyed,
            ContainerState::Saving => ContainerState::Active,
            state => state,
        };
    }

    /// Create an item at `position`, unlocking its appearance for the account
    pub fn store_new_item(
        &mut self,
        id: ItemId,
        item: Item,
        position: ItemPosition,
        reference: &ReferenceData,
    ) -> Result<(), PlacementError> {
        let template = item.template;
        self.inventory.store_new_item(id, item, position, reference)?;
        if let Some(appearance) = reference.item(template).and_then(|t| t.appearance) {
            self.collections.unlock_appearance(appearance, template);
        }
        Ok(())
    }

    /// Destroy an item and clear it from every equipment set
    pub fn destroy_item(&mut self, id: ItemId) -> Result<Item, PlacementError> {
        let item = self.inventory.destroy(id)?;
        self.equipment_sets.remove_item(id);
        Ok(item)
    }

    /// Schedule deletion of a stored row that never became a record
    pub(crate) fn discard_raw(&mut self, table: Table, key: impl Into<String>) {
        self.discarded.push((table, key.into()));
    }

    /// Whether the next save cycle has anything to write
    pub fn is_dirty(&self) -> bool {
        !self.discarded.is_empty()
            || self.header.is_dirty()
            || self.homebind.is_dirty()
            || self.stats.as_ref().is_some_and(Record::is_dirty)
            || self.inventory.is_dirty()
            || self.mailbox.is_dirty()
            || self.currencies.is_dirty()
            || self.skills.is_dirty()
            || self.spells.is_dirty()
            || self.talents.is_dirty()
            || self.traits.is_dirty()
            || self.quests.is_dirty()
            || self.auras.is_dirty()
            || self.equipment_sets.is_dirty()
            || self.void_storage.is_dirty()
            || self.social.is_dirty()
            || self.collections.is_dirty()
    }

    /// Emit one table's operations for one phase into `scope`
    pub(crate) fn save_table(
        &mut self,
        table: Table,
        phase: SavePhase,
        save_stats: bool,
        scope: &mut TransactionScope,
    ) -> usize {
        let owner = self.id.uuid();
        let account = self.account.uuid();
        let mut written = 0;
        if phase == SavePhase::Delete {
            let raw_owner = match table.target() {
                StoreTarget::Character => owner,
                StoreTarget::Account => account,
            };
            self.discarded.retain(|(discarded, key)| {
                if *discarded != table {
                    return true;
                }
                scope.delete(table, raw_owner, key.as_str());
                written += 1;
                false
            });
        }

        written + match table {
            Table::Characters => self.header.save(phase, table, owner, SINGLETON_KEY, scope),
            Table::CharacterHomebind => self.homebind.save(phase, table, owner, SINGLETON_KEY, scope),
            Table::CharacterStats => match self.stats.as_mut() {
                Some(stats) if save_stats => stats.save(phase, table, owner, SINGLETON_KEY, scope),
                _ => 0,
            },
            Table::ItemInstances => self.inventory.save_instances(phase, owner, scope),
            Table::CharacterInventory => self.inventory.save_positions(phase, owner, scope),
            Table::Mail => self.mailbox.save_mails(phase, owner, scope),
            Table::MailItems => self.mailbox.save_attachments(phase, owner, scope),
            Table::CharacterCurrency => self.currencies.save(phase, owner, scope),
            Table::CharacterSkills => self.skills.save(phase, owner, scope),
            Table::CharacterSpells => self.spells.save(phase, owner, scope),
            Table::CharacterTalents => self.talents.save(phase, owner, scope),
            Table::CharacterTraits => self.traits.save(phase, owner, scope),
            Table::CharacterQuestStatus
            | Table::CharacterQuestObjectives
            | Table::CharacterQuestRewarded => self.quests.save(table, phase, owner, scope),
            Table::CharacterAuras => self.auras.save(phase, owner, scope),
            Table::CharacterEquipmentSets => self.equipment_sets.save(phase, owner, scope),
            Table::CharacterVoidStorage => self.void_storage.save(phase, owner, scope),
            Table::CharacterSocial => self.social.save(phase, owner, scope),
            Table::AccountToys
            | Table::AccountHeirlooms
            | Table::AccountMounts
            | Table::AccountItemAppearances
            | Table::AccountBattlePets
            | Table::AccountCharacterCompanion => self.collections.save(table, phase, account, scope),
            // Read-only here, or written by the coordinator itself
            Table::AccountAccess | Table::AccountLastPlayedCharacter => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::fixtures;
    use chrono::Utc;

    #[test]
    fn test_new_item_unlocks_appearance() {
        let reference = fixtures::reference();
        let mut character = fixtures::character();
        character
            .store_new_item(
                ItemId(1),
                Item::new(fixtures::SWORD, Utc::now()),
                ItemPosition::Equipment(15),
                &reference,
            )
            .unwrap();
        assert!(character.collections.appearances.contains(&fixtures::SWORD_APPEARANCE));
    }

    #[test]
    fn test_save_state_transitions() {
        let mut character = fixtures::character();
        character.begin_save(false).unwrap();
        assert_eq!(character.state(), ContainerState::Saving);
        character.finish_save();
        assert_eq!(character.state(), ContainerState::Active);

        character.begin_save(true).unwrap();
        character.finish_save();
        assert_eq!(character.state(), ContainerState::Destroyed);
        assert!(matches!(
            character.begin_save(false),
            Err(SaveError::NotActive { .. })
        ));
    }

    #[test]
    fn test_destroy_item_clears_sets() {
        let reference = fixtures::reference();
        let mut character = fixtures::character();
        character
            .store_new_item(
                ItemId(1),
                Item::new(fixtures::SWORD, Utc::now()),
                ItemPosition::Equipment(15),
                &reference,
            )
            .unwrap();
        let mut set = equipment_sets::EquipmentSet::new("Main");
        set.items[15] = Some(ItemId(1));
        character.equipment_sets.save_set(1, set);

        character.destroy_item(ItemId(1)).unwrap();
        assert_eq!(character.equipment_sets.get(1).unwrap().items[15], None);
    }

    #[test]
    fn test_teleport_updates_position() {
        let mut character = fixtures::character();
        character.begin_teleport();
        assert!(character.is_teleporting());
        let destination = WorldPosition::new(1, 5.0, 5.0, 0.0);
        character.finish_teleport(destination, None);
        assert!(!character.is_teleporting());
        assert_eq!(character.header().position, destination);
    }

    #[test]
    fn test_discarded_rows_deleted_once() {
        let mut character = fixtures::character();
        character.discard_raw(Table::CharacterSpells, "garbage");
        assert!(character.is_dirty());

        let mut scope = TransactionScope::new(StoreTarget::Character);
        let written = character.save_table(Table::CharacterSpells, SavePhase::Delete, false, &mut scope);
        assert_eq!(written, 1);
        assert!(scope.ops()[0].is_delete());

        let mut again = TransactionScope::new(StoreTarget::Character);
        character.save_table(Table::CharacterSpells, SavePhase::Delete, false, &mut again);
        assert!(again.is_empty());
    }
}
