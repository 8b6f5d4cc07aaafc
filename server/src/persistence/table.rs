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

//! Store tables and their fixed storage targets
//!
//! Every table lives in exactly one of the two stores. The split is a property
//! of the table, never of an individual row.

use serde::{Deserialize, Serialize};

/// Which of the two independently transacted stores a table lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StoreTarget {
    /// Per-realm store private to one character
    Character,
    /// Global store shared by every character on an account
    Account,
}

impl std::fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreTarget::Character => write!(f, "character"),
            StoreTarget::Account => write!(f, "account"),
        }
    }
}

/// Tables backing the sub-collections of a character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Table {
    Characters,
    CharacterHomebind,
    CharacterStats,
    ItemInstances,
    CharacterInventory,
    Mail,
    MailItems,
    CharacterCurrency,
    CharacterSkills,
    CharacterSpells,
    CharacterTalents,
    CharacterTraits,
    CharacterQuestStatus,
    CharacterQuestObjectives,
    CharacterQuestRewarded,
    CharacterAuras,
    CharacterEquipmentSets,
    CharacterVoidStorage,
    CharacterSocial,
    AccountAccess,
    AccountToys,
    AccountHeirlooms,
    AccountMounts,
    AccountItemAppearances,
    AccountBattlePets,
    AccountLastPlayedCharacter,
    AccountCharacterCompanion,
}

impl Table {
    /// Character-store tables in dependency order: a table never depends on
    /// one that comes after it. Upserts walk this forwards, deletes backwards.
    pub const CHARACTER_SAVE_ORDER: [Table; 19] = [
        Table::Characters,
        Table::CharacterHomebind,
        Table::CharacterStats,
        Table::ItemInstances,
        Table::CharacterInventory,
        Table::Mail,
        Table::MailItems,
        Table::CharacterCurrency,
        Table::CharacterSkills,
        Table::CharacterSpells,
        Table::CharacterTalents,
        Table::CharacterTraits,
        Table::CharacterQuestStatus,
        Table::CharacterQuestObjectives,
        Table::CharacterQuestRewarded,
        Table::CharacterAuras,
        Table::CharacterEquipmentSets,
        Table::CharacterVoidStorage,
        Table::CharacterSocial,
    ];

    /// Account-store tables written by a save cycle
    pub const ACCOUNT_SAVE_ORDER: [Table; 7] = [
        Table::AccountToys,
        Table::AccountHeirlooms,
        Table::AccountMounts,
        Table::AccountItemAppearances,
        Table::AccountBattlePets,
        Table::AccountLastPlayedCharacter,
        Table::AccountCharacterCompanion,
    ];

    /// Account-store tables read during load
    pub const ACCOUNT_LOAD_SET: [Table; 7] = [
        Table::AccountAccess,
        Table::AccountToys,
        Table::AccountHeirlooms,
        Table::AccountMounts,
        Table::AccountItemAppearances,
        Table::AccountBattlePets,
        Table::AccountCharacterCompanion,
    ];

    /// Physical table name
    pub const fn name(&self) -> &'static str {
        match self {
            Table::Characters => "characters",
            Table::CharacterHomebind => "character_homebind",
            Table::CharacterStats => "character_stats",
            Table::ItemInstances => "item_instances",
            Table::CharacterInventory => "character_inventory",
            Table::Mail => "mail",
            Table::MailItems => "mail_items",
            Table::CharacterCurrency => "character_currency",
            Table::CharacterSkills => "character_skills",
            Table::CharacterSpells => "character_spells",
            Table::CharacterTalents => "character_talents",
            Table::CharacterTraits => "character_traits",
            Table::CharacterQuestStatus => "character_queststatus",
            Table::CharacterQuestObjectives => "character_queststatus_objectives",
            Table::CharacterQuestRewarded => "character_queststatus_rewarded",
            Table::CharacterAuras => "character_auras",
            Table::CharacterEquipmentSets => "character_equipmentsets",
            Table::CharacterVoidStorage => "character_void_storage",
            Table::CharacterSocial => "character_social",
            Table::AccountAccess => "account_access",
            Table::AccountToys => "account_toys",
            Table::AccountHeirlooms => "account_heirlooms",
            Table::AccountMounts => "account_mounts",
            Table::AccountItemAppearances => "account_item_appearances",
            Table::AccountBattlePets => "account_battle_pets",
            Table::AccountLastPlayedCharacter => "account_last_played_character",
            Table::AccountCharacterCompanion => "account_character_companion",
        }
    }

    /// The store this table belongs to
    pub const fn target(&self) -> StoreTarget {
        match self {
            Table::AccountAccess
            | Table::AccountToys
            | Table::AccountHeirlooms
            | Table::AccountMounts
            | Table::AccountItemAppearances
            | Table::AccountBattlePets
            | Table::AccountLastPlayedCharacter
            | Table::AccountCharacterCompanion => StoreTarget::Account,
            _ => StoreTarget::Character,
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_save_orders_match_targets() {
        for table in Table::CHARACTER_SAVE_ORDER {
            assert_eq!(table.target(), StoreTarget::Character, "{}", table);
        }
        for table in Table::ACCOUNT_SAVE_ORDER {
            assert_eq!(table.target(), StoreTarget::Account, "{}", table);
        }
    }

    #[test]
    fn test_table_names_unique() {
        let names: HashSet<&str> = Table::CHARACTER_SAVE_ORDER
            .iter()
            .chain(Table::ACCOUNT_LOAD_SET.iter())
            .chain(Table::ACCOUNT_SAVE_ORDER.iter())
            .map(|t| t.name())
            .collect();
        assert_eq!(names.len(), 19 + 8);
    }

    #[test]
    fn test_quest_status_saved_before_objectives() {
        let order = Table::CHARACTER_SAVE_ORDER;
        let status = order.iter().position(|t| *t == Table::CharacterQuestStatus);
        let objectives = order.iter().position(|t| *t == Table::CharacterQuestObjectives);
        assert!(status < objectives);

        let instances = order.iter().position(|t| *t == Table::ItemInstances);
        let inventory = order.iter().position(|t| *t == Table::CharacterInventory);
        let mail_items = order.iter().position(|t| *t == Table::MailItems);
        assert!(instances < inventory);
        assert!(instances < mail_items);
    }
}
