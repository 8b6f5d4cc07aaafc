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

//! Online character registry and shared name/social directory
//!
//! The registry owns every loaded [`Character`] and lives behind the
//! persistence manager's lock. The directory is shared lock-free state read
//! by login, deletion and social bookkeeping:
//! - reserved names, case-insensitive, for every character in the store
//! - which online characters hold a social entry pointing at a given character

use crate::character::Character;
use dashmap::DashMap;
use realmkeep_common::{AccountId, CharacterId};
use std::collections::{HashMap, HashSet};

/// Characters currently online, by identity
#[derive(Debug, Default)]
pub struct CharacterRegistry {
    characters: HashMap<CharacterId, Character>,
}

impl CharacterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            characters: HashMap::new(),
        }
    }

    /// Register a loaded character
    ///
    /// # Arguments
    /// * `character` - The character to take ownership of
    ///
    /// # Returns
    /// * `Ok(())` if registration succeeded
    /// * `Err(String)` if a character with the same identity is already online
    pub fn register(&mut self, character: Character) -> Result<(), String> {
        let id = character.id();
        if self.characters.contains_key(&id) {
            return Err(format!("Character {} is already registered", id));
        }
        self.characters.insert(id, character);
        Ok(())
    }

    /// Unregister a character, handing it back to the caller
    ///
    /// # Returns
    /// * `Some(Character)` - The character that was online
    /// * `None` - If the character was not registered
    pub fn unregister(&mut self, id: CharacterId) -> Option<Character> {
        self.characters.remove(&id)
    }

    pub fn get(&self, id: CharacterId) -> Option<&Character> {
        self.characters.get(&id)
    }

    pub fn get_mut(&mut self, id: CharacterId) -> Option<&mut Character> {
        self.characters.get_mut(&id)
    }

    pub fn contains(&self, id: CharacterId) -> bool {
        self.characters.contains_key(&id)
    }

    /// Whether any character of `account` is online
    pub fn has_account(&self, account: AccountId) -> bool {
        self.characters.values().any(|c| c.account() == account)
    }

    /// Identities of all online characters
    pub fn ids(&self) -> Vec<CharacterId> {
        let mut ids: Vec<CharacterId> = self.characters.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Character> {
        self.characters.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Character> {
        self.characters.values_mut()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

/// Name reservations and the reverse social index
#[derive(Debug, Default)]
pub struct CharacterDirectory {
    names: DashMap<String, CharacterId>,
    name_of: DashMap<CharacterId, String>,
    referenced_by: DashMap<CharacterId, HashSet<CharacterId>>,
}

impl CharacterDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name` for `id`
    ///
    /// # Returns
    /// * `Ok(())` if the name is free or already held by `id`
    /// * `Err(String)` if another character holds the name
    pub fn reserve(&self, name: &str, id: CharacterId) -> Result<(), String> {
        let folded = name.to_lowercase();
        match self.names.entry(folded) {
            dashmap::mapref::entry::Entry::Occupied(entry) if *entry.get() != id => {
                return Err(format!("Name {} is taken by character {}", name, entry.get()));
            }
            dashmap::mapref::entry::Entry::Occupied(_) => {}
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(id);
            }
        }
        if let Some(previous) = self.name_of.insert(id, name.to_string()) {
            if !previous.eq_ignore_ascii_case(name) {
                self.names.remove_if(&previous.to_lowercase(), |_, holder| *holder == id);
            }
        }
        Ok(())
    }

    /// Release the name held by `id`
    pub fn release(&self, id: CharacterId) -> Option<String> {
        let (_, name) = self.name_of.remove(&id)?;
        self.names.remove_if(&name.to_lowercase(), |_, holder| *holder == id);
        Some(name)
    }

    pub fn lookup(&self, name: &str) -> Option<CharacterId> {
        self.names.get(&name.to_lowercase()).map(|entry| *entry)
    }

    pub fn name_of(&self, id: CharacterId) -> Option<String> {
        self.name_of.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.name_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.name_of.is_empty()
    }

    /// Record that online character `owner` lists each of `contacts`
    pub fn link_contacts(&self, owner: CharacterId, contacts: impl IntoIterator<Item = CharacterId>) {
        for contact in contacts {
            self.referenced_by.entry(contact).or_default().insert(owner);
        }
    }

    /// Drop every link held by `owner`, typically at logout
    pub fn unlink_contacts(&self, owner: CharacterId) {
        self.referenced_by.retain(|_, owners| {
            owners.remove(&owner);
            !owners.is_empty()
        });
    }

    /// Online characters whose social list references `id`
    pub fn referencing(&self, id: CharacterId) -> Vec<CharacterId> {
        let mut owners: Vec<CharacterId> = self
            .referenced_by
            .get(&id)
            .map(|owners| owners.iter().copied().collect())
            .unwrap_or_default();
        owners.sort();
        owners
    }

    /// Remove `id` as a link target, returning the owners that referenced it
    pub fn forget_target(&self, id: CharacterId) -> Vec<CharacterId> {
        let mut owners: Vec<CharacterId> = self
            .referenced_by
            .remove(&id)
            .map(|(_, owners)| owners.into_iter().collect())
            .unwrap_or_default();
        owners.sort();
        owners
    }
}
