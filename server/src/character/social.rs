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

//! Friends and ignore list

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use realmkeep_common::CharacterId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialFlags {
    #[serde(default)]
    pub friend: bool,
    #[serde(default)]
    pub ignored: bool,
    #[serde(default)]
    pub muted: bool,
}

impl SocialFlags {
    pub fn is_empty(&self) -> bool {
        !self.friend && !self.ignored && !self.muted
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocialEntry {
    pub flags: SocialFlags,
    #[serde(default)]
    pub note: String,
}

/// Keyed by the other character, so rows about a deleted character can be
/// found across every owner.
#[derive(Debug, Clone, Default)]
pub struct SocialList {
    entries: RecordMap<CharacterId, SocialEntry>,
}

impl SocialList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, other: CharacterId) -> Option<&SocialEntry> {
        self.entries.get(&other)
    }

    pub fn contacts(&self) -> impl Iterator<Item = &CharacterId> {
        self.entries.keys()
    }

    pub fn add_friend(&mut self, other: CharacterId, note: impl Into<String>) {
        let note = note.into();
        self.modify(other, |entry| {
            entry.flags.friend = true;
            entry.note = note;
        });
    }

    pub fn remove_friend(&mut self, other: CharacterId) {
        self.modify(other, |entry| entry.flags.friend = false);
    }

    pub fn ignore(&mut self, other: CharacterId) {
        self.modify(other, |entry| entry.flags.ignored = true);
    }

    pub fn unignore(&mut self, other: CharacterId) {
        self.modify(other, |entry| entry.flags.ignored = false);
    }

    fn modify(&mut self, other: CharacterId, f: impl FnOnce(&mut SocialEntry)) {
        let mut entry = self.entries.get(&other).cloned().unwrap_or_default();
        f(&mut entry);
        if entry.flags.is_empty() {
            self.entries.remove(&other);
        } else if self.entries.get(&other) != Some(&entry) {
            self.entries.insert(other, entry);
        }
    }

    /// Drop a deleted character without emitting a delete; its rows were
    /// already purged across all owners.
    pub fn forget(&mut self, other: CharacterId) -> bool {
        self.entries.forget(&other).is_some()
    }

    pub fn load(&mut self, other: CharacterId, entry: SocialEntry) -> bool {
        self.entries.load(other, entry)
    }

    pub fn is_dirty(&self) -> bool {
        self.entries.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.entries.save(phase, Table::CharacterSocial, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_flag_removes_entry() {
        let other = CharacterId::new();
        let mut social = SocialList::new();
        social.load(
            other,
            SocialEntry {
                flags: SocialFlags {
                    friend: true,
                    ..Default::default()
                },
                note: String::new(),
            },
        );
        social.ignore(other);
        assert!(social.get(other).unwrap().flags.ignored);

        social.remove_friend(other);
        social.unignore(other);
        assert!(social.get(other).is_none());
        assert!(social.is_dirty());
    }

    #[test]
    fn test_forget_is_silent() {
        let other = CharacterId::new();
        let mut social = SocialList::new();
        social.load(other, SocialEntry::default());
        assert!(social.forget(other));
        assert!(!social.is_dirty());
    }
}
