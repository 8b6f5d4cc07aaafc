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

//! Spellbook manager

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellState {
    pub active: bool,
    #[serde(default)]
    pub disabled: bool,
}

impl Default for SpellState {
    fn default() -> Self {
        Self {
            active: true,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Spellbook {
    spells: RecordMap<u32, SpellState>,
}

impl Spellbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn knows(&self, spell: u32) -> bool {
        self.spells.contains(&spell)
    }

    pub fn get(&self, spell: u32) -> Option<&SpellState> {
        self.spells.get(&spell)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &SpellState)> {
        self.spells.active()
    }

    pub fn learn(&mut self, spell: u32) -> bool {
        if self.knows(spell) {
            return false;
        }
        self.spells.insert(spell, SpellState::default());
        true
    }

    /// Session-only spell, gone at logout
    pub fn learn_temporary(&mut self, spell: u32) -> bool {
        self.spells.insert_temporary(spell, SpellState::default())
    }

    pub fn unlearn(&mut self, spell: u32) -> bool {
        self.spells.remove(&spell)
    }

    pub fn set_disabled(&mut self, spell: u32, disabled: bool) -> bool {
        match self.spells.get(&spell) {
            Some(state) if state.disabled == disabled => true,
            Some(_) => self
                .spells
                .update(&spell, |state| state.disabled = disabled)
                .is_some(),
            None => false,
        }
    }

    pub fn load(&mut self, spell: u32, state: SpellState) -> bool {
        self.spells.load(spell, state)
    }

    pub fn discard(&mut self, spell: u32, state: SpellState) {
        self.spells.load_discarded(spell, state);
    }

    pub fn is_dirty(&self) -> bool {
        self.spells.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.spells.save(phase, Table::CharacterSpells, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::table::StoreTarget;

    #[test]
    fn test_temporary_spell_not_saved() {
        let mut spellbook = Spellbook::new();
        assert!(spellbook.learn_temporary(133));
        assert!(spellbook.knows(133));
        assert!(!spellbook.is_dirty());

        let mut scope = TransactionScope::new(StoreTarget::Character);
        spellbook.save(SavePhase::Upsert, Uuid::nil(), &mut scope);
        assert!(scope.is_empty());
    }

    #[test]
    fn test_unlearn_then_relearn() {
        let mut spellbook = Spellbook::new();
        spellbook.load(133, SpellState::default());
        assert!(spellbook.unlearn(133));
        assert!(spellbook.learn(133));

        let mut scope = TransactionScope::new(StoreTarget::Character);
        spellbook.save(SavePhase::Delete, Uuid::nil(), &mut scope);
        spellbook.save(SavePhase::Upsert, Uuid::nil(), &mut scope);
        assert_eq!(scope.len(), 2);
        assert!(scope.ops()[0].is_delete());
    }
}
