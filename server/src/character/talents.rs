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

//! Talent and trait managers
//!
//! Rule tables belong to the talent engine; the managers only store picks
//! and drop ones that no longer exist.

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rank {
    pub rank: u8,
}

/// Talents per specialization group, keyed by (group, talent)
#[derive(Debug, Clone, Default)]
pub struct Talents {
    talents: RecordMap<(u8, u32), Rank>,
}

impl Talents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rank(&self, group: u8, talent: u32) -> u8 {
        self.talents.get(&(group, talent)).map_or(0, |r| r.rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u8, u32), &Rank)> {
        self.talents.active()
    }

    pub fn learn(&mut self, group: u8, talent: u32, rank: u8) {
        self.talents.insert((group, talent), Rank { rank });
    }

    pub fn unlearn(&mut self, group: u8, talent: u32) -> bool {
        self.talents.remove(&(group, talent))
    }

    /// Remove every talent of a group
    pub fn reset(&mut self, group: u8) -> usize {
        let keys: Vec<(u8, u32)> = self
            .talents
            .keys()
            .filter(|(g, _)| *g == group)
            .copied()
            .collect();
        keys.iter().filter(|key| self.talents.remove(key)).count()
    }

    pub fn load(&mut self, key: (u8, u32), rank: Rank) -> bool {
        self.talents.load(key, rank)
    }

    pub fn discard(&mut self, key: (u8, u32), rank: Rank) {
        self.talents.load_discarded(key, rank);
    }

    pub fn clamp(&mut self, key: (u8, u32), max_rank: u8) -> bool {
        if self.talents.get(&key).is_some_and(|r| r.rank > max_rank) {
            self.talents.update(&key, |r| r.rank = max_rank);
            return true;
        }
        false
    }

    pub fn is_dirty(&self) -> bool {
        self.talents.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.talents.save(phase, Table::CharacterTalents, owner, scope)
    }
}

/// Trait picks keyed by (trait config, node)
#[derive(Debug, Clone, Default)]
pub struct Traits {
    entries: RecordMap<(u32, u32), Rank>,
}

impl Traits {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rank(&self, config: u32, node: u32) -> u8 {
        self.entries.get(&(config, node)).map_or(0, |r| r.rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(u32, u32), &Rank)> {
        self.entries.active()
    }

    pub fn set(&mut self, config: u32, node: u32, rank: u8) {
        if rank == 0 {
            self.entries.remove(&(config, node));
        } else {
            self.entries.insert((config, node), Rank { rank });
        }
    }

    pub fn load(&mut self, key: (u32, u32), rank: Rank) -> bool {
        self.entries.load(key, rank)
    }

    pub fn discard(&mut self, key: (u32, u32), rank: Rank) {
        self.entries.load_discarded(key, rank);
    }

    pub fn is_dirty(&self) -> bool {
        self.entries.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.entries.save(phase, Table::CharacterTraits, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_group() {
        let mut talents = Talents::new();
        talents.load((0, 1), Rank { rank: 2 });
        talents.load((0, 2), Rank { rank: 1 });
        talents.load((1, 1), Rank { rank: 3 });

        assert_eq!(talents.reset(0), 2);
        assert_eq!(talents.rank(0, 1), 0);
        assert_eq!(talents.rank(1, 1), 3);
    }

    #[test]
    fn test_clamp_marks_changed() {
        let mut talents = Talents::new();
        talents.load((0, 1), Rank { rank: 9 });
        assert!(talents.clamp((0, 1), 5));
        assert_eq!(talents.rank(0, 1), 5);
        assert!(talents.is_dirty());
        assert!(!talents.clamp((0, 1), 5));
    }

    #[test]
    fn test_trait_rank_zero_removes() {
        let mut traits = Traits::new();
        traits.set(7, 100, 1);
        traits.set(7, 100, 0);
        assert_eq!(traits.rank(7, 100), 0);
        // never stored, nothing to write
        assert!(!traits.is_dirty());
    }
}
