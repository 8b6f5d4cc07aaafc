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

//! Skill manager
//!
//! Child skills unlock from their parent's value and professions hold one of
//! two slots. Both are re-derived after a full load rather than while rows
//! stream in, since stored order says nothing about unlock order.

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use crate::reference::ReferenceData;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_PROFESSIONS: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillValue {
    pub value: u16,
    pub max: u16,
    #[serde(default)]
    pub profession_slot: Option<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Skills {
    skills: RecordMap<u32, SkillValue>,
}

impl Skills {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, skill: u32) -> Option<&SkillValue> {
        self.skills.get(&skill)
    }

    pub fn has(&self, skill: u32) -> bool {
        self.skills.contains(&skill)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &SkillValue)> {
        self.skills.active()
    }

    /// Learn a skill at `value`. Known skills are left alone.
    pub fn learn(&mut self, skill: u32, value: u16, max: u16) -> bool {
        if self.has(skill) {
            return false;
        }
        self.skills.insert(
            skill,
            SkillValue {
                value: value.min(max),
                max,
                profession_slot: None,
            },
        );
        true
    }

    pub fn set_value(&mut self, skill: u32, value: u16) -> bool {
        self.skills
            .update(&skill, |entry| entry.value = value.min(entry.max))
            .is_some()
    }

    pub fn unlearn(&mut self, skill: u32) -> bool {
        self.skills.remove(&skill)
    }

    pub fn load(&mut self, skill: u32, value: SkillValue) -> bool {
        self.skills.load(skill, value)
    }

    pub fn discard(&mut self, skill: u32, value: SkillValue) {
        self.skills.load_discarded(skill, value);
    }

    pub fn update(&mut self, skill: u32, f: impl FnOnce(&mut SkillValue)) -> bool {
        self.skills.update(&skill, f).is_some()
    }

    /// Learn every child skill whose parent reached its unlock value,
    /// repeating until nothing new unlocks. Returns the skills learned.
    pub fn unlock_children(&mut self, reference: &ReferenceData) -> Vec<u32> {
        let mut learned = Vec::new();
        loop {
            let mut ready: Vec<(u32, u16)> = reference
                .skills
                .iter()
                .filter(|(child, _)| !self.has(**child))
                .filter_map(|(child, rule)| {
                    let parent = self.get(rule.parent?)?;
                    (parent.value >= rule.unlock_at).then_some((*child, rule.max))
                })
                .collect();
            if ready.is_empty() {
                return learned;
            }
            ready.sort_unstable();
            for (child, max) in ready {
                self.learn(child, 1, max);
                learned.push(child);
            }
        }
    }

    /// Give each known profession a distinct slot below [`MAX_PROFESSIONS`].
    /// Valid assignments are kept; the rest fill free slots in skill order.
    pub fn assign_profession_slots(&mut self, reference: &ReferenceData) -> usize {
        let professions: Vec<(u32, Option<u8>)> = self
            .skills
            .active()
            .filter(|(skill, _)| reference.skills.get(*skill).is_some_and(|rule| rule.profession))
            .map(|(skill, value)| (*skill, value.profession_slot))
            .collect();

        let mut taken = [false; MAX_PROFESSIONS as usize];
        let mut wanted: Vec<(u32, Option<u8>)> = Vec::new();
        for (skill, slot) in &professions {
            match slot {
                Some(slot) if *slot < MAX_PROFESSIONS && !taken[*slot as usize] => {
                    taken[*slot as usize] = true;
                }
                _ => wanted.push((*skill, None)),
            }
        }
        for (_, assigned) in wanted.iter_mut() {
            if let Some(free) = taken.iter().position(|t| !t) {
                taken[free] = true;
                *assigned = Some(free as u8);
            }
        }

        let mut changed = 0;
        for (skill, assigned) in wanted {
            let current = self.get(skill).and_then(|value| value.profession_slot);
            if current != assigned {
                self.skills
                    .update(&skill, |value| value.profession_slot = assigned);
                changed += 1;
            }
        }
        changed
    }

    pub fn is_dirty(&self) -> bool {
        self.skills.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.skills.save(phase, Table::CharacterSkills, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::fixtures;

    fn loaded(value: u16, slot: Option<u8>) -> SkillValue {
        SkillValue {
            value,
            max: 300,
            profession_slot: slot,
        }
    }

    #[test]
    fn test_unlock_children_chains() {
        let reference = fixtures::reference();
        let mut skills = Skills::new();
        skills.load(fixtures::BLACKSMITHING, loaded(250, Some(0)));

        let learned = skills.unlock_children(&reference);
        assert_eq!(learned, vec![fixtures::ARMORSMITHING]);
        assert_eq!(skills.get(fixtures::ARMORSMITHING).unwrap().value, 1);

        // Nothing left to unlock
        assert!(skills.unlock_children(&reference).is_empty());
    }

    #[test]
    fn test_parent_below_threshold() {
        let reference = fixtures::reference();
        let mut skills = Skills::new();
        skills.load(fixtures::BLACKSMITHING, loaded(10, Some(0)));
        assert!(skills.unlock_children(&reference).is_empty());
    }

    #[test]
    fn test_profession_slots() {
        let reference = fixtures::reference();
        let mut skills = Skills::new();
        skills.load(fixtures::BLACKSMITHING, loaded(1, Some(1)));
        skills.load(fixtures::ALCHEMY, loaded(1, Some(1)));
        skills.load(fixtures::LEATHERWORKING, loaded(1, None));
        skills.load(fixtures::SWORDS, loaded(1, None));

        skills.assign_profession_slots(&reference);
        let slot = |skill: u32| skills.get(skill).unwrap().profession_slot;

        // The first valid claim on a slot wins; the rest fill free slots in
        // skill order until both are taken.
        assert_eq!(slot(fixtures::BLACKSMITHING), Some(1));
        assert_eq!(slot(fixtures::LEATHERWORKING), Some(0));
        assert_eq!(slot(fixtures::ALCHEMY), None);
        assert_eq!(skills.get(fixtures::SWORDS).unwrap().profession_slot, None);
    }

    #[test]
    fn test_set_value_clamps() {
        let mut skills = Skills::new();
        skills.learn(fixtures::SWORDS, 1, 300);
        skills.set_value(fixtures::SWORDS, 999);
        assert_eq!(skills.get(fixtures::SWORDS).unwrap().value, 300);
    }
}
