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

//! Quest log manager
//!
//! Three tables: status per quest, objective progress keyed by
//! (quest, objective index), and the set of rewarded quests. Objectives only
//! exist under a status, so removing a status removes its objectives.

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestState {
    Incomplete,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestStatus {
    pub state: QuestState,
    pub accepted_at: DateTime<Utc>,
    #[serde(default)]
    pub timer: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rewarded {
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct QuestLog {
    statuses: RecordMap<u32, QuestStatus>,
    objectives: RecordMap<(u32, u8), i32>,
    rewarded: RecordMap<u32, Rewarded>,
}

impl QuestLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, quest: u32) -> Option<&QuestStatus> {
        self.statuses.get(&quest)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (&u32, &QuestStatus)> {
        self.statuses.active()
    }

    pub fn objective(&self, quest: u32, index: u8) -> Option<i32> {
        self.objectives.get(&(quest, index)).copied()
    }

    pub fn objectives(&self) -> impl Iterator<Item = (&(u32, u8), &i32)> {
        self.objectives.active()
    }

    pub fn is_rewarded(&self, quest: u32) -> bool {
        self.rewarded.contains(&quest)
    }

    pub fn rewarded(&self) -> impl Iterator<Item = &u32> {
        self.rewarded.keys()
    }

    pub fn accept(&mut self, quest: u32, now: DateTime<Utc>) -> bool {
        if self.statuses.contains(&quest) || self.is_rewarded(quest) {
            return false;
        }
        self.statuses.insert(
            quest,
            QuestStatus {
                state: QuestState::Incomplete,
                accepted_at: now,
                timer: None,
            },
        );
        true
    }

    pub fn set_objective(&mut self, quest: u32, index: u8, progress: i32) -> bool {
        if !self.statuses.contains(&quest) {
            return false;
        }
        match self.objectives.get(&(quest, index)) {
            Some(current) if *current == progress => {}
            Some(_) => {
                self.objectives.update(&(quest, index), |p| *p = progress);
            }
            None => self.objectives.insert((quest, index), progress),
        }
        true
    }

    pub fn set_state(&mut self, quest: u32, state: QuestState) -> bool {
        self.statuses
            .update(&quest, |status| status.state = state)
            .is_some()
    }

    /// Drop a quest and all its objectives
    pub fn abandon(&mut self, quest: u32) -> bool {
        if !self.statuses.remove(&quest) {
            return false;
        }
        for key in self.objective_keys(quest) {
            self.objectives.remove(&key);
        }
        true
    }

    /// Turn a quest in
    pub fn reward(&mut self, quest: u32, now: DateTime<Utc>) -> bool {
        if self.is_rewarded(quest) {
            return false;
        }
        self.abandon(quest);
        self.rewarded.insert(quest, Rewarded { at: now });
        true
    }

    fn objective_keys(&self, quest: u32) -> Vec<(u32, u8)> {
        self.objectives
            .keys()
            .filter(|(q, _)| *q == quest)
            .copied()
            .collect()
    }

    pub fn load_status(&mut self, quest: u32, status: QuestStatus) -> bool {
        self.statuses.load(quest, status)
    }

    pub fn discard_status(&mut self, quest: u32, status: QuestStatus) {
        self.statuses.load_discarded(quest, status);
    }

    pub fn load_objective(&mut self, key: (u32, u8), progress: i32) -> bool {
        self.objectives.load(key, progress)
    }

    pub fn discard_objective(&mut self, key: (u32, u8), progress: i32) {
        self.objectives.load_discarded(key, progress);
    }

    pub fn load_rewarded(&mut self, quest: u32, rewarded: Rewarded) -> bool {
        self.rewarded.load(quest, rewarded)
    }

    pub fn discard_rewarded(&mut self, quest: u32, rewarded: Rewarded) {
        self.rewarded.load_discarded(quest, rewarded);
    }

    pub fn is_dirty(&self) -> bool {
        self.statuses.is_dirty() || self.objectives.is_dirty() || self.rewarded.is_dirty()
    }

    pub fn save(
        &mut self,
        table: Table,
        phase: SavePhase,
        owner: Uuid,
        scope: &mut TransactionScope,
    ) -> usize {
        match table {
            Table::CharacterQuestStatus => self.statuses.save(phase, table, owner, scope),
            Table::CharacterQuestObjectives => self.objectives.save(phase, table, owner, scope),
            Table::CharacterQuestRewarded => self.rewarded.save(phase, table, owner, scope),
            _ => 0,
        }
    }
}
