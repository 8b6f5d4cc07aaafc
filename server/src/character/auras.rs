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

//! Aura manager

use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::RecordMap;
use crate::persistence::table::Table;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aura {
    #[serde(default = "default_stacks")]
    pub stacks: u8,
    /// `None` for auras that last until removed
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_stacks() -> u8 {
    1
}

impl Aura {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Auras keyed by (caster, spell)
#[derive(Debug, Clone, Default)]
pub struct Auras {
    auras: RecordMap<(Uuid, u32), Aura>,
}

impl Auras {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, caster: Uuid, spell: u32) -> Option<&Aura> {
        self.auras.get(&(caster, spell))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&(Uuid, u32), &Aura)> {
        self.auras.active()
    }

    pub fn apply(&mut self, caster: Uuid, spell: u32, aura: Aura) {
        self.auras.insert((caster, spell), aura);
    }

    pub fn remove(&mut self, caster: Uuid, spell: u32) -> bool {
        self.auras.remove(&(caster, spell))
    }

    /// Remove every aura past its expiry
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<(Uuid, u32)> = self
            .auras
            .active()
            .filter(|(_, aura)| aura.is_expired(now))
            .map(|(key, _)| *key)
            .collect();
        expired.iter().filter(|key| self.auras.remove(key)).count()
    }

    pub fn load(&mut self, key: (Uuid, u32), aura: Aura) -> bool {
        self.auras.load(key, aura)
    }

    pub fn discard(&mut self, key: (Uuid, u32), aura: Aura) {
        self.auras.load_discarded(key, aura);
    }

    pub fn is_dirty(&self) -> bool {
        self.auras.is_dirty()
    }

    pub fn save(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.auras.save(phase, Table::CharacterAuras, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expire() {
        let now = Utc::now();
        let caster = Uuid::new_v4();
        let mut auras = Auras::new();
        auras.load(
            (caster, 1),
            Aura {
                stacks: 1,
                expires_at: Some(now - Duration::seconds(1)),
            },
        );
        auras.load(
            (caster, 2),
            Aura {
                stacks: 1,
                expires_at: None,
            },
        );
        assert_eq!(auras.expire(now), 1);
        assert!(auras.get(caster, 1).is_none());
        assert!(auras.get(caster, 2).is_some());
    }
}
