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

//! Save scheduling for online characters
//!
//! Saves are requested by the auto-save cycle or by callers and picked up by
//! the next cycle. A character in the middle of a teleport has unstable
//! position fields, so its requests are parked until the teleport completes
//! instead of being dropped.

use metrics::counter;
use realmkeep_common::CharacterId;
use std::collections::BTreeSet;

#[derive(Debug, Default)]
pub struct SaveScheduler {
    requested: BTreeSet<CharacterId>,
    deferred: BTreeSet<CharacterId>,
}

impl SaveScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a save. Returns false when the character is parked.
    pub fn request(&mut self, id: CharacterId) -> bool {
        if self.deferred.contains(&id) {
            return false;
        }
        self.requested.insert(id);
        true
    }

    /// Park a save until [`SaveScheduler::release`] is called
    pub fn defer(&mut self, id: CharacterId) {
        self.requested.remove(&id);
        if self.deferred.insert(id) {
            tracing::debug!("Save of character {} deferred until teleport completes", id);
            counter!("persistence.save.deferred").increment(1);
        }
    }

    /// Move a parked save back into the queue
    pub fn release(&mut self, id: CharacterId) -> bool {
        if self.deferred.remove(&id) {
            self.requested.insert(id);
            true
        } else {
            false
        }
    }

    /// Drain every queued save in identity order
    pub fn take_ready(&mut self) -> Vec<CharacterId> {
        std::mem::take(&mut self.requested).into_iter().collect()
    }

    pub fn is_requested(&self, id: CharacterId) -> bool {
        self.requested.contains(&id)
    }

    pub fn is_deferred(&self, id: CharacterId) -> bool {
        self.deferred.contains(&id)
    }

    /// Drop all scheduling state of a character
    pub fn forget(&mut self, id: CharacterId) {
        self.requested.remove(&id);
        self.deferred.remove(&id);
    }
}
