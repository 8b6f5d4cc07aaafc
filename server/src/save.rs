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

//! Write-back coordinator
//!
//! A save cycle has two halves. [`WriteBackCoordinator::build_batch`] walks
//! the character synchronously and collapses every dirty record into a
//! [`SaveBatch`]; it must run wherever the character is owned so it never
//! sees a collection mid-mutation. [`WriteBackCoordinator::commit`] only
//! touches the already-built batch and may run anywhere.

use crate::character::Character;
use crate::config::{PersistenceConfig, StatsPolicy};
use crate::error::{SaveError, StoreError};
use crate::persistence::batch::{SaveBatch, SavePhase, TransactionScope};
use crate::persistence::record::RecordKey;
use crate::persistence::store::RecordStore;
use crate::persistence::table::{StoreTarget, Table};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Payload of the account-scope row naming the last character played
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastPlayed {
    pub realm_id: u32,
    pub played_at: DateTime<Utc>,
}

/// Operations applied by one successful commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub character_operations: usize,
    pub account_operations: usize,
}

impl CommitSummary {
    pub fn total(&self) -> usize {
        self.character_operations + self.account_operations
    }
}

/// A commit that did not fully land. `batch` holds exactly the scopes that
/// still have to be applied.
#[derive(Debug)]
pub struct CommitFailure {
    pub batch: SaveBatch,
    pub target: StoreTarget,
    pub error: StoreError,
}

impl From<CommitFailure> for SaveError {
    fn from(failure: CommitFailure) -> Self {
        SaveError::Commit {
            target: failure.target,
            source: failure.error,
        }
    }
}

pub struct WriteBackCoordinator {
    character_store: Arc<dyn RecordStore>,
    account_store: Arc<dyn RecordStore>,
    stats_policy: StatsPolicy,
    realm_id: u32,
}

impl WriteBackCoordinator {
    pub fn new(
        character_store: Arc<dyn RecordStore>,
        account_store: Arc<dyn RecordStore>,
        config: &PersistenceConfig,
    ) -> Self {
        Self {
            character_store,
            account_store,
            stats_policy: config.stats_policy,
            realm_id: config.realm_id,
        }
    }

    pub fn character_store(&self) -> &Arc<dyn RecordStore> {
        &self.character_store
    }

    pub fn account_store(&self) -> &Arc<dyn RecordStore> {
        &self.account_store
    }

    /// Collapse every dirty record of `character` into a batch
    ///
    /// Deletes walk the save order backwards so dependents go first, upserts
    /// walk it forwards. Every delete of the cycle precedes every upsert, so a
    /// key removed and re-added in the same cycle is deleted and then written.
    /// The character is left in a saving state until
    /// [`Character::finish_save`] is called.
    pub fn build_batch(
        &self,
        character: &mut Character,
        final_save: bool,
        now: DateTime<Utc>,
    ) -> Result<SaveBatch, SaveError> {
        character.begin_save(final_save)?;
        let save_stats = self.stats_policy.should_save(final_save);
        let mut batch = SaveBatch::new(character.id(), final_save);

        if final_save {
            character.header_mut().logout_time = Some(now);
        }

        let forward: Vec<Table> = Table::CHARACTER_SAVE_ORDER
            .into_iter()
            .chain(Table::ACCOUNT_SAVE_ORDER)
            .collect();
        for table in forward.iter().rev() {
            character.save_table(*table, SavePhase::Delete, save_stats, batch.scope_for(*table));
        }
        for table in &forward {
            character.save_table(*table, SavePhase::Upsert, save_stats, batch.scope_for(*table));
        }

        if final_save {
            self.write_last_played(character, now, &mut batch.account_scope);
        }

        tracing::debug!(
            "Built save batch for character {}: {} character, {} account operations",
            character.id(),
            batch.character_scope.len(),
            batch.account_scope.len()
        );
        Ok(batch)
    }

    fn write_last_played(&self, character: &Character, now: DateTime<Utc>, scope: &mut TransactionScope) {
        let payload = LastPlayed {
            realm_id: self.realm_id,
            played_at: now,
        };
        match serde_json::to_value(payload) {
            Ok(value) => scope.upsert(
                Table::AccountLastPlayedCharacter,
                character.account().uuid(),
                character.id().to_key(),
                value,
            ),
            Err(e) => tracing::error!(
                "Character {} last-played row not serialized: {}",
                character.id(),
                e
            ),
        }
    }

    /// Apply a batch: character scope first, then the account scope
    ///
    /// The account scope is only attempted once the character scope is
    /// durable. Account rows can always be re-derived from character rows on
    /// the next load, never the reverse.
    pub async fn commit(&self, mut batch: SaveBatch) -> Result<CommitSummary, CommitFailure> {
        let started = Instant::now();
        let mut summary = CommitSummary::default();

        if !batch.character_scope.is_empty() {
            match self.character_store.commit(&batch.character_scope).await {
                Ok(applied) => {
                    summary.character_operations = applied;
                    batch.character_scope = TransactionScope::new(StoreTarget::Character);
                }
                Err(error) => return Err(Self::failed(batch, StoreTarget::Character, error)),
            }
        }

        if !batch.account_scope.is_empty() {
            match self.account_store.commit(&batch.account_scope).await {
                Ok(applied) => summary.account_operations = applied,
                Err(error) => return Err(Self::failed(batch, StoreTarget::Account, error)),
            }
        }

        counter!("persistence.save.operations", "scope" => "character")
            .increment(summary.character_operations as u64);
        counter!("persistence.save.operations", "scope" => "account")
            .increment(summary.account_operations as u64);
        histogram!("persistence.save.duration").record(started.elapsed().as_secs_f64());
        Ok(summary)
    }

    fn failed(batch: SaveBatch, target: StoreTarget, error: StoreError) -> CommitFailure {
        tracing::error!(
            "Save of character {} failed on the {} store: {}",
            batch.character,
            target,
            error
        );
        counter!("persistence.save.failures", "scope" => target.to_string()).increment(1);
        CommitFailure { batch, target, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::ContainerState;
    use crate::persistence::batch::StoreOp;
    use crate::persistence::memory::MemoryRecordStore;
    use crate::persistence::store::MockRecordStore;
    use crate::reference::fixtures;

    fn coordinator(policy: StatsPolicy) -> WriteBackCoordinator {
        let config = PersistenceConfig {
            stats_policy: policy,
            ..PersistenceConfig::default()
        };
        WriteBackCoordinator::new(
            Arc::new(MemoryRecordStore::new(StoreTarget::Character)),
            Arc::new(MemoryRecordStore::new(StoreTarget::Account)),
            &config,
        )
    }

    #[test]
    fn test_second_build_is_empty() {
        let coordinator = coordinator(StatsPolicy::FinalOnly);
        let reference = fixtures::reference();
        let mut character = fixtures::character();
        character.currencies.modify(fixtures::HONOR, 100, &reference);

        let first = coordinator.build_batch(&mut character, false, Utc::now()).unwrap();
        assert!(!first.is_empty());
        character.finish_save();

        let second = coordinator.build_batch(&mut character, false, Utc::now()).unwrap();
        assert!(second.is_empty());
        assert_eq!(character.state(), ContainerState::Saving);
    }

    #[test]
    fn test_deletes_precede_upserts() {
        let coordinator = coordinator(StatsPolicy::Never);
        let mut character = fixtures::character();
        let batch = coordinator.build_batch(&mut character, false, Utc::now()).unwrap();
        character.finish_save();

        character.spells.learn(fixtures::FIREBALL);
        let batch2 = coordinator.build_batch(&mut character, false, Utc::now()).unwrap();
        character.finish_save();
        assert!(!batch.is_empty());
        assert_eq!(batch2.character_scope.len(), 1);

        // Remove and re-add in one cycle
        character.spells.unlearn(fixtures::FIREBALL);
        character.spells.learn(fixtures::FIREBALL);
        let batch3 = coordinator.build_batch(&mut character, false, Utc::now()).unwrap();
        let ops = batch3.character_scope.ops();
        assert_eq!(ops.len(), 2);
        assert!(ops[0].is_delete());
        assert!(matches!(ops[1], StoreOp::Upsert { .. }));
    }

    #[test]
    fn test_stats_policy() {
        let mut character = fixtures::character();
        character.set_stats(Default::default());

        let never = coordinator(StatsPolicy::Never);
        let batch = never.build_batch(&mut character, true, Utc::now()).unwrap();
        assert!(
            !batch
                .character_scope
                .ops()
                .iter()
                .any(|op| op.table() == Table::CharacterStats)
        );

        let mut character = fixtures::character();
        character.set_stats(Default::default());
        let final_only = coordinator(StatsPolicy::FinalOnly);
        let periodic = final_only.build_batch(&mut character, false, Utc::now()).unwrap();
        assert!(
            !periodic
                .character_scope
                .ops()
                .iter()
                .any(|op| op.table() == Table::CharacterStats)
        );
        character.finish_save();
        let last = final_only.build_batch(&mut character, true, Utc::now()).unwrap();
        assert!(
            last.character_scope
                .ops()
                .iter()
                .any(|op| op.table() == Table::CharacterStats)
        );
    }

    #[test]
    fn test_final_save_writes_last_played() {
        let coordinator = coordinator(StatsPolicy::FinalOnly);
        let mut character = fixtures::character();
        let now = Utc::now();
        let batch = coordinator.build_batch(&mut character, true, now).unwrap();

        assert_eq!(character.state(), ContainerState::SavingFinal);
        assert_eq!(character.header().logout_time, Some(now));
        assert!(batch.account_scope.ops().iter().any(|op| matches!(
            op,
            StoreOp::Upsert { table: Table::AccountLastPlayedCharacter, key, .. }
                if *key == character.id().to_key()
        )));
    }

    #[tokio::test]
    async fn test_account_scope_skipped_after_character_failure() {
        let mut characters = MockRecordStore::new();
        characters
            .expect_commit()
            .times(1)
            .returning(|_| Err(StoreError::Rejected("disk full".to_string())));
        let mut accounts = MockRecordStore::new();
        accounts.expect_commit().never();

        let coordinator = WriteBackCoordinator::new(
            Arc::new(characters),
            Arc::new(accounts),
            &PersistenceConfig::default(),
        );
        let mut character = fixtures::character();
        let batch = coordinator.build_batch(&mut character, true, Utc::now()).unwrap();
        let expected = batch.clone();

        let failure = coordinator.commit(batch).await.unwrap_err();
        assert_eq!(failure.target, StoreTarget::Character);
        assert_eq!(failure.batch, expected);
    }

    #[tokio::test]
    async fn test_account_failure_keeps_only_account_scope() {
        let mut characters = MockRecordStore::new();
        characters.expect_commit().times(1).returning(|scope| Ok(scope.len()));
        let mut accounts = MockRecordStore::new();
        accounts
            .expect_commit()
            .times(1)
            .returning(|_| Err(StoreError::Rejected("timeout".to_string())));

        let coordinator = WriteBackCoordinator::new(
            Arc::new(characters),
            Arc::new(accounts),
            &PersistenceConfig::default(),
        );
        let mut character = fixtures::character();
        let batch = coordinator.build_batch(&mut character, true, Utc::now()).unwrap();
        let account_ops = batch.account_scope.len();

        let failure = coordinator.commit(batch).await.unwrap_err();
        assert_eq!(failure.target, StoreTarget::Account);
        assert!(failure.batch.character_scope.is_empty());
        assert_eq!(failure.batch.account_scope.len(), account_ops);
    }
}
