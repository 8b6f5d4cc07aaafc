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

//! Persistence manager for online characters
//!
//! This manager handles:
//! - Loading characters at login through the reconstructor
//! - Save cycles through the write-back coordinator, periodic and final
//! - Holding and replaying batches whose commit failed
//! - Deferring saves of characters mid-teleport
//! - Bulk deletion of offline characters
//! - The auto-save task

pub mod batch;
pub mod memory;
pub mod postgres;
pub mod record;
pub mod store;
pub mod table;

use crate::character::Character;
use crate::character::header::CharacterHeader;
use crate::config::PersistenceConfig;
use crate::deletion;
use crate::error::{DeleteError, LoadError, SaveError, StoreError};
use crate::loader::{self, LoadContext, LoadReport, Reconstructor};
use crate::reference::ReferenceData;
use crate::registry::{CharacterDirectory, CharacterRegistry};
use crate::save::{CommitSummary, WriteBackCoordinator};
use crate::session::SaveScheduler;
use crate::world::WorldState;
use batch::{SINGLETON_KEY, SaveBatch};
use chrono::Utc;
use realmkeep_common::{AccountId, CharacterId, WorldPosition};
use std::collections::HashMap;
use std::sync::Arc;
use store::RecordStore;
use table::{StoreTarget, Table};
use tokio::sync::{Mutex, RwLock};

/// Result of a requested save
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Applied to both stores
    Committed { operations: usize },
    /// Parked until the character's teleport completes
    Deferred,
}

/// Persistence manager for online characters
pub struct PersistenceManager {
    reference: Arc<ReferenceData>,
    world: Arc<WorldState>,
    config: PersistenceConfig,
    coordinator: WriteBackCoordinator,

    /// Characters currently online
    characters: RwLock<CharacterRegistry>,

    /// Names and the reverse social index
    directory: Arc<CharacterDirectory>,

    /// Requested and deferred saves
    scheduler: Mutex<SaveScheduler>,

    /// Batches whose commit failed, by character. Held for the whole
    /// build-and-commit of a save cycle, which keeps commits of one character
    /// in build order.
    pending: Mutex<HashMap<CharacterId, SaveBatch>>,
}

impl PersistenceManager {
    /// Create a new persistence manager
    pub fn new(
        character_store: Arc<dyn RecordStore>,
        account_store: Arc<dyn RecordStore>,
        reference: Arc<ReferenceData>,
        world: Arc<WorldState>,
        config: PersistenceConfig,
    ) -> Self {
        let coordinator = WriteBackCoordinator::new(character_store, account_store, &config);
        Self {
            reference,
            world,
            config,
            coordinator,
            characters: RwLock::new(CharacterRegistry::new()),
            directory: Arc::new(CharacterDirectory::new()),
            scheduler: Mutex::new(SaveScheduler::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn reference(&self) -> &ReferenceData {
        &self.reference
    }

    pub fn world(&self) -> &Arc<WorldState> {
        &self.world
    }

    pub fn directory(&self) -> &Arc<CharacterDirectory> {
        &self.directory
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn character_store(&self) -> &dyn RecordStore {
        self.coordinator.character_store().as_ref()
    }

    fn account_store(&self) -> &dyn RecordStore {
        self.coordinator.account_store().as_ref()
    }

    /// Seed id sequences and reserve every stored name
    ///
    /// Returns the number of characters found in the store.
    pub async fn initialize(&self) -> Result<usize, StoreError> {
        tracing::info!("Loading character directory from the store...");
        self.world
            .seed_sequences(self.character_store(), self.account_store())
            .await?;

        let rows = self.character_store().scan(Table::Characters).await?;
        let mut loaded = 0;
        for (owner, row) in rows {
            if row.key != SINGLETON_KEY {
                continue;
            }
            let id = CharacterId::from(owner);
            match serde_json::from_value::<CharacterHeader>(row.payload) {
                Ok(header) => {
                    if let Err(e) = self.directory.reserve(&header.name, id) {
                        tracing::warn!("Character {} name not reserved: {}", id, e);
                    }
                    loaded += 1;
                }
                Err(e) => tracing::warn!("Character {} header unreadable: {}", id, e),
            }
        }
        tracing::info!("Character directory loaded: {} characters", loaded);
        Ok(loaded)
    }

    /// Persist a freshly created, offline character
    pub async fn create_character(&self, mut character: Character) -> Result<CommitSummary, SaveError> {
        let id = character.id();
        tracing::info!("Creating character {} for account {}", id, character.account());
        self.directory
            .reserve(character.name(), id)
            .map_err(|_| SaveError::NameTaken(character.name().to_string()))?;

        let _gate = self.pending.lock().await;
        let batch = self.coordinator.build_batch(&mut character, false, Utc::now())?;
        character.finish_save();
        match self.coordinator.commit(batch).await {
            Ok(summary) => Ok(summary),
            Err(failure) => {
                self.directory.release(id);
                Err(failure.into())
            }
        }
    }

    /// Load a character and bring it online
    ///
    /// Anything the reconstructor repaired is written back right away.
    pub async fn login(&self, account: AccountId, id: CharacterId) -> Result<LoadReport, LoadError> {
        tracing::info!("Loading character {} for account {}", id, account);
        if self.characters.read().await.contains(id) {
            return Err(LoadError::AlreadyOnline(id));
        }

        // A held batch must land first or the load would read stale rows
        if let Err(SaveError::Commit { source, .. }) = self.flush_pending(id).await {
            return Err(LoadError::Store(source));
        }

        let rows = loader::fetch_rows(self.character_store(), self.account_store(), id, account).await?;
        let reconstructor = Reconstructor::new(LoadContext {
            reference: &self.reference,
            world: &self.world,
            config: &self.config,
            now: Utc::now(),
        });
        let (character, report) = reconstructor.reconstruct(id, account, rows)?;

        if let Err(e) = self.directory.reserve(character.name(), id) {
            tracing::warn!("Character {} logged in with a contested name: {}", id, e);
        }
        self.directory
            .link_contacts(id, character.social.contacts().copied());
        let dirty = character.is_dirty();

        self.characters
            .write()
            .await
            .register(character)
            .map_err(|_| LoadError::AlreadyOnline(id))?;

        if dirty {
            match self.save(id).await {
                Ok(_) => {}
                Err(e) => tracing::error!("Repairs of character {} not written: {}", id, e),
            }
        }
        Ok(report)
    }

    pub async fn is_online(&self, id: CharacterId) -> bool {
        self.characters.read().await.contains(id)
    }

    pub async fn online_count(&self) -> usize {
        self.characters.read().await.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Run `f` against an online character and queue a save when it left
    /// anything dirty. Social changes are mirrored into the directory.
    pub async fn with_character<R>(&self, id: CharacterId, f: impl FnOnce(&mut Character) -> R) -> Option<R> {
        let (result, dirty, contacts) = {
            let mut characters = self.characters.write().await;
            let character = characters.get_mut(id)?;
            let result = f(character);
            let contacts = character
                .social
                .is_dirty()
                .then(|| character.social.contacts().copied().collect::<Vec<_>>());
            (result, character.is_dirty(), contacts)
        };
        if let Some(contacts) = contacts {
            self.directory.unlink_contacts(id);
            self.directory.link_contacts(id, contacts);
        }
        if dirty {
            self.scheduler.lock().await.request(id);
        }
        Some(result)
    }

    /// Periodic save of one online character
    pub async fn save(&self, id: CharacterId) -> Result<SaveOutcome, SaveError> {
        self.save_cycle(id, false).await
    }

    /// Final save; the character goes offline whatever the commit result.
    /// A failed batch is held and replayed by the auto-save task.
    pub async fn logout(&self, id: CharacterId) -> Result<SaveOutcome, SaveError> {
        tracing::info!("Logging out character {}", id);
        self.save_cycle(id, true).await
    }

    async fn save_cycle(&self, id: CharacterId, final_save: bool) -> Result<SaveOutcome, SaveError> {
        let mut pending = self.pending.lock().await;
        let mut batch = {
            let mut characters = self.characters.write().await;
            let character = characters.get_mut(id).ok_or(SaveError::NotOnline(id))?;

            // Position fields only settle once the teleport completes. A
            // logout saves the departure position.
            if character.is_teleporting() && !final_save {
                self.scheduler.lock().await.defer(id);
                return Ok(SaveOutcome::Deferred);
            }

            let batch = self.coordinator.build_batch(character, final_save, Utc::now())?;
            character.finish_save();
            if final_save {
                characters.unregister(id);
            }
            batch
        };

        if final_save {
            self.directory.unlink_contacts(id);
            self.scheduler.lock().await.forget(id);
        }

        if let Some(older) = pending.remove(&id) {
            tracing::debug!("Replaying held batch of character {} ({} operations)", id, older.len());
            batch.rebase_on(older);
        }
        if batch.is_empty() {
            return Ok(SaveOutcome::Committed { operations: 0 });
        }

        match self.coordinator.commit(batch).await {
            Ok(summary) => {
                tracing::debug!("Saved character {}: {} operations", id, summary.total());
                Ok(SaveOutcome::Committed {
                    operations: summary.total(),
                })
            }
            Err(failure) => {
                let target = failure.target;
                pending.insert(id, failure.batch);
                Err(SaveError::Commit {
                    target,
                    source: failure.error,
                })
            }
        }
    }

    /// Replay the held batch of a character, if any
    pub async fn flush_pending(&self, id: CharacterId) -> Result<usize, SaveError> {
        let mut pending = self.pending.lock().await;
        let Some(batch) = pending.remove(&id) else {
            return Ok(0);
        };
        match self.coordinator.commit(batch).await {
            Ok(summary) => {
                tracing::info!("Held batch of character {} committed", id);
                Ok(summary.total())
            }
            Err(failure) => {
                let target = failure.target;
                pending.insert(id, failure.batch);
                Err(SaveError::Commit {
                    target,
                    source: failure.error,
                })
            }
        }
    }

    /// Mark a character as mid-teleport
    pub async fn begin_teleport(&self, id: CharacterId) -> bool {
        let mut characters = self.characters.write().await;
        match characters.get_mut(id) {
            Some(character) => {
                character.begin_teleport();
                true
            }
            None => false,
        }
    }

    /// Settle a teleport and run any save parked while it was in flight
    pub async fn teleport_completed(
        &self,
        id: CharacterId,
        destination: WorldPosition,
        instance_id: Option<u32>,
    ) -> Result<Option<SaveOutcome>, SaveError> {
        {
            let mut characters = self.characters.write().await;
            let character = characters.get_mut(id).ok_or(SaveError::NotOnline(id))?;
            character.finish_teleport(destination, instance_id);
        }

        let released = {
            let mut scheduler = self.scheduler.lock().await;
            if scheduler.release(id) {
                // Saved right away below
                scheduler.forget(id);
                true
            } else {
                false
            }
        };
        if released {
            return self.save(id).await.map(Some);
        }
        Ok(None)
    }

    /// Erase an offline character
    ///
    /// Once the character scope is committed the deletion stands. A failed
    /// account scope is held and replayed like any other held batch.
    pub async fn delete_character(&self, id: CharacterId, account: AccountId) -> Result<(), DeleteError> {
        tracing::info!("Deleting character {} of account {}", id, account);
        if self.characters.read().await.contains(id) {
            return Err(DeleteError::Online(id));
        }

        let mut pending = self.pending.lock().await;
        let header = deletion::verify_owner(self.character_store(), id, account).await?;
        if pending.remove(&id).is_some() {
            tracing::warn!("Discarding held batch of deleted character {}", id);
        }

        let batch = deletion::build_deletion_batch(id, account);
        match self.coordinator.commit(batch).await {
            Ok(_) => {}
            Err(failure) if failure.target == StoreTarget::Account => {
                // The character is gone; only the account rows wait for a replay
                tracing::warn!(
                    "Character {} deleted, account rows held for retry: {}",
                    id,
                    failure.error
                );
                pending.insert(id, failure.batch);
            }
            Err(failure) => return Err(DeleteError::Store(failure.error)),
        }
        drop(pending);

        self.directory.release(id);
        let owners = self.directory.forget_target(id);
        if !owners.is_empty() {
            let mut characters = self.characters.write().await;
            for owner in owners {
                if let Some(character) = characters.get_mut(owner) {
                    character.social.forget(id);
                }
            }
        }
        tracing::info!("Deleted character {} ({})", id, header.name);
        Ok(())
    }

    /// Save every online character with unsaved changes and replay held
    /// batches
    pub async fn auto_save(&self) -> Result<usize, String> {
        let (online, dirty): (Vec<CharacterId>, Vec<CharacterId>) = {
            let characters = self.characters.read().await;
            let online = characters.ids();
            let dirty = characters
                .iter()
                .filter(|c| c.is_dirty())
                .map(Character::id)
                .collect();
            (online, dirty)
        };
        let held: Vec<CharacterId> = self.pending.lock().await.keys().copied().collect();

        let ready = {
            let mut scheduler = self.scheduler.lock().await;
            for id in dirty.iter().chain(held.iter().filter(|id| online.contains(*id))) {
                scheduler.request(*id);
            }
            scheduler.take_ready()
        };

        if ready.is_empty() && held.is_empty() {
            return Ok(0);
        }
        tracing::info!("Auto-saving {} characters", ready.len());

        let mut saved_count = 0;
        let mut failed_count = 0;
        for id in ready {
            match self.save(id).await {
                Ok(SaveOutcome::Committed { .. }) => saved_count += 1,
                Ok(SaveOutcome::Deferred) => {}
                Err(SaveError::NotOnline(_)) => {}
                Err(e) => {
                    tracing::error!("Failed to save character {}: {}", id, e);
                    failed_count += 1;
                }
            }
        }

        for id in held.into_iter().filter(|id| !online.contains(id)) {
            match self.flush_pending(id).await {
                Ok(_) => saved_count += 1,
                Err(e) => {
                    tracing::error!("Held batch of character {} still failing: {}", id, e);
                    failed_count += 1;
                }
            }
        }

        tracing::info!("Auto-save completed: {} characters saved", saved_count);
        if failed_count > 0 {
            return Err(format!("{} saves failed", failed_count));
        }
        Ok(saved_count)
    }

    /// Start auto-save task
    pub fn start_auto_save_task(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.auto_save_interval();

        let handle = tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            // The first tick completes immediately
            interval_timer.tick().await;

            loop {
                interval_timer.tick().await;

                if let Err(e) = self.auto_save().await {
                    tracing::error!("Auto-save failed: {}", e);
                }
            }
        });

        tracing::info!("Auto-save task started (interval: {}s)", interval.as_secs());
        handle
    }

    /// Log out every online character and flush held batches
    pub async fn shutdown(&self) -> usize {
        let online = self.characters.read().await.ids();
        tracing::info!("Shutting down: saving {} online characters", online.len());

        let mut saved = 0;
        for id in online {
            match self.logout(id).await {
                Ok(_) => saved += 1,
                Err(e) => tracing::error!("Final save of character {} failed: {}", id, e),
            }
        }

        let held: Vec<CharacterId> = self.pending.lock().await.keys().copied().collect();
        for id in held {
            if let Err(e) = self.flush_pending(id).await {
                tracing::error!("Held batch of character {} lost at shutdown: {}", id, e);
            }
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::MemoryRecordStore;
    use crate::reference::fixtures;

    fn manager() -> (Arc<MemoryRecordStore>, Arc<MemoryRecordStore>, PersistenceManager) {
        let characters = Arc::new(MemoryRecordStore::new(StoreTarget::Character));
        let accounts = Arc::new(MemoryRecordStore::new(StoreTarget::Account));
        let manager = PersistenceManager::new(
            characters.clone(),
            accounts.clone(),
            Arc::new(fixtures::reference()),
            Arc::new(WorldState::new()),
            PersistenceConfig::default(),
        );
        (characters, accounts, manager)
    }

    #[tokio::test]
    async fn test_create_and_login() {
        let (_, _, manager) = manager();
        let character = fixtures::character();
        let (id, account) = (character.id(), character.account());

        manager.create_character(character).await.unwrap();
        assert_eq!(manager.directory().lookup("anduin"), Some(id));

        manager.login(account, id).await.unwrap();
        assert!(manager.is_online(id).await);
        assert!(matches!(
            manager.login(account, id).await,
            Err(LoadError::AlreadyOnline(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let (_, _, manager) = manager();
        manager.create_character(fixtures::character()).await.unwrap();
        assert!(matches!(
            manager.create_character(fixtures::character()).await,
            Err(SaveError::NameTaken(_))
        ));
    }

    #[tokio::test]
    async fn test_save_deferred_while_teleporting() {
        let (_, _, manager) = manager();
        let character = fixtures::character();
        let (id, account) = (character.id(), character.account());
        manager.create_character(character).await.unwrap();
        manager.login(account, id).await.unwrap();

        assert!(manager.begin_teleport(id).await);
        manager
            .with_character(id, |c| c.spells.learn(fixtures::FIREBALL))
            .await
            .unwrap();
        assert_eq!(manager.save(id).await.unwrap(), SaveOutcome::Deferred);

        let destination = WorldPosition::new(fixtures::CONTINENT, 100.0, 100.0, 0.0);
        let outcome = manager
            .teleport_completed(id, destination, None)
            .await
            .unwrap();
        // Header (new position) and the spell
        assert_eq!(outcome, Some(SaveOutcome::Committed { operations: 2 }));
    }

    #[tokio::test]
    async fn test_logout_takes_character_offline() {
        let (_, accounts, manager) = manager();
        let character = fixtures::character();
        let (id, account) = (character.id(), character.account());
        manager.create_character(character).await.unwrap();
        manager.login(account, id).await.unwrap();

        manager.logout(id).await.unwrap();
        assert!(!manager.is_online(id).await);
        assert!(matches!(manager.save(id).await, Err(SaveError::NotOnline(_))));
        assert_eq!(
            accounts
                .count(Table::AccountLastPlayedCharacter, account.uuid())
                .await,
            1
        );
    }
}
