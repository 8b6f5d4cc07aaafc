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

//! Error types for the persistence engine
//!
//! Record-level problems never surface here. They are logged, counted in the
//! load report and expressed as lifecycle transitions. Only store failures and
//! entity-level problems become errors.

use crate::character::ContainerState;
use crate::character::item::ItemId;
use crate::character::inventory::ItemPosition;
use crate::persistence::table::StoreTarget;
use chrono::{DateTime, Utc};
use realmkeep_common::{AccountId, CharacterId};
use thiserror::Error;

/// Failures talking to a backing store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A scope was handed to the store that does not own its tables.
    #[error("Scope for the {scope} store committed against the {store} store")]
    WrongTarget {
        scope: StoreTarget,
        store: StoreTarget,
    },

    /// The store refused the commit.
    #[error("Commit rejected: {0}")]
    Rejected(String),
}

/// Entity-fatal load failures. No container is created.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Character {0} not found")]
    NotFound(CharacterId),

    #[error("Character {0} is already online")]
    AlreadyOnline(CharacterId),

    #[error("Character {id} header is unreadable: {reason}")]
    CorruptHeader { id: CharacterId, reason: String },

    #[error("Character {id} belongs to account {actual}, not {expected}")]
    AccountMismatch {
        id: CharacterId,
        expected: AccountId,
        actual: AccountId,
    },

    #[error("Account {account} is banned (until {until:?})")]
    Banned {
        account: AccountId,
        until: Option<DateTime<Utc>>,
    },

    #[error("Account {0} is locked")]
    Locked(AccountId),

    #[error("Character {id} has a disallowed name {name:?}")]
    InvalidName { id: CharacterId, name: String },

    #[error("Character {0} has a disallowed appearance")]
    InvalidAppearance(CharacterId),

    #[error("Character {0} has no valid spawn position")]
    NoValidPosition(CharacterId),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Save cycle failures
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("Character {0} is not online")]
    NotOnline(CharacterId),

    #[error("Character {id} cannot be saved while {state:?}")]
    NotActive { id: CharacterId, state: ContainerState },

    #[error("Name {0} is already taken")]
    NameTaken(String),

    /// The batch is held and replayed ahead of the next one.
    #[error("Commit to the {target} store failed: {source}")]
    Commit {
        target: StoreTarget,
        #[source]
        source: StoreError,
    },
}

/// Character deletion failures
#[derive(Debug, Error)]
pub enum DeleteError {
    #[error("Character {0} is online")]
    Online(CharacterId),

    #[error("Character {0} not found")]
    NotFound(CharacterId),

    #[error("Character {id} belongs to account {actual}, not {expected}")]
    AccountMismatch {
        id: CharacterId,
        expected: AccountId,
        actual: AccountId,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Inventory placement failures, shared by load and live play
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    #[error("Item {0} does not exist")]
    UnknownItem(ItemId),

    #[error("Item {0} already exists")]
    DuplicateItem(ItemId),

    #[error("Item template {0} does not exist")]
    UnknownTemplate(u32),

    #[error("Slot {0} does not exist")]
    InvalidSlot(ItemPosition),

    #[error("Slot {position} is occupied by item {occupant}")]
    Occupied {
        position: ItemPosition,
        occupant: ItemId,
    },

    #[error("Item template {template} cannot go in slot {position}")]
    WrongItemClass { position: ItemPosition, template: u32 },

    #[error("Container {0} is not placed")]
    MissingContainer(ItemId),

    #[error("Containers cannot hold other containers")]
    NestedContainer,

    #[error("Container {0} is not empty")]
    ContainerNotEmpty(ItemId),
}
