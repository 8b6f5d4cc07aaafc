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

//! Store abstraction shared by the character and account stores

use super::batch::{Row, TransactionScope};
use super::table::{StoreTarget, Table};
use crate::error::StoreError;
use async_trait::async_trait;
use uuid::Uuid;

/// One independently transacted store
///
/// Every table holds rows of `(owner_id, record_key, payload)`. A store only
/// accepts scopes whose target matches its own, and applies each scope as one
/// transaction: either every operation lands or none do.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Which store this is
    fn target(&self) -> StoreTarget;

    /// All rows of `table` owned by `owner`, ordered by key
    async fn fetch(&self, table: Table, owner: Uuid) -> Result<Vec<Row>, StoreError>;

    /// Every row of `table` with its owner
    async fn scan(&self, table: Table) -> Result<Vec<(Uuid, Row)>, StoreError>;

    /// Apply a scope atomically. Returns the number of operations applied.
    async fn commit(&self, scope: &TransactionScope) -> Result<usize, StoreError>;

    /// Largest numeric record key in `table`, across all owners
    async fn max_key(&self, table: Table) -> Result<Option<u64>, StoreError>;
}

/// Refuse scopes meant for the other store
pub(crate) fn check_target(store: StoreTarget, scope: &TransactionScope) -> Result<(), StoreError> {
    if scope.target() != store {
        return Err(StoreError::WrongTarget {
            scope: scope.target(),
            store,
        });
    }
    Ok(())
}
