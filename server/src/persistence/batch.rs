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

//! Store operations and the two transaction scopes of a save cycle

use super::table::{StoreTarget, Table};
use realmkeep_common::CharacterId;
use serde_json::Value;
use uuid::Uuid;

/// Key used by tables holding exactly one row per owner
pub const SINGLETON_KEY: &str = "self";

/// One stored row as returned by a fetch
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub key: String,
    pub payload: Value,
}

impl Row {
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// Save cycles run every table twice: once emitting deletions (walking the
/// dependency order backwards) and once emitting upserts (walking forwards).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SavePhase {
    Delete,
    Upsert,
}

/// A single write against one of the stores
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Insert or replace one row
    Upsert {
        table: Table,
        owner: Uuid,
        key: String,
        payload: Value,
    },
    /// Delete one row
    Delete {
        table: Table,
        owner: Uuid,
        key: String,
    },
    /// Delete every row of an owner
    Purge { table: Table, owner: Uuid },
    /// Delete a key under every owner (rows other owners hold about this one)
    PurgeKey { table: Table, key: String },
}

impl StoreOp {
    pub fn table(&self) -> Table {
        match self {
            StoreOp::Upsert { table, .. }
            | StoreOp::Delete { table, .. }
            | StoreOp::Purge { table, .. }
            | StoreOp::PurgeKey { table, .. } => *table,
        }
    }

    pub fn is_delete(&self) -> bool {
        !matches!(self, StoreOp::Upsert { .. })
    }
}

/// Ordered operations bound for one store, committed as one transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionScope {
    target: StoreTarget,
    ops: Vec<StoreOp>,
}

impl TransactionScope {
    pub fn new(target: StoreTarget) -> Self {
        Self {
            target,
            ops: Vec::new(),
        }
    }

    pub fn target(&self) -> StoreTarget {
        self.target
    }

    /// Append an operation. Operations for a table of the other store are
    /// refused and logged.
    pub fn push(&mut self, op: StoreOp) {
        if op.table().target() != self.target {
            tracing::error!(
                "Refusing {} operation on {} in the {} scope",
                op.table().target(),
                op.table(),
                self.target
            );
            return;
        }
        self.ops.push(op);
    }

    pub fn upsert(&mut self, table: Table, owner: Uuid, key: impl Into<String>, payload: Value) {
        self.push(StoreOp::Upsert {
            table,
            owner,
            key: key.into(),
            payload,
        });
    }

    pub fn delete(&mut self, table: Table, owner: Uuid, key: impl Into<String>) {
        self.push(StoreOp::Delete {
            table,
            owner,
            key: key.into(),
        });
    }

    pub fn purge(&mut self, table: Table, owner: Uuid) {
        self.push(StoreOp::Purge { table, owner });
    }

    pub fn purge_key(&mut self, table: Table, key: impl Into<String>) {
        self.push(StoreOp::PurgeKey {
            table,
            key: key.into(),
        });
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<StoreOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Append another scope's operations after ours
    pub fn append(&mut self, other: TransactionScope) {
        for op in other.ops {
            self.push(op);
        }
    }
}

/// Everything one save cycle of one character writes
#[derive(Debug, Clone, PartialEq)]
pub struct SaveBatch {
    pub character: CharacterId,
    pub final_save: bool,
    pub character_scope: TransactionScope,
    pub account_scope: TransactionScope,
}

impl SaveBatch {
    pub fn new(character: CharacterId, final_save: bool) -> Self {
        Self {
            character,
            final_save,
            character_scope: TransactionScope::new(StoreTarget::Character),
            account_scope: TransactionScope::new(StoreTarget::Account),
        }
    }

    /// The scope matching a table's storage target
    pub fn scope_for(&mut self, table: Table) -> &mut TransactionScope {
        match table.target() {
            StoreTarget::Character => &mut self.character_scope,
            StoreTarget::Account => &mut self.account_scope,
        }
    }

    pub fn len(&self) -> usize {
        self.character_scope.len() + self.account_scope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.character_scope.is_empty() && self.account_scope.is_empty()
    }

    /// Put an older, uncommitted batch in front of this one so replaying it
    /// can never overwrite newer state.
    pub fn rebase_on(&mut self, older: SaveBatch) {
        let mut character_scope = older.character_scope;
        character_scope.append(std::mem::replace(
            &mut self.character_scope,
            TransactionScope::new(StoreTarget::Character),
        ));
        self.character_scope = character_scope;

        let mut account_scope = older.account_scope;
        account_scope.append(std::mem::replace(
            &mut self.account_scope,
            TransactionScope::new(StoreTarget::Account),
        ));
        self.account_scope = account_scope;

        self.final_save |= older.final_save;
    }
}
