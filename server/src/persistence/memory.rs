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

//! In-process record store
//!
//! Used by tests and dry runs. Commits apply under one write lock so a scope
//! is all-or-nothing, the same as a database transaction.

use super::batch::{Row, StoreOp, TransactionScope};
use super::store::{RecordStore, check_target};
use super::table::{StoreTarget, Table};
use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

type RowKey = (Table, Uuid, String);

/// A [`RecordStore`] held entirely in memory
#[derive(Debug)]
pub struct MemoryRecordStore {
    target: StoreTarget,
    rows: RwLock<BTreeMap<RowKey, Value>>,
    commits: RwLock<Vec<Vec<StoreOp>>>,
    fail_next_commit: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new(target: StoreTarget) -> Self {
        Self {
            target,
            rows: RwLock::new(BTreeMap::new()),
            commits: RwLock::new(Vec::new()),
            fail_next_commit: AtomicBool::new(false),
        }
    }

    /// Write a row directly, bypassing the commit log
    pub async fn put(&self, table: Table, owner: Uuid, key: impl Into<String>, payload: Value) {
        self.rows
            .write()
            .await
            .insert((table, owner, key.into()), payload);
    }

    /// Read one row
    pub async fn get(&self, table: Table, owner: Uuid, key: &str) -> Option<Value> {
        self.rows
            .read()
            .await
            .get(&(table, owner, key.to_string()))
            .cloned()
    }

    /// Number of rows in `table` owned by `owner`
    pub async fn count(&self, table: Table, owner: Uuid) -> usize {
        self.rows
            .read()
            .await
            .keys()
            .filter(|(t, o, _)| *t == table && *o == owner)
            .count()
    }

    /// Every successfully committed scope, oldest first
    pub async fn commit_log(&self) -> Vec<Vec<StoreOp>> {
        self.commits.read().await.clone()
    }

    /// Make the next commit fail without applying anything
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn apply(rows: &mut BTreeMap<RowKey, Value>, op: &StoreOp) {
        match op {
            StoreOp::Upsert {
                table,
                owner,
                key,
                payload,
            } => {
                rows.insert((*table, *owner, key.clone()), payload.clone());
            }
            StoreOp::Delete { table, owner, key } => {
                rows.remove(&(*table, *owner, key.clone()));
            }
            StoreOp::Purge { table, owner } => {
                rows.retain(|(t, o, _), _| !(t == table && o == owner));
            }
            StoreOp::PurgeKey { table, key } => {
                rows.retain(|(t, _, k), _| !(t == table && k == key));
            }
        }
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn target(&self) -> StoreTarget {
        self.target
    }

    async fn fetch(&self, table: Table, owner: Uuid) -> Result<Vec<Row>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|((t, o, _), _)| *t == table && *o == owner)
            .map(|((_, _, key), payload)| Row::new(key.clone(), payload.clone()))
            .collect())
    }

    async fn scan(&self, table: Table) -> Result<Vec<(Uuid, Row)>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .iter()
            .filter(|((t, _, _), _)| *t == table)
            .map(|((_, owner, key), payload)| (*owner, Row::new(key.clone(), payload.clone())))
            .collect())
    }

    async fn commit(&self, scope: &TransactionScope) -> Result<usize, StoreError> {
        check_target(self.target, scope)?;
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Rejected(format!(
                "{} store refused the commit",
                self.target
            )));
        }
        if scope.is_empty() {
            return Ok(0);
        }

        let mut rows = self.rows.write().await;
        for op in scope.ops() {
            Self::apply(&mut rows, op);
        }
        self.commits.write().await.push(scope.ops().to_vec());
        Ok(scope.len())
    }

    async fn max_key(&self, table: Table) -> Result<Option<u64>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .keys()
            .filter(|(t, _, _)| *t == table)
            .filter_map(|(_, _, key)| key.parse::<u64>().ok())
            .max())
    }
}
