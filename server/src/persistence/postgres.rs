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

//! PostgreSQL-backed record store

use super::batch::{Row, StoreOp, TransactionScope};
use super::store::{RecordStore, check_target};
use super::table::{StoreTarget, Table};
use crate::error::StoreError;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// A [`RecordStore`] over one PostgreSQL database
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    target: StoreTarget,
}

impl PgRecordStore {
    pub fn new(pool: PgPool, target: StoreTarget) -> Self {
        Self { pool, target }
    }

    /// Get a reference to the database pool
    pub fn database(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema for this store's tables
    pub async fn migrate(&self) -> Result<(), StoreError> {
        match self.target {
            StoreTarget::Character => sqlx::migrate!("./migrations/character").run(&self.pool).await?,
            StoreTarget::Account => sqlx::migrate!("./migrations/account").run(&self.pool).await?,
        }
        tracing::info!("Migrations applied to the {} store", self.target);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn target(&self) -> StoreTarget {
        self.target
    }

    async fn fetch(&self, table: Table, owner: Uuid) -> Result<Vec<Row>, StoreError> {
        let rows: Vec<(String, serde_json::Value)> = sqlx::query_as(&format!(
            "SELECT record_key, payload FROM {} WHERE owner_id = $1 ORDER BY record_key",
            table.name()
        ))
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, payload)| Row::new(key, payload))
            .collect())
    }

    async fn scan(&self, table: Table) -> Result<Vec<(Uuid, Row)>, StoreError> {
        let rows: Vec<(Uuid, String, serde_json::Value)> = sqlx::query_as(&format!(
            "SELECT owner_id, record_key, payload FROM {}",
            table.name()
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(owner, key, payload)| (owner, Row::new(key, payload)))
            .collect())
    }

    async fn commit(&self, scope: &TransactionScope) -> Result<usize, StoreError> {
        check_target(self.target, scope)?;
        if scope.is_empty() {
            return Ok(0);
        }

        // Start a transaction
        let mut tx = self.pool.begin().await?;

        for op in scope.ops() {
            match op {
                StoreOp::Upsert {
                    table,
                    owner,
                    key,
                    payload,
                } => {
                    sqlx::query(&format!(
                        "INSERT INTO {} (owner_id, record_key, payload, updated_at)
                         VALUES ($1, $2, $3, NOW())
                         ON CONFLICT (owner_id, record_key)
                         DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()",
                        table.name()
                    ))
                    .bind(owner)
                    .bind(key)
                    .bind(payload)
                    .execute(&mut *tx)
                    .await?;
                }
                StoreOp::Delete { table, owner, key } => {
                    sqlx::query(&format!(
                        "DELETE FROM {} WHERE owner_id = $1 AND record_key = $2",
                        table.name()
                    ))
                    .bind(owner)
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                }
                StoreOp::Purge { table, owner } => {
                    sqlx::query(&format!("DELETE FROM {} WHERE owner_id = $1", table.name()))
                        .bind(owner)
                        .execute(&mut *tx)
                        .await?;
                }
                StoreOp::PurgeKey { table, key } => {
                    sqlx::query(&format!("DELETE FROM {} WHERE record_key = $1", table.name()))
                        .bind(key)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        // Commit transaction
        tx.commit().await?;

        tracing::debug!("Committed {} operations to the {} store", scope.len(), self.target);
        Ok(scope.len())
    }

    async fn max_key(&self, table: Table) -> Result<Option<u64>, StoreError> {
        // NUMERIC covers the whole u64 range, BIGINT stops at i64::MAX
        let max: Option<String> = sqlx::query_scalar(&format!(
            "SELECT MAX(record_key::NUMERIC)::TEXT FROM {} WHERE record_key ~ '^[0-9]{{1,20}}$'",
            table.name()
        ))
        .fetch_one(&self.pool)
        .await?;

        Ok(max.and_then(|text| parse_max_key(table, &text)))
    }
}

/// Keys past u64::MAX cannot have come from a sequence and are ignored
fn parse_max_key(table: Table, text: &str) -> Option<u64> {
    match text.parse() {
        Ok(max) => Some(max),
        Err(e) => {
            tracing::warn!("Largest {} key {} is not a sequence value: {}", table, text, e);
            None
        }
    }
}
