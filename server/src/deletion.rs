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

//! Character deletion
//!
//! Deletion bypasses the record machinery: the character is offline and its
//! rows are removed in bulk. Character-store work is one purge per table in
//! reverse save order, plus every social row in other characters' lists that
//! names the deleted character. The account store loses the last-played and
//! companion rows keyed by the character.

use crate::character::header::CharacterHeader;
use crate::error::DeleteError;
use crate::persistence::batch::{SINGLETON_KEY, SaveBatch};
use crate::persistence::record::RecordKey;
use crate::persistence::store::RecordStore;
use crate::persistence::table::Table;
use realmkeep_common::{AccountId, CharacterId};

/// Read the stored header and check it belongs to `account`
pub async fn verify_owner(
    character_store: &dyn RecordStore,
    id: CharacterId,
    account: AccountId,
) -> Result<CharacterHeader, DeleteError> {
    let row = character_store
        .fetch(Table::Characters, id.uuid())
        .await?
        .into_iter()
        .find(|row| row.key == SINGLETON_KEY)
        .ok_or(DeleteError::NotFound(id))?;
    let header: CharacterHeader = serde_json::from_value(row.payload)
        .map_err(|e| DeleteError::Store(e.into()))?;
    if header.account != account {
        return Err(DeleteError::AccountMismatch {
            id,
            expected: account,
            actual: header.account,
        });
    }
    Ok(header)
}

/// Every operation that erases a character
pub fn build_deletion_batch(id: CharacterId, account: AccountId) -> SaveBatch {
    let mut batch = SaveBatch::new(id, true);
    let owner = id.uuid();
    let key = id.to_key();

    batch
        .character_scope
        .purge_key(Table::CharacterSocial, key.as_str());
    for table in Table::CHARACTER_SAVE_ORDER.into_iter().rev() {
        batch.character_scope.purge(table, owner);
    }

    batch
        .account_scope
        .delete(Table::AccountLastPlayedCharacter, account.uuid(), key.as_str());
    batch
        .account_scope
        .delete(Table::AccountCharacterCompanion, account.uuid(), key.as_str());
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::batch::StoreOp;
    use crate::persistence::memory::MemoryRecordStore;
    use crate::persistence::table::StoreTarget;
    use crate::reference::fixtures;
    use serde_json::json;

    #[test]
    fn test_deletion_batch_covers_every_table() {
        let id = CharacterId::new();
        let account = AccountId::new();
        let batch = build_deletion_batch(id, account);

        let purged: Vec<Table> = batch
            .character_scope
            .ops()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Purge { table, .. } => Some(*table),
                _ => None,
            })
            .collect();
        assert_eq!(purged.len(), Table::CHARACTER_SAVE_ORDER.len());
        assert_eq!(purged.last(), Some(&Table::Characters));
        assert!(matches!(
            batch.character_scope.ops()[0],
            StoreOp::PurgeKey { table: Table::CharacterSocial, .. }
        ));
        assert_eq!(batch.account_scope.len(), 2);
    }

    #[tokio::test]
    async fn test_verify_owner() {
        let store = MemoryRecordStore::new(StoreTarget::Character);
        let account = AccountId::new();
        let id = CharacterId::new();

        assert!(matches!(
            verify_owner(&store, id, account).await,
            Err(DeleteError::NotFound(_))
        ));

        let header = fixtures::header(account);
        store
            .put(Table::Characters, id.uuid(), SINGLETON_KEY, serde_json::to_value(&header).unwrap())
            .await;
        assert_eq!(verify_owner(&store, id, account).await.unwrap().name, "Anduin");
        assert!(matches!(
            verify_owner(&store, id, AccountId::new()).await,
            Err(DeleteError::AccountMismatch { .. })
        ));

        store
            .put(Table::Characters, id.uuid(), SINGLETON_KEY, json!({ "name": 5 }))
            .await;
        assert!(matches!(
            verify_owner(&store, id, account).await,
            Err(DeleteError::Store(_))
        ));
    }
}
