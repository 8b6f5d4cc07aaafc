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

//! Record lifecycle tracking
//!
//! Every mutable record of every sub-collection carries a [`LifecycleState`].
//! The state alone decides what a save cycle writes:
//!
//! | State       | Delete phase        | Upsert phase             |
//! |-------------|---------------------|--------------------------|
//! | `Unchanged` | -                   | -                        |
//! | `Changed`   | -                   | upsert, then `Unchanged` |
//! | `New`       | -                   | upsert, then `Unchanged` |
//! | `Removed`   | delete, then evict  | -                        |
//! | `Temporary` | -                   | -                        |
//!
//! Removing a `New` or `Temporary` record evicts it on the spot since the
//! store has never seen it. Removing a persisted record keeps it resolvable
//! through [`RecordMap::get_any`] until the save that deletes it.

use super::batch::{Row, SavePhase, TransactionScope};
use super::table::Table;
use realmkeep_common::{AccountId, CharacterId};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Per-record persistence state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Matches the store
    Unchanged,
    /// Persisted, modified since the last save
    Changed,
    /// Not yet in the store
    New,
    /// Persisted, pending deletion
    Removed,
    /// Session-only; never written
    Temporary,
}

impl LifecycleState {
    /// Whether the next save has anything to write for this state
    pub fn is_dirty(&self) -> bool {
        matches!(
            self,
            LifecycleState::Changed | LifecycleState::New | LifecycleState::Removed
        )
    }
}

/// What happened to a record asked to be removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Never persisted; drop it now
    Discard,
    /// Keep until the save pass deletes it
    Retain,
}

/// A domain payload plus its lifecycle state
#[derive(Debug, Clone, PartialEq)]
pub struct Record<V> {
    value: V,
    state: LifecycleState,
}

impl<V> Record<V> {
    /// A record the store has never seen
    pub fn new(value: V) -> Self {
        Self {
            value,
            state: LifecycleState::New,
        }
    }

    /// A record read from the store
    pub fn loaded(value: V) -> Self {
        Self {
            value,
            state: LifecycleState::Unchanged,
        }
    }

    /// A session-only record
    pub fn temporary(value: V) -> Self {
        Self {
            value,
            state: LifecycleState::Temporary,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    /// Mutable access; marks the record changed
    pub fn value_mut(&mut self) -> &mut V {
        self.mark_changed();
        &mut self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn is_active(&self) -> bool {
        self.state != LifecycleState::Removed
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Mark as never persisted. A temporary record stays temporary.
    pub fn mark_new(&mut self) {
        if self.state != LifecycleState::Temporary {
            self.state = LifecycleState::New;
        }
    }

    /// Mark modified. Only `Unchanged` moves; `New` stays `New`, and removed or
    /// temporary records are not resurrected.
    pub fn mark_changed(&mut self) {
        if self.state == LifecycleState::Unchanged {
            self.state = LifecycleState::Changed;
        }
    }

    pub fn mark_removed(&mut self) -> Removal {
        match self.state {
            LifecycleState::New | LifecycleState::Temporary => Removal::Discard,
            LifecycleState::Unchanged | LifecycleState::Changed | LifecycleState::Removed => {
                self.state = LifecycleState::Removed;
                Removal::Retain
            }
        }
    }

    /// Collapse after the record's upsert was emitted
    pub fn mark_saved(&mut self) {
        if matches!(self.state, LifecycleState::New | LifecycleState::Changed) {
            self.state = LifecycleState::Unchanged;
        }
    }
}

impl<V: Serialize> Record<V> {
    /// Upsert a single-row record (header, homebind, stats) when dirty
    pub fn save(
        &mut self,
        phase: SavePhase,
        table: Table,
        owner: Uuid,
        key: &str,
        scope: &mut TransactionScope,
    ) -> usize {
        if phase != SavePhase::Upsert
            || !matches!(self.state, LifecycleState::New | LifecycleState::Changed)
        {
            return 0;
        }
        match serde_json::to_value(&self.value) {
            Ok(payload) => {
                scope.upsert(table, owner, key, payload);
                self.mark_saved();
                1
            }
            Err(e) => {
                tracing::error!("Failed to encode {} row {} for {}: {}", table, key, owner, e);
                0
            }
        }
    }
}

/// Conversion between a collection key and the stored `record_key` text
pub trait RecordKey: Ord + Clone + std::fmt::Debug {
    fn to_key(&self) -> String;
    fn from_key(key: &str) -> Option<Self>;
}

macro_rules! numeric_record_key {
    ($($ty:ty),*) => {
        $(
            impl RecordKey for $ty {
                fn to_key(&self) -> String {
                    self.to_string()
                }

                fn from_key(key: &str) -> Option<Self> {
                    key.parse().ok()
                }
            }
        )*
    };
}

numeric_record_key!(u8, u16, u32, u64, i32);

impl RecordKey for Uuid {
    fn to_key(&self) -> String {
        self.to_string()
    }

    fn from_key(key: &str) -> Option<Self> {
        Uuid::parse_str(key).ok()
    }
}

impl RecordKey for CharacterId {
    fn to_key(&self) -> String {
        self.0.to_string()
    }

    fn from_key(key: &str) -> Option<Self> {
        Uuid::parse_str(key).ok().map(CharacterId)
    }
}

impl RecordKey for AccountId {
    fn to_key(&self) -> String {
        self.0.to_string()
    }

    fn from_key(key: &str) -> Option<Self> {
        Uuid::parse_str(key).ok().map(AccountId)
    }
}

impl<A: RecordKey, B: RecordKey> RecordKey for (A, B) {
    fn to_key(&self) -> String {
        format!("{}:{}", self.0.to_key(), self.1.to_key())
    }

    fn from_key(key: &str) -> Option<Self> {
        let (a, b) = key.split_once(':')?;
        Some((A::from_key(a)?, B::from_key(b)?))
    }
}

/// Why a stored row could not be turned into a record
#[derive(Debug, thiserror::Error)]
pub enum RowError {
    #[error("unparseable key {0:?}")]
    Key(String),
    #[error("unparseable payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Decode a stored row into a typed key and payload
pub fn decode_row<K: RecordKey, V: DeserializeOwned>(row: &Row) -> Result<(K, V), RowError> {
    let key = K::from_key(&row.key).ok_or_else(|| RowError::Key(row.key.clone()))?;
    let value = serde_json::from_value(row.payload.clone())?;
    Ok((key, value))
}

/// Keyed collection of records sharing one state machine
#[derive(Debug, Clone)]
pub struct RecordMap<K, V> {
    records: BTreeMap<K, Record<V>>,
    /// Keys whose persisted row must be deleted before a replacement is written
    tombstones: BTreeSet<K>,
}

impl<K: RecordKey, V> Default for RecordMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: RecordKey, V> RecordMap<K, V> {
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            tombstones: BTreeSet::new(),
        }
    }

    /// Add a record read from the store. Returns false for a duplicate key,
    /// which is left untouched.
    pub fn load(&mut self, key: K, value: V) -> bool {
        if self.records.contains_key(&key) {
            return false;
        }
        self.records.insert(key, Record::loaded(value));
        true
    }

    /// Add a record read from the store that load-time validation rejected.
    /// It is never visible as active and its row is deleted by the next save.
    /// Returns false when the key is already held, which is left untouched.
    pub fn load_discarded(&mut self, key: K, value: V) -> bool {
        match self.records.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                let mut record = Record::loaded(value);
                record.mark_removed();
                entry.insert(record);
                true
            }
        }
    }

    /// Insert or replace a value. Replacing a removed persisted record keeps a
    /// tombstone so the old row is deleted before the new one is written.
    pub fn insert(&mut self, key: K, value: V) {
        match self.records.get_mut(&key) {
            None => {
                self.records.insert(key, Record::new(value));
            }
            Some(record) => match record.state() {
                LifecycleState::Removed => {
                    self.tombstones.insert(key.clone());
                    *record = Record::new(value);
                }
                LifecycleState::Temporary => {
                    *record = Record::new(value);
                }
                _ => {
                    *record.value_mut() = value;
                }
            },
        }
    }

    /// Insert a session-only record. Refused when an active record exists.
    pub fn insert_temporary(&mut self, key: K, value: V) -> bool {
        match self.records.get(&key) {
            Some(record) if record.is_active() => false,
            Some(_) => {
                // Row still has to go; the temporary record shadows it.
                self.tombstones.insert(key.clone());
                self.records.insert(key, Record::temporary(value));
                true
            }
            None => {
                self.records.insert(key, Record::temporary(value));
                true
            }
        }
    }

    /// Modify an active record in place, marking it changed
    pub fn update<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let record = self.records.get_mut(key).filter(|r| r.is_active())?;
        Some(f(record.value_mut()))
    }

    /// Modify an active record without touching its state. Only for derived
    /// data that is not persisted.
    pub fn update_untracked<R>(&mut self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let record = self.records.get_mut(key).filter(|r| r.is_active())?;
        Some(f(&mut record.value))
    }

    /// Remove a record; returns false when no active record exists
    pub fn remove(&mut self, key: &K) -> bool {
        let Some(record) = self.records.get_mut(key) else {
            return false;
        };
        if !record.is_active() {
            return false;
        }
        if record.mark_removed() == Removal::Discard {
            self.records.remove(key);
        }
        true
    }

    /// Evict a record without emitting anything for it
    pub fn forget(&mut self, key: &K) -> Option<Record<V>> {
        self.records.remove(key)
    }

    /// Active record value
    pub fn get(&self, key: &K) -> Option<&V> {
        self.records.get(key).filter(|r| r.is_active()).map(Record::value)
    }

    /// Record value including records pending deletion
    pub fn get_any(&self, key: &K) -> Option<&V> {
        self.records.get(key).map(Record::value)
    }

    pub fn state(&self, key: &K) -> Option<LifecycleState> {
        self.records.get(key).map(Record::state)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Active records in key order
    pub fn active(&self) -> impl Iterator<Item = (&K, &V)> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_active())
            .map(|(k, r)| (k, r.value()))
    }

    /// Active keys in key order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.active().map(|(k, _)| k)
    }

    /// Dirty records (including removed ones) in key order
    pub fn dirty(&self) -> impl Iterator<Item = (&K, LifecycleState)> {
        self.records
            .iter()
            .filter(|(_, r)| r.is_dirty())
            .map(|(k, r)| (k, r.state()))
    }

    /// Number of active records
    pub fn len(&self) -> usize {
        self.records.values().filter(|r| r.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dirty(&self) -> bool {
        !self.tombstones.is_empty() || self.records.values().any(Record::is_dirty)
    }
}

impl<K: RecordKey, V: Serialize> RecordMap<K, V> {
    /// Emit this collection's operations for one phase and collapse the
    /// states that were written. Returns the number of operations emitted.
    pub fn save(
        &mut self,
        phase: SavePhase,
        table: Table,
        owner: Uuid,
        scope: &mut TransactionScope,
    ) -> usize {
        match phase {
            SavePhase::Delete => self.save_deletes(table, owner, scope),
            SavePhase::Upsert => self.save_upserts(table, owner, scope),
        }
    }

    fn save_deletes(&mut self, table: Table, owner: Uuid, scope: &mut TransactionScope) -> usize {
        let mut emitted = 0;
        for key in std::mem::take(&mut self.tombstones) {
            scope.delete(table, owner, key.to_key());
            emitted += 1;
        }
        let removed: Vec<K> = self
            .records
            .iter()
            .filter(|(_, r)| r.state() == LifecycleState::Removed)
            .map(|(k, _)| k.clone())
            .collect();
        for key in removed {
            scope.delete(table, owner, key.to_key());
            self.records.remove(&key);
            emitted += 1;
        }
        emitted
    }

    fn save_upserts(&mut self, table: Table, owner: Uuid, scope: &mut TransactionScope) -> usize {
        let mut emitted = 0;
        for (key, record) in self.records.iter_mut() {
            if !matches!(record.state(), LifecycleState::New | LifecycleState::Changed) {
                continue;
            }
            match serde_json::to_value(record.value()) {
                Ok(payload) => {
                    scope.upsert(table, owner, key.to_key(), payload);
                    record.mark_saved();
                    emitted += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Failed to encode {} row {:?} for {}: {}",
                        table,
                        key,
                        owner,
                        e
                    );
                }
            }
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::batch::StoreOp;
    use crate::persistence::table::StoreTarget;

    fn save_all(map: &mut RecordMap<u32, u32>) -> Vec<StoreOp> {
        let mut scope = TransactionScope::new(StoreTarget::Character);
        let owner = Uuid::nil();
        map.save(SavePhase::Delete, Table::CharacterCurrency, owner, &mut scope);
        map.save(SavePhase::Upsert, Table::CharacterCurrency, owner, &mut scope);
        scope.into_ops()
    }

    #[test]
    fn test_record_transitions() {
        let mut record = Record::loaded(5u32);
        assert_eq!(record.state(), LifecycleState::Unchanged);

        *record.value_mut() = 6;
        assert_eq!(record.state(), LifecycleState::Changed);

        record.mark_saved();
        assert_eq!(record.state(), LifecycleState::Unchanged);

        assert_eq!(record.mark_removed(), Removal::Retain);
        assert_eq!(record.state(), LifecycleState::Removed);

        // Removed records are not resurrected by a change
        record.mark_changed();
        assert_eq!(record.state(), LifecycleState::Removed);
    }

    #[test]
    fn test_new_stays_new_when_changed() {
        let mut record = Record::new(1u32);
        *record.value_mut() = 2;
        assert_eq!(record.state(), LifecycleState::New);
        assert_eq!(record.mark_removed(), Removal::Discard);
    }

    #[test]
    fn test_temporary_never_persists() {
        let mut record = Record::temporary(1u32);
        record.mark_new();
        record.mark_changed();
        record.mark_saved();
        assert_eq!(record.state(), LifecycleState::Temporary);

        let mut map: RecordMap<u32, u32> = RecordMap::new();
        assert!(map.insert_temporary(7, 1));
        map.update(&7, |v| *v = 2);
        assert!(save_all(&mut map).is_empty());
        assert_eq!(map.get(&7), Some(&2));
    }

    #[test]
    fn test_new_then_removed_never_emitted() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        map.insert(1, 10);
        assert!(map.remove(&1));
        assert!(map.get_any(&1).is_none());
        assert!(!map.is_dirty());
        assert!(save_all(&mut map).is_empty());
    }

    #[test]
    fn test_removed_resolvable_until_saved() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        map.load(1, 10);
        map.remove(&1);

        assert!(map.get(&1).is_none());
        assert_eq!(map.get_any(&1), Some(&10));
        assert_eq!(map.len(), 0);

        let ops = save_all(&mut map);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_delete());
        assert!(map.get_any(&1).is_none());
    }

    #[test]
    fn test_replace_emits_delete_before_insert() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        map.load(1, 10);
        map.remove(&1);
        map.insert(1, 20);
        assert_eq!(map.state(&1), Some(LifecycleState::New));

        let ops = save_all(&mut map);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], StoreOp::Delete { key, .. } if key == "1"));
        assert!(matches!(&ops[1], StoreOp::Upsert { key, .. } if key == "1"));
    }

    #[test]
    fn test_replace_then_remove_still_deletes() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        map.load(1, 10);
        map.remove(&1);
        map.insert(1, 20);
        map.remove(&1);

        let ops = save_all(&mut map);
        assert_eq!(ops.len(), 1);
        assert!(ops[0].is_delete());
    }

    #[test]
    fn test_save_is_idempotent() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        map.load(1, 10);
        map.insert(2, 20);
        map.update(&1, |v| *v += 1);

        assert_eq!(save_all(&mut map).len(), 2);
        assert!(!map.is_dirty());
        assert!(save_all(&mut map).is_empty());
    }

    #[test]
    fn test_load_rejects_duplicate_keys() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        assert!(map.load(1, 10));
        assert!(!map.load(1, 11));
        assert_eq!(map.get(&1), Some(&10));
    }

    #[test]
    fn test_load_discarded_deletes_on_save() {
        let mut map: RecordMap<u32, u32> = RecordMap::new();
        map.load_discarded(9, 90);
        assert!(!map.contains(&9));
        let ops = save_all(&mut map);
        assert!(matches!(&ops[0], StoreOp::Delete { key, .. } if key == "9"));
    }

    #[test]
    fn test_load_discarded_keeps_active_record() {
        let mut map = RecordMap::new();
        assert!(map.load(1u32, 10u32));
        assert!(!map.load_discarded(1, 99));

        assert_eq!(map.get(&1), Some(&10));
        assert_eq!(map.state(&1), Some(LifecycleState::Unchanged));
        assert!(save_all(&mut map).is_empty());
    }

    #[test]
    fn test_composite_keys() {
        let key = (12u32, 3u8);
        assert_eq!(key.to_key(), "12:3");
        assert_eq!(<(u32, u8)>::from_key("12:3"), Some(key));
        assert_eq!(<(u32, u8)>::from_key("12"), None);
        assert_eq!(<(u32, u8)>::from_key("12:999"), None);
    }

    #[test]
    fn test_decode_row() {
        let row = Row::new("42", serde_json::json!(7));
        let (key, value): (u32, u32) = decode_row(&row).unwrap();
        assert_eq!((key, value), (42, 7));

        let bad = Row::new("x", serde_json::json!(7));
        assert!(matches!(decode_row::<u32, u32>(&bad), Err(RowError::Key(_))));
    }
}
