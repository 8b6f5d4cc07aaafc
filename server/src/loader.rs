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

//! Load reconstruction
//!
//! Every table is fetched concurrently and nothing is processed until all
//! fetches returned. Reconstruction then runs in a fixed order:
//!
//! 1. Entity checks (ownership, bans, name, appearance). Any failure aborts
//!    the load and no container is created.
//! 2. Skills, spells and the homebind.
//! 3. Spawn position through the fallback chain.
//! 4. The remaining collections, with positional ones (inventory, mail, void
//!    storage) last.
//! 5. Post-load hooks, which may depend on any first-pass collection.
//!
//! Problems with single records never abort. The record is repaired (and
//! marked changed) or dropped (and marked removed so its row is deleted),
//! and the decision lands in the [`LoadReport`].

use crate::character::Character;
use crate::character::auras::Aura;
use crate::character::collections::{
    AppearanceUnlock, BattlePet, Companion, Heirloom, Mount, Toy,
};
use crate::character::currency::CurrencyAmount;
use crate::character::equipment_sets::EquipmentSet;
use crate::character::header::{CharacterHeader, Homebind, StatSnapshot};
use crate::character::inventory::ItemPosition;
use crate::character::item::{Item, ItemId};
use crate::character::mail::{Mail, MailId};
use crate::character::quests::{QuestStatus, Rewarded};
use crate::character::skills::SkillValue;
use crate::character::social::SocialEntry;
use crate::character::spells::SpellState;
use crate::character::talents::Rank;
use crate::character::void_storage::{VoidItem, VoidPlacement};
use crate::config::PersistenceConfig;
use crate::error::{LoadError, StoreError};
use crate::persistence::batch::{Row, SINGLETON_KEY};
use crate::persistence::record::{Record, RecordKey, decode_row};
use crate::persistence::store::RecordStore;
use crate::persistence::table::Table;
use crate::position::{self, PositionContext, SpawnSource};
use crate::reference::ReferenceData;
use crate::world::WorldState;
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use metrics::{counter, histogram};
use realmkeep_common::{AccountAccess, AccountId, CharacterId};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Instant;

/// Raw rows of every table, keyed by table
#[derive(Debug, Default)]
pub struct FetchedRows {
    rows: HashMap<Table, Vec<Row>>,
}

impl FetchedRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: Table, rows: Vec<Row>) {
        self.rows.entry(table).or_default().extend(rows);
    }

    pub fn take(&mut self, table: Table) -> Vec<Row> {
        self.rows.remove(&table).unwrap_or_default()
    }

    fn take_singleton(&mut self, table: Table) -> Option<Row> {
        self.take(table)
            .into_iter()
            .find(|row| row.key == SINGLETON_KEY)
    }
}

impl FromIterator<(Table, Vec<Row>)> for FetchedRows {
    fn from_iter<I: IntoIterator<Item = (Table, Vec<Row>)>>(iter: I) -> Self {
        let mut fetched = FetchedRows::new();
        for (table, rows) in iter {
            fetched.insert(table, rows);
        }
        fetched
    }
}

/// Fetch every table of a character and its account concurrently
pub async fn fetch_rows<'a>(
    character_store: &'a dyn RecordStore,
    account_store: &'a dyn RecordStore,
    id: CharacterId,
    account: AccountId,
) -> Result<FetchedRows, StoreError> {
    let requests = Table::CHARACTER_SAVE_ORDER
        .into_iter()
        .map(|table| (character_store, table, id.uuid()))
        .chain(
            Table::ACCOUNT_LOAD_SET
                .into_iter()
                .map(|table| (account_store, table, account.uuid())),
        );

    let results = try_join_all(requests.map(|(store, table, owner)| async move {
        store.fetch(table, owner).await.map(|rows| (table, rows))
    }))
    .await?;

    Ok(results.into_iter().collect())
}

/// One repaired, dropped or derived record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordIssue {
    pub table: Table,
    pub key: String,
    pub reason: String,
}

/// What reconstruction changed on the way in
#[derive(Debug, Default)]
pub struct LoadReport {
    pub repaired: Vec<RecordIssue>,
    pub dropped: Vec<RecordIssue>,
    /// Records created by post-load hooks
    pub derived: Vec<RecordIssue>,
    /// Items returned through the compensation mail
    pub compensated: Vec<ItemId>,
    pub compensation_mails: Vec<MailId>,
    pub spawn: Option<SpawnSource>,
}

impl LoadReport {
    fn note_repair(&mut self, id: CharacterId, table: Table, key: impl ToString, reason: impl Into<String>) {
        let issue = RecordIssue {
            table,
            key: key.to_string(),
            reason: reason.into(),
        };
        tracing::warn!(
            "Character {} repaired {} row {}: {}",
            id,
            table,
            issue.key,
            issue.reason
        );
        counter!("persistence.load.repaired", "table" => table.name()).increment(1);
        self.repaired.push(issue);
    }

    fn note_drop(&mut self, id: CharacterId, table: Table, key: impl ToString, reason: impl Into<String>) {
        let issue = RecordIssue {
            table,
            key: key.to_string(),
            reason: reason.into(),
        };
        tracing::warn!(
            "Character {} dropped {} row {}: {}",
            id,
            table,
            issue.key,
            issue.reason
        );
        counter!("persistence.load.dropped", "table" => table.name()).increment(1);
        self.dropped.push(issue);
    }

    fn note_derived(&mut self, id: CharacterId, table: Table, key: impl ToString, reason: impl Into<String>) {
        let issue = RecordIssue {
            table,
            key: key.to_string(),
            reason: reason.into(),
        };
        tracing::info!(
            "Character {} derived {} row {}: {}",
            id,
            table,
            issue.key,
            issue.reason
        );
        self.derived.push(issue);
    }

    /// Whether reconstruction changed anything that should be written back
    pub fn has_changes(&self) -> bool {
        !self.repaired.is_empty()
            || !self.dropped.is_empty()
            || !self.derived.is_empty()
            || !self.compensated.is_empty()
    }
}

/// Read-only inputs shared by every stage and hook
pub struct LoadContext<'a> {
    pub reference: &'a ReferenceData,
    pub world: &'a WorldState,
    pub config: &'a PersistenceConfig,
    pub now: DateTime<Utc>,
}

pub type PostLoadHook = fn(&mut Character, &LoadContext, &mut LoadReport);

/// Second-pass fixups, in order. Reward spells come before spell-granted
/// skills since a reward spell may grant a skill, and both before child
/// skills and profession slots.
pub const POST_LOAD_HOOKS: &[(&str, PostLoadHook)] = &[
    ("at-login resets", apply_at_login_resets),
    ("quest reward spells", learn_quest_reward_spells),
    ("spell granted skills", learn_spell_granted_skills),
    ("child skills", unlock_child_skills),
    ("profession slots", assign_profession_slots),
    ("item appearances", derive_item_appearances),
    ("compensation mail", deliver_compensation),
];

pub struct Reconstructor<'a> {
    context: LoadContext<'a>,
}

impl<'a> Reconstructor<'a> {
    pub fn new(context: LoadContext<'a>) -> Self {
        Self { context }
    }

    /// Build a validated character from fetched rows
    pub fn reconstruct(
        &self,
        id: CharacterId,
        account: AccountId,
        mut rows: FetchedRows,
    ) -> Result<(Character, LoadReport), LoadError> {
        let started = Instant::now();
        let mut report = LoadReport::default();

        let header = self
            .check_entity(id, account, &mut rows)
            .inspect_err(|e| tracing::error!("Load of character {} rejected: {}", id, e))?;
        let homebind = self.load_homebind(id, header.value(), &mut rows, &mut report);
        let mut character = Character::loading(id, account, header, homebind);

        self.load_skills(&mut character, &mut rows, &mut report);
        self.load_spells(&mut character, &mut rows, &mut report);
        self.resolve_position(&mut character, &mut report)
            .inspect_err(|e| tracing::error!("Load of character {} rejected: {}", id, e))?;

        self.load_stats(&mut character, &mut rows, &mut report);
        self.load_currencies(&mut character, &mut rows, &mut report);
        self.load_talents(&mut character, &mut rows, &mut report);
        self.load_quests(&mut character, &mut rows, &mut report);
        self.load_auras(&mut character, &mut rows, &mut report);
        self.load_social(&mut character, &mut rows, &mut report);
        self.load_collections(&mut character, &mut rows, &mut report);

        self.load_items(&mut character, &mut rows, &mut report);
        self.load_mail(&mut character, &mut rows, &mut report);
        self.sweep_orphans(&mut character, &mut report);
        self.load_equipment_sets(&mut character, &mut rows, &mut report);
        self.load_void_storage(&mut character, &mut rows, &mut report);

        for (name, hook) in POST_LOAD_HOOKS {
            tracing::trace!("Character {} post-load hook: {}", id, name);
            hook(&mut character, &self.context, &mut report);
        }

        character.activate();
        histogram!("persistence.load.duration").record(started.elapsed().as_secs_f64());
        tracing::info!(
            "Loaded character {} ({}): {} repaired, {} dropped, {} compensated",
            id,
            character.name(),
            report.repaired.len(),
            report.dropped.len(),
            report.compensated.len()
        );
        Ok((character, report))
    }

    /// Decode every row of a table. Undecodable rows are scheduled for
    /// deletion.
    fn decode<K: RecordKey, V: DeserializeOwned>(
        &self,
        character: &mut Character,
        table: Table,
        rows: &mut FetchedRows,
        report: &mut LoadReport,
    ) -> Vec<(K, V)> {
        rows.take(table)
            .into_iter()
            .filter_map(|row| match decode_row(&row) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    report.note_drop(character.id(), table, &row.key, e.to_string());
                    character.discard_raw(table, row.key);
                    None
                }
            })
            .collect()
    }

    fn check_entity(
        &self,
        id: CharacterId,
        account: AccountId,
        rows: &mut FetchedRows,
    ) -> Result<Record<CharacterHeader>, LoadError> {
        let row = rows
            .take_singleton(Table::Characters)
            .ok_or(LoadError::NotFound(id))?;
        let header: CharacterHeader =
            serde_json::from_value(row.payload).map_err(|e| LoadError::CorruptHeader {
                id,
                reason: e.to_string(),
            })?;

        if header.account != account {
            return Err(LoadError::AccountMismatch {
                id,
                expected: account,
                actual: header.account,
            });
        }

        if let Some(row) = rows.take_singleton(Table::AccountAccess) {
            let access: AccountAccess = match serde_json::from_value(row.payload) {
                Ok(access) => access,
                Err(e) => {
                    tracing::error!("Account {} access row unreadable: {}", account, e);
                    return Err(LoadError::Locked(account));
                }
            };
            if access.is_banned(self.context.now) {
                return Err(LoadError::Banned {
                    account,
                    until: access.banned_until.filter(|_| !access.permanent),
                });
            }
            if access.locked {
                return Err(LoadError::Locked(account));
            }
        }

        // A pending rename lets a disallowed name through to the rename prompt
        if !header.at_login.rename && !self.context.reference.is_valid_name(&header.name) {
            return Err(LoadError::InvalidName {
                id,
                name: header.name,
            });
        }
        if !self.context.reference.appearance.allows(&header.appearance) {
            return Err(LoadError::InvalidAppearance(id));
        }

        Ok(Record::loaded(header))
    }

    fn load_homebind(
        &self,
        id: CharacterId,
        header: &CharacterHeader,
        rows: &mut FetchedRows,
        report: &mut LoadReport,
    ) -> Record<Homebind> {
        let stored = rows
            .take_singleton(Table::CharacterHomebind)
            .and_then(|row| serde_json::from_value::<Homebind>(row.payload).ok());
        let reference = self.context.reference;

        if let Some(homebind) = stored {
            if reference.is_valid_position(&homebind.position) {
                return Record::loaded(homebind);
            }
        }

        let fallback = reference
            .start_positions
            .get(&header.race)
            .copied()
            .filter(|position| reference.is_valid_position(position))
            .unwrap_or(header.position);
        let replacement = Homebind {
            position: fallback,
            area_id: 0,
        };
        match stored {
            Some(homebind) => {
                let mut record = Record::loaded(homebind);
                *record.value_mut() = replacement;
                report.note_repair(id, Table::CharacterHomebind, SINGLETON_KEY, "invalid homebind reset to start position");
                record
            }
            None => {
                report.note_repair(id, Table::CharacterHomebind, SINGLETON_KEY, "missing homebind set to start position");
                Record::new(replacement)
            }
        }
    }

    fn load_skills(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterSkills;
        let id = character.id();
        for (skill, value) in self.decode::<u32, SkillValue>(character, table, rows, report) {
            let Some(rule) = self.context.reference.skills.get(&skill) else {
                report.note_drop(id, table, skill, "unknown skill");
                character.skills.discard(skill, value);
                continue;
            };
            character.skills.load(skill, value);
            if value.max != rule.max || value.value > rule.max {
                character.skills.update(skill, |entry| {
                    entry.max = rule.max;
                    entry.value = entry.value.min(rule.max);
                });
                report.note_repair(id, table, skill, format!("max {} reset to {}", value.max, rule.max));
            }
        }
    }

    fn load_spells(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterSpells;
        let id = character.id();
        for (spell, state) in self.decode::<u32, SpellState>(character, table, rows, report) {
            if self.context.reference.spells.contains_key(&spell) {
                character.spells.load(spell, state);
            } else {
                report.note_drop(id, table, spell, "unknown spell");
                character.spells.discard(spell, state);
            }
        }
    }

    fn resolve_position(&self, character: &mut Character, report: &mut LoadReport) -> Result<(), LoadError> {
        let resolved = position::resolve(&PositionContext {
            header: character.header(),
            homebind: character.homebind(),
            reference: self.context.reference,
            world: self.context.world,
        })
        .ok_or(LoadError::NoValidPosition(character.id()))?;
        report.spawn = Some(resolved.source);

        let mut header = character.header().clone();
        header.position = resolved.position;
        header.instance_id = resolved.instance_id;
        if resolved.source != SpawnSource::Transport {
            header.transport = None;
        }
        if resolved.source != SpawnSource::Taxi {
            header.taxi = None;
        }
        if resolved.source != SpawnSource::Battleground || resolved.instance_id.is_none() {
            header.battleground = None;
        }

        if header != *character.header() {
            let from = character.header().position;
            *character.header_mut() = header;
            report.note_repair(
                character.id(),
                Table::Characters,
                SINGLETON_KEY,
                format!(
                    "spawn moved from map {} ({}, {}) via {:?}",
                    from.map_id, from.x, from.y, resolved.source
                ),
            );
        }
        Ok(())
    }

    fn load_stats(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        if let Some(row) = rows.take_singleton(Table::CharacterStats) {
            match serde_json::from_value::<StatSnapshot>(row.payload) {
                Ok(stats) => character.load_stats(stats),
                Err(e) => {
                    report.note_drop(character.id(), Table::CharacterStats, &row.key, e.to_string());
                    character.discard_raw(Table::CharacterStats, row.key);
                }
            }
        }
    }

    fn load_currencies(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterCurrency;
        let id = character.id();
        for (currency, amount) in self.decode::<u32, CurrencyAmount>(character, table, rows, report) {
            let Some(rule) = self.context.reference.currencies.get(&currency) else {
                report.note_drop(id, table, currency, "unknown currency");
                character.currencies.discard(currency, amount);
                continue;
            };
            character.currencies.load(currency, amount);
            if character.currencies.clamp(currency, rule.max_amount) {
                report.note_repair(
                    id,
                    table,
                    currency,
                    format!("quantity {} above cap {}", amount.quantity, rule.max_amount),
                );
            }
        }
    }

    fn load_talents(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let id = character.id();
        let reference = self.context.reference;

        let table = Table::CharacterTalents;
        for (key, rank) in self.decode::<(u8, u32), Rank>(character, table, rows, report) {
            let Some(rule) = reference.talents.get(&key.1) else {
                report.note_drop(id, table, key.to_key(), "unknown talent");
                character.talents.discard(key, rank);
                continue;
            };
            character.talents.load(key, rank);
            if character.talents.clamp(key, rule.max_rank) {
                report.note_repair(id, table, key.to_key(), format!("rank {} above {}", rank.rank, rule.max_rank));
            }
        }

        let table = Table::CharacterTraits;
        for (key, rank) in self.decode::<(u32, u32), Rank>(character, table, rows, report) {
            match reference.traits.get(&key.1) {
                Some(rule) if rank.rank <= rule.max_rank => {
                    character.traits.load(key, rank);
                }
                Some(_) => {
                    report.note_drop(id, table, key.to_key(), "rank above maximum");
                    character.traits.discard(key, rank);
                }
                None => {
                    report.note_drop(id, table, key.to_key(), "unknown trait node");
                    character.traits.discard(key, rank);
                }
            }
        }
    }

    fn load_quests(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let id = character.id();
        let quests = &self.context.reference.quests;

        let table = Table::CharacterQuestStatus;
        for (quest, status) in self.decode::<u32, QuestStatus>(character, table, rows, report) {
            if quests.contains_key(&quest) {
                character.quests.load_status(quest, status);
            } else {
                report.note_drop(id, table, quest, "unknown quest");
                character.quests.discard_status(quest, status);
            }
        }

        let table = Table::CharacterQuestObjectives;
        for (key, progress) in self.decode::<(u32, u8), i32>(character, table, rows, report) {
            let (quest, index) = key;
            let reason = match quests.get(&quest) {
                _ if character.quests.status(quest).is_none() => Some("no quest status".to_string()),
                Some(rule) if index >= rule.objective_count => Some(format!(
                    "objective index {} beyond count {}",
                    index, rule.objective_count
                )),
                _ => None,
            };
            match reason {
                None => {
                    character.quests.load_objective(key, progress);
                }
                Some(reason) => {
                    report.note_drop(id, table, key.to_key(), reason);
                    character.quests.discard_objective(key, progress);
                }
            }
        }

        let table = Table::CharacterQuestRewarded;
        for (quest, rewarded) in self.decode::<u32, Rewarded>(character, table, rows, report) {
            if quests.contains_key(&quest) {
                character.quests.load_rewarded(quest, rewarded);
            } else {
                report.note_drop(id, table, quest, "unknown quest");
                character.quests.discard_rewarded(quest, rewarded);
            }
        }
    }

    fn load_auras(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterAuras;
        let id = character.id();
        for (key, aura) in self.decode::<(uuid::Uuid, u32), Aura>(character, table, rows, report) {
            if aura.is_expired(self.context.now) {
                report.note_drop(id, table, key.to_key(), "expired");
                character.auras.discard(key, aura);
            } else {
                character.auras.load(key, aura);
            }
        }
    }

    fn load_social(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterSocial;
        let id = character.id();
        for (other, entry) in self.decode::<CharacterId, SocialEntry>(character, table, rows, report) {
            if other == id || entry.flags.is_empty() {
                report.note_drop(id, table, other, "empty or self-referencing entry");
                character.discard_raw(table, other.to_key());
            } else {
                character.social.load(other, entry);
            }
        }
    }

    fn load_collections(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let id = character.id();

        for (toy, value) in self.decode::<u32, Toy>(character, Table::AccountToys, rows, report) {
            character.collections.toys.load(toy, value);
        }
        for (template, value) in self.decode::<u32, Heirloom>(character, Table::AccountHeirlooms, rows, report) {
            character.collections.heirlooms.load(template, value);
        }
        for (spell, value) in self.decode::<u32, Mount>(character, Table::AccountMounts, rows, report) {
            character.collections.mounts.load(spell, value);
        }
        for (appearance, value) in
            self.decode::<u32, AppearanceUnlock>(character, Table::AccountItemAppearances, rows, report)
        {
            character.collections.appearances.load(appearance, value);
        }
        for (pet, value) in self.decode::<u64, BattlePet>(character, Table::AccountBattlePets, rows, report) {
            character.collections.battle_pets.load(pet, value);
        }

        // The companion table holds a row per character of the account
        let table = Table::AccountCharacterCompanion;
        for (owner, companion) in self.decode::<CharacterId, Companion>(character, table, rows, report) {
            if owner != id {
                continue;
            }
            if character.collections.battle_pets.contains(&companion.pet) {
                character.collections.companion.load(owner, companion);
            } else {
                report.note_drop(id, table, owner, format!("battle pet {} missing", companion.pet));
                character.collections.companion.load_discarded(owner, companion);
            }
        }
    }

    fn load_items(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let id = character.id();
        let context = &self.context;
        let logged_out_for = character
            .header()
            .logout_time
            .map(|logout| context.now.signed_duration_since(logout));

        let table = Table::ItemInstances;
        for (item_id, item) in self.decode::<ItemId, Item>(character, table, rows, report) {
            let Some(template) = context.reference.item(item.template) else {
                report.note_drop(id, table, item_id, format!("unknown template {}", item.template));
                character.inventory.discard_item(item_id, item);
                continue;
            };
            if template.conjured
                && logged_out_for.is_some_and(|elapsed| elapsed > context.config.conjured_expiry())
            {
                report.note_drop(id, table, item_id, "conjured item expired");
                character.inventory.discard_item(item_id, item);
                continue;
            }
            if let Some(holiday) = template.holiday {
                if !context.world.is_holiday_active(holiday) {
                    report.note_drop(id, table, item_id, format!("holiday {} not active", holiday));
                    character.inventory.discard_item(item_id, item);
                    continue;
                }
            }

            let refund_expired = item
                .refund
                .as_ref()
                .is_some_and(|refund| refund.expires_at <= context.now);
            character.inventory.load_item(item_id, item);
            if refund_expired {
                character.inventory.update_item(item_id, |item| item.refund = None);
                report.note_repair(id, table, item_id, "refund window expired");
            }
        }

        // Equipped and bag-slot items first so containers exist before
        // anything is placed inside them.
        let table = Table::CharacterInventory;
        let mut positions = self.decode::<ItemId, ItemPosition>(character, table, rows, report);
        positions.sort_by_key(|(item_id, position)| (position.is_contained(), *position, *item_id));

        for (item_id, position) in positions {
            if character.inventory.item(item_id).is_none() {
                report.note_drop(id, table, item_id, "no item instance");
                character.inventory.discard_position(item_id, position);
                continue;
            }
            if let Err(e) = character
                .inventory
                .load_position(item_id, position, context.reference)
            {
                tracing::warn!(
                    "Character {} item {} cannot be placed at {}: {}; queued for mail",
                    id,
                    item_id,
                    position,
                    e
                );
                character.inventory.discard_position(item_id, position);
                character.inventory.queue_compensation(item_id);
            }
        }
    }

    fn load_mail(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let id = character.id();

        for (mail_id, mail) in self.decode::<MailId, Mail>(character, Table::Mail, rows, report) {
            character.mailbox.load_mail(mail_id, mail);
        }

        let table = Table::MailItems;
        for (item_id, mail_id) in self.decode::<ItemId, MailId>(character, table, rows, report) {
            let reason = if character.mailbox.mail(mail_id).is_none() {
                Some(format!("mail {} missing", mail_id))
            } else if character.inventory.item(item_id).is_none() {
                Some("no item instance".to_string())
            } else if character.inventory.position(item_id).is_some() {
                Some("item is also placed in the inventory".to_string())
            } else {
                None
            };
            match reason {
                None => {
                    character.mailbox.load_attachment(item_id, mail_id);
                }
                Some(reason) => {
                    report.note_drop(id, table, item_id, reason);
                    character.mailbox.discard_attachment(item_id, mail_id);
                }
            }
        }
    }

    /// Instances neither placed nor attached go to the compensation mail too
    fn sweep_orphans(&self, character: &mut Character, report: &mut LoadReport) {
        let queued = character.inventory.pending_compensation().to_vec();
        for item_id in character.inventory.unplaced() {
            if character.mailbox.holder_of(item_id).is_none() && !queued.contains(&item_id) {
                report.note_repair(character.id(), Table::ItemInstances, item_id, "orphaned item queued for mail");
                character.inventory.queue_compensation(item_id);
            }
        }
    }

    fn load_equipment_sets(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterEquipmentSets;
        for (set_id, set) in self.decode::<u64, EquipmentSet>(character, table, rows, report) {
            character.equipment_sets.load(set_id, set);
        }
        let inventory = &character.inventory;
        let changed = character
            .equipment_sets
            .clear_missing(|item| inventory.item(item).is_some());
        for set_id in changed {
            report.note_repair(character.id(), table, set_id, "cleared slots of missing items");
        }
    }

    fn load_void_storage(&self, character: &mut Character, rows: &mut FetchedRows, report: &mut LoadReport) {
        let table = Table::CharacterVoidStorage;
        let id = character.id();
        let mut entries = self.decode::<u64, VoidItem>(character, table, rows, report);
        entries.sort_by_key(|(entry_id, entry)| (entry.slot, *entry_id));

        for (entry_id, entry) in entries {
            if self.context.reference.item(entry.template).is_none() {
                report.note_drop(id, table, entry_id, format!("unknown template {}", entry.template));
                character.void_storage.discard(entry_id, entry);
                continue;
            }
            match character.void_storage.load(entry_id, entry) {
                VoidPlacement::Kept => {}
                VoidPlacement::Relocated { from, to } => {
                    report.note_repair(id, table, entry_id, format!("slot {} moved to {}", from, to));
                }
                VoidPlacement::Dropped => {
                    report.note_drop(id, table, entry_id, "void storage full");
                }
            }
        }
    }
}

fn apply_at_login_resets(character: &mut Character, _context: &LoadContext, report: &mut LoadReport) {
    let flags = character.header().at_login;
    if flags.reset_talents {
        let groups: Vec<u8> = character.talents.iter().map(|((group, _), _)| *group).collect();
        for group in groups {
            character.talents.reset(group);
        }
        character.header_mut().at_login.reset_talents = false;
        report.note_derived(character.id(), Table::CharacterTalents, "*", "talents reset at login");
    }
    if flags.reset_spells {
        let spells: Vec<u32> = character.spells.iter().map(|(spell, _)| *spell).collect();
        for spell in spells {
            character.spells.unlearn(spell);
        }
        character.header_mut().at_login.reset_spells = false;
        report.note_derived(character.id(), Table::CharacterSpells, "*", "spells reset at login");
    }
}

fn learn_quest_reward_spells(character: &mut Character, context: &LoadContext, report: &mut LoadReport) {
    let rewards: Vec<u32> = character
        .quests
        .rewarded()
        .filter_map(|quest| context.reference.quests.get(quest)?.reward_spell)
        .collect();
    for spell in rewards {
        if character.spells.learn(spell) {
            report.note_derived(character.id(), Table::CharacterSpells, spell, "reward of a completed quest");
        }
    }
}

fn learn_spell_granted_skills(character: &mut Character, context: &LoadContext, report: &mut LoadReport) {
    let granted: Vec<u32> = character
        .spells
        .iter()
        .filter_map(|(spell, _)| context.reference.spells.get(spell)?.grants_skill)
        .collect();
    for skill in granted {
        let Some(rule) = context.reference.skills.get(&skill) else {
            continue;
        };
        if character.skills.learn(skill, 1, rule.max) {
            report.note_derived(character.id(), Table::CharacterSkills, skill, "granted by a known spell");
        }
    }
}

fn unlock_child_skills(character: &mut Character, context: &LoadContext, report: &mut LoadReport) {
    for skill in character.skills.unlock_children(context.reference) {
        report.note_derived(character.id(), Table::CharacterSkills, skill, "unlocked by parent skill");
    }
}

fn assign_profession_slots(character: &mut Character, context: &LoadContext, report: &mut LoadReport) {
    let changed = character.skills.assign_profession_slots(context.reference);
    if changed > 0 {
        report.note_derived(
            character.id(),
            Table::CharacterSkills,
            "*",
            format!("{} profession slot(s) reassigned", changed),
        );
    }
}

fn derive_item_appearances(character: &mut Character, context: &LoadContext, report: &mut LoadReport) {
    let unlocks: Vec<(u32, u32)> = character
        .inventory
        .items()
        .filter_map(|(_, item)| {
            let appearance = context.reference.item(item.template)?.appearance?;
            Some((appearance, item.template))
        })
        .collect();
    for (appearance, template) in unlocks {
        if character.collections.unlock_appearance(appearance, template) {
            report.note_derived(
                character.id(),
                Table::AccountItemAppearances,
                appearance,
                format!("carried by item template {}", template),
            );
        }
    }
}

fn deliver_compensation(character: &mut Character, context: &LoadContext, report: &mut LoadReport) {
    let items = character.inventory.take_compensation();
    if items.is_empty() {
        return;
    }
    let mails = character.mailbox.compose_compensation(
        &items,
        context.config.compensation_batch_size,
        &context.world.mail_ids,
        context.now,
    );
    tracing::warn!(
        "Character {}: {} unplaceable item(s) returned in {} mail(s)",
        character.id(),
        items.len(),
        mails.len()
    );
    counter!("persistence.compensation.items").increment(items.len() as u64);
    report.compensated.extend(items);
    report.compensation_mails.extend(mails);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::item::RefundInfo;
    use crate::character::quests::QuestState;
    use crate::persistence::batch::{SavePhase, TransactionScope};
    use crate::reference::fixtures;
    use chrono::Duration;
    use realmkeep_common::WorldPosition;
    use serde::Serialize;
    use serde_json::{Value, json};

    fn to_json<T: Serialize>(value: &T) -> Value {
        serde_json::to_value(value).unwrap()
    }

    struct Harness {
        reference: ReferenceData,
        world: WorldState,
        config: PersistenceConfig,
        now: DateTime<Utc>,
        id: CharacterId,
        account: AccountId,
        header: CharacterHeader,
        rows: Vec<(Table, Row)>,
    }

    impl Harness {
        fn new() -> Self {
            let account = AccountId::new();
            Self {
                reference: fixtures::reference(),
                world: WorldState::new(),
                config: PersistenceConfig::default(),
                now: Utc::now(),
                id: CharacterId::new(),
                account,
                header: fixtures::header(account),
                rows: Vec::new(),
            }
        }

        fn row(&mut self, table: Table, key: impl ToString, payload: Value) -> &mut Self {
            self.rows.push((table, Row::new(key.to_string(), payload)));
            self
        }

        fn load(&self) -> Result<(Character, LoadReport), LoadError> {
            let mut rows: FetchedRows = self
                .rows
                .iter()
                .map(|(table, row)| (*table, vec![row.clone()]))
                .collect();
            rows.insert(
                Table::Characters,
                vec![Row::new(SINGLETON_KEY, to_json(&self.header))],
            );
            let reconstructor = Reconstructor::new(LoadContext {
                reference: &self.reference,
                world: &self.world,
                config: &self.config,
                now: self.now,
            });
            reconstructor.reconstruct(self.id, self.account, rows)
        }
    }

    #[test]
    fn test_missing_header_aborts() {
        let harness = Harness::new();
        let reconstructor = Reconstructor::new(LoadContext {
            reference: &harness.reference,
            world: &harness.world,
            config: &harness.config,
            now: harness.now,
        });
        let result = reconstructor.reconstruct(harness.id, harness.account, FetchedRows::new());
        assert!(matches!(result, Err(LoadError::NotFound(_))));
    }

    #[test]
    fn test_entity_checks_abort() {
        let mut harness = Harness::new();
        harness.header.account = AccountId::new();
        assert!(matches!(harness.load(), Err(LoadError::AccountMismatch { .. })));

        let mut harness = Harness::new();
        let until = harness.now + Duration::days(1);
        harness.row(
            Table::AccountAccess,
            SINGLETON_KEY,
            json!({ "banned_until": until, "permanent": false, "locked": false }),
        );
        match harness.load() {
            Err(LoadError::Banned { until: Some(at), .. }) => assert_eq!(at, until),
            other => panic!("expected a ban, got {:?}", other.map(|(c, _)| c.id())),
        }

        let mut harness = Harness::new();
        harness.row(Table::AccountAccess, SINGLETON_KEY, json!("not an access row"));
        assert!(matches!(harness.load(), Err(LoadError::Locked(_))));

        let mut harness = Harness::new();
        harness.header.name = "Admin".to_string();
        assert!(matches!(harness.load(), Err(LoadError::InvalidName { .. })));

        // A pending rename lets the name through
        harness.header.at_login.rename = true;
        assert!(harness.load().is_ok());
    }

    #[test]
    fn test_clean_load_has_no_changes() {
        let mut harness = Harness::new();
        let now = harness.now;
        harness
            .row(
                Table::CharacterHomebind,
                SINGLETON_KEY,
                to_json(&Homebind {
                    position: fixtures::start_position(),
                    area_id: 12,
                }),
            )
            .row(Table::CharacterSpells, fixtures::FIREBALL, json!({ "active": true }))
            .row(
                Table::ItemInstances,
                1,
                to_json(&Item::new(fixtures::LINEN, now)),
            )
            .row(Table::CharacterInventory, 1, json!({ "backpack": 0 }));

        let (character, report) = harness.load().unwrap();
        assert_eq!(character.state(), crate::character::ContainerState::Active);
        assert_eq!(report.spawn, Some(SpawnSource::Saved));
        assert!(!report.has_changes(), "{:?}", report);
        assert!(!character.is_dirty());
        assert_eq!(
            character.inventory.position(ItemId(1)),
            Some(ItemPosition::Backpack(0))
        );
    }

    #[test]
    fn test_missing_homebind_repaired() {
        let harness = Harness::new();
        let (character, report) = harness.load().unwrap();
        assert_eq!(character.homebind().position, fixtures::start_position());
        assert_eq!(report.repaired[0].table, Table::CharacterHomebind);
        assert!(character.is_dirty());
    }

    #[test]
    fn test_unknown_and_undecodable_rows_dropped() {
        let mut harness = Harness::new();
        harness
            .row(Table::CharacterSpells, 999_999, json!({ "active": true }))
            .row(Table::CharacterSkills, fixtures::SWORDS, json!("garbage"));

        let (mut character, report) = harness.load().unwrap();
        assert!(!character.spells.knows(999_999));
        assert_eq!(report.dropped.len(), 2);

        let mut scope = TransactionScope::new(crate::persistence::table::StoreTarget::Character);
        character.save_table(Table::CharacterSpells, SavePhase::Delete, false, &mut scope);
        character.save_table(Table::CharacterSkills, SavePhase::Delete, false, &mut scope);
        assert_eq!(scope.len(), 2);
        assert!(scope.ops().iter().all(|op| op.is_delete()));
    }

    #[test]
    fn test_currency_clamped_to_cap() {
        let mut harness = Harness::new();
        harness.row(
            Table::CharacterCurrency,
            fixtures::HONOR,
            to_json(&CurrencyAmount {
                quantity: 9000,
                weekly: 0,
            }),
        );
        let (character, report) = harness.load().unwrap();
        assert_eq!(character.currencies.quantity(fixtures::HONOR), 4000);
        assert!(report.repaired.iter().any(|issue| issue.table == Table::CharacterCurrency));
    }

    #[test]
    fn test_item_in_missing_bag_is_mailed() {
        let mut harness = Harness::new();
        harness
            .row(
                Table::ItemInstances,
                5,
                to_json(&Item::new(fixtures::LINEN, harness.now)),
            )
            .row(
                Table::CharacterInventory,
                5,
                to_json(&ItemPosition::Container {
                    bag: ItemId(99),
                    slot: 0,
                }),
            );

        let (character, report) = harness.load().unwrap();
        assert_eq!(report.compensated, vec![ItemId(5)]);
        assert_eq!(report.compensation_mails.len(), 1);
        assert_eq!(character.inventory.position(ItemId(5)), None);
        assert_eq!(
            character.mailbox.holder_of(ItemId(5)),
            Some(report.compensation_mails[0])
        );
    }

    #[test]
    fn test_orphaned_instance_is_mailed() {
        let mut harness = Harness::new();
        harness.row(
            Table::ItemInstances,
            7,
            to_json(&Item::new(fixtures::SHIRT, harness.now)),
        );
        let (character, report) = harness.load().unwrap();
        assert_eq!(report.compensated, vec![ItemId(7)]);
        assert!(character.mailbox.holder_of(ItemId(7)).is_some());
    }

    #[test]
    fn test_item_expiry_rules() {
        let mut harness = Harness::new();
        harness.header.logout_time = Some(harness.now - Duration::hours(2));
        let mut refundable = Item::new(fixtures::SWORD, harness.now);
        refundable.refund = Some(RefundInfo {
            money: 100,
            expires_at: harness.now - Duration::minutes(1),
        });
        let now = harness.now;
        harness
            .row(
                Table::ItemInstances,
                1,
                to_json(&Item::new(fixtures::CONJURED_WATER, now)),
            )
            .row(Table::CharacterInventory, 1, json!({ "backpack": 0 }))
            .row(
                Table::ItemInstances,
                2,
                to_json(&Item::new(fixtures::WINTER_HAT, now)),
            )
            .row(Table::CharacterInventory, 2, json!({ "backpack": 1 }))
            .row(Table::ItemInstances, 3, to_json(&refundable))
            .row(Table::CharacterInventory, 3, json!({ "equipment": 15 }));

        let (character, report) = harness.load().unwrap();
        assert!(character.inventory.item(ItemId(1)).is_none());
        assert!(character.inventory.item(ItemId(2)).is_none());
        assert_eq!(character.inventory.item(ItemId(3)).unwrap().refund, None);
        // Positions of dropped instances have nothing to attach to
        assert_eq!(report.dropped.len(), 4);
        assert!(report.compensated.is_empty());
    }

    #[test]
    fn test_reset_instance_uses_area_trigger() {
        let mut harness = Harness::new();
        harness.header.position = WorldPosition::new(fixtures::DUNGEON, 10.0, 10.0, 0.0);
        harness.header.instance_id = Some(77);

        let (character, report) = harness.load().unwrap();
        assert_eq!(report.spawn, Some(SpawnSource::AreaTrigger));
        assert_eq!(character.header().position.map_id, fixtures::CONTINENT);
        assert_eq!(character.header().instance_id, None);

        harness.world.open_instance(77);
        let (character, report) = harness.load().unwrap();
        assert_eq!(report.spawn, Some(SpawnSource::Saved));
        assert_eq!(character.header().instance_id, Some(77));
    }

    #[test]
    fn test_quest_rows_validated() {
        let mut harness = Harness::new();
        let status = QuestStatus {
            state: QuestState::Incomplete,
            accepted_at: harness.now,
            timer: None,
        };
        harness
            .row(Table::CharacterQuestStatus, fixtures::QUEST, to_json(&status))
            .row(Table::CharacterQuestObjectives, format!("{}:0", fixtures::QUEST), json!(3))
            .row(Table::CharacterQuestObjectives, format!("{}:4", fixtures::QUEST), json!(1))
            .row(
                Table::CharacterQuestObjectives,
                format!("{}:0", fixtures::QUEST_WITH_REWARD),
                json!(1),
            );

        let (character, report) = harness.load().unwrap();
        assert_eq!(character.quests.objective(fixtures::QUEST, 0), Some(3));
        assert_eq!(character.quests.objective(fixtures::QUEST, 4), None);
        assert_eq!(character.quests.objective(fixtures::QUEST_WITH_REWARD, 0), None);
        assert_eq!(report.dropped.len(), 2);
    }

    #[test]
    fn test_post_load_hooks_derive_records() {
        let mut harness = Harness::new();
        let now = harness.now;
        harness
            .row(
                Table::CharacterQuestRewarded,
                fixtures::QUEST_WITH_REWARD,
                to_json(&Rewarded { at: now }),
            )
            .row(Table::CharacterSpells, fixtures::BLACKSMITHING_SPELL, json!({ "active": true }))
            .row(
                Table::ItemInstances,
                1,
                to_json(&Item::new(fixtures::SWORD, now)),
            )
            .row(Table::CharacterInventory, 1, json!({ "equipment": 15 }));

        let (character, report) = harness.load().unwrap();
        assert!(character.spells.knows(fixtures::CAMPFIRE));
        assert!(character.skills.has(fixtures::BLACKSMITHING));
        assert_eq!(
            character.skills.get(fixtures::BLACKSMITHING).unwrap().profession_slot,
            Some(0)
        );
        assert!(
            character
                .collections
                .appearances
                .contains(&fixtures::SWORD_APPEARANCE)
        );
        assert!(report.derived.len() >= 4);
    }

    #[test]
    fn test_at_login_talent_reset() {
        let mut harness = Harness::new();
        harness.header.at_login.reset_talents = true;
        harness.row(Table::CharacterTalents, "0:1", json!({ "rank": 3 }));

        let (character, _) = harness.load().unwrap();
        assert_eq!(character.talents.rank(0, 1), 0);
        assert!(!character.header().at_login.reset_talents);
    }

    #[tokio::test]
    async fn test_fetch_rows_reads_both_stores() {
        use crate::persistence::memory::MemoryRecordStore;
        use crate::persistence::table::StoreTarget;

        let characters = MemoryRecordStore::new(StoreTarget::Character);
        let accounts = MemoryRecordStore::new(StoreTarget::Account);
        let id = CharacterId::new();
        let account = AccountId::new();
        characters
            .put(Table::CharacterSpells, id.uuid(), "133", json!({ "active": true }))
            .await;
        accounts
            .put(Table::AccountToys, account.uuid(), "5", json!({}))
            .await;
        // Not part of the load set
        accounts
            .put(Table::AccountLastPlayedCharacter, account.uuid(), "x", json!({}))
            .await;

        let mut rows = fetch_rows(&characters, &accounts, id, account).await.unwrap();
        assert_eq!(rows.take(Table::CharacterSpells).len(), 1);
        assert_eq!(rows.take(Table::AccountToys).len(), 1);
        assert!(rows.take(Table::AccountLastPlayedCharacter).is_empty());
    }
}
