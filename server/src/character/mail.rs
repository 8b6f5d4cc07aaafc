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

//! Mailbox manager
//!
//! A mail changing its flags is an update of the `mail` row. Deleting a mail
//! removes the row, every `mail_items` attachment row and the attached item
//! instances.

use super::inventory::{Inventory, ItemPosition};
use super::item::ItemId;
use crate::error::PlacementError;
use crate::persistence::batch::{SavePhase, TransactionScope};
use crate::persistence::record::{RecordKey, RecordMap};
use crate::persistence::table::Table;
use crate::reference::ReferenceData;
use crate::world::Sequence;
use chrono::{DateTime, Duration, Utc};
use realmkeep_common::CharacterId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days before an unread mail expires
pub const MAIL_EXPIRY_DAYS: i64 = 30;

pub const COMPENSATION_SUBJECT: &str = "Recovered items";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MailId(pub u64);

impl std::fmt::Display for MailId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RecordKey for MailId {
    fn to_key(&self) -> String {
        self.0.to_string()
    }

    fn from_key(key: &str) -> Option<Self> {
        key.parse().ok().map(MailId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MailSender {
    Character(CharacterId),
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    pub sender: MailSender,
    pub subject: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub money: u64,
    pub sent_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub returned: bool,
}

impl Mail {
    pub fn new(sender: MailSender, subject: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            sender,
            subject: subject.into(),
            body: String::new(),
            money: 0,
            sent_at: now,
            expires_at: now + Duration::days(MAIL_EXPIRY_DAYS),
            read: false,
            returned: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    mails: RecordMap<MailId, Mail>,
    /// Attached item to the mail holding it
    attachments: RecordMap<ItemId, MailId>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mail(&self, id: MailId) -> Option<&Mail> {
        self.mails.get(&id)
    }

    pub fn mails(&self) -> impl Iterator<Item = (&MailId, &Mail)> {
        self.mails.active()
    }

    pub fn len(&self) -> usize {
        self.mails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mails.is_empty()
    }

    pub fn attachments_of(&self, mail: MailId) -> Vec<ItemId> {
        self.attachments
            .active()
            .filter(|(_, holder)| **holder == mail)
            .map(|(item, _)| *item)
            .collect()
    }

    pub fn holder_of(&self, item: ItemId) -> Option<MailId> {
        self.attachments.get(&item).copied()
    }

    /// Deliver a mail. Attached items must already exist as unplaced instances.
    pub fn receive(&mut self, id: MailId, mail: Mail, attached: &[ItemId]) {
        self.mails.insert(id, mail);
        for item in attached {
            self.attachments.insert(*item, id);
        }
    }

    pub fn mark_read(&mut self, id: MailId) -> bool {
        self.mails.update(&id, |mail| mail.read = true).is_some()
    }

    pub fn mark_returned(&mut self, id: MailId) -> bool {
        self.mails.update(&id, |mail| mail.returned = true).is_some()
    }

    /// Take the attached money; returns the amount taken
    pub fn take_money(&mut self, id: MailId) -> Option<u64> {
        if self.mails.get(&id)?.money == 0 {
            return Some(0);
        }
        self.mails.update(&id, |mail| std::mem::take(&mut mail.money))
    }

    /// Delete a mail together with every attached item
    pub fn delete(&mut self, id: MailId, inventory: &mut Inventory) -> Option<Mail> {
        let mail = self.mails.get(&id).cloned()?;
        for item in self.attachments_of(id) {
            self.attachments.remove(&item);
            if let Err(e) = inventory.destroy(item) {
                tracing::warn!("Attachment {} of mail {} already gone: {}", item, id, e);
            }
        }
        self.mails.remove(&id);
        Some(mail)
    }

    /// Move an attachment into the inventory
    pub fn take_attachment(
        &mut self,
        id: MailId,
        item: ItemId,
        position: ItemPosition,
        inventory: &mut Inventory,
        reference: &ReferenceData,
    ) -> Result<(), PlacementError> {
        if self.holder_of(item) != Some(id) {
            return Err(PlacementError::UnknownItem(item));
        }
        inventory.move_item(item, position, reference)?;
        self.attachments.remove(&item);
        Ok(())
    }

    /// Wrap `items` into system mails of at most `batch_size` attachments each
    pub fn compose_compensation(
        &mut self,
        items: &[ItemId],
        batch_size: usize,
        ids: &Sequence,
        now: DateTime<Utc>,
    ) -> Vec<MailId> {
        items
            .chunks(batch_size.max(1))
            .map(|chunk| {
                let id = MailId(ids.next());
                let mut mail = Mail::new(MailSender::System, COMPENSATION_SUBJECT, now);
                mail.body = format!("{} item(s) could not be placed in your bags.", chunk.len());
                self.receive(id, mail, chunk);
                id
            })
            .collect()
    }

    pub fn load_mail(&mut self, id: MailId, mail: Mail) -> bool {
        self.mails.load(id, mail)
    }

    pub fn load_attachment(&mut self, item: ItemId, mail: MailId) -> bool {
        self.attachments.load(item, mail)
    }

    pub fn discard_attachment(&mut self, item: ItemId, mail: MailId) {
        self.attachments.load_discarded(item, mail);
    }

    pub fn is_dirty(&self) -> bool {
        self.mails.is_dirty() || self.attachments.is_dirty()
    }

    pub fn save_mails(&mut self, phase: SavePhase, owner: Uuid, scope: &mut TransactionScope) -> usize {
        self.mails.save(phase, Table::Mail, owner, scope)
    }

    pub fn save_attachments(
        &mut self,
        phase: SavePhase,
        owner: Uuid,
        scope: &mut TransactionScope,
    ) -> usize {
        self.attachments.save(phase, Table::MailItems, owner, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::character::item::Item;
    use crate::persistence::batch::StoreOp;
    use crate::persistence::table::StoreTarget;
    use crate::reference::fixtures;

    fn save(mailbox: &mut Mailbox, inventory: &mut Inventory) -> Vec<StoreOp> {
        let owner = Uuid::nil();
        let mut scope = TransactionScope::new(StoreTarget::Character);
        mailbox.save_attachments(SavePhase::Delete, owner, &mut scope);
        mailbox.save_mails(SavePhase::Delete, owner, &mut scope);
        inventory.save_instances(SavePhase::Delete, owner, &mut scope);
        inventory.save_instances(SavePhase::Upsert, owner, &mut scope);
        mailbox.save_mails(SavePhase::Upsert, owner, &mut scope);
        mailbox.save_attachments(SavePhase::Upsert, owner, &mut scope);
        scope.into_ops()
    }

    fn loaded_mail_with_item() -> (Mailbox, Inventory) {
        let now = Utc::now();
        let mut inventory = Inventory::new();
        inventory.load_item(ItemId(7), Item::new(fixtures::LINEN, now));
        let mut mailbox = Mailbox::new();
        let mut mail = Mail::new(MailSender::System, "hello", now);
        mail.money = 50;
        mailbox.load_mail(MailId(1), mail);
        mailbox.load_attachment(ItemId(7), MailId(1));
        (mailbox, inventory)
    }

    #[test]
    fn test_read_is_an_update() {
        let (mut mailbox, mut inventory) = loaded_mail_with_item();
        assert!(mailbox.mark_read(MailId(1)));
        assert_eq!(mailbox.take_money(MailId(1)), Some(50));
        assert_eq!(mailbox.take_money(MailId(1)), Some(0));

        let ops = save(&mut mailbox, &mut inventory);
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], StoreOp::Upsert { table: Table::Mail, .. }));
    }

    #[test]
    fn test_delete_cascades_to_items() {
        let (mut mailbox, mut inventory) = loaded_mail_with_item();
        assert!(mailbox.delete(MailId(1), &mut inventory).is_some());
        assert!(inventory.item(ItemId(7)).is_none());

        let ops = save(&mut mailbox, &mut inventory);
        let tables: Vec<Table> = ops.iter().map(StoreOp::table).collect();
        assert_eq!(tables, vec![Table::MailItems, Table::Mail, Table::ItemInstances]);
        assert!(ops.iter().all(StoreOp::is_delete));
    }

    #[test]
    fn test_take_attachment_places_item() {
        let reference = fixtures::reference();
        let (mut mailbox, mut inventory) = loaded_mail_with_item();
        mailbox
            .take_attachment(MailId(1), ItemId(7), ItemPosition::Backpack(2), &mut inventory, &reference)
            .unwrap();
        assert_eq!(inventory.position(ItemId(7)), Some(ItemPosition::Backpack(2)));
        assert!(mailbox.attachments_of(MailId(1)).is_empty());

        assert!(mailbox
            .take_attachment(MailId(1), ItemId(7), ItemPosition::Backpack(3), &mut inventory, &reference)
            .is_err());
    }

    #[test]
    fn test_compensation_is_chunked() {
        let mut mailbox = Mailbox::new();
        let ids = Sequence::new(100);
        let items: Vec<ItemId> = (1..=5).map(ItemId).collect();

        let mails = mailbox.compose_compensation(&items, 2, &ids, Utc::now());
        assert_eq!(mails, vec![MailId(101), MailId(102), MailId(103)]);
        let attached: usize = mails.iter().map(|m| mailbox.attachments_of(*m).len()).sum();
        assert_eq!(attached, 5);
        assert_eq!(mailbox.mail(MailId(101)).unwrap().sender, MailSender::System);
    }
}
