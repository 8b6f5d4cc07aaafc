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

//! Item instances

use crate::persistence::record::RecordKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Realm-unique item instance id
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl RecordKey for ItemId {
    fn to_key(&self) -> String {
        self.0.to_string()
    }

    fn from_key(key: &str) -> Option<Self> {
        key.parse().ok().map(ItemId)
    }
}

/// Vendor refund window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RefundInfo {
    pub money: u64,
    pub expires_at: DateTime<Utc>,
}

/// One `item_instances` row. Where the item is lives elsewhere: an inventory
/// position or a mail attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub template: u32,
    #[serde(default = "default_count")]
    pub count: u32,
    #[serde(default)]
    pub durability: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub refund: Option<RefundInfo>,
    #[serde(default)]
    pub enchantments: Vec<u32>,
}

fn default_count() -> u32 {
    1
}

impl Item {
    pub fn new(template: u32, created_at: DateTime<Utc>) -> Self {
        Self {
            template,
            count: 1,
            durability: 0,
            created_at,
            refund: None,
            enchantments: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = count;
        self
    }
}
