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

//! Entity-level records: the character header, homebind and stat snapshot

use chrono::{DateTime, Utc};
use realmkeep_common::{AccountId, WorldPosition};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    pub skin: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub facial_style: u8,
}

/// Character riding a moving transport; the offset is transport-relative
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransportAttachment {
    pub transport_id: u32,
    pub offset: WorldPosition,
}

/// Remaining nodes of a flight in progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxiPath {
    pub nodes: Vec<u32>,
}

/// Where the character was before joining a battleground
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BattlegroundEntry {
    pub instance_id: u32,
    pub join_position: WorldPosition,
}

/// Actions forced on the next login
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtLoginFlags {
    #[serde(default)]
    pub rename: bool,
    #[serde(default)]
    pub reset_talents: bool,
    #[serde(default)]
    pub reset_spells: bool,
}

/// The `characters` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterHeader {
    pub name: String,
    pub account: AccountId,
    pub race: u8,
    pub class: u8,
    pub gender: u8,
    pub level: u8,
    #[serde(default)]
    pub experience: u32,
    #[serde(default)]
    pub money: u64,
    #[serde(default)]
    pub appearance: Appearance,
    pub position: WorldPosition,
    #[serde(default)]
    pub instance_id: Option<u32>,
    #[serde(default)]
    pub transport: Option<TransportAttachment>,
    #[serde(default)]
    pub taxi: Option<TaxiPath>,
    #[serde(default)]
    pub battleground: Option<BattlegroundEntry>,
    #[serde(default)]
    pub logout_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub at_login: AtLoginFlags,
    /// Seconds played in total
    #[serde(default)]
    pub played: u64,
}

impl CharacterHeader {
    pub fn new(
        name: impl Into<String>,
        account: AccountId,
        race: u8,
        class: u8,
        position: WorldPosition,
    ) -> Self {
        Self {
            name: name.into(),
            account,
            race,
            class,
            gender: 0,
            level: 1,
            experience: 0,
            money: 0,
            appearance: Appearance::default(),
            position,
            instance_id: None,
            transport: None,
            taxi: None,
            battleground: None,
            logout_time: None,
            at_login: AtLoginFlags::default(),
            played: 0,
        }
    }
}

/// Where the hearthstone returns to
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Homebind {
    pub position: WorldPosition,
    pub area_id: u32,
}

/// Derived stats published by the stat engine, stored for out-of-game tools
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatSnapshot {
    pub health: u32,
    pub power: u32,
    pub strength: u32,
    pub agility: u32,
    pub stamina: u32,
    pub intellect: u32,
    pub armor: u32,
    pub attack_power: u32,
    pub spell_power: u32,
}
