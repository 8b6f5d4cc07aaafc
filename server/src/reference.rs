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

//! Read-only reference data consulted by load-time validation
//!
//! Loaded once at startup from a YAML file. Everything here is static for the
//! lifetime of the process.

use crate::character::header::Appearance;
use realmkeep_common::WorldPosition;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Item template classes that matter to placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ItemClass {
    Container { slots: u8 },
    Weapon,
    Armor,
    Consumable,
    Quest,
    Misc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemTemplate {
    pub name: String,
    pub class: ItemClass,
    /// Equipment slots this item may occupy
    #[serde(default)]
    pub equip_slots: Vec<u8>,
    /// Conjured items vanish after the character has been logged out a while
    #[serde(default)]
    pub conjured: bool,
    /// Holiday the item is bound to, if any
    #[serde(default)]
    pub holiday: Option<u32>,
    #[serde(default = "default_max_stack")]
    pub max_stack: u32,
    /// Appearance unlocked in the account collection when obtained
    #[serde(default)]
    pub appearance: Option<u32>,
}

fn default_max_stack() -> u32 {
    1
}

impl ItemTemplate {
    /// Slot count when this template is a container
    pub fn container_slots(&self) -> Option<u8> {
        match self.class {
            ItemClass::Container { slots } => Some(slots),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillRule {
    pub name: String,
    /// Parent skill and the parent value that unlocks this one
    #[serde(default)]
    pub parent: Option<u32>,
    #[serde(default)]
    pub unlock_at: u16,
    #[serde(default)]
    pub profession: bool,
    pub max: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpellRule {
    pub name: String,
    /// Skill learned alongside the spell
    #[serde(default)]
    pub grants_skill: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TalentRule {
    pub max_rank: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraitRule {
    pub max_rank: u8,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrencyRule {
    pub name: String,
    /// Zero means uncapped
    #[serde(default)]
    pub max_amount: u32,
    /// Zero means uncapped
    #[serde(default)]
    pub weekly_cap: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestRule {
    pub objective_count: u8,
    #[serde(default)]
    pub reward_spell: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapKind {
    Continent,
    Instance,
    Battleground,
}

/// Axis-aligned playable area of a map
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Bounds {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapRule {
    pub name: String,
    pub kind: MapKind,
    pub bounds: Bounds,
    /// Area trigger destination just outside the map's entrance
    #[serde(default)]
    pub entrance: Option<WorldPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NameRules {
    pub min_length: usize,
    pub max_length: usize,
    pub pattern: String,
    #[serde(default)]
    pub reserved: Vec<String>,
}

impl Default for NameRules {
    fn default() -> Self {
        Self {
            min_length: 2,
            max_length: 12,
            pattern: "^[A-Z][a-z]+$".to_string(),
            reserved: Vec::new(),
        }
    }
}

/// Highest selectable value of each appearance option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppearanceLimits {
    pub skin: u8,
    pub face: u8,
    pub hair_style: u8,
    pub hair_color: u8,
    pub facial_style: u8,
}

impl Default for AppearanceLimits {
    fn default() -> Self {
        Self {
            skin: 15,
            face: 15,
            hair_style: 15,
            hair_color: 15,
            facial_style: 15,
        }
    }
}

impl AppearanceLimits {
    pub fn allows(&self, appearance: &Appearance) -> bool {
        appearance.skin <= self.skin
            && appearance.face <= self.face
            && appearance.hair_style <= self.hair_style
            && appearance.hair_color <= self.hair_color
            && appearance.facial_style <= self.facial_style
    }
}

/// All static tables
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceData {
    pub items: HashMap<u32, ItemTemplate>,
    pub skills: HashMap<u32, SkillRule>,
    pub spells: HashMap<u32, SpellRule>,
    pub talents: HashMap<u32, TalentRule>,
    pub traits: HashMap<u32, TraitRule>,
    pub currencies: HashMap<u32, CurrencyRule>,
    pub quests: HashMap<u32, QuestRule>,
    pub maps: HashMap<u32, MapRule>,
    pub taxi_nodes: HashMap<u32, WorldPosition>,
    /// Race to starting position, used when a homebind is missing
    pub start_positions: HashMap<u8, WorldPosition>,
    pub names: NameRules,
    pub appearance: AppearanceLimits,

    #[serde(skip)]
    name_pattern: Option<Regex>,
}

impl ReferenceData {
    /// Load reference data from a YAML file
    pub fn load(path: &str) -> Result<ReferenceData, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to open reference data file: {}", e))?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<ReferenceData, String> {
        let mut data: ReferenceData = serde_yaml::from_str(text)
            .map_err(|e| format!("Failed to parse reference data: {}", e))?;
        data.compile()?;
        Ok(data)
    }

    /// Compile the name pattern. Needed after building the data by hand.
    pub fn compile(&mut self) -> Result<(), String> {
        let regex = Regex::new(&self.names.pattern)
            .map_err(|e| format!("Invalid name pattern {:?}: {}", self.names.pattern, e))?;
        self.name_pattern = Some(regex);
        Ok(())
    }

    pub fn item(&self, template: u32) -> Option<&ItemTemplate> {
        self.items.get(&template)
    }

    pub fn map(&self, map_id: u32) -> Option<&MapRule> {
        self.maps.get(&map_id)
    }

    /// Whether a position lies on a known map, inside its bounds
    pub fn is_valid_position(&self, position: &WorldPosition) -> bool {
        position.is_finite()
            && self
                .map(position.map_id)
                .is_some_and(|map| map.bounds.contains(position.x, position.y))
    }

    pub fn is_valid_name(&self, name: &str) -> bool {
        let length = name.chars().count();
        if length < self.names.min_length || length > self.names.max_length {
            return false;
        }
        if self
            .names
            .reserved
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            return false;
        }
        match &self.name_pattern {
            Some(pattern) => pattern.is_match(name),
            None => Regex::new(&self.names.pattern).is_ok_and(|p| p.is_match(name)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
items:
  6948:
    name: Hearthstone
    class: { kind: misc }
  4500:
    name: Traveler's Backpack
    class: { kind: container, slots: 16 }
maps:
  0:
    name: Eastern Kingdoms
    kind: continent
    bounds: { min_x: -10000.0, max_x: 10000.0, min_y: -10000.0, max_y: 10000.0 }
names:
  min_length: 2
  max_length: 12
  pattern: "^[A-Z][a-z]+$"
  reserved: [Admin]
"#;

    #[test]
    fn test_reference_from_yaml() {
        let data = ReferenceData::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(data.items.len(), 2);
        assert_eq!(data.item(4500).unwrap().container_slots(), Some(16));
        assert_eq!(data.item(6948).unwrap().container_slots(), None);
        assert_eq!(data.item(6948).unwrap().max_stack, 1);
    }

    #[test]
    fn test_name_rules() {
        let data = ReferenceData::from_yaml_str(SAMPLE).unwrap();
        assert!(data.is_valid_name("Thrall"));
        assert!(!data.is_valid_name("thrall"));
        assert!(!data.is_valid_name("A"));
        assert!(!data.is_valid_name("Admin"));
        assert!(!data.is_valid_name("Averyveryverylongname"));
    }

    #[test]
    fn test_position_validity() {
        let data = ReferenceData::from_yaml_str(SAMPLE).unwrap();
        assert!(data.is_valid_position(&WorldPosition::new(0, 10.0, 10.0, 0.0)));
        assert!(!data.is_valid_position(&WorldPosition::new(0, 20000.0, 10.0, 0.0)));
        assert!(!data.is_valid_position(&WorldPosition::new(1, 10.0, 10.0, 0.0)));
        assert!(!data.is_valid_position(&WorldPosition::new(0, f32::NAN, 10.0, 0.0)));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let text = "names: { min_length: 1, max_length: 5, pattern: \"([\" }";
        assert!(ReferenceData::from_yaml_str(text).is_err());
    }
}
