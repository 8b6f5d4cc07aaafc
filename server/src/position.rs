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

//! Spawn position resolution
//!
//! An ordered list of pure stages, each looking at the same read-only
//! context and either producing a position or passing. The first stage that
//! produces a legal position wins.

use crate::character::header::{CharacterHeader, Homebind};
use crate::reference::{MapKind, ReferenceData};
use crate::world::WorldState;
use realmkeep_common::WorldPosition;

/// Which stage produced the spawn position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnSource {
    Saved,
    Battleground,
    Transport,
    Taxi,
    AreaTrigger,
    Homebind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPosition {
    pub position: WorldPosition,
    pub source: SpawnSource,
    pub instance_id: Option<u32>,
    pub transport: Option<u32>,
}

impl ResolvedPosition {
    fn at(position: WorldPosition, source: SpawnSource) -> Self {
        Self {
            position,
            source,
            instance_id: None,
            transport: None,
        }
    }
}

pub struct PositionContext<'a> {
    pub header: &'a CharacterHeader,
    pub homebind: &'a Homebind,
    pub reference: &'a ReferenceData,
    pub world: &'a WorldState,
}

pub type PositionStage = fn(&PositionContext) -> Option<ResolvedPosition>;

pub const POSITION_STAGES: &[(SpawnSource, PositionStage)] = &[
    (SpawnSource::Saved, saved_position),
    (SpawnSource::Battleground, battleground_reentry),
    (SpawnSource::Transport, transport_attachment),
    (SpawnSource::Taxi, taxi_resume),
    (SpawnSource::AreaTrigger, area_trigger_recovery),
    (SpawnSource::Homebind, homebind),
];

/// Run the stages in order
pub fn resolve(context: &PositionContext) -> Option<ResolvedPosition> {
    POSITION_STAGES.iter().find_map(|(source, stage)| {
        let resolved = stage(context)?;
        tracing::trace!("Spawn position from {:?}: {:?}", source, resolved.position);
        Some(resolved)
    })
}

/// Where the character logged out. Continents always resolve; instances only
/// while the instance lives. Transport-relative or in-flight coordinates
/// belong to later stages.
fn saved_position(context: &PositionContext) -> Option<ResolvedPosition> {
    let header = context.header;
    if header.transport.is_some() || header.taxi.as_ref().is_some_and(|t| !t.nodes.is_empty()) {
        return None;
    }
    if !context.reference.is_valid_position(&header.position) {
        return None;
    }
    let map = context.reference.map(header.position.map_id)?;
    match map.kind {
        MapKind::Continent => Some(ResolvedPosition::at(header.position, SpawnSource::Saved)),
        MapKind::Instance => {
            let instance = header.instance_id?;
            context.world.is_instance_live(instance).then_some(ResolvedPosition {
                instance_id: Some(instance),
                ..ResolvedPosition::at(header.position, SpawnSource::Saved)
            })
        }
        MapKind::Battleground => None,
    }
}

/// Back into a still-running battleground, or out to where the character
/// joined from
fn battleground_reentry(context: &PositionContext) -> Option<ResolvedPosition> {
    let entry = context.header.battleground?;
    let running = context.world.battleground(entry.instance_id);
    let saved = context.header.position;
    if let Some(running) = running {
        if running.map_id == saved.map_id && context.reference.is_valid_position(&saved) {
            return Some(ResolvedPosition {
                instance_id: Some(entry.instance_id),
                ..ResolvedPosition::at(saved, SpawnSource::Battleground)
            });
        }
    }
    context
        .reference
        .is_valid_position(&entry.join_position)
        .then_some(ResolvedPosition::at(entry.join_position, SpawnSource::Battleground))
}

/// Ride on with a transport that is still in service
fn transport_attachment(context: &PositionContext) -> Option<ResolvedPosition> {
    let attachment = context.header.transport?;
    let base = context.world.transport_position(attachment.transport_id)?;
    let position = WorldPosition {
        map_id: base.map_id,
        x: base.x + attachment.offset.x,
        y: base.y + attachment.offset.y,
        z: base.z + attachment.offset.z,
        orientation: attachment.offset.orientation,
    };
    context
        .reference
        .is_valid_position(&position)
        .then_some(ResolvedPosition {
            transport: Some(attachment.transport_id),
            ..ResolvedPosition::at(position, SpawnSource::Transport)
        })
}

/// Resume a flight at its next node
fn taxi_resume(context: &PositionContext) -> Option<ResolvedPosition> {
    let node = *context.header.taxi.as_ref()?.nodes.first()?;
    let position = *context.reference.taxi_nodes.get(&node)?;
    context
        .reference
        .is_valid_position(&position)
        .then_some(ResolvedPosition::at(position, SpawnSource::Taxi))
}

/// Outside the entrance of the saved instance or battleground map
fn area_trigger_recovery(context: &PositionContext) -> Option<ResolvedPosition> {
    let map = context.reference.map(context.header.position.map_id)?;
    if map.kind == MapKind::Continent {
        return None;
    }
    let entrance = map.entrance?;
    context
        .reference
        .is_valid_position(&entrance)
        .then_some(ResolvedPosition::at(entrance, SpawnSource::AreaTrigger))
}

fn homebind(context: &PositionContext) -> Option<ResolvedPosition> {
    let position = context.homebind.position;
    context
        .reference
        .is_valid_position(&position)
        .then_some(ResolvedPosition::at(position, SpawnSource::Homebind))
}
