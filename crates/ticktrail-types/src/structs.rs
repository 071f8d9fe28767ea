//! Validated telemetry record structs.
//!
//! A [`TelemetryEvent`] only exists after the decoder has accepted a
//! payload, so required fields are plain values and genuinely optional
//! parts of the wire record are [`Option`]s.

use serde::{Deserialize, Serialize};

use crate::enums::{ActorKind, EventType, Role};
use crate::ids::{ActorId, SessionId, SubSectorId};

/// One decoded, validated telemetry occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// The simulation run this event belongs to.
    pub session: SessionId,
    /// Per-session sequence number; the canonical event order.
    pub counter: u64,
    /// What happened.
    pub event_type: EventType,
    /// The tick this event occurred at.
    pub frame: FrameStamp,
    /// The acting actor. Its position is always present.
    pub actor: ActorSnapshot,
    /// The targeted actor, if any.
    pub target: Option<ActorSnapshot>,
    /// Level information, when the simulation reports it.
    pub level: Option<LevelInfo>,
}

impl TelemetryEvent {
    /// Iterate over the actor slots that are filled, tagged by role.
    pub fn participants(&self) -> impl Iterator<Item = (Role, &ActorSnapshot)> {
        core::iter::once((Role::Actor, &self.actor))
            .chain(self.target.iter().map(|target| (Role::Target, target)))
    }
}

/// The tick an event occurred at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameStamp {
    /// Monotonic per-session tick number.
    pub tic: u64,
    /// Wall-clock millisecond offset of the tick.
    pub millis: u64,
}

/// An actor as observed at one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSnapshot {
    /// Session-scoped actor identifier.
    pub id: ActorId,
    /// Player or enemy subtype.
    pub kind: ActorKind,
    /// Where the actor was, when reported.
    pub position: Option<Position>,
    /// Health at the time of the event.
    pub health: i32,
    /// Armor at the time of the event.
    pub armor: i32,
}

/// A point in the level plus facing angle and spatial partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate (fixed point).
    pub x: i32,
    /// Y coordinate (fixed point).
    pub y: i32,
    /// Z coordinate (fixed point).
    pub z: i32,
    /// Facing angle. Binary angle units span the full `u32` range.
    pub angle: u32,
    /// The subsector containing the point.
    pub subsector: SubSectorId,
}

/// Level the session is playing when the event occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelInfo {
    /// Episode number.
    pub episode: u32,
    /// Map number within the episode.
    pub map: u32,
    /// Skill level.
    pub difficulty: u32,
}
