//! Shared type definitions for the ticktrail ingestion pipeline.
//!
//! This crate is the single source of truth for the telemetry vocabulary
//! used across the workspace: identifiers, enumerations, and the validated
//! record produced by the decoder.
//!
//! # Modules
//!
//! - [`ids`] -- Session-scoped identifier newtypes and batch ids
//! - [`enums`] -- Event types, actor kinds, and actor roles
//! - [`structs`] -- The validated [`TelemetryEvent`] and its parts

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ActorKind, EventType, Role};
pub use ids::{ActorId, BatchId, SessionId, SubSectorId};
pub use structs::{ActorSnapshot, FrameStamp, LevelInfo, Position, TelemetryEvent};
