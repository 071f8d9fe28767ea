//! Telemetry record decoding and validation.
//!
//! A datagram is parsed into an untyped JSON tree, then checked field by
//! field in a fixed order. The first failed check determines the
//! [`RejectReason`], so a record with several problems always reports the
//! earliest one regardless of the JSON types of later fields. Decoding is
//! pure: a [`Decoder`] holds only its immutable options, so clones can run
//! on any number of workers at once.

use serde::Deserialize;
use serde_json::{Map, Value};
use ticktrail_types::{
    ActorId, ActorKind, ActorSnapshot, EventType, FrameStamp, LevelInfo, Position, Role,
    SessionId, SubSectorId, TelemetryEvent,
};

/// Largest accepted counter, tic, millis or subsector value.
///
/// Stores key on signed 64-bit integers, so anything above would collide.
pub const MAX_KEY: u64 = i64::MAX.unsigned_abs();

/// Whether a target actor must report a position.
///
/// Older payload variants omit the target's position, so the default
/// accepts a position-less target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionPolicy {
    /// A target without a position is accepted.
    #[default]
    Optional,
    /// A target without a position is rejected.
    Required,
}

/// Decoder behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Position requirement for the target actor.
    pub target_position: PositionPolicy,
}

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    /// The payload is not JSON, or a field has an unusable shape.
    #[error("not a telemetry record: {0}")]
    Malformed(String),

    /// `session` is absent or blank.
    #[error("session is missing or empty")]
    MissingSession,

    /// `counter` is absent.
    #[error("counter is missing")]
    MissingCounter,

    /// `type` is absent.
    #[error("type is missing")]
    MissingType,

    /// `type` names no known event type.
    #[error("unknown event type {0:?}")]
    UnknownType(String),

    /// `frame` is absent.
    #[error("frame is missing")]
    MissingFrame,

    /// `frame.tic` is absent.
    #[error("frame.tic is missing")]
    MissingTic,

    /// `actor` is absent.
    #[error("actor is missing")]
    MissingActor,

    /// An actor slot has no `id`.
    #[error("{role}.id is missing")]
    MissingActorId {
        /// The slot that failed.
        role: Role,
    },

    /// An actor slot has no `position` where one is required.
    #[error("{role}.position is missing")]
    MissingPosition {
        /// The slot that failed.
        role: Role,
    },

    /// A facing angle outside the unsigned 32-bit range.
    #[error("{role}.position.angle {angle} is outside the 32-bit unsigned range")]
    AngleOutOfRange {
        /// The slot that failed.
        role: Role,
        /// The value received.
        angle: i64,
    },

    /// A subsector id that is absent or not a non-negative integer.
    #[error("{role}.position.subsector is missing or not numeric")]
    InvalidSubsector {
        /// The slot that failed.
        role: Role,
    },

    /// A counter, tic or millis value that is not a non-negative integer.
    #[error("{field} is not a non-negative integer")]
    NotAnInteger {
        /// Dotted path of the field.
        field: &'static str,
    },

    /// A key above [`MAX_KEY`].
    #[error("{field} value {value} exceeds {max}", max = MAX_KEY)]
    KeyOutOfRange {
        /// Dotted path of the field.
        field: &'static str,
        /// The value received.
        value: u64,
    },
}

/// A rejected payload and the reason it was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct Rejection {
    /// The first validation rule the payload violated.
    pub reason: RejectReason,
    /// The raw payload, lossily decoded as UTF-8.
    pub payload: String,
}

/// Stateless telemetry decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder {
    options: DecoderOptions,
}

impl Decoder {
    /// Create a decoder with the given options.
    pub const fn new(options: DecoderOptions) -> Self {
        Self { options }
    }

    /// The options this decoder was built with.
    pub const fn options(&self) -> DecoderOptions {
        self.options
    }

    /// Decode one datagram into a validated event.
    ///
    /// # Errors
    ///
    /// Returns a [`Rejection`] carrying the payload and the first
    /// violated rule. Rejections are per-record and never fatal.
    pub fn decode(&self, payload: &[u8]) -> Result<TelemetryEvent, Rejection> {
        self.validate(payload).map_err(|reason| Rejection {
            reason,
            payload: String::from_utf8_lossy(payload).into_owned(),
        })
    }

    fn validate(&self, payload: &[u8]) -> Result<TelemetryEvent, RejectReason> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| RejectReason::Malformed(e.to_string()))?;
        let record = object(&value, "record")?;

        let session = field(record, "session")
            .and_then(id_text)
            .filter(|s| !s.trim().is_empty())
            .ok_or(RejectReason::MissingSession)?;
        let counter = field(record, "counter").ok_or(RejectReason::MissingCounter)?;
        let counter = key(counter, "counter")?;
        let type_name = field(record, "type")
            .map(|value| value.as_str().map_or_else(|| value.to_string(), str::to_owned))
            .ok_or(RejectReason::MissingType)?;
        let event_type =
            EventType::parse(&type_name).ok_or(RejectReason::UnknownType(type_name))?;

        let frame = field(record, "frame").ok_or(RejectReason::MissingFrame)?;
        let frame = object(frame, "frame")?;
        let tic = field(frame, "tic").ok_or(RejectReason::MissingTic)?;
        let tic = key(tic, "frame.tic")?;
        let millis = field(frame, "millis")
            .map(|millis| key(millis, "frame.millis"))
            .transpose()?
            .unwrap_or_default();

        let actor = field(record, "actor").ok_or(RejectReason::MissingActor)?;
        let actor = snapshot(actor, Role::Actor, PositionPolicy::Required)?;
        let target = field(record, "target")
            .map(|target| snapshot(target, Role::Target, self.options.target_position))
            .transpose()?;
        let level = field(record, "level").map(level).transpose()?;

        Ok(TelemetryEvent {
            session: SessionId::new(session),
            counter,
            event_type,
            frame: FrameStamp { tic, millis },
            actor,
            target,
            level,
        })
    }
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

/// A field of `object`, with JSON `null` read as absent.
fn field<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).filter(|value| !value.is_null())
}

fn object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, RejectReason> {
    value
        .as_object()
        .ok_or_else(|| RejectReason::Malformed(format!("{path} is not an object")))
}

/// Identifiers may arrive as JSON strings or numbers.
fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn unsigned(value: &Value) -> Option<u64> {
    match value {
        Value::String(text) => text.trim().parse().ok(),
        Value::Number(number) => number.as_u64(),
        _ => None,
    }
}

fn key(value: &Value, field: &'static str) -> Result<u64, RejectReason> {
    let key = unsigned(value).ok_or(RejectReason::NotAnInteger { field })?;
    if key > MAX_KEY {
        return Err(RejectReason::KeyOutOfRange { field, value: key });
    }
    Ok(key)
}

/// An optional bounded integer that defaults to zero when absent.
fn bounded<T>(object: &Map<String, Value>, path: &str, name: &str) -> Result<T, RejectReason>
where
    T: TryFrom<i64> + Default,
{
    let Some(value) = field(object, name) else {
        return Ok(T::default());
    };
    value
        .as_i64()
        .and_then(|number| T::try_from(number).ok())
        .ok_or_else(|| RejectReason::Malformed(format!("{path}.{name} is out of range")))
}

fn snapshot(value: &Value, role: Role, policy: PositionPolicy) -> Result<ActorSnapshot, RejectReason> {
    let path = role.to_string();
    let actor = object(value, &path)?;
    let id = field(actor, "id")
        .and_then(id_text)
        .filter(|id| !id.is_empty())
        .ok_or(RejectReason::MissingActorId { role })?;

    let position = match (field(actor, "position"), policy) {
        (Some(raw), _) => Some(position(raw, role)?),
        (None, PositionPolicy::Optional) => None,
        (None, PositionPolicy::Required) => {
            return Err(RejectReason::MissingPosition { role });
        }
    };

    Ok(ActorSnapshot {
        id: ActorId::new(id),
        kind: field(actor, "type")
            .and_then(Value::as_str)
            .map_or(ActorKind::UnknownEnemy, ActorKind::parse_lenient),
        position,
        health: bounded(actor, &path, "health")?,
        armor: bounded(actor, &path, "armor")?,
    })
}

fn position(value: &Value, role: Role) -> Result<Position, RejectReason> {
    let path = format!("{role}.position");
    let position = object(value, &path)?;

    let angle: i64 = bounded(position, &path, "angle")?;
    let Ok(angle) = u32::try_from(angle) else {
        return Err(RejectReason::AngleOutOfRange { role, angle });
    };
    let subsector = field(position, "subsector")
        .and_then(unsigned)
        .ok_or(RejectReason::InvalidSubsector { role })?;
    if subsector > MAX_KEY {
        let name = match role {
            Role::Actor => "actor.position.subsector",
            Role::Target => "target.position.subsector",
        };
        return Err(RejectReason::KeyOutOfRange {
            field: name,
            value: subsector,
        });
    }

    Ok(Position {
        x: bounded(position, &path, "x")?,
        y: bounded(position, &path, "y")?,
        z: bounded(position, &path, "z")?,
        angle,
        subsector: SubSectorId(subsector),
    })
}

fn level(value: &Value) -> Result<LevelInfo, RejectReason> {
    let level = object(value, "level")?;
    // Older emitters call the map number `level`.
    let map_key = if field(level, "map").is_some() { "map" } else { "level" };
    Ok(LevelInfo {
        episode: bounded(level, "level", "episode")?,
        map: bounded(level, "level", map_key)?,
        difficulty: bounded(level, "level", "difficulty")?,
    })
}
