//! Type-safe identifier wrappers.
//!
//! Telemetry identifiers arrive as opaque strings or numbers from the
//! simulation and are only meaningful inside a [`SessionId`] scope. The
//! newtypes here keep session, actor, and subsector identifiers from being
//! mixed at compile time. [`BatchId`] is generated locally (UUID v7,
//! time-ordered) to correlate log lines for one batch across retries.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generates a newtype wrapper around [`String`] with standard derives.
macro_rules! define_text_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string-like value.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Return the inner [`String`].
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }
    };
}

define_text_id! {
    /// Identifier of one continuous simulation run. Every other entity is
    /// scoped by it.
    SessionId
}

define_text_id! {
    /// Identifier of a player or non-player actor within a session.
    ActorId
}

/// Identifier of a spatial partition (subsector) within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubSectorId(pub u64);

impl SubSectorId {
    /// Return the inner numeric value.
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for SubSectorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one flushed batch, used for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_ids_compare_by_value() {
        let a = ActorId::new("4350176240");
        let b = ActorId::from("4350176240");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "4350176240");
    }

    #[test]
    fn batch_ids_are_distinct() {
        let first = BatchId::new();
        let second = BatchId::new();
        assert_ne!(first, second);
        assert_eq!(first.into_inner().get_version_num(), 7);
    }

    #[test]
    fn session_id_serializes_transparently() {
        let session = SessionId::new("abc");
        let json = serde_json::to_string(&session).unwrap_or_default();
        assert_eq!(json, "\"abc\"");
    }
}
