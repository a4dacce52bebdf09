//! Identifier allocation
//!
//! Every tracked entity gets an id of the form `"{kind}#{n}"` where `n` is
//! monotonic per kind, starting at 0. Ids are never reused within a process;
//! `reset` exists only so tests can start from a clean counter table.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Discriminates the entity kinds tracked by the instrumentation core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdKind {
    /// A stream object
    Stream,
    /// An active or archived subscription
    Subscription,
    /// One "compose N transforms" call
    Composition,
    /// One transform instance within a composition
    Transform,
    /// A transform factory (`map`, `switch_map`, ...)
    TransformFactory,
    /// A combinator-argument relationship
    Relationship,
    /// A combinator argument binding
    Argument,
    /// An invocation of a function-valued argument
    Invocation,
    /// A delivered element
    Emission,
    /// A delivered error
    ErrorEvent,
    /// A stable wrapper
    Wrapper,
    /// A module session pass
    Session,
}

impl IdKind {
    /// All kinds, in counter-table order.
    pub const ALL: [IdKind; 12] = [
        IdKind::Stream,
        IdKind::Subscription,
        IdKind::Composition,
        IdKind::Transform,
        IdKind::TransformFactory,
        IdKind::Relationship,
        IdKind::Argument,
        IdKind::Invocation,
        IdKind::Emission,
        IdKind::ErrorEvent,
        IdKind::Wrapper,
        IdKind::Session,
    ];

    /// Stable string form used in id rendering and the event channel.
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Stream => "stream",
            IdKind::Subscription => "subscription",
            IdKind::Composition => "composition",
            IdKind::Transform => "transform",
            IdKind::TransformFactory => "transform-factory",
            IdKind::Relationship => "relationship",
            IdKind::Argument => "argument",
            IdKind::Invocation => "invocation",
            IdKind::Emission => "emission",
            IdKind::ErrorEvent => "error",
            IdKind::Wrapper => "wrapper",
            IdKind::Session => "session",
        }
    }

    /// Parse the stable string form back into a kind.
    pub fn parse(s: &str) -> Option<IdKind> {
        IdKind::ALL.iter().copied().find(|k| k.as_str() == s)
    }

    fn index(&self) -> usize {
        match self {
            IdKind::Stream => 0,
            IdKind::Subscription => 1,
            IdKind::Composition => 2,
            IdKind::Transform => 3,
            IdKind::TransformFactory => 4,
            IdKind::Relationship => 5,
            IdKind::Argument => 6,
            IdKind::Invocation => 7,
            IdKind::Emission => 8,
            IdKind::ErrorEvent => 9,
            IdKind::Wrapper => 10,
            IdKind::Session => 11,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for IdKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for IdKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        IdKind::parse(&s).ok_or_else(|| de::Error::custom(format!("unknown entity kind: {s}")))
    }
}

/// Identifier of a tracked entity: a kind plus a per-kind sequence number.
///
/// Renders as `"{kind}#{n}"`, which is also its serialized form on the
/// event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    kind: IdKind,
    seq: u64,
}

impl EntityId {
    /// Build an id from its parts.
    pub fn new(kind: IdKind, seq: u64) -> Self {
        Self { kind, seq }
    }

    /// The entity kind.
    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// The per-kind sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.seq)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, seq) = s
            .rsplit_once('#')
            .ok_or_else(|| Error::InvalidId(s.to_string()))?;
        let kind = IdKind::parse(kind).ok_or_else(|| Error::InvalidId(s.to_string()))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| Error::InvalidId(s.to_string()))?;
        Ok(EntityId::new(kind, seq))
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = EntityId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an entity id of the form \"kind#n\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<EntityId, E> {
                v.parse().map_err(|_| E::custom(format!("bad id: {v}")))
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

/// Monotonic per-kind id allocator.
///
/// Plain state with no interior locking; wrap in [`SharedAllocator`] when a
/// single table is shared across components.
#[derive(Debug, Default)]
pub struct IdAllocator {
    counters: [u64; IdKind::ALL.len()],
}

impl IdAllocator {
    /// Create an allocator with all counters at 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `kind`.
    pub fn next(&mut self, kind: IdKind) -> EntityId {
        let slot = &mut self.counters[kind.index()];
        let seq = *slot;
        *slot += 1;
        EntityId::new(kind, seq)
    }

    /// Number of ids handed out so far for `kind`.
    pub fn allocated(&self, kind: IdKind) -> u64 {
        self.counters[kind.index()]
    }

    /// Test-only: destroy all counter state, restarting every kind at 0.
    pub fn reset(&mut self) {
        self.counters = [0; IdKind::ALL.len()];
    }
}

/// Process-shared handle over one [`IdAllocator`].
///
/// Every component that mints ids holds a clone of this handle so a single
/// counter table governs the whole tracking context.
#[derive(Debug, Clone, Default)]
pub struct SharedAllocator {
    inner: Arc<Mutex<IdAllocator>>,
}

impl SharedAllocator {
    /// Create a fresh shared counter table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next id for `kind`.
    pub fn next(&self, kind: IdKind) -> EntityId {
        self.inner.lock().next(kind)
    }

    /// Number of ids handed out so far for `kind`.
    pub fn allocated(&self, kind: IdKind) -> u64 {
        self.inner.lock().allocated(kind)
    }

    /// Test-only: destroy all counter state.
    pub fn reset(&self) {
        self.inner.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_monotonic_per_kind() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.next(IdKind::Stream).to_string(), "stream#0");
        assert_eq!(alloc.next(IdKind::Stream).to_string(), "stream#1");
        // An unrelated kind does not disturb the stream counter.
        assert_eq!(alloc.next(IdKind::Subscription).to_string(), "subscription#0");
        assert_eq!(alloc.next(IdKind::Stream).to_string(), "stream#2");
    }

    #[test]
    fn test_reset_restarts_counters() {
        let mut alloc = IdAllocator::new();
        alloc.next(IdKind::Wrapper);
        alloc.next(IdKind::Wrapper);
        alloc.reset();
        assert_eq!(alloc.next(IdKind::Wrapper).seq(), 0);
    }

    #[test]
    fn test_display_round_trip() {
        let id = EntityId::new(IdKind::TransformFactory, 17);
        let rendered = id.to_string();
        assert_eq!(rendered, "transform-factory#17");
        let parsed: EntityId = rendered.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<EntityId>().is_err());
        assert!("stream".parse::<EntityId>().is_err());
        assert!("stream#".parse::<EntityId>().is_err());
        assert!("nope#4".parse::<EntityId>().is_err());
        assert!("stream#abc".parse::<EntityId>().is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let id = EntityId::new(IdKind::Stream, 3);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"stream#3\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_shared_allocator_single_table() {
        let shared = SharedAllocator::new();
        let other = shared.clone();
        shared.next(IdKind::Stream);
        assert_eq!(other.next(IdKind::Stream).seq(), 1);
        assert_eq!(shared.allocated(IdKind::Stream), 2);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Every id survives a render/parse round trip.
            #[test]
            fn display_parse_round_trip(
                kind in prop::sample::select(IdKind::ALL.to_vec()),
                seq in any::<u64>(),
            ) {
                let id = EntityId::new(kind, seq);
                let parsed: EntityId = id.to_string().parse().unwrap();
                prop_assert_eq!(parsed, id);
            }
        }
    }
}
