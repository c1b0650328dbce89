//! Core types for recording gallery events.
//!
//! Event ids, aggregate versions and timestamps use smart constructors so that
//! an instance is always valid once it exists.

use chrono::{DateTime, Utc};
use nutype::nutype;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a gallery aggregate.
pub type AggregateId = Uuid;

/// Default aggregate name used for galleries.
pub const GALLERY_AGGREGATE: &str = "gallery";

/// A globally unique event identifier using UUIDv7 format.
///
/// `EventId` values are guaranteed to be UUIDv7, so ids created in sequence
/// sort in creation order.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new `EventId` with the current timestamp.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// The version of a gallery aggregate: the number of events in its stream.
///
/// A freshly created aggregate is at version 0; every committed event
/// advances the version by one.
#[nutype(
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct AggregateVersion(u64);

impl AggregateVersion {
    /// The version of an aggregate without any events.
    pub fn initial() -> Self {
        Self::new(0)
    }

    /// Returns the next version after this one.
    #[must_use]
    pub fn next(self) -> Self {
        self.advanced_by(1)
    }

    /// Returns this version advanced by `count` events.
    #[must_use]
    pub fn advanced_by(self, count: usize) -> Self {
        let current: u64 = self.into();
        Self::new(current + count as u64)
    }
}

impl Default for AggregateVersion {
    fn default() -> Self {
        Self::initial()
    }
}

/// A timestamp for when an event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Reference to an aggregate instance: its name and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateRef {
    /// Aggregate name, e.g. `"gallery"`.
    pub name: String,
    /// Aggregate id.
    pub id: AggregateId,
}

impl AggregateRef {
    /// Creates a reference from a name and an id.
    pub fn new(name: impl Into<String>, id: AggregateId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }

    /// Reference to a gallery aggregate with the default name.
    pub fn gallery(id: AggregateId) -> Self {
        Self::new(GALLERY_AGGREGATE, id)
    }
}

impl std::fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}
