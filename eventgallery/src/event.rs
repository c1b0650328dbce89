//! Gallery events.
//!
//! [`EventKind`] is the single table of event names. The same names are used
//! as the `type` tag of a serialized [`GalleryEvent`] and as the routing key
//! for subscriptions.

use crate::model::{Stack, Tags, Variant};
use crate::types::{AggregateRef, AggregateVersion, EventId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// An event payload that knows its own kind.
pub trait DomainEvent: Clone + Debug + Send + Sync + 'static {
    /// The routing key type of this event family.
    type Kind: Copy + Eq + Debug + Send + Sync + 'static;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Every kind of gallery event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// A stack was created.
    StackAdded,
    /// A stack was removed.
    StackRemoved,
    /// All non-original variants of a stack were removed.
    StackCleared,
    /// A variant was added to a stack.
    VariantAdded,
    /// Several variants were added to a stack at once.
    VariantsAdded,
    /// A variant was removed from a stack.
    VariantRemoved,
    /// A variant was replaced.
    VariantReplaced,
    /// Tags were added to a stack.
    StackTagged,
    /// Tags were removed from a stack.
    StackUntagged,
    /// The stacks were reordered.
    Sorted,
    /// All stacks were removed.
    Cleared,
    /// A stack was marked as processed.
    StackProcessed,
}

impl EventKind {
    /// Every event kind.
    pub const ALL: [Self; 12] = [
        Self::StackAdded,
        Self::StackRemoved,
        Self::StackCleared,
        Self::VariantAdded,
        Self::VariantsAdded,
        Self::VariantRemoved,
        Self::VariantReplaced,
        Self::StackTagged,
        Self::StackUntagged,
        Self::Sorted,
        Self::Cleared,
        Self::StackProcessed,
    ];

    /// Kinds that trigger post-processing.
    pub const PROCESSOR_TRIGGERS: &'static [Self] = &[Self::StackAdded];

    /// The stable name of this kind.
    pub const fn name(self) -> &'static str {
        match self {
            Self::StackAdded => "gallery.stack_added",
            Self::StackRemoved => "gallery.stack_removed",
            Self::StackCleared => "gallery.stack_cleared",
            Self::VariantAdded => "gallery.variant_added",
            Self::VariantsAdded => "gallery.variants_added",
            Self::VariantRemoved => "gallery.variant_removed",
            Self::VariantReplaced => "gallery.variant_replaced",
            Self::StackTagged => "gallery.stack_tagged",
            Self::StackUntagged => "gallery.stack_untagged",
            Self::Sorted => "gallery.sorted",
            Self::Cleared => "gallery.cleared",
            Self::StackProcessed => "gallery.stack_processed",
        }
    }

    /// Looks up a kind by its stable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Payload of a gallery event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GalleryEvent<S, I> {
    /// A stack was created.
    #[serde(rename = "gallery.stack_added")]
    StackAdded {
        /// The created stack.
        stack: Stack<S, I>,
    },
    /// A stack was removed.
    #[serde(rename = "gallery.stack_removed")]
    StackRemoved {
        /// Id of the removed stack.
        stack_id: S,
    },
    /// All non-original variants of a stack were removed.
    #[serde(rename = "gallery.stack_cleared")]
    StackCleared {
        /// Id of the cleared stack.
        stack_id: S,
    },
    /// A variant was added.
    #[serde(rename = "gallery.variant_added")]
    VariantAdded {
        /// Id of the stack.
        stack_id: S,
        /// The added variant.
        variant: Variant<I>,
    },
    /// Several variants were added.
    #[serde(rename = "gallery.variants_added")]
    VariantsAdded {
        /// Id of the stack.
        stack_id: S,
        /// The added variants, in order.
        variants: Vec<Variant<I>>,
    },
    /// A variant was removed.
    #[serde(rename = "gallery.variant_removed")]
    VariantRemoved {
        /// Id of the stack.
        stack_id: S,
        /// Id of the removed variant.
        variant_id: I,
    },
    /// A variant was replaced.
    #[serde(rename = "gallery.variant_replaced")]
    VariantReplaced {
        /// Id of the stack.
        stack_id: S,
        /// The replacement.
        variant: Variant<I>,
    },
    /// Tags were added to a stack.
    #[serde(rename = "gallery.stack_tagged")]
    StackTagged {
        /// Id of the stack.
        stack_id: S,
        /// The added tags.
        tags: Tags,
    },
    /// Tags were removed from a stack.
    #[serde(rename = "gallery.stack_untagged")]
    StackUntagged {
        /// Id of the stack.
        stack_id: S,
        /// The removed tags.
        tags: Tags,
    },
    /// The stacks were reordered. `order` only names existing stacks.
    #[serde(rename = "gallery.sorted")]
    Sorted {
        /// Stack ids to move to the front.
        order: Vec<S>,
    },
    /// All stacks were removed.
    #[serde(rename = "gallery.cleared")]
    Cleared,
    /// A stack was marked as processed.
    #[serde(rename = "gallery.stack_processed")]
    StackProcessed {
        /// Id of the stack.
        stack_id: S,
    },
}

impl<S, I> GalleryEvent<S, I> {
    /// The kind of this event.
    pub const fn event_kind(&self) -> EventKind {
        match self {
            Self::StackAdded { .. } => EventKind::StackAdded,
            Self::StackRemoved { .. } => EventKind::StackRemoved,
            Self::StackCleared { .. } => EventKind::StackCleared,
            Self::VariantAdded { .. } => EventKind::VariantAdded,
            Self::VariantsAdded { .. } => EventKind::VariantsAdded,
            Self::VariantRemoved { .. } => EventKind::VariantRemoved,
            Self::VariantReplaced { .. } => EventKind::VariantReplaced,
            Self::StackTagged { .. } => EventKind::StackTagged,
            Self::StackUntagged { .. } => EventKind::StackUntagged,
            Self::Sorted { .. } => EventKind::Sorted,
            Self::Cleared => EventKind::Cleared,
            Self::StackProcessed { .. } => EventKind::StackProcessed,
        }
    }
}

impl<S, I> DomainEvent for GalleryEvent<S, I>
where
    S: Clone + Debug + Send + Sync + 'static,
    I: Clone + Debug + Send + Sync + 'static,
{
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        self.event_kind()
    }
}

/// An event as recorded in the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent<E> {
    /// Unique id of the event.
    pub event_id: EventId,
    /// The aggregate the event belongs to.
    pub aggregate: AggregateRef,
    /// Version of the aggregate after this event.
    pub version: AggregateVersion,
    /// When the event was recorded.
    pub timestamp: Timestamp,
    /// The event payload.
    pub payload: E,
}

impl<E> StoredEvent<E> {
    /// Records `payload` as the event that moved `aggregate` to `version`.
    pub fn new(aggregate: AggregateRef, version: AggregateVersion, payload: E) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate,
            version,
            timestamp: Timestamp::now(),
            payload,
        }
    }
}

impl<E: DomainEvent> StoredEvent<E> {
    /// The kind of the payload.
    pub fn kind(&self) -> E::Kind {
        self.payload.kind()
    }
}
