//! Ports to the event log and to whatever loads and persists galleries.
//!
//! The traits here are the seams between the gallery logic and its
//! infrastructure. `eventgallery-memory` provides in-memory implementations.

use crate::errors::{EventStoreError, EventStoreResult};
use crate::event::{DomainEvent, StoredEvent};
use crate::types::{AggregateRef, AggregateVersion};
use async_trait::async_trait;
use std::sync::Arc;

/// Append-only event log with optimistic concurrency per aggregate.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The event type this store handles.
    type Event: DomainEvent;

    /// Reads every event of an aggregate in version order.
    ///
    /// An aggregate without events yields an empty list.
    async fn read(
        &self,
        aggregate: &AggregateRef,
    ) -> EventStoreResult<Vec<StoredEvent<Self::Event>>>;

    /// Appends events to an aggregate's stream.
    ///
    /// `expected` is the version the writer based its changes on. If the
    /// stream has moved on, nothing is written and
    /// [`EventStoreError::VersionConflict`] is returned.
    ///
    /// Returns the stream's version after the append.
    async fn append(
        &self,
        aggregate: &AggregateRef,
        expected: AggregateVersion,
        events: Vec<Self::Event>,
    ) -> EventStoreResult<AggregateVersion>;
}

/// Live delivery of appended events.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// The event type delivered by this bus.
    type Event: DomainEvent;

    /// Subscribes to events of the given kinds.
    ///
    /// The subscription ends when both of its channels close.
    async fn subscribe(
        &self,
        kinds: &[<Self::Event as DomainEvent>::Kind],
    ) -> EventStoreResult<Subscription<Self::Event>>;
}

/// The receiving ends of a subscription.
///
/// `events` may be shared by several consumers; each event is delivered to
/// exactly one of them.
#[derive(Debug)]
pub struct Subscription<E> {
    /// Delivered events.
    pub events: async_channel::Receiver<StoredEvent<E>>,
    /// Delivery errors.
    pub errors: async_channel::Receiver<EventStoreError>,
}

/// Loads a gallery aggregate by reference.
#[async_trait]
pub trait GalleryFetcher<G>: Send + Sync {
    /// Fetches a fresh instance of the aggregate.
    async fn fetch(&self, aggregate: &AggregateRef) -> EventStoreResult<G>;
}

/// Persists the uncommitted changes of a gallery aggregate.
#[async_trait]
pub trait GallerySaver<G>: Send + Sync {
    /// Saves the aggregate.
    ///
    /// Must fail with an error for which
    /// [`EventStoreError::is_concurrency_conflict`] holds when the aggregate
    /// was modified since it was fetched.
    async fn save(&self, gallery: &mut G) -> EventStoreResult<()>;
}

#[async_trait]
impl<G, T> GalleryFetcher<G> for Arc<T>
where
    T: GalleryFetcher<G> + ?Sized,
{
    async fn fetch(&self, aggregate: &AggregateRef) -> EventStoreResult<G> {
        (**self).fetch(aggregate).await
    }
}

#[async_trait]
impl<G, T> GallerySaver<G> for Arc<T>
where
    G: Send,
    T: GallerySaver<G> + ?Sized,
{
    async fn save(&self, gallery: &mut G) -> EventStoreResult<()> {
        (**self).save(gallery).await
    }
}
