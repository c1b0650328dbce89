//! In-memory adapters for `eventgallery`
//!
//! This crate provides in-memory implementations of the `EventStore`,
//! `EventBus` and `Storage` ports, useful for testing and development
//! scenarios where persistence is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use eventgallery::errors::{EventStoreError, EventStoreResult, StorageError, StorageResult};
use eventgallery::event::{DomainEvent, StoredEvent};
use eventgallery::model::StorageLocation;
use eventgallery::storage::Storage;
use eventgallery::store::{EventBus, EventStore, Subscription};
use eventgallery::types::{AggregateRef, AggregateVersion};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

/// Provider name reported in the locations returned by [`MemoryStorage`].
pub const MEMORY_PROVIDER: &str = "memory";

struct Subscriber<E: DomainEvent> {
    kinds: Vec<E::Kind>,
    events: async_channel::Sender<StoredEvent<E>>,
    // Held so the subscription's error channel stays open while subscribed.
    _errors: async_channel::Sender<EventStoreError>,
}

/// Thread-safe in-memory event store and event bus for testing.
///
/// Appended events are published to every live subscriber whose kinds
/// include the event's kind, after the append has been committed.
pub struct InMemoryEventStore<E: DomainEvent> {
    // Maps aggregates to their stored events in version order
    streams: Arc<RwLock<HashMap<AggregateRef, Vec<StoredEvent<E>>>>>,
    subscribers: Arc<Mutex<Vec<Subscriber<E>>>>,
}

impl<E: DomainEvent> Clone for InMemoryEventStore<E> {
    fn clone(&self) -> Self {
        Self {
            streams: Arc::clone(&self.streams),
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E: DomainEvent> InMemoryEventStore<E> {
    /// Create a new empty in-memory event store
    pub fn new() -> Self {
        Self {
            streams: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Current version of an aggregate, `None` if it has no events.
    pub fn version(&self, aggregate: &AggregateRef) -> Option<AggregateVersion> {
        self.streams
            .read()
            .get(aggregate)
            .and_then(|events| events.last())
            .map(|event| event.version)
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| !s.events.is_closed());
        subscribers.len()
    }

    /// Ends every subscription. Their channels close once drained.
    pub fn close_subscriptions(&self) {
        let closed = std::mem::take(&mut *self.subscribers.lock());
        debug!(subscriptions = closed.len(), "closing subscriptions");
    }

    fn publish(&self, events: &[StoredEvent<E>]) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|subscriber| {
            for event in events {
                if !subscriber.kinds.contains(&event.payload.kind()) {
                    continue;
                }
                if subscriber.events.try_send(event.clone()).is_err() {
                    debug!("dropping closed subscription");
                    return false;
                }
            }
            true
        });
    }
}

impl<E: DomainEvent> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DomainEvent> std::fmt::Debug for InMemoryEventStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("streams", &self.streams.read().len())
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

#[async_trait]
impl<E: DomainEvent> EventStore for InMemoryEventStore<E> {
    type Event = E;

    async fn read(&self, aggregate: &AggregateRef) -> EventStoreResult<Vec<StoredEvent<E>>> {
        Ok(self
            .streams
            .read()
            .get(aggregate)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        aggregate: &AggregateRef,
        expected: AggregateVersion,
        events: Vec<E>,
    ) -> EventStoreResult<AggregateVersion> {
        let written = {
            let mut streams = self.streams.write();
            let stream = streams.entry(aggregate.clone()).or_default();

            let current = stream
                .last()
                .map_or_else(AggregateVersion::initial, |event| event.version);
            if current != expected {
                return Err(EventStoreError::VersionConflict {
                    aggregate: aggregate.clone(),
                    expected,
                    current,
                });
            }

            let mut version = current;
            let written: Vec<_> = events
                .into_iter()
                .map(|payload| {
                    version = version.next();
                    StoredEvent::new(aggregate.clone(), version, payload)
                })
                .collect();
            stream.extend(written.iter().cloned());
            written
        };

        let version = written.last().map_or(expected, |event| event.version);
        debug!(%aggregate, %version, events = written.len(), "appended events");
        self.publish(&written);
        Ok(version)
    }
}

#[async_trait]
impl<E: DomainEvent> EventBus for InMemoryEventStore<E> {
    type Event = E;

    async fn subscribe(&self, kinds: &[E::Kind]) -> EventStoreResult<Subscription<E>> {
        let (events_tx, events) = async_channel::unbounded();
        let (errors_tx, errors) = async_channel::unbounded();
        self.subscribers.lock().push(Subscriber {
            kinds: kinds.to_vec(),
            events: events_tx,
            _errors: errors_tx,
        });
        debug!(?kinds, "subscribed");
        Ok(Subscription { events, errors })
    }
}

/// In-memory content storage.
///
/// Every path is stored below `prefix`. Clones share their files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    prefix: String,
    files: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    /// Creates an empty storage rooted at `prefix`.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            files: Arc::default(),
        }
    }

    /// Full keys of all stored files, sorted.
    pub fn files(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Bytes stored at `path`, relative to the prefix.
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(&self.key(path)).cloned()
    }

    fn key(&self, path: &str) -> String {
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.prefix.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> StorageResult<StorageLocation> {
        let key = self.key(path);
        debug!(%key, size = bytes.len(), "storing file");
        self.files.write().insert(key.clone(), bytes);
        Ok(StorageLocation {
            provider: MEMORY_PROVIDER.to_string(),
            path: key,
        })
    }

    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        self.file(path).ok_or_else(|| StorageError::NotFound {
            path: path.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventgallery::event::{EventKind, GalleryEvent};
    use eventgallery::model::{Image, Stack, Variant};
    use proptest::prelude::*;
    use uuid::Uuid;

    type Event = GalleryEvent<String, String>;

    fn gallery() -> AggregateRef {
        AggregateRef::gallery(Uuid::now_v7())
    }

    fn stack_added(id: &str) -> Event {
        GalleryEvent::StackAdded {
            stack: Stack {
                id: id.to_string(),
                variants: vec![Variant::original("o".to_string(), Image::default())],
                tags: eventgallery::model::Tags::default(),
            },
        }
    }

    #[tokio::test]
    async fn test_new_store_is_empty() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let aggregate = gallery();
        assert!(store.read(&aggregate).await.unwrap().is_empty());
        assert_eq!(store.version(&aggregate), None);
    }

    #[tokio::test]
    async fn test_clone_shares_storage() {
        let store1: InMemoryEventStore<Event> = InMemoryEventStore::new();
        #[allow(clippy::redundant_clone)]
        let store2 = store1.clone();

        assert!(Arc::ptr_eq(&store1.streams, &store2.streams));
        assert!(Arc::ptr_eq(&store1.subscribers, &store2.subscribers));
    }

    #[tokio::test]
    async fn test_append_assigns_consecutive_versions() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let aggregate = gallery();

        let version = store
            .append(
                &aggregate,
                AggregateVersion::initial(),
                vec![stack_added("a"), GalleryEvent::Cleared],
            )
            .await
            .unwrap();
        assert_eq!(version, AggregateVersion::new(2));

        let events = store.read(&aggregate).await.unwrap();
        let versions: Vec<u64> = events.iter().map(|e| e.version.into()).collect();
        assert_eq!(versions, [1, 2]);
        assert!(events.iter().all(|e| e.aggregate == aggregate));
    }

    #[tokio::test]
    async fn test_concurrency_control() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let aggregate = gallery();

        store
            .append(&aggregate, AggregateVersion::initial(), vec![stack_added("a")])
            .await
            .unwrap();

        // Stale writer still at version 0
        let result = store
            .append(&aggregate, AggregateVersion::initial(), vec![stack_added("b")])
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::VersionConflict { current, .. })
                if current == AggregateVersion::new(1)
        ));
        assert_eq!(store.read(&aggregate).await.unwrap().len(), 1);

        let result = store
            .append(&aggregate, AggregateVersion::new(1), vec![stack_added("b")])
            .await;
        assert_eq!(result.unwrap(), AggregateVersion::new(2));
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let first = gallery();
        let second = gallery();

        store
            .append(&first, AggregateVersion::initial(), vec![stack_added("a")])
            .await
            .unwrap();

        assert!(store.read(&second).await.unwrap().is_empty());
        store
            .append(&second, AggregateVersion::initial(), vec![stack_added("a")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_subscribers_only_receive_their_kinds() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let subscription = store.subscribe(&[EventKind::StackAdded]).await.unwrap();
        let aggregate = gallery();

        store
            .append(
                &aggregate,
                AggregateVersion::initial(),
                vec![stack_added("a"), GalleryEvent::Cleared, stack_added("b")],
            )
            .await
            .unwrap();

        let first = subscription.events.recv().await.unwrap();
        let second = subscription.events.recv().await.unwrap();
        assert_eq!(first.version, AggregateVersion::new(1));
        assert_eq!(second.version, AggregateVersion::new(3));
        assert!(subscription.events.is_empty());
    }

    #[tokio::test]
    async fn test_rejected_appends_are_not_published() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let subscription = store.subscribe(&[EventKind::StackAdded]).await.unwrap();
        let aggregate = gallery();

        let _ = store
            .append(&aggregate, AggregateVersion::new(3), vec![stack_added("a")])
            .await;
        assert!(subscription.events.is_empty());
    }

    #[tokio::test]
    async fn test_closing_subscriptions_closes_channels() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        let subscription = store.subscribe(&[EventKind::StackAdded]).await.unwrap();
        assert_eq!(store.subscriber_count(), 1);

        store.close_subscriptions();

        assert!(subscription.events.recv().await.is_err());
        assert!(subscription.errors.recv().await.is_err());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscriptions_are_pruned() {
        let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
        drop(store.subscribe(&[EventKind::StackAdded]).await.unwrap());
        assert_eq!(store.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_round_trips_under_prefix() {
        let storage = MemoryStorage::new("uploads");
        let location = storage.put("g/s/v/a.png", vec![1, 2, 3]).await.unwrap();

        assert_eq!(location.provider, MEMORY_PROVIDER);
        assert_eq!(location.path, "uploads/g/s/v/a.png");
        assert_eq!(storage.get("g/s/v/a.png").await.unwrap(), [1, 2, 3]);
        assert_eq!(storage.files(), ["uploads/g/s/v/a.png"]);
    }

    #[tokio::test]
    async fn test_storage_reports_missing_files() {
        let storage = MemoryStorage::new("");
        assert!(matches!(
            storage.get("nope").await,
            Err(StorageError::NotFound { path }) if path == "nope"
        ));
    }

    proptest! {
        #[test]
        fn appended_batches_number_versions_consecutively(
            batches in prop::collection::vec(1usize..5, 1..8),
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let (versions, current) = runtime.block_on(async {
                let store: InMemoryEventStore<Event> = InMemoryEventStore::new();
                let aggregate = gallery();
                let mut expected = AggregateVersion::initial();
                for (batch, size) in batches.iter().enumerate() {
                    let events = (0..*size)
                        .map(|i| stack_added(&format!("{batch}-{i}")))
                        .collect();
                    expected = store.append(&aggregate, expected, events).await.unwrap();
                }
                let versions: Vec<u64> = store
                    .read(&aggregate)
                    .await
                    .unwrap()
                    .iter()
                    .map(|e| e.version.into())
                    .collect();
                (versions, store.version(&aggregate))
            });

            let total = batches.iter().sum::<usize>() as u64;
            prop_assert_eq!(versions, (1..=total).collect::<Vec<_>>());
            prop_assert_eq!(current, Some(AggregateVersion::new(total)));
        }
    }
}
