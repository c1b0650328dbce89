//! Loading and saving gallery aggregates through an [`EventStore`].

use crate::aggregate::GalleryAggregate;
use crate::errors::{EventStoreError, EventStoreResult};
use crate::event::GalleryEvent;
use crate::model::Id;
use crate::store::{EventStore, GalleryFetcher, GallerySaver};
use crate::types::AggregateRef;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Repository of gallery aggregates backed by an event store.
///
/// Fetching replays the aggregate's stream. Saving appends the uncommitted
/// changes at the aggregate's version and commits them.
#[derive(Debug)]
pub struct GalleryRepository<St> {
    store: Arc<St>,
}

impl<St> Clone for GalleryRepository<St> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<St> GalleryRepository<St> {
    /// Creates a repository over `store`.
    pub const fn new(store: Arc<St>) -> Self {
        Self { store }
    }

    /// The underlying store.
    pub const fn store(&self) -> &Arc<St> {
        &self.store
    }
}

#[async_trait]
impl<S, I, St> GalleryFetcher<GalleryAggregate<S, I>> for GalleryRepository<St>
where
    S: Id,
    I: Id,
    St: EventStore<Event = GalleryEvent<S, I>>,
{
    #[instrument(skip(self), fields(aggregate = %aggregate))]
    async fn fetch(&self, aggregate: &AggregateRef) -> EventStoreResult<GalleryAggregate<S, I>> {
        let events = self.store.read(aggregate).await?;
        debug!(events = events.len(), "replaying gallery");
        GalleryAggregate::replay(aggregate.clone(), events)
            .map_err(|err| EventStoreError::Internal(format!("replay {aggregate}: {err}")))
    }
}

#[async_trait]
impl<S, I, St> GallerySaver<GalleryAggregate<S, I>> for GalleryRepository<St>
where
    S: Id,
    I: Id,
    St: EventStore<Event = GalleryEvent<S, I>>,
{
    #[instrument(
        skip_all,
        fields(aggregate = %gallery.aggregate_ref(), version = %gallery.version())
    )]
    async fn save(&self, gallery: &mut GalleryAggregate<S, I>) -> EventStoreResult<()> {
        if gallery.changes().is_empty() {
            return Ok(());
        }
        let version = self
            .store
            .append(
                gallery.aggregate_ref(),
                gallery.version(),
                gallery.changes().to_vec(),
            )
            .await?;
        gallery.commit();
        debug!(%version, "gallery saved");
        Ok(())
    }
}
