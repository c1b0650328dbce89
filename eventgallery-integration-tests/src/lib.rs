//! Integration test support for `eventgallery`
//!
//! Fixtures wiring the gallery, the in-memory adapters and the processor
//! together, plus store wrappers that count calls and inject concurrency
//! conflicts.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eventgallery::encoding::Encoder;
use eventgallery::errors::{EventStoreError, EventStoreResult};
use eventgallery::pipeline::Pipeline;
use eventgallery::store::{GalleryFetcher, GallerySaver};
use eventgallery::upload::Uploader;
use eventgallery::{
    AggregateRef, GalleryAggregate, GalleryEvent, GalleryRepository, PostProcessor, Processor,
    Stack,
};
use eventgallery_memory::{InMemoryEventStore, MemoryStorage};
use image::{ImageFormat, Rgb, RgbImage};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Gallery event with string ids.
pub type Event = GalleryEvent<String, String>;

/// Gallery aggregate with string ids.
pub type Aggregate = GalleryAggregate<String, String>;

/// The in-memory store used by every fixture.
pub type Store = InMemoryEventStore<Event>;

/// Boxed error for fixture helpers.
pub type FixtureError = Box<dyn std::error::Error + Send + Sync>;

/// File name given to uploaded originals.
pub const ORIGINAL_FILENAME: &str = "photo.png";

/// Installs a test tracing subscriber honouring `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Encodes a gradient of the given size as PNG.
pub fn png(width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    #[allow(clippy::cast_possible_truncation)]
    let image = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}

/// A gallery backed by in-memory adapters.
#[derive(Debug, Clone)]
pub struct Fixture {
    /// Event store and bus.
    pub store: Arc<Store>,
    /// Content storage.
    pub storage: MemoryStorage,
    /// Repository over `store`.
    pub repository: GalleryRepository<Store>,
    /// Uploader writing to `storage`.
    pub uploader: Uploader,
    /// The gallery under test.
    pub gallery: AggregateRef,
}

impl Fixture {
    /// Creates an empty gallery whose files live under `prefix`.
    pub fn new(prefix: &str) -> Self {
        let store = Arc::new(Store::new());
        let storage = MemoryStorage::new(prefix);
        Self {
            repository: GalleryRepository::new(Arc::clone(&store)),
            uploader: Uploader::new(Arc::new(storage.clone())),
            store,
            storage,
            gallery: AggregateRef::gallery(Uuid::now_v7()),
        }
    }

    /// A processor using the default encoders and fresh UUIDs for new variants.
    pub fn processor(&self) -> Processor<String> {
        Processor::new(
            Arc::new(Encoder::with_defaults()),
            Arc::new(self.storage.clone()),
            self.uploader.clone(),
            || Uuid::now_v7().to_string(),
        )
    }

    /// A post-processor publishing results only.
    pub fn post_processor<P: Pipeline + 'static>(
        &self,
        pipeline: P,
    ) -> PostProcessor<Aggregate, String, String> {
        PostProcessor::new(
            self.processor(),
            Arc::clone(&self.store),
            self.repository.clone(),
            pipeline,
        )
    }

    /// Loads the gallery from the store.
    pub async fn fetch(&self) -> EventStoreResult<Aggregate> {
        self.repository.fetch(&self.gallery).await
    }

    /// Uploads a `width` x `height` PNG as the original of a new stack and
    /// saves the gallery, publishing `StackAdded`.
    pub async fn upload_stack(
        &self,
        stack_id: &str,
        width: u32,
        height: u32,
    ) -> Result<Stack<String, String>, FixtureError> {
        let mut stacks = self.upload_stacks(&[stack_id], width, height).await?;
        stacks.pop().ok_or_else(|| "no stack uploaded".into())
    }

    /// Uploads several stacks and saves them with a single append.
    pub async fn upload_stacks(
        &self,
        stack_ids: &[&str],
        width: u32,
        height: u32,
    ) -> Result<Vec<Stack<String, String>>, FixtureError> {
        let mut gallery = self.fetch().await?;
        let mut stacks = Vec::with_capacity(stack_ids.len());
        for stack_id in stack_ids {
            let stack = self
                .uploader
                .upload_new(
                    &mut gallery,
                    (*stack_id).to_string(),
                    format!("{stack_id}-original"),
                    png(width, height)?,
                    ORIGINAL_FILENAME,
                )
                .await?;
            stacks.push(stack);
        }
        self.repository.save(&mut gallery).await?;
        Ok(stacks)
    }
}

/// Wraps a repository, counting fetches and saves and failing the first
/// `conflicts` saves with a version conflict.
#[derive(Debug)]
pub struct FlakyRepository<R> {
    inner: R,
    gallery: AggregateRef,
    conflicts: Arc<AtomicU32>,
    fetches: Arc<AtomicUsize>,
    saves: Arc<AtomicUsize>,
}

impl<R: Clone> Clone for FlakyRepository<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            gallery: self.gallery.clone(),
            conflicts: Arc::clone(&self.conflicts),
            fetches: Arc::clone(&self.fetches),
            saves: Arc::clone(&self.saves),
        }
    }
}

impl<R> FlakyRepository<R> {
    /// Wraps `inner`; the first `conflicts` saves fail.
    pub fn new(inner: R, gallery: AggregateRef, conflicts: u32) -> Self {
        Self {
            inner,
            gallery,
            conflicts: Arc::new(AtomicU32::new(conflicts)),
            fetches: Arc::new(AtomicUsize::new(0)),
            saves: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of fetches so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of save attempts so far, including failed ones.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<G, R> GalleryFetcher<G> for FlakyRepository<R>
where
    R: GalleryFetcher<G>,
{
    async fn fetch(&self, aggregate: &AggregateRef) -> EventStoreResult<G> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(aggregate).await
    }
}

#[async_trait]
impl<G, R> GallerySaver<G> for FlakyRepository<R>
where
    G: Send,
    R: GallerySaver<G>,
{
    async fn save(&self, gallery: &mut G) -> EventStoreResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let conflicted = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if conflicted {
            return Err(EventStoreError::VersionConflict {
                aggregate: self.gallery.clone(),
                expected: eventgallery::AggregateVersion::initial(),
                current: eventgallery::AggregateVersion::initial().next(),
            });
        }
        self.inner.save(gallery).await
    }
}
