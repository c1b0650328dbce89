//! Post-processing of a single stack.
//!
//! [`Processor::process`] reads a stack's original from storage, runs a
//! [`Pipeline`] on it and uploads every output. The returned
//! [`ProcessorResult`] is applied to a gallery separately, through the
//! gallery's own mutators, with [`ProcessorResult::apply`].

use crate::aggregate::GalleryAggregate;
use crate::encoding::{detect_content_type, Encoding};
use crate::errors::{ApplyError, GalleryError, GalleryResult, ProcessorError};
use crate::event::{GalleryEvent, StoredEvent};
use crate::model::{Id, Stack, Tags, Variant, PROCESSED_TAG};
use crate::pipeline::{Metadata, Pipeline};
use crate::storage::{variant_path, Storage};
use crate::types::AggregateRef;
use crate::upload::Uploader;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// The gallery operations needed to upload, process and apply results.
pub trait ProcessableGallery<S, I>: Send {
    /// Reference to the gallery aggregate.
    fn aggregate_ref(&self) -> &AggregateRef;

    /// The stack with the given id.
    fn stack(&self, id: &S) -> Option<&Stack<S, I>>;

    /// Creates a stack.
    fn new_stack(&mut self, id: S, original: Variant<I>) -> GalleryResult<Stack<S, I>>;

    /// Removes every non-original variant of a stack.
    fn clear_stack(&mut self, id: &S) -> GalleryResult<Stack<S, I>>;

    /// Replaces the variant with the same id.
    fn replace_variant(&mut self, id: &S, variant: Variant<I>) -> GalleryResult<Stack<S, I>>;

    /// Adds a variant.
    fn add_variant(&mut self, id: &S, variant: Variant<I>) -> GalleryResult<Stack<S, I>>;

    /// Adds tags to a stack.
    fn tag(&mut self, id: &S, tags: &[&str]) -> GalleryResult<Stack<S, I>>;

    /// Marks a stack as processed.
    fn mark_as_processed(&mut self, id: &S) -> GalleryResult<bool>;
}

impl<S: Id, I: Id> ProcessableGallery<S, I> for GalleryAggregate<S, I> {
    fn aggregate_ref(&self) -> &AggregateRef {
        Self::aggregate_ref(self)
    }

    fn stack(&self, id: &S) -> Option<&Stack<S, I>> {
        Self::stack(self, id)
    }

    fn new_stack(&mut self, id: S, original: Variant<I>) -> GalleryResult<Stack<S, I>> {
        Self::new_stack(self, id, original)
    }

    fn clear_stack(&mut self, id: &S) -> GalleryResult<Stack<S, I>> {
        Self::clear_stack(self, id)
    }

    fn replace_variant(&mut self, id: &S, variant: Variant<I>) -> GalleryResult<Stack<S, I>> {
        Self::replace_variant(self, id, variant)
    }

    fn add_variant(&mut self, id: &S, variant: Variant<I>) -> GalleryResult<Stack<S, I>> {
        Self::add_variant(self, id, variant)
    }

    fn tag(&mut self, id: &S, tags: &[&str]) -> GalleryResult<Stack<S, I>> {
        Self::tag(self, id, tags.iter().copied())
    }

    fn mark_as_processed(&mut self, id: &S) -> GalleryResult<bool> {
        Self::mark_as_processed(self, id)
    }
}

/// A pipeline output after upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedImage<I> {
    /// The uploaded variant. Outputs flagged original reuse the original's id.
    pub variant: Variant<I>,
    /// Tags the pipeline attached to the output.
    pub pipeline_tags: Tags,
}

/// The outcome of post-processing one stack.
#[derive(Debug, Clone)]
pub struct ProcessorResult<S, I> {
    /// The processed gallery.
    pub gallery: AggregateRef,
    /// The event that triggered processing, if any.
    pub trigger: Option<StoredEvent<GalleryEvent<S, I>>>,
    /// Id of the processed stack.
    pub stack_id: S,
    /// Uploaded outputs in pipeline order.
    pub images: Vec<ProcessedImage<I>>,
    /// Metadata reported by the pipeline.
    pub metadata: Metadata,
    /// Time spent processing.
    pub runtime: Duration,
    /// Whether the result was applied to the gallery.
    pub applied: bool,
    /// Whether the gallery was saved after applying. Implies `applied`.
    pub saved: bool,
}

/// Options of [`ProcessorResult::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Remove the stack's non-original variants before adding the outputs.
    pub clear_stack: bool,
}

impl<S: Id, I: Id> ProcessorResult<S, I> {
    /// Applies the result to `gallery` through its mutators.
    ///
    /// Outputs whose id already exists in the stack replace that variant;
    /// the others are added. The stack is then tagged as processed and
    /// marked as processed.
    pub fn apply<G>(&self, gallery: &mut G, options: ApplyOptions) -> Result<(), ApplyError>
    where
        G: ProcessableGallery<S, I>,
    {
        if gallery.aggregate_ref() != &self.gallery {
            return Err(ApplyError::AggregateMismatch {
                expected: self.gallery.clone(),
                actual: gallery.aggregate_ref().clone(),
            });
        }

        let mut stack = gallery
            .stack(&self.stack_id)
            .cloned()
            .ok_or_else(|| GalleryError::stack_not_found(&self.stack_id))?;

        if options.clear_stack {
            stack = gallery.clear_stack(&self.stack_id)?;
        }

        for processed in &self.images {
            let variant = processed.variant.clone();
            if stack.variant(&variant.id).is_some() {
                gallery.replace_variant(&self.stack_id, variant)?;
            } else {
                gallery.add_variant(&self.stack_id, variant)?;
            }
        }

        gallery.tag(&self.stack_id, &[PROCESSED_TAG])?;
        gallery.mark_as_processed(&self.stack_id)?;
        Ok(())
    }
}

/// Processes stacks: fetch original, run pipeline, encode, upload.
pub struct Processor<I> {
    encoding: Arc<dyn Encoding>,
    storage: Arc<dyn Storage>,
    uploader: Uploader,
    new_variant_id: Arc<dyn Fn() -> I + Send + Sync>,
}

impl<I> Clone for Processor<I> {
    fn clone(&self) -> Self {
        Self {
            encoding: Arc::clone(&self.encoding),
            storage: Arc::clone(&self.storage),
            uploader: self.uploader.clone(),
            new_variant_id: Arc::clone(&self.new_variant_id),
        }
    }
}

impl<I> std::fmt::Debug for Processor<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("uploader", &self.uploader)
            .finish_non_exhaustive()
    }
}

impl<I: Id> Processor<I> {
    /// Creates a processor.
    ///
    /// `new_variant_id` mints ids for outputs that are not the original.
    pub fn new(
        encoding: Arc<dyn Encoding>,
        storage: Arc<dyn Storage>,
        uploader: Uploader,
        new_variant_id: impl Fn() -> I + Send + Sync + 'static,
    ) -> Self {
        Self {
            encoding,
            storage,
            uploader,
            new_variant_id: Arc::new(new_variant_id),
        }
    }

    /// Processes the original of `stack_id`.
    ///
    /// Any failure aborts the whole stack; outputs uploaded before the
    /// failure stay in storage but are not reported.
    #[instrument(
        skip(self, pipeline, gallery),
        fields(gallery = %gallery.aggregate_ref(), stack = %stack_id)
    )]
    pub async fn process<S, G>(
        &self,
        pipeline: &dyn Pipeline,
        gallery: &G,
        stack_id: &S,
    ) -> Result<ProcessorResult<S, I>, ProcessorError>
    where
        S: Id,
        G: ProcessableGallery<S, I> + Sync,
    {
        let aggregate = gallery.aggregate_ref().clone();
        let original = gallery
            .stack(stack_id)
            .ok_or_else(|| GalleryError::stack_not_found(stack_id))?
            .original()
            .cloned()
            .ok_or_else(|| ProcessorError::MissingOriginal {
                stack: stack_id.to_string(),
            })?;

        let path = variant_path(&aggregate.id, stack_id, &original.id, &original.image.filename);
        let bytes = self.storage.get(&path).await.map_err(ProcessorError::Storage)?;
        let content_type = detect_content_type(&bytes);
        let decoded = image::load_from_memory(&bytes)
            .map_err(|source| ProcessorError::Decode { path, source })?;
        debug!(content_type, "decoded original");

        let output = pipeline.run(decoded).await?;

        let mut images = Vec::with_capacity(output.images.len());
        for produced in output.images {
            let id = if produced.original {
                original.id.clone()
            } else {
                (self.new_variant_id)()
            };

            let mut buf = Vec::new();
            self.encoding.encode(&mut buf, content_type, &produced.image)?;

            let mut variant = self
                .uploader
                .upload_variant(gallery, stack_id, id, buf)
                .await?;
            variant.original = produced.original;
            variant.image.tags = variant.image.tags.with(produced.tags.iter());

            images.push(ProcessedImage {
                variant,
                pipeline_tags: produced.tags,
            });
        }
        debug!(images = images.len(), "stack processed");

        Ok(ProcessorResult {
            gallery: aggregate,
            trigger: None,
            stack_id: stack_id.clone(),
            images,
            metadata: output.metadata,
            runtime: Duration::ZERO,
            applied: false,
            saved: false,
        })
    }
}
