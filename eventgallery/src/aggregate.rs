//! The event-sourced gallery.
//!
//! Every mutator of [`GalleryAggregate`] follows the same protocol:
//!
//! 1. run the equivalent [`Gallery`] operation inside [`Gallery::dry_run`];
//! 2. on failure return the error, leaving the aggregate untouched;
//! 3. on success record exactly one event and apply it to the live gallery.
//!
//! Recorded events and replayed events go through the same private
//! `apply_event`, which is the only code that mutates live state.

use crate::errors::{GalleryError, GalleryResult};
use crate::event::{GalleryEvent, StoredEvent};
use crate::gallery::Gallery;
use crate::model::{Id, Image, Stack, Tags, Variant};
use crate::types::{AggregateId, AggregateRef, AggregateVersion};
use tracing::{debug, warn};

/// A gallery whose state is derived from its events.
#[derive(Debug, Clone)]
pub struct GalleryAggregate<S, I> {
    aggregate: AggregateRef,
    version: AggregateVersion,
    gallery: Gallery<S, I>,
    processed: Vec<S>,
    changes: Vec<GalleryEvent<S, I>>,
}

impl<S: Id, I: Id> GalleryAggregate<S, I> {
    /// Creates an empty gallery aggregate with the default aggregate name.
    pub fn new(id: AggregateId) -> Self {
        Self::with_ref(AggregateRef::gallery(id))
    }

    /// Creates an empty aggregate for the given reference.
    pub fn with_ref(aggregate: AggregateRef) -> Self {
        Self {
            aggregate,
            version: AggregateVersion::initial(),
            gallery: Gallery::new(),
            processed: Vec::new(),
            changes: Vec::new(),
        }
    }

    /// Rebuilds an aggregate from its recorded events.
    ///
    /// Fails if an event cannot be applied, which means the stream does not
    /// belong to a gallery or was written out of order.
    pub fn replay(
        aggregate: AggregateRef,
        events: impl IntoIterator<Item = StoredEvent<GalleryEvent<S, I>>>,
    ) -> GalleryResult<Self> {
        let mut this = Self::with_ref(aggregate);
        for event in events {
            this.apply_event(&event.payload)?;
            this.version = event.version;
        }
        Ok(this)
    }

    /// Reference to this aggregate.
    pub const fn aggregate_ref(&self) -> &AggregateRef {
        &self.aggregate
    }

    /// Id of this aggregate.
    pub const fn id(&self) -> AggregateId {
        self.aggregate.id
    }

    /// Version of the last committed event.
    pub const fn version(&self) -> AggregateVersion {
        self.version
    }

    /// The current projection.
    pub const fn gallery(&self) -> &Gallery<S, I> {
        &self.gallery
    }

    /// Stacks in display order.
    pub fn stacks(&self) -> &[Stack<S, I>] {
        self.gallery.stacks()
    }

    /// The stack with the given id.
    pub fn stack(&self, id: &S) -> Option<&Stack<S, I>> {
        self.gallery.stack(id)
    }

    /// Ids of the stacks marked as processed, in marking order.
    pub fn processed_stacks(&self) -> Vec<S> {
        self.processed.clone()
    }

    /// Events recorded since the last commit.
    pub fn changes(&self) -> &[GalleryEvent<S, I>] {
        &self.changes
    }

    /// Marks the recorded events as persisted.
    pub fn commit(&mut self) {
        self.version = self.version.advanced_by(self.changes.len());
        self.changes.clear();
    }

    fn record(&mut self, event: GalleryEvent<S, I>) -> GalleryResult<()> {
        debug!(aggregate = %self.aggregate, event = %event.event_kind(), "recording event");
        self.apply_event(&event)?;
        self.changes.push(event);
        Ok(())
    }

    fn apply_event(&mut self, event: &GalleryEvent<S, I>) -> GalleryResult<()> {
        let gallery = &mut self.gallery;
        let result = match event {
            GalleryEvent::StackAdded { stack } => gallery.insert_stack(stack.clone()),
            GalleryEvent::StackRemoved { stack_id } => gallery.remove_stack(stack_id).map(drop),
            GalleryEvent::StackCleared { stack_id } => gallery.clear_stack(stack_id).map(drop),
            GalleryEvent::VariantAdded { stack_id, variant } => gallery
                .new_variant(stack_id, variant.id.clone(), variant.image.clone())
                .map(drop),
            GalleryEvent::VariantsAdded { stack_id, variants } => {
                variants.iter().try_for_each(|variant| {
                    gallery
                        .new_variant(stack_id, variant.id.clone(), variant.image.clone())
                        .map(drop)
                })
            }
            GalleryEvent::VariantRemoved {
                stack_id,
                variant_id,
            } => gallery.remove_variant(stack_id, variant_id).map(drop),
            GalleryEvent::VariantReplaced { stack_id, variant } => {
                gallery.replace_variant(stack_id, variant.clone()).map(drop)
            }
            GalleryEvent::StackTagged { stack_id, tags } => {
                gallery.tag(stack_id, tags.iter()).map(drop)
            }
            GalleryEvent::StackUntagged { stack_id, tags } => {
                gallery.untag(stack_id, tags.iter()).map(drop)
            }
            GalleryEvent::Sorted { order } => {
                gallery.sort(order);
                Ok(())
            }
            GalleryEvent::Cleared => {
                gallery.clear();
                Ok(())
            }
            GalleryEvent::StackProcessed { stack_id } => {
                if !self.processed.contains(stack_id) {
                    self.processed.push(stack_id.clone());
                }
                Ok(())
            }
        };
        if let Err(err) = &result {
            warn!(aggregate = %self.aggregate, %err, "event could not be applied");
        }
        result
    }

    fn live_stack(&self, id: &S) -> GalleryResult<Stack<S, I>> {
        self.stack(id)
            .cloned()
            .ok_or_else(|| GalleryError::stack_not_found(id))
    }

    /// Creates a stack whose original is `original`.
    pub fn new_stack(&mut self, id: S, original: Variant<I>) -> GalleryResult<Stack<S, I>> {
        let stack = self.gallery.dry_run(|g| g.new_stack(id, original))?;
        self.record(GalleryEvent::StackAdded {
            stack: stack.clone(),
        })?;
        Ok(stack)
    }

    /// Removes a stack.
    pub fn remove_stack(&mut self, id: &S) -> GalleryResult<Stack<S, I>> {
        let removed = self.gallery.dry_run(|g| g.remove_stack(id))?;
        self.record(GalleryEvent::StackRemoved {
            stack_id: id.clone(),
        })?;
        Ok(removed)
    }

    /// Removes every non-original variant of a stack.
    ///
    /// Records nothing when the stack has no such variant.
    pub fn clear_stack(&mut self, id: &S) -> GalleryResult<Stack<S, I>> {
        let stack = self.live_stack(id)?;
        if !stack.has_derived_variants() {
            return Ok(stack);
        }
        self.gallery.dry_run(|g| g.clear_stack(id))?;
        self.record(GalleryEvent::StackCleared {
            stack_id: id.clone(),
        })?;
        self.live_stack(id)
    }

    /// Appends a new variant built from `image`.
    pub fn new_variant(
        &mut self,
        stack_id: &S,
        variant_id: I,
        image: Image,
    ) -> GalleryResult<Stack<S, I>> {
        self.add_variant(stack_id, Variant::new(variant_id, image))
    }

    /// Appends a pre-built variant. The variant is never recorded as original.
    pub fn add_variant(&mut self, stack_id: &S, variant: Variant<I>) -> GalleryResult<Stack<S, I>> {
        let variant = Variant::new(variant.id, variant.image);
        let stack = self.gallery.dry_run(|g| {
            g.new_variant(stack_id, variant.id.clone(), variant.image.clone())
        })?;
        self.record(GalleryEvent::VariantAdded {
            stack_id: stack_id.clone(),
            variant,
        })?;
        Ok(stack)
    }

    /// Appends several variants with a single event.
    ///
    /// The whole batch is validated first, including duplicates within it.
    /// An empty batch records nothing.
    pub fn add_variants(
        &mut self,
        stack_id: &S,
        variants: Vec<Variant<I>>,
    ) -> GalleryResult<Stack<S, I>> {
        if variants.is_empty() {
            return self.live_stack(stack_id);
        }

        let variants: Vec<_> = variants
            .into_iter()
            .map(|v| Variant::new(v.id, v.image))
            .collect();
        let stack = self.gallery.dry_run(|g| {
            let mut stack = g.stack(stack_id).cloned();
            for variant in &variants {
                stack = Some(g.new_variant(stack_id, variant.id.clone(), variant.image.clone())?);
            }
            stack.ok_or_else(|| GalleryError::stack_not_found(stack_id))
        })?;
        self.record(GalleryEvent::VariantsAdded {
            stack_id: stack_id.clone(),
            variants,
        })?;
        Ok(stack)
    }

    /// Removes a variant.
    pub fn remove_variant(&mut self, stack_id: &S, variant_id: &I) -> GalleryResult<Variant<I>> {
        let removed = self
            .gallery
            .dry_run(|g| g.remove_variant(stack_id, variant_id))?;
        self.record(GalleryEvent::VariantRemoved {
            stack_id: stack_id.clone(),
            variant_id: variant_id.clone(),
        })?;
        Ok(removed)
    }

    /// Replaces the variant with the same id as `variant`.
    pub fn replace_variant(
        &mut self,
        stack_id: &S,
        variant: Variant<I>,
    ) -> GalleryResult<Stack<S, I>> {
        let stack = self
            .gallery
            .dry_run(|g| g.replace_variant(stack_id, variant.clone()))?;
        self.record(GalleryEvent::VariantReplaced {
            stack_id: stack_id.clone(),
            variant,
        })?;
        Ok(stack)
    }

    /// Adds tags to a stack.
    pub fn tag<T: Into<String>>(
        &mut self,
        stack_id: &S,
        tags: impl IntoIterator<Item = T>,
    ) -> GalleryResult<Stack<S, I>> {
        let tags = Tags::new(tags);
        let stack = self.gallery.dry_run(|g| g.tag(stack_id, tags.iter()))?;
        self.record(GalleryEvent::StackTagged {
            stack_id: stack_id.clone(),
            tags,
        })?;
        Ok(stack)
    }

    /// Removes tags from a stack.
    pub fn untag<T: Into<String>>(
        &mut self,
        stack_id: &S,
        tags: impl IntoIterator<Item = T>,
    ) -> GalleryResult<Stack<S, I>> {
        let tags = Tags::new(tags);
        let stack = self.gallery.dry_run(|g| g.untag(stack_id, tags.iter()))?;
        self.record(GalleryEvent::StackUntagged {
            stack_id: stack_id.clone(),
            tags,
        })?;
        Ok(stack)
    }

    /// Moves the named stacks to the front. Unknown ids are dropped before
    /// the event is recorded; nothing is recorded if none remain.
    pub fn sort(&mut self, order: &[S]) -> GalleryResult<()> {
        let order = self.gallery.known_ids(order);
        if order.is_empty() {
            return Ok(());
        }
        self.record(GalleryEvent::Sorted { order })
    }

    /// Removes all stacks. Records nothing for an empty gallery.
    pub fn clear(&mut self) -> GalleryResult<()> {
        if self.gallery.is_empty() {
            return Ok(());
        }
        self.record(GalleryEvent::Cleared)
    }

    /// Marks a stack as processed.
    ///
    /// Returns whether an event was recorded; re-marking a stack records
    /// nothing.
    pub fn mark_as_processed(&mut self, stack_id: &S) -> GalleryResult<bool> {
        if self.processed.contains(stack_id) {
            return Ok(false);
        }
        self.record(GalleryEvent::StackProcessed {
            stack_id: stack_id.clone(),
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::was_processed;
    use uuid::Uuid;

    type Aggregate = GalleryAggregate<String, String>;

    fn image(name: &str) -> Image {
        Image {
            filename: format!("{name}.jpg"),
            ..Image::default()
        }
    }

    fn aggregate() -> Aggregate {
        Aggregate::new(Uuid::new_v4())
    }

    fn with_stack(id: &str) -> Aggregate {
        let mut g = aggregate();
        g.new_stack(id.into(), Variant::new("orig".into(), image(id)))
            .unwrap();
        g
    }

    fn replayed(g: &Aggregate) -> Aggregate {
        let events: Vec<_> = g
            .changes()
            .iter()
            .enumerate()
            .map(|(i, e)| {
                StoredEvent::new(
                    g.aggregate_ref().clone(),
                    AggregateVersion::new(i as u64 + 1),
                    e.clone(),
                )
            })
            .collect();
        Aggregate::replay(g.aggregate_ref().clone(), events).unwrap()
    }

    #[test]
    fn new_stack_then_new_variant() {
        let mut g = with_stack("s1");
        g.new_variant(&"s1".into(), "v1".into(), image("b")).unwrap();

        let stack = g.stack(&"s1".into()).unwrap();
        assert_eq!(stack.variants.len(), 2);
        assert!(stack.variants[0].original);
        assert!(!stack.variants[1].original);
        assert_eq!(g.changes().len(), 2);
    }

    #[test]
    fn failed_mutation_records_nothing() {
        let mut g = with_stack("s1");
        let stacks = g.stacks().to_vec();

        assert!(g
            .new_stack("s1".into(), Variant::new("x".into(), image("x")))
            .is_err());
        assert!(g.remove_variant(&"s1".into(), &"missing".into()).is_err());
        assert!(g.tag(&"nope".into(), ["a"]).is_err());

        assert_eq!(g.changes().len(), 1);
        assert_eq!(g.stacks(), stacks.as_slice());
    }

    #[test]
    fn replay_reproduces_state() {
        let mut g = with_stack("s1");
        g.new_stack("s2".into(), Variant::new("o".into(), image("s2")))
            .unwrap();
        g.add_variants(
            &"s1".into(),
            vec![
                Variant::new("sm".into(), image("sm")),
                Variant::new("lg".into(), image("lg")),
            ],
        )
        .unwrap();
        g.replace_variant(&"s1".into(), Variant::new("sm".into(), image("sm2")))
            .unwrap();
        g.remove_variant(&"s1".into(), &"lg".into()).unwrap();
        g.tag(&"s2".into(), ["a", "b"]).unwrap();
        g.untag(&"s2".into(), ["a"]).unwrap();
        g.sort(&["s2".into()]).unwrap();
        g.mark_as_processed(&"s1".into()).unwrap();

        let copy = replayed(&g);
        assert_eq!(copy.gallery(), g.gallery());
        assert_eq!(copy.processed_stacks(), g.processed_stacks());
        assert_eq!(copy.version(), AggregateVersion::new(g.changes().len() as u64));
    }

    #[test]
    fn sort_drops_unknown_ids_before_recording() {
        let mut g = with_stack("s1");
        g.new_stack("s2".into(), Variant::new("o".into(), image("s2")))
            .unwrap();

        g.sort(&["x".into(), "s2".into()]).unwrap();
        assert_eq!(
            g.changes().last(),
            Some(&GalleryEvent::Sorted {
                order: vec!["s2".into()]
            })
        );

        let before = g.changes().len();
        g.sort(&["x".into()]).unwrap();
        assert_eq!(g.changes().len(), before);
    }

    #[test]
    fn clear_records_only_for_non_empty_gallery() {
        let mut g = aggregate();
        g.clear().unwrap();
        assert!(g.changes().is_empty());

        let mut g = with_stack("s1");
        g.clear().unwrap();
        assert_eq!(g.changes().last(), Some(&GalleryEvent::Cleared));
        assert!(g.stacks().is_empty());
    }

    #[test]
    fn clear_stack_records_only_when_variants_are_removed() {
        let mut g = with_stack("s1");
        g.clear_stack(&"s1".into()).unwrap();
        assert_eq!(g.changes().len(), 1);

        g.new_variant(&"s1".into(), "v1".into(), image("v1")).unwrap();
        let stack = g.clear_stack(&"s1".into()).unwrap();
        assert_eq!(stack.variants.len(), 1);
        assert_eq!(g.changes().len(), 3);

        assert!(matches!(
            g.clear_stack(&"missing".into()),
            Err(GalleryError::StackNotFound { .. })
        ));
    }

    #[test]
    fn add_variants_rejects_duplicates_within_the_batch() {
        let mut g = with_stack("s1");
        let result = g.add_variants(
            &"s1".into(),
            vec![
                Variant::new("a".into(), image("a")),
                Variant::new("a".into(), image("a")),
            ],
        );
        assert!(matches!(result, Err(GalleryError::DuplicateId { .. })));
        assert_eq!(g.stack(&"s1".into()).unwrap().variants.len(), 1);
    }

    #[test]
    fn added_variants_are_never_original() {
        let mut g = with_stack("s1");
        let stack = g
            .add_variant(&"s1".into(), Variant::original("v".into(), image("v")))
            .unwrap();
        assert_eq!(stack.variants.iter().filter(|v| v.original).count(), 1);
    }

    #[test]
    fn mark_as_processed_is_idempotent() {
        let mut g = with_stack("s1");
        assert!(g.mark_as_processed(&"s1".into()).unwrap());
        assert!(!g.mark_as_processed(&"s1".into()).unwrap());
        assert_eq!(g.processed_stacks(), vec!["s1".to_string()]);
        assert_eq!(g.changes().len(), 2);
        assert!(!was_processed(g.stack(&"s1".into()).unwrap()));
    }

    #[test]
    fn commit_advances_the_version() {
        let mut g = with_stack("s1");
        g.tag(&"s1".into(), ["x"]).unwrap();
        g.commit();
        assert!(g.changes().is_empty());
        assert_eq!(g.version(), AggregateVersion::new(2));
    }
}
