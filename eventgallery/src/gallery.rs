//! The gallery core: validated mutations over an ordered list of stacks.
//!
//! [`Gallery`] holds no event log. It is the projection that
//! [`GalleryAggregate`](crate::aggregate::GalleryAggregate) validates against
//! and replays events into.
//!
//! The stack list sits behind an [`Arc`] and is copied on first write, so
//! [`Gallery::dry_run`] takes its snapshot in O(1) and restores it with a
//! pointer swap.

use crate::errors::{GalleryError, GalleryResult};
use crate::model::{Id, Image, Stack, Tags, Variant};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// An ordered collection of stacks with unique ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gallery<S, I> {
    stacks: Arc<Vec<Stack<S, I>>>,
}

impl<S, I> Default for Gallery<S, I> {
    fn default() -> Self {
        Self {
            stacks: Arc::new(Vec::new()),
        }
    }
}

impl<S: Id, I: Id> Gallery<S, I> {
    /// Creates an empty gallery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stacks in display order.
    pub fn stacks(&self) -> &[Stack<S, I>] {
        &self.stacks
    }

    /// The stack with the given id.
    pub fn stack(&self, id: &S) -> Option<&Stack<S, I>> {
        self.stacks.iter().find(|s| &s.id == id)
    }

    /// Number of stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Whether the gallery has no stacks.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    fn stack_mut(&mut self, id: &S) -> GalleryResult<&mut Stack<S, I>> {
        Arc::make_mut(&mut self.stacks)
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| GalleryError::stack_not_found(id))
    }

    fn require_stack(&self, id: &S) -> GalleryResult<&Stack<S, I>> {
        self.stack(id).ok_or_else(|| GalleryError::stack_not_found(id))
    }

    /// Adds a stack whose only variant is `original`, flagged as original.
    ///
    /// Fails with [`GalleryError::EmptyId`] if the stack id or the variant id
    /// is empty, and with [`GalleryError::DuplicateId`] if the gallery already
    /// has a stack with that id.
    pub fn new_stack(&mut self, id: S, original: Variant<I>) -> GalleryResult<Stack<S, I>> {
        if id.is_empty() || original.id.is_empty() {
            return Err(GalleryError::EmptyId);
        }
        if self.stack(&id).is_some() {
            return Err(GalleryError::duplicate(&id));
        }

        let stack = Stack {
            id,
            variants: vec![Variant::original(original.id, original.image)],
            tags: Tags::default(),
        };
        Arc::make_mut(&mut self.stacks).push(stack.clone());
        Ok(stack)
    }

    /// Appends a stack recorded by a `StackAdded` event as-is.
    pub(crate) fn insert_stack(&mut self, stack: Stack<S, I>) -> GalleryResult<()> {
        if stack.id.is_empty() {
            return Err(GalleryError::EmptyId);
        }
        if self.stack(&stack.id).is_some() {
            return Err(GalleryError::duplicate(&stack.id));
        }
        Arc::make_mut(&mut self.stacks).push(stack);
        Ok(())
    }

    /// Removes a stack and returns it.
    pub fn remove_stack(&mut self, id: &S) -> GalleryResult<Stack<S, I>> {
        let index = self
            .stacks
            .iter()
            .position(|s| &s.id == id)
            .ok_or_else(|| GalleryError::stack_not_found(id))?;
        Ok(Arc::make_mut(&mut self.stacks).remove(index))
    }

    /// Appends a non-original variant to a stack.
    pub fn new_variant(
        &mut self,
        stack_id: &S,
        variant_id: I,
        image: Image,
    ) -> GalleryResult<Stack<S, I>> {
        let existing = self.require_stack(stack_id)?;
        if existing.variant(&variant_id).is_some() {
            return Err(GalleryError::duplicate(&variant_id));
        }
        if variant_id.is_empty() {
            return Err(GalleryError::EmptyId);
        }

        let stack = self.stack_mut(stack_id)?;
        stack.variants.push(Variant::new(variant_id, image));
        Ok(stack.clone())
    }

    /// Removes a variant from a stack and returns it.
    pub fn remove_variant(&mut self, stack_id: &S, variant_id: &I) -> GalleryResult<Variant<I>> {
        let index = self
            .require_stack(stack_id)?
            .variants
            .iter()
            .position(|v| &v.id == variant_id)
            .ok_or_else(|| GalleryError::variant_not_found(stack_id, variant_id))?;
        Ok(self.stack_mut(stack_id)?.variants.remove(index))
    }

    /// Replaces the variant that has the same id as `variant`.
    ///
    /// The replaced slot keeps its `original` flag, so a stack never gains or
    /// loses its original through a replacement.
    pub fn replace_variant(
        &mut self,
        stack_id: &S,
        variant: Variant<I>,
    ) -> GalleryResult<Stack<S, I>> {
        if self.require_stack(stack_id)?.variant(&variant.id).is_none() {
            return Err(GalleryError::variant_not_found(stack_id, &variant.id));
        }

        let stack = self.stack_mut(stack_id)?;
        if let Some(slot) = stack.variant_mut(&variant.id) {
            slot.image = variant.image;
        }
        Ok(stack.clone())
    }

    /// Adds tags to a stack.
    pub fn tag<T: Into<String>>(
        &mut self,
        stack_id: &S,
        tags: impl IntoIterator<Item = T>,
    ) -> GalleryResult<Stack<S, I>> {
        let stack = self.stack_mut(stack_id)?;
        stack.tags = stack.tags.with(tags);
        Ok(stack.clone())
    }

    /// Removes tags from a stack.
    pub fn untag<T: AsRef<str>>(
        &mut self,
        stack_id: &S,
        tags: impl IntoIterator<Item = T>,
    ) -> GalleryResult<Stack<S, I>> {
        let stack = self.stack_mut(stack_id)?;
        stack.tags = stack.tags.without(tags);
        Ok(stack.clone())
    }

    /// Removes every non-original variant from a stack.
    pub fn clear_stack(&mut self, stack_id: &S) -> GalleryResult<Stack<S, I>> {
        let stack = self.stack_mut(stack_id)?;
        stack.variants.retain(|v| v.original);
        Ok(stack.clone())
    }

    /// Returns `order` without the ids that name no stack of this gallery.
    pub fn known_ids(&self, order: &[S]) -> Vec<S> {
        order
            .iter()
            .filter(|id| self.stack(id).is_some())
            .cloned()
            .collect()
    }

    /// Moves the stacks named in `order` to the front, in that order.
    ///
    /// Unknown ids are ignored. Stacks not named keep their previous relative
    /// order after the named ones. Sorting with no known ids does nothing.
    pub fn sort(&mut self, order: &[S]) {
        let order = self.known_ids(order);
        if order.is_empty() {
            return;
        }

        let mut keyed: Vec<_> = Arc::make_mut(&mut self.stacks)
            .drain(..)
            .enumerate()
            .map(|(previous, stack)| {
                let key = order
                    .iter()
                    .position(|id| id == &stack.id)
                    .map_or((1, previous), |index| (0, index));
                (key, stack)
            })
            .collect();
        keyed.sort_by_key(|(key, _)| *key);

        self.stacks = Arc::new(keyed.into_iter().map(|(_, stack)| stack).collect());
    }

    /// Removes all stacks.
    pub fn clear(&mut self) {
        self.stacks = Arc::new(Vec::new());
    }

    /// Runs `f` against this gallery, then restores the stacks to their state
    /// before the call, whatever `f` returned.
    pub fn dry_run<T, E>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, E>) -> Result<T, E> {
        let snapshot = Arc::clone(&self.stacks);
        let result = f(self);
        self.stacks = snapshot;
        result
    }
}
