//! Value types of a gallery: images, variants, stacks and tags.
//!
//! Everything here is plain data. Mutation rules live in
//! [`Gallery`](crate::gallery::Gallery) and the event-sourced
//! [`GalleryAggregate`](crate::aggregate::GalleryAggregate).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use uuid::Uuid;

/// Tag added to a stack once post-processing has been applied to it.
pub const PROCESSED_TAG: &str = "processed";

/// Identifier of a stack or a variant.
///
/// Ids are chosen by the caller. Every id type has an empty value that is
/// never accepted as the id of a stack or variant.
pub trait Id:
    Clone + Eq + Hash + Debug + Display + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Whether this is the empty id.
    fn is_empty(&self) -> bool;
}

impl Id for String {
    fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl Id for Uuid {
    fn is_empty(&self) -> bool {
        self.is_nil()
    }
}

impl Id for u64 {
    fn is_empty(&self) -> bool {
        *self == 0
    }
}

/// A duplicate-free set of tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tags(BTreeSet<String>);

impl Tags {
    /// Creates a tag set; duplicates collapse.
    pub fn new<T: Into<String>>(tags: impl IntoIterator<Item = T>) -> Self {
        Self(tags.into_iter().map(Into::into).collect())
    }

    /// Returns the union of this set and `tags`.
    #[must_use]
    pub fn with<T: Into<String>>(&self, tags: impl IntoIterator<Item = T>) -> Self {
        let mut out = self.0.clone();
        out.extend(tags.into_iter().map(Into::into));
        Self(out)
    }

    /// Returns this set without `tags`.
    #[must_use]
    pub fn without<T: AsRef<str>>(&self, tags: impl IntoIterator<Item = T>) -> Self {
        let mut out = self.0.clone();
        for tag in tags {
            out.remove(tag.as_ref());
        }
        Self(out)
    }

    /// Whether `tag` is in the set.
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set has no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the tags in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<T: Into<String>> FromIterator<T> for Tags {
    fn from_iter<It: IntoIterator<Item = T>>(iter: It) -> Self {
        Self::new(iter)
    }
}

/// Width and height of an image in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Creates dimensions from width and height.
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Where the encoded bytes of an image are stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageLocation {
    /// Name of the storage backend, e.g. `"memory"`.
    pub provider: String,
    /// Backend-specific path.
    pub path: String,
}

/// A single encoded picture.
///
/// The localized names, descriptions and tags are always present, possibly
/// empty; a missing field deserializes to an empty container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Storage location of the encoded bytes.
    #[serde(default)]
    pub storage: StorageLocation,
    /// Original file name.
    #[serde(default)]
    pub filename: String,
    /// Size of the encoded bytes.
    #[serde(default)]
    pub filesize: u64,
    /// Pixel dimensions.
    #[serde(default)]
    pub dimensions: Dimensions,
    /// Display names by locale.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
    /// Descriptions by locale.
    #[serde(default)]
    pub descriptions: BTreeMap<String, String>,
    /// Free-form tags.
    #[serde(default)]
    pub tags: Tags,
}

/// An [`Image`] inside a [`Stack`], identified by an id unique to the stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant<I> {
    /// Id of the variant within its stack.
    pub id: I,
    /// Whether this is the stack's original image.
    #[serde(default)]
    pub original: bool,
    /// The image itself.
    #[serde(flatten)]
    pub image: Image,
}

impl<I> Variant<I> {
    /// Creates a non-original variant.
    pub const fn new(id: I, image: Image) -> Self {
        Self {
            id,
            original: false,
            image,
        }
    }

    /// Creates a variant flagged as original.
    pub const fn original(id: I, image: Image) -> Self {
        Self {
            id,
            original: true,
            image,
        }
    }
}

/// A logical image asset: one original plus any number of derived variants.
///
/// Variants are kept in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack<S, I> {
    /// Id of the stack within its gallery.
    pub id: S,
    /// Variants in insertion order.
    pub variants: Vec<Variant<I>>,
    /// Stack tags.
    #[serde(default)]
    pub tags: Tags,
}

impl<S: Id, I: Id> Stack<S, I> {
    /// The original variant, if the stack has one.
    pub fn original(&self) -> Option<&Variant<I>> {
        self.variants.iter().find(|v| v.original)
    }

    /// Whether any variant is flagged original.
    pub fn contains_original(&self) -> bool {
        self.original().is_some()
    }

    /// The most recently added variant.
    pub fn last(&self) -> Option<&Variant<I>> {
        self.variants.last()
    }

    /// The variant with the given id.
    pub fn variant(&self, id: &I) -> Option<&Variant<I>> {
        self.variants.iter().find(|v| &v.id == id)
    }

    pub(crate) fn variant_mut(&mut self, id: &I) -> Option<&mut Variant<I>> {
        self.variants.iter_mut().find(|v| &v.id == id)
    }

    /// Whether the stack has at least one non-original variant.
    pub fn has_derived_variants(&self) -> bool {
        self.variants.iter().any(|v| !v.original)
    }

    /// A copy of the stack with every non-original variant removed.
    #[must_use]
    pub fn cleared(&self) -> Self {
        Self {
            id: self.id.clone(),
            variants: self.variants.iter().filter(|v| v.original).cloned().collect(),
            tags: self.tags.clone(),
        }
    }
}

/// Whether a stack has been marked as processed.
pub fn was_processed<S: Id, I: Id>(stack: &Stack<S, I>) -> bool {
    stack.tags.contains(PROCESSED_TAG)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn stack() -> Stack<String, String> {
        Stack {
            id: "s1".into(),
            variants: vec![
                Variant::new("sm".to_string(), Image::default()),
                Variant::original("orig".to_string(), Image::default()),
                Variant::new("lg".to_string(), Image::default()),
            ],
            tags: Tags::default(),
        }
    }

    #[test]
    fn ids_report_their_empty_value() {
        assert!(Id::is_empty(&String::new()));
        assert!(!Id::is_empty(&"a".to_string()));
        assert!(Id::is_empty(&Uuid::nil()));
        assert!(!Id::is_empty(&Uuid::new_v4()));
        assert!(Id::is_empty(&0u64));
        assert!(!Id::is_empty(&7u64));
    }

    #[test]
    fn stack_lookups() {
        let stack = stack();
        assert_eq!(stack.original().map(|v| v.id.as_str()), Some("orig"));
        assert!(stack.contains_original());
        assert_eq!(stack.last().map(|v| v.id.as_str()), Some("lg"));
        assert!(stack.variant(&"sm".to_string()).is_some());
        assert!(stack.variant(&"md".to_string()).is_none());
    }

    #[test]
    fn cleared_stack_keeps_only_the_original() {
        let cleared = stack().cleared();
        assert_eq!(cleared.variants.len(), 1);
        assert!(cleared.variants[0].original);
        assert!(!cleared.has_derived_variants());
    }

    #[test]
    fn missing_optional_fields_deserialize_as_empty() {
        let json = r#"{"id":"v1","original":true,"filename":"a.png","filesize":3,
            "dimensions":{"width":1,"height":2},
            "storage":{"provider":"memory","path":"g/s/v1/a.png"}}"#;
        let variant: Variant<String> = serde_json::from_str(json).unwrap();
        assert!(variant.image.names.is_empty());
        assert!(variant.image.descriptions.is_empty());
        assert!(variant.image.tags.is_empty());
        assert_eq!(variant.image.dimensions, Dimensions::new(1, 2));
    }

    #[test]
    fn processed_tag_marks_processed_stacks() {
        let mut stack = stack();
        assert!(!was_processed(&stack));
        stack.tags = stack.tags.with([PROCESSED_TAG]);
        assert!(was_processed(&stack));
    }

    proptest! {
        #[test]
        fn tags_collapse_duplicates(tags in prop::collection::vec("[a-c]", 0..10)) {
            let set = Tags::new(tags.clone());
            let mut expected = tags;
            expected.sort();
            expected.dedup();
            prop_assert_eq!(set.iter().map(str::to_string).collect::<Vec<_>>(), expected);
        }

        #[test]
        fn without_removes_exactly_the_given_tags(
            base in prop::collection::vec("[a-e]", 0..8),
            removed in prop::collection::vec("[a-e]", 0..8),
        ) {
            let result = Tags::new(base.clone()).without(&removed);
            for tag in &removed {
                prop_assert!(!result.contains(tag));
            }
            for tag in base.iter().filter(|t| !removed.contains(t)) {
                prop_assert!(result.contains(tag));
            }
        }
    }
}
