//! Uploading images to content storage.

use crate::errors::{GalleryError, UploadError};
use crate::model::{Dimensions, Id, Image, Stack, Variant};
use crate::processor::ProcessableGallery;
use crate::storage::{variant_path, Storage};
use image::ImageReader;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Stores image bytes and builds the gallery values describing them.
#[derive(Clone)]
pub struct Uploader {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader").finish_non_exhaustive()
    }
}

impl Uploader {
    /// Creates an uploader writing to `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Uploads a new original and adds it to `gallery` as a new stack.
    ///
    /// The bytes are stored under the variant path of `image_id`; file size
    /// and dimensions are measured from the bytes.
    #[instrument(
        skip(self, gallery, bytes),
        fields(gallery = %gallery.aggregate_ref(), size = bytes.len())
    )]
    pub async fn upload_new<S, I, G>(
        &self,
        gallery: &mut G,
        stack_id: S,
        image_id: I,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<Stack<S, I>, UploadError>
    where
        S: Id,
        I: Id,
        G: ProcessableGallery<S, I>,
    {
        if filename.is_empty() {
            return Err(UploadError::EmptyFilename);
        }
        if stack_id.is_empty() || image_id.is_empty() {
            return Err(GalleryError::EmptyId.into());
        }
        if gallery.stack(&stack_id).is_some() {
            return Err(GalleryError::duplicate(&stack_id).into());
        }

        let path = variant_path(&gallery.aggregate_ref().id, &stack_id, &image_id, filename);
        let template = Image {
            filename: filename.to_string(),
            ..Image::default()
        };
        let image = self.store(&path, bytes, template).await?;

        let stack = gallery.new_stack(stack_id, Variant::original(image_id, image))?;
        debug!(stack = %stack.id, "uploaded new stack");
        Ok(stack)
    }

    /// Uploads a variant of an existing stack.
    ///
    /// The variant is stored under the original's file name and starts from a
    /// copy of the original's image data. It is not added to the gallery.
    #[instrument(
        skip(self, gallery, bytes),
        fields(gallery = %gallery.aggregate_ref(), size = bytes.len())
    )]
    pub async fn upload_variant<S, I, G>(
        &self,
        gallery: &G,
        stack_id: &S,
        variant_id: I,
        bytes: Vec<u8>,
    ) -> Result<Variant<I>, UploadError>
    where
        S: Id,
        I: Id,
        G: ProcessableGallery<S, I> + Sync,
    {
        let template = gallery
            .stack(stack_id)
            .ok_or_else(|| GalleryError::stack_not_found(stack_id))?
            .original()
            .map(|original| original.image.clone())
            .unwrap_or_default();
        if variant_id.is_empty() {
            return Err(GalleryError::EmptyId.into());
        }

        let path = variant_path(
            &gallery.aggregate_ref().id,
            stack_id,
            &variant_id,
            &template.filename,
        );
        let image = self.store(&path, bytes, template).await?;
        Ok(Variant::new(variant_id, image))
    }

    async fn store(
        &self,
        path: &str,
        bytes: Vec<u8>,
        template: Image,
    ) -> Result<Image, UploadError> {
        let dimensions = measure(&bytes)?;
        let filesize = bytes.len() as u64;
        let storage = self
            .storage
            .put(path, bytes)
            .await
            .map_err(|source| UploadError::Storage {
                path: path.to_string(),
                source,
            })?;
        Ok(Image {
            storage,
            filesize,
            dimensions,
            ..template
        })
    }
}

fn measure(bytes: &[u8]) -> Result<Dimensions, UploadError> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| UploadError::Decode(image::ImageError::IoError(err)))?
        .into_dimensions()
        .map_err(UploadError::Decode)?;
    Ok(Dimensions::new(width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::GalleryAggregate;
    use crate::storage::testing::{png, MapStorage};
    use uuid::Uuid;

    fn setup() -> (MapStorage, Uploader, GalleryAggregate<String, String>) {
        let storage = MapStorage::default();
        let uploader = Uploader::new(Arc::new(storage.clone()));
        (storage, uploader, GalleryAggregate::new(Uuid::now_v7()))
    }

    #[tokio::test]
    async fn new_uploads_create_a_stack_with_measured_original() {
        let (storage, uploader, mut gallery) = setup();
        let bytes = png(30, 20);
        let size = bytes.len() as u64;

        let stack = uploader
            .upload_new(&mut gallery, "s1".to_string(), "o1".to_string(), bytes, "cat.png")
            .await
            .unwrap();

        let original = stack.original().unwrap();
        assert_eq!(original.id, "o1");
        assert_eq!(original.image.dimensions, Dimensions::new(30, 20));
        assert_eq!(original.image.filesize, size);
        assert_eq!(original.image.filename, "cat.png");

        let path = format!("{}/s1/o1/cat.png", gallery.id());
        assert_eq!(original.image.storage.path, path);
        assert!(storage.files.read().contains_key(&path));
        assert_eq!(gallery.changes().len(), 1);
    }

    #[tokio::test]
    async fn new_uploads_need_a_filename() {
        let (_, uploader, mut gallery) = setup();
        let result = uploader
            .upload_new(&mut gallery, "s1".to_string(), "o1".to_string(), png(2, 2), "")
            .await;
        assert!(matches!(result, Err(UploadError::EmptyFilename)));
    }

    #[tokio::test]
    async fn duplicate_stacks_are_rejected_before_storing() {
        let (storage, uploader, mut gallery) = setup();
        uploader
            .upload_new(&mut gallery, "s1".to_string(), "o1".to_string(), png(2, 2), "a.png")
            .await
            .unwrap();

        let result = uploader
            .upload_new(&mut gallery, "s1".to_string(), "o2".to_string(), png(2, 2), "b.png")
            .await;
        assert!(matches!(
            result,
            Err(UploadError::Gallery(GalleryError::DuplicateId { .. }))
        ));
        assert_eq!(storage.files.read().len(), 1);
    }

    #[tokio::test]
    async fn undecodable_bytes_are_rejected() {
        let (storage, uploader, mut gallery) = setup();
        let bytes = b"not an image".to_vec();
        let result = uploader
            .upload_new(&mut gallery, "s1".to_string(), "o1".to_string(), bytes, "a.png")
            .await;
        assert!(matches!(result, Err(UploadError::Decode(_))));
        assert!(storage.files.read().is_empty());
        assert!(gallery.stacks().is_empty());
    }

    #[tokio::test]
    async fn empty_ids_are_rejected_before_storing() {
        let (storage, uploader, mut gallery) = setup();

        let no_stack = uploader
            .upload_new(&mut gallery, String::new(), "o1".to_string(), png(2, 2), "a.png")
            .await;
        let no_image = uploader
            .upload_new(&mut gallery, "s1".to_string(), String::new(), png(2, 2), "a.png")
            .await;

        assert!(matches!(
            no_stack,
            Err(UploadError::Gallery(GalleryError::EmptyId))
        ));
        assert!(matches!(
            no_image,
            Err(UploadError::Gallery(GalleryError::EmptyId))
        ));
        assert!(storage.files.read().is_empty());
        assert!(gallery.changes().is_empty());
    }

    #[tokio::test]
    async fn variants_copy_the_original_image_data() {
        let (_, uploader, mut gallery) = setup();
        uploader
            .upload_new(&mut gallery, "s1".to_string(), "o1".to_string(), png(40, 40), "cat.png")
            .await
            .unwrap();

        let variant = uploader
            .upload_variant(&gallery, &"s1".to_string(), "v1".to_string(), png(10, 10))
            .await
            .unwrap();

        assert!(!variant.original);
        assert_eq!(variant.image.filename, "cat.png");
        assert_eq!(variant.image.dimensions, Dimensions::new(10, 10));
        assert!(variant.image.storage.path.ends_with("/s1/v1/cat.png"));
        // Not added to the gallery
        assert_eq!(gallery.stack(&"s1".into()).unwrap().variants.len(), 1);
    }

    #[tokio::test]
    async fn variants_need_an_existing_stack() {
        let (_, uploader, gallery) = setup();
        let result = uploader
            .upload_variant(&gallery, &"nope".to_string(), "v1".to_string(), png(2, 2))
            .await;
        assert!(matches!(
            result,
            Err(UploadError::Gallery(GalleryError::StackNotFound { .. }))
        ));
    }
}
