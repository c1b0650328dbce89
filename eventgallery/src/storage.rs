//! Content storage for encoded image bytes.

use crate::errors::StorageResult;
use crate::model::StorageLocation;
use async_trait::async_trait;
use std::fmt::Display;

/// A backend that stores encoded images by path.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores `bytes` at `path`, replacing anything already there.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> StorageResult<StorageLocation>;

    /// Reads the bytes stored at `path`.
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>>;
}

/// Storage path of a variant: `<gallery>/<stack>/<variant>/<filename>`.
pub fn variant_path(
    gallery: &impl Display,
    stack: &impl Display,
    variant: &impl Display,
    filename: &str,
) -> String {
    format!("{gallery}/{stack}/{variant}/{filename}")
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::errors::StorageError;
    use parking_lot::RwLock;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Map-backed storage for unit tests.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct MapStorage {
        pub(crate) files: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    }

    #[async_trait]
    impl Storage for MapStorage {
        async fn put(&self, path: &str, bytes: Vec<u8>) -> StorageResult<StorageLocation> {
            self.files.write().insert(path.to_string(), bytes);
            Ok(StorageLocation {
                provider: "map".into(),
                path: path.to_string(),
            })
        }

        async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
            self.files
                .read()
                .get(path)
                .cloned()
                .ok_or_else(|| StorageError::NotFound { path: path.to_string() })
        }
    }

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let image = image::RgbImage::from_pixel(width, height, image::Rgb([200, 100, 50]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }
}
