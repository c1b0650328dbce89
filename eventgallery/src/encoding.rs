//! Encoding decoded images back into bytes.
//!
//! [`Encoder`] dispatches on the MIME content type. Encoders for PNG, JPEG
//! (full quality) and GIF are available through [`Encoder::with_defaults`];
//! more can be registered at runtime.

use crate::errors::EncodeError;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, Frame, ImageError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// Content type of PNG images.
pub const PNG: &str = "image/png";
/// Content type of JPEG images.
pub const JPEG: &str = "image/jpeg";
/// Content type of GIF images.
pub const GIF: &str = "image/gif";

/// Number of leading bytes inspected by [`detect_content_type`].
pub const SNIFF_LEN: usize = 512;

/// Encodes images of a given content type.
pub trait Encoding: Send + Sync {
    /// Writes `image` to `writer` as `content_type`.
    fn encode(
        &self,
        writer: &mut dyn Write,
        content_type: &str,
        image: &DynamicImage,
    ) -> Result<(), EncodeError>;
}

type EncodeFn = dyn Fn(&mut dyn Write, &DynamicImage) -> Result<(), ImageError> + Send + Sync;

/// A registry of encoders keyed by content type.
#[derive(Clone, Default)]
pub struct Encoder {
    encoders: Arc<RwLock<HashMap<String, Arc<EncodeFn>>>>,
}

impl std::fmt::Debug for Encoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.encoders.read().keys().cloned().collect();
        types.sort();
        f.debug_struct("Encoder").field("content_types", &types).finish()
    }
}

impl Encoder {
    /// Creates an encoder without any registered content types.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an encoder for PNG, JPEG and GIF.
    pub fn with_defaults() -> Self {
        let encoder = Self::new();
        encoder.register(PNG, |w, img| img.write_with_encoder(PngEncoder::new(w)));
        encoder.register(JPEG, |w, img| {
            DynamicImage::ImageRgb8(img.to_rgb8())
                .write_with_encoder(JpegEncoder::new_with_quality(w, 100))
        });
        encoder.register(GIF, |w, img| {
            GifEncoder::new(w).encode_frame(Frame::new(img.to_rgba8()))
        });
        encoder
    }

    /// Registers `encode` for `content_type`, replacing any previous encoder.
    pub fn register<F>(&self, content_type: impl Into<String>, encode: F)
    where
        F: Fn(&mut dyn Write, &DynamicImage) -> Result<(), ImageError> + Send + Sync + 'static,
    {
        self.encoders
            .write()
            .insert(content_type.into(), Arc::new(encode));
    }

    /// Whether an encoder is registered for `content_type`.
    pub fn supports(&self, content_type: &str) -> bool {
        self.encoders.read().contains_key(content_type)
    }

    /// Encodes `image` into a new buffer.
    pub fn encode_to_vec(
        &self,
        content_type: &str,
        image: &DynamicImage,
    ) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::new();
        self.encode(&mut buf, content_type, image)?;
        Ok(buf)
    }
}

impl Encoding for Encoder {
    fn encode(
        &self,
        writer: &mut dyn Write,
        content_type: &str,
        image: &DynamicImage,
    ) -> Result<(), EncodeError> {
        let encode = self
            .encoders
            .read()
            .get(content_type)
            .cloned()
            .ok_or_else(|| EncodeError::MissingEncoder {
                content_type: content_type.to_string(),
            })?;
        encode(writer, image).map_err(|source| EncodeError::Image {
            content_type: content_type.to_string(),
            source,
        })
    }
}

/// Detects the MIME type of encoded image bytes from their first
/// [`SNIFF_LEN`] bytes. Unrecognized data yields `application/octet-stream`.
pub fn detect_content_type(bytes: &[u8]) -> &'static str {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    image::guess_format(head).map_or("application/octet-stream", |format| format.to_mime_type())
}
