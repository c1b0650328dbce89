//! Image pipelines turn a decoded original into a set of renditions.

use crate::errors::PipelineError;
use crate::model::Tags;
use async_trait::async_trait;
use image::imageops::FilterType;
use image::DynamicImage;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Free-form metadata produced by a pipeline run.
pub type Metadata = BTreeMap<String, Value>;

/// One output image of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineImage {
    /// The decoded output.
    pub image: DynamicImage,
    /// Tags describing the output, e.g. the name of its size.
    pub tags: Tags,
    /// Whether this output replaces the original.
    pub original: bool,
}

/// Everything a pipeline run produced.
#[derive(Debug, Clone, Default)]
pub struct PipelineResult {
    /// Output images in pipeline order.
    pub images: Vec<PipelineImage>,
    /// Pipeline-level metadata.
    pub metadata: Metadata,
}

/// Transforms a decoded original image.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Runs the pipeline on `image`.
    async fn run(&self, image: DynamicImage) -> Result<PipelineResult, PipelineError>;
}

/// A named target width of a [`ResizePipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeTarget {
    /// Name of the size; becomes the output's tag.
    pub name: String,
    /// Target width in pixels.
    pub width: u32,
}

/// Resizes the original to a set of named widths, keeping the aspect ratio.
///
/// The original is passed through as the first output, flagged as original,
/// unless disabled with [`ResizePipeline::without_original`].
#[derive(Debug, Clone)]
pub struct ResizePipeline {
    targets: Vec<ResizeTarget>,
    filter: FilterType,
    include_original: bool,
}

impl ResizePipeline {
    /// Creates a pipeline for `(name, width)` targets using Lanczos3 filtering.
    pub fn new<N: Into<String>>(targets: impl IntoIterator<Item = (N, u32)>) -> Self {
        Self {
            targets: targets
                .into_iter()
                .map(|(name, width)| ResizeTarget {
                    name: name.into(),
                    width,
                })
                .collect(),
            filter: FilterType::Lanczos3,
            include_original: true,
        }
    }

    /// Uses `filter` for resizing.
    #[must_use]
    pub const fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// Does not pass the original through.
    #[must_use]
    pub const fn without_original(mut self) -> Self {
        self.include_original = false;
        self
    }

    /// The configured targets.
    pub fn targets(&self) -> &[ResizeTarget] {
        &self.targets
    }

    fn resize(&self, image: &DynamicImage) -> Result<PipelineResult, PipelineError> {
        let mut result = PipelineResult::default();
        if self.include_original {
            result.images.push(PipelineImage {
                image: image.clone(),
                tags: Tags::default(),
                original: true,
            });
        }

        let mut sizes = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            if target.width == 0 {
                return Err(PipelineError::Invalid(format!(
                    "target {:?} has zero width",
                    target.name
                )));
            }
            let height = scaled_height(image.width(), image.height(), target.width);
            let resized = image.resize_exact(target.width, height, self.filter);
            sizes.push(json!({ "name": target.name, "width": target.width, "height": height }));
            result.images.push(PipelineImage {
                image: resized,
                tags: Tags::new([target.name.as_str()]),
                original: false,
            });
        }
        result.metadata.insert("sizes".into(), Value::Array(sizes));
        Ok(result)
    }
}

#[async_trait]
impl Pipeline for ResizePipeline {
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    async fn run(&self, image: DynamicImage) -> Result<PipelineResult, PipelineError> {
        let pipeline = self.clone();
        let result = tokio::task::spawn_blocking(move || pipeline.resize(&image)).await??;
        debug!(outputs = result.images.len(), "resize pipeline finished");
        Ok(result)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    if width == 0 {
        return height.max(1);
    }
    let scaled = (f64::from(height) * f64::from(target_width) / f64::from(width)).round();
    (scaled as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn image(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([10, 20, 30])))
    }

    #[tokio::test]
    async fn resizes_to_every_target_keeping_the_aspect_ratio() {
        let pipeline = ResizePipeline::new([("sm", 32), ("md", 48), ("lg", 64)]);
        let result = pipeline.run(image(80, 40)).await.unwrap();

        assert_eq!(result.images.len(), 4);
        assert!(result.images[0].original);
        assert_eq!(result.images[0].image.width(), 80);

        let sizes: Vec<_> = result.images[1..]
            .iter()
            .map(|i| (i.image.width(), i.image.height(), i.original))
            .collect();
        assert_eq!(sizes, [(32, 16, false), (48, 24, false), (64, 32, false)]);
        assert!(result.images[1].tags.contains("sm"));
        assert!(result.metadata.contains_key("sizes"));
    }

    #[tokio::test]
    async fn original_can_be_left_out() {
        let pipeline = ResizePipeline::new([("sm", 4)]).without_original();
        let result = pipeline.run(image(8, 8)).await.unwrap();
        assert_eq!(result.images.len(), 1);
        assert!(!result.images[0].original);
    }

    #[tokio::test]
    async fn zero_width_targets_are_invalid() {
        let pipeline = ResizePipeline::new([("broken", 0)]);
        assert!(matches!(
            pipeline.run(image(4, 4)).await,
            Err(PipelineError::Invalid(_))
        ));
    }

    #[test]
    fn scaled_height_never_reaches_zero() {
        assert_eq!(scaled_height(1000, 1, 10), 1);
        assert_eq!(scaled_height(100, 50, 10), 5);
    }
}
