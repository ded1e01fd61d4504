use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::detection::postprocess::{DetectorOutput, Postprocessor};
use crate::detection::preprocessing::{self, PixelBuffer};
use crate::error::{StageError, StageResult};
use crate::models::Detection;

/// A bounding-box detector backend.
///
/// Receives a letterboxed square pixel buffer and returns raw class scores
/// and center-form boxes. Duplicate suppression happens inside the model.
pub trait DetectorModel: Send + Sync {
    fn predict(
        &self,
        input: &PixelBuffer,
        iou_threshold: f32,
        confidence_threshold: f32,
    ) -> anyhow::Result<DetectorOutput>;
}

impl<M: DetectorModel + ?Sized> DetectorModel for Arc<M> {
    fn predict(
        &self,
        input: &PixelBuffer,
        iou_threshold: f32,
        confidence_threshold: f32,
    ) -> anyhow::Result<DetectorOutput> {
        (**self).predict(input, iou_threshold, confidence_threshold)
    }
}

/// Letterbox, run the detector, post-process
pub struct LabelDetector {
    model: Box<dyn DetectorModel>,
    config: DetectorConfig,
    postprocessor: Postprocessor,
}

impl LabelDetector {
    pub fn new(model: impl DetectorModel + 'static, config: DetectorConfig) -> Self {
        let postprocessor =
            Postprocessor::new(config.confidence_threshold, config.class_labels.clone());
        Self {
            model: Box::new(model),
            config,
            postprocessor,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn detect(&self, image: &DynamicImage) -> StageResult<Vec<Detection>> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(StageError::Conversion(format!(
                "empty source image {}x{}",
                width, height
            )));
        }

        let boxed = preprocessing::letterbox(image, self.config.input_size);
        let input = preprocessing::to_pixel_buffer(&boxed)?;

        let output = self
            .model
            .predict(
                &input,
                self.config.iou_threshold,
                self.config.model_confidence_threshold,
            )
            .map_err(StageError::inference)?;

        debug!(
            "Detector returned {} boxes x {} classes for {}x{} image",
            output.num_boxes(),
            output.num_classes(),
            width,
            height
        );

        Ok(self.postprocessor.process(&output, (width, height)))
    }
}
