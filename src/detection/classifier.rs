use image::DynamicImage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::detection::preprocessing::{self, PixelBuffer};
use crate::error::{StageError, StageResult};
use crate::models::Classification;

/// What a classifier backend hands back
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierOutput {
    /// The model's own pick. Empty means "take the most probable label".
    pub top_label: String,
    pub probabilities: BTreeMap<String, f32>,
}

/// A binary (or n-ary) image classifier backend over a fixed-size buffer
pub trait ClassifierModel: Send + Sync {
    fn predict(&self, input: &PixelBuffer) -> anyhow::Result<ClassifierOutput>;
}

impl<M: ClassifierModel + ?Sized> ClassifierModel for Arc<M> {
    fn predict(&self, input: &PixelBuffer) -> anyhow::Result<ClassifierOutput> {
        (**self).predict(input)
    }
}

pub struct LabelClassifier {
    model: Box<dyn ClassifierModel>,
    config: ClassifierConfig,
}

impl LabelClassifier {
    pub fn new(model: impl ClassifierModel + 'static, config: ClassifierConfig) -> Self {
        Self {
            model: Box::new(model),
            config,
        }
    }

    /// Stretch the whole image to the model size and classify it
    pub fn classify(&self, image: &DynamicImage) -> StageResult<Classification> {
        if image.width() == 0 || image.height() == 0 {
            return Err(StageError::conversion("empty source image"));
        }

        let resized = preprocessing::stretch(image, self.config.input_size);
        let input = preprocessing::to_pixel_buffer(&resized)?;

        let output = self.model.predict(&input).map_err(StageError::inference)?;

        let classification = if output.top_label.is_empty() {
            Classification::from_probabilities(output.probabilities).ok_or_else(|| {
                StageError::InvalidOutput("classifier returned no labels".to_string())
            })?
        } else {
            Classification::new(output.top_label, output.probabilities)
        };

        debug!(
            "Classified as '{}' ({:.3})",
            classification.label, classification.confidence
        );

        Ok(classification)
    }
}
