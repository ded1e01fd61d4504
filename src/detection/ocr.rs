use image::DynamicImage;
use ocrs::{ImageSource, OcrEngine, OcrEngineParams, TextItem};
use rten::Model;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{RecognitionConfig, RecognitionLevel};
use crate::error::{StageError, StageResult};
use crate::facts::TextRecognition;
use crate::models::NormalizedRect;

/// One candidate reading of a text region
#[derive(Debug, Clone, PartialEq)]
pub struct TextCandidate {
    pub text: String,
    pub confidence: f32,
}

/// One recognized text region, in reading order
#[derive(Debug, Clone, PartialEq)]
pub struct TextObservation {
    pub candidates: Vec<TextCandidate>,
    /// Region in image-normalized coordinates, when the backend reports it
    pub bounds: Option<NormalizedRect>,
}

impl TextObservation {
    pub fn single(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            candidates: vec![TextCandidate {
                text: text.into(),
                confidence,
            }],
            bounds: None,
        }
    }

    pub fn with_bounds(mut self, bounds: NormalizedRect) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Highest-confidence candidate; the earliest wins ties and a NaN
    /// confidence never wins
    pub fn top_candidate(&self) -> Option<&TextCandidate> {
        self.candidates
            .iter()
            .filter(|c| !c.confidence.is_nan())
            .fold(None, |best: Option<&TextCandidate>, c| match best {
                Some(b) if b.confidence >= c.confidence => Some(b),
                _ => Some(c),
            })
    }
}

/// A text recognition backend
pub trait TextRecognizer: Send + Sync {
    fn recognize(
        &self,
        image: &DynamicImage,
        config: &RecognitionConfig,
    ) -> anyhow::Result<Vec<TextObservation>>;
}

impl<R: TextRecognizer + ?Sized> TextRecognizer for Arc<R> {
    fn recognize(
        &self,
        image: &DynamicImage,
        config: &RecognitionConfig,
    ) -> anyhow::Result<Vec<TextObservation>> {
        (**self).recognize(image, config)
    }
}

/// Runs the recognizer over a whole image and joins what it reads
pub struct TextExtractor {
    recognizer: Box<dyn TextRecognizer>,
    config: RecognitionConfig,
}

impl TextExtractor {
    pub fn new(recognizer: impl TextRecognizer + 'static, config: RecognitionConfig) -> Self {
        Self {
            recognizer: Box::new(recognizer),
            config,
        }
    }

    pub fn config(&self) -> &RecognitionConfig {
        &self.config
    }

    /// Top candidate of every region, joined by single spaces
    pub fn extract_text(&self, image: &DynamicImage) -> StageResult<String> {
        if image.width() == 0 || image.height() == 0 {
            return Err(StageError::conversion("image has no pixels"));
        }

        let observations = self
            .recognizer
            .recognize(image, &self.config)
            .map_err(StageError::inference)?;

        let min_height = self.config.minimum_text_height;
        let text = observations
            .iter()
            .filter(|obs| match (min_height, obs.bounds) {
                (Some(min), Some(bounds)) => bounds.height >= min,
                _ => true,
            })
            .filter_map(|obs| obs.top_candidate())
            .map(|candidate| candidate.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        debug!(
            "Recognized {} regions, {} chars",
            observations.len(),
            text.len()
        );

        Ok(text)
    }

    /// Recognize and derive key facts
    pub fn recognize(&self, image: &DynamicImage) -> StageResult<TextRecognition> {
        let text = self.extract_text(image)?;
        Ok(TextRecognition::new(&text))
    }
}

/// Default location of the ocrs models
pub fn default_model_dir() -> anyhow::Result<PathBuf> {
    let home_dir = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE"))?;
    Ok(Path::new(&home_dir).join(".cache/ocrs"))
}

/// [`TextRecognizer`] backed by the ocrs engine.
///
/// ocrs reads Latin script only and has no language, vocabulary or speed
/// settings, so those parts of the config are accepted and ignored. Each
/// recognized line becomes one observation with its bounding box.
pub struct OcrsRecognizer {
    engine: OcrEngine,
}

impl OcrsRecognizer {
    /// Load `text-detection.rten` and `text-recognition.rten` from `model_dir`
    pub fn load(model_dir: &Path) -> anyhow::Result<Self> {
        let detection_path = model_dir.join("text-detection.rten");
        let recognition_path = model_dir.join("text-recognition.rten");

        for path in [&detection_path, &recognition_path] {
            if !path.exists() {
                anyhow::bail!(
                    "OCR model {} not found (download the ocrs models into {})",
                    path.display(),
                    model_dir.display()
                );
            }
        }

        info!("Loading OCR models from {}", model_dir.display());
        let engine = OcrEngine::new(OcrEngineParams {
            detection_model: Some(Model::load_file(&detection_path)?),
            recognition_model: Some(Model::load_file(&recognition_path)?),
            ..Default::default()
        })?;
        info!("OCR engine initialized");

        Ok(Self { engine })
    }
}

impl TextRecognizer for OcrsRecognizer {
    fn recognize(
        &self,
        image: &DynamicImage,
        config: &RecognitionConfig,
    ) -> anyhow::Result<Vec<TextObservation>> {
        if config.level == RecognitionLevel::Fast || config.custom_words.is_some() {
            debug!("ocrs ignores recognition level and custom words");
        }

        let img = image.to_rgb8();
        let dimensions = img.dimensions();
        let img_source = ImageSource::from_bytes(img.as_raw(), dimensions)
            .map_err(|e| anyhow::anyhow!("Invalid image for OCR: {:?}", e))?;
        let ocr_input = self.engine.prepare_input(img_source)?;

        let words = self.engine.detect_words(&ocr_input)?;
        let line_rects = self.engine.find_text_lines(&ocr_input, &words);
        let lines = self.engine.recognize_text(&ocr_input, &line_rects)?;

        // ocrs does not score whole lines
        Ok(lines
            .into_iter()
            .flatten()
            .filter_map(|line| {
                let text = line.to_string();
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let rect = line.bounding_rect();
                let observation = TextObservation::single(text, 1.0);
                Some(
                    match normalize_pixel_rect(
                        (rect.left(), rect.top(), rect.width(), rect.height()),
                        dimensions,
                    ) {
                        Some(bounds) => observation.with_bounds(bounds),
                        None => observation,
                    },
                )
            })
            .collect())
    }
}

/// Pixel rect `(left, top, width, height)` as a fraction of the image size
fn normalize_pixel_rect(
    (left, top, width, height): (i32, i32, i32, i32),
    (image_width, image_height): (u32, u32),
) -> Option<NormalizedRect> {
    if image_width == 0 || image_height == 0 {
        return None;
    }
    let w = image_width as f32;
    let h = image_height as f32;
    Some(NormalizedRect::new(
        left as f32 / w,
        top as f32 / h,
        width as f32 / w,
        height as f32 / h,
    ))
}
