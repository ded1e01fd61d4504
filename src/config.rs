use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Detector stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Side of the square model input
    pub input_size: u32,
    /// Boxes whose best class score is below this are dropped
    pub confidence_threshold: f32,
    /// Handed to the model's own duplicate suppression
    pub iou_threshold: f32,
    /// Handed to the model, looser than `confidence_threshold`
    pub model_confidence_threshold: f32,
    pub class_labels: Vec<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.50,
            iou_threshold: 0.45,
            model_confidence_threshold: 0.25,
            class_labels: vec!["nutrition_label".to_string()],
        }
    }
}

/// Classifier stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub input_size: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self { input_size: 360 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecognitionLevel {
    #[default]
    Accurate,
    Fast,
}

/// Text recognition settings handed to the recognizer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub languages: Vec<String>,
    pub level: RecognitionLevel,
    pub custom_words: Option<Vec<String>>,
    /// Fraction of the image height below which text is ignored
    pub minimum_text_height: Option<f32>,
    pub automatic_language_detection: bool,
    pub language_correction: bool,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            languages: preferred_languages(),
            level: RecognitionLevel::Accurate,
            custom_words: None,
            minimum_text_height: None,
            automatic_language_detection: true,
            language_correction: true,
        }
    }
}

/// Languages from the process locale (`LANGUAGE`, then `LANG`), e.g.
/// `fr_CA.UTF-8` becomes `fr-CA`. Falls back to `en-US`.
pub fn preferred_languages() -> Vec<String> {
    let from_env = |var: &str| -> Vec<String> {
        std::env::var(var)
            .ok()
            .map(|value| {
                value
                    .split(':')
                    .filter_map(locale_to_language_tag)
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut languages = from_env("LANGUAGE");
    if languages.is_empty() {
        languages = from_env("LANG");
    }
    if languages.is_empty() {
        languages.push("en-US".to_string());
    }
    languages
}

fn locale_to_language_tag(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?.trim();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// Top-level configuration for the whole pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    pub classifier: ClassifierConfig,
    pub ocr: RecognitionConfig,
}

impl PipelineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: PipelineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let unit = 0.0..=1.0;

        if self.detector.input_size == 0 {
            bail!("detector.input_size must be positive");
        }
        if self.classifier.input_size == 0 {
            bail!("classifier.input_size must be positive");
        }
        if !unit.contains(&self.detector.confidence_threshold) {
            bail!(
                "detector.confidence_threshold must be within [0, 1], got {}",
                self.detector.confidence_threshold
            );
        }
        if !unit.contains(&self.detector.model_confidence_threshold) {
            bail!(
                "detector.model_confidence_threshold must be within [0, 1], got {}",
                self.detector.model_confidence_threshold
            );
        }
        if !unit.contains(&self.detector.iou_threshold) {
            bail!(
                "detector.iou_threshold must be within [0, 1], got {}",
                self.detector.iou_threshold
            );
        }
        if let Some(height) = self.ocr.minimum_text_height {
            if !unit.contains(&height) {
                bail!("ocr.minimum_text_height must be within [0, 1], got {}", height);
            }
        }
        Ok(())
    }
}
