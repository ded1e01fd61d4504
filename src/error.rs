use std::fmt;
use thiserror::Error;

/// The three independent inference stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Detector,
    Classifier,
    Ocr,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Detector => "detector",
            Stage::Classifier => "classifier",
            Stage::Ocr => "ocr",
        };
        f.write_str(name)
    }
}

/// Failures local to a single stage. None of these cross into sibling stages.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage} model unavailable: {reason}")]
    ModelUnavailable { stage: Stage, reason: String },
    #[error("Image conversion failed: {0}")]
    Conversion(String),
    #[error("Inference failed: {0}")]
    Inference(String),
    #[error("Unexpected model output: {0}")]
    InvalidOutput(String),
}

impl StageError {
    pub fn inference(err: impl fmt::Display) -> Self {
        StageError::Inference(err.to_string())
    }

    pub fn conversion(err: impl fmt::Display) -> Self {
        StageError::Conversion(err.to_string())
    }
}

pub type StageResult<T> = Result<T, StageError>;
