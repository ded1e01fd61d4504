mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from labelscan for tests
pub use labelscan::config::{ClassifierConfig, DetectorConfig, RecognitionConfig};
pub use labelscan::detection::{
    ClassifierModel, ClassifierOutput, DetectorModel, DetectorOutput, PixelBuffer, TextObservation,
    TextRecognizer,
};
pub use labelscan::{
    Classification, Detection, KeyFact, LabelPipeline, NormalizedRect, PipelineConfig,
    PipelineEvent, PipelineResult, Stage,
};
