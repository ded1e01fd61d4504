pub mod config;
pub mod detection;
pub mod error;
pub mod facts;
pub mod models;
pub mod pipeline;

pub use config::PipelineConfig;
pub use error::{Stage, StageError};
pub use facts::{KeyFact, TextRecognition};
pub use models::{Classification, Detection, NormalizedRect};
pub use pipeline::{ImageId, LabelPipeline, PipelineEvent, PipelineResult};
