pub mod classifier;
pub mod detector;
pub mod ocr;
pub mod overlay;
pub mod postprocess;
pub mod preprocessing;

pub use classifier::{ClassifierModel, ClassifierOutput, LabelClassifier};
pub use detector::{DetectorModel, LabelDetector};
pub use ocr::{OcrsRecognizer, TextCandidate, TextExtractor, TextObservation, TextRecognizer};
pub use postprocess::{DetectorOutput, Postprocessor};
pub use preprocessing::{Letterbox, PixelBuffer};
