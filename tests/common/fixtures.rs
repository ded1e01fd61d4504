use image::{DynamicImage, Rgb, RgbImage};
use labelscan::config::RecognitionConfig;
use labelscan::detection::{
    ClassifierModel, ClassifierOutput, DetectorModel, DetectorOutput, PixelBuffer, TextObservation,
    TextRecognizer,
};
use labelscan::{LabelPipeline, PipelineConfig, PipelineEvent};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, mpsc as std_mpsc};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

/// How long a test waits on the pipeline before giving up
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Color constants for tests
pub const LABEL_RED: [u8; 3] = [255, 0, 0];
pub const PLAIN_BLUE: [u8; 3] = [0, 0, 255];

/// Solid-colored test image
pub fn solid_image(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

/// Default config with a fixed language list, independent of the host locale
pub fn test_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.ocr.languages = vec!["en-US".to_string()];
    config
}

/// Await `future`, failing the test if it takes longer than [`TEST_TIMEOUT`]
pub async fn within<F: Future>(future: F) -> anyhow::Result<F::Output> {
    tokio::time::timeout(TEST_TIMEOUT, future)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {:?}", TEST_TIMEOUT))
}

/// Receive events until one matches `predicate`
pub async fn wait_for_event(
    events: &mut broadcast::Receiver<PipelineEvent>,
    predicate: impl Fn(&PipelineEvent) -> bool,
) -> anyhow::Result<PipelineEvent> {
    within(async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    anyhow::bail!("event channel closed")
                }
            }
        }
    })
    .await?
}

/// Detector that always returns the same raw output and records the input
/// size it was given
pub struct FixedDetector {
    output: DetectorOutput,
    pub input_sizes: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl FixedDetector {
    pub fn new(confidence: Vec<Vec<f32>>, coordinates: Vec<[f32; 4]>) -> Self {
        Self {
            output: DetectorOutput::from_rows(confidence, coordinates)
                .expect("Failed to build detector output"),
            input_sizes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// One centered box covering the middle of the square at 0.9
    pub fn single_label() -> Self {
        Self::new(vec![vec![0.9]], vec![[0.5, 0.5, 0.4, 0.3]])
    }
}

impl DetectorModel for FixedDetector {
    fn predict(
        &self,
        input: &PixelBuffer,
        _iou_threshold: f32,
        _confidence_threshold: f32,
    ) -> anyhow::Result<DetectorOutput> {
        self.input_sizes
            .lock()
            .expect("lock poisoned")
            .push((input.width(), input.height()));
        Ok(self.output.clone())
    }
}

pub struct FailingDetector;

impl DetectorModel for FailingDetector {
    fn predict(&self, _: &PixelBuffer, _: f32, _: f32) -> anyhow::Result<DetectorOutput> {
        anyhow::bail!("detector exploded")
    }
}

/// Labels an image by the color of its top-left pixel: red reads as
/// `nutrition`, anything else as `other`
pub struct ColorClassifier {
    gate: Option<Gate>,
}

struct Gate {
    color: [u8; 3],
    started: mpsc::UnboundedSender<()>,
    release: Mutex<std_mpsc::Receiver<()>>,
}

/// Test side of a gated classifier
pub struct GateControl {
    /// Fires when a gated call starts
    pub started: mpsc::UnboundedReceiver<()>,
    /// Each send lets one gated call finish
    pub release: std_mpsc::Sender<()>,
}

impl ColorClassifier {
    pub fn new() -> Self {
        Self { gate: None }
    }

    /// Calls on images of `color` block until released through the control
    pub fn gated(color: [u8; 3]) -> (Self, GateControl) {
        let (started_tx, started_rx) = mpsc::unbounded_channel();
        let (release_tx, release_rx) = std_mpsc::channel();
        let classifier = Self {
            gate: Some(Gate {
                color,
                started: started_tx,
                release: Mutex::new(release_rx),
            }),
        };
        let control = GateControl {
            started: started_rx,
            release: release_tx,
        };
        (classifier, control)
    }
}

impl ClassifierModel for ColorClassifier {
    fn predict(&self, input: &PixelBuffer) -> anyhow::Result<ClassifierOutput> {
        let color = input
            .rgb(0, 0)
            .ok_or_else(|| anyhow::anyhow!("empty input"))?;

        if let Some(gate) = &self.gate {
            if gate.color == color {
                let _ = gate.started.send(());
                gate.release
                    .lock()
                    .map_err(|_| anyhow::anyhow!("gate poisoned"))?
                    .recv()?;
            }
        }

        let nutrition = if color == LABEL_RED { 0.93 } else { 0.08 };
        let probabilities = BTreeMap::from([
            ("nutrition".to_string(), nutrition),
            ("other".to_string(), 1.0 - nutrition),
        ]);
        let top_label = if nutrition >= 0.5 { "nutrition" } else { "other" };

        Ok(ClassifierOutput {
            top_label: top_label.to_string(),
            probabilities,
        })
    }
}

/// Recognizer that reads the same observations from every image
pub struct FixedRecognizer {
    observations: Vec<TextObservation>,
}

impl FixedRecognizer {
    pub fn new(observations: Vec<TextObservation>) -> Self {
        Self { observations }
    }

    /// One observation per line, all fully confident
    pub fn lines(lines: &[&str]) -> Self {
        Self::new(
            lines
                .iter()
                .map(|line| TextObservation::single(*line, 1.0))
                .collect(),
        )
    }
}

impl TextRecognizer for FixedRecognizer {
    fn recognize(
        &self,
        _image: &DynamicImage,
        _config: &RecognitionConfig,
    ) -> anyhow::Result<Vec<TextObservation>> {
        Ok(self.observations.clone())
    }
}

/// Pipeline with all three stages backed by fakes
pub fn fake_pipeline(classifier: ColorClassifier) -> LabelPipeline {
    LabelPipeline::builder(test_config())
        .detector(|| Ok(FixedDetector::single_label()))
        .classifier(move || Ok(classifier))
        .text_recognizer(|| {
            Ok(FixedRecognizer::lines(&[
                "Nutrition Facts",
                "Per 100 g",
                "Calories 250",
                "Sugars 12 g",
            ]))
        })
        .build()
}
