use image::DynamicImage;
use serde::{Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::detection::classifier::{ClassifierModel, LabelClassifier};
use crate::detection::detector::{DetectorModel, LabelDetector};
use crate::detection::ocr::{TextExtractor, TextRecognizer};
use crate::error::{Stage, StageError, StageResult};
use crate::facts::TextRecognition;
use crate::models::{Classification, Detection};

const EVENT_CAPACITY: usize = 64;

/// Identity of one submitted image.
///
/// Carries the submission order so a newer image can be told apart from one
/// the publisher has not seen yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageId {
    id: Uuid,
    sequence: u64,
}

impl ImageId {
    fn new(sequence: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }

    fn is_newer_than(&self, other: &ImageId) -> bool {
        self.sequence > other.sequence
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Serialize for ImageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

/// Latest value of each stage for the current image.
///
/// Every slot belongs to `image_id`. A slot is `None` while its stage is in
/// flight, or when it failed or is unavailable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub image_id: Option<ImageId>,
    pub detections: Option<Vec<Detection>>,
    pub classification: Option<Classification>,
    pub text_recognition: Option<TextRecognition>,
    /// Stages launched for `image_id` that have not reported yet
    pub pending: BTreeSet<Stage>,
    /// First model initialisation failure, kept for display
    pub initialization_error: Option<String>,
}

impl PipelineResult {
    pub fn is_settled(&self) -> bool {
        self.pending.is_empty()
    }

    fn reset_for(&mut self, image_id: ImageId) {
        self.image_id = Some(image_id);
        self.detections = None;
        self.classification = None;
        self.text_recognition = None;
        self.pending = [Stage::Detector, Stage::Classifier, Stage::Ocr].into();
    }
}

/// Progress notifications, mostly useful for observers and tests
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    Submitted(ImageId),
    Published { image_id: ImageId, stage: Stage },
    /// A result arrived for an image that is no longer current
    Discarded { image_id: ImageId, stage: Stage },
    Failed { image_id: ImageId, stage: Stage, reason: String },
    ModelUnavailable { stage: Stage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelStatus {
    Loading,
    Ready,
    Unavailable(String),
}

enum ModelState<T> {
    Loading,
    Ready(Arc<T>),
    Unavailable(String),
}

impl<T> Clone for ModelState<T> {
    fn clone(&self) -> Self {
        match self {
            ModelState::Loading => ModelState::Loading,
            ModelState::Ready(model) => ModelState::Ready(model.clone()),
            ModelState::Unavailable(reason) => ModelState::Unavailable(reason.clone()),
        }
    }
}

impl<T> ModelState<T> {
    fn is_loading(&self) -> bool {
        matches!(self, ModelState::Loading)
    }

    fn status(&self) -> ModelStatus {
        match self {
            ModelState::Loading => ModelStatus::Loading,
            ModelState::Ready(_) => ModelStatus::Ready,
            ModelState::Unavailable(reason) => ModelStatus::Unavailable(reason.clone()),
        }
    }
}

enum Outcome {
    Detections(Vec<Detection>),
    Classification(Classification),
    Text(TextRecognition),
    Failed(String),
    Skipped,
}

enum Update {
    Submitted(ImageId),
    Stage {
        image_id: ImageId,
        stage: Stage,
        outcome: Outcome,
    },
    ModelUnavailable {
        stage: Stage,
        reason: String,
    },
}

type Loader<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

/// Collects model loaders before the pipeline starts
pub struct PipelineBuilder {
    config: PipelineConfig,
    detector: Option<Loader<LabelDetector>>,
    classifier: Option<Loader<LabelClassifier>>,
    text: Option<Loader<TextExtractor>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            detector: None,
            classifier: None,
            text: None,
        }
    }

    /// Load the detector backend in the background
    pub fn detector<M, F>(mut self, load: F) -> Self
    where
        M: DetectorModel + 'static,
        F: FnOnce() -> anyhow::Result<M> + Send + 'static,
    {
        let config = self.config.detector.clone();
        self.detector = Some(Box::new(move || Ok(LabelDetector::new(load()?, config))));
        self
    }

    /// Load the classifier backend in the background
    pub fn classifier<M, F>(mut self, load: F) -> Self
    where
        M: ClassifierModel + 'static,
        F: FnOnce() -> anyhow::Result<M> + Send + 'static,
    {
        let config = self.config.classifier.clone();
        self.classifier = Some(Box::new(move || Ok(LabelClassifier::new(load()?, config))));
        self
    }

    /// Load the text recognizer in the background
    pub fn text_recognizer<R, F>(mut self, load: F) -> Self
    where
        R: TextRecognizer + 'static,
        F: FnOnce() -> anyhow::Result<R> + Send + 'static,
    {
        let config = self.config.ocr.clone();
        self.text = Some(Box::new(move || Ok(TextExtractor::new(load()?, config))));
        self
    }

    /// Start loading models and the publisher. Must run inside a tokio runtime.
    pub fn build(self) -> LabelPipeline {
        let (updates, update_rx) = mpsc::unbounded_channel();
        let (result_tx, results) = watch::channel(PipelineResult::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        tokio::spawn(publish_loop(update_rx, result_tx, events.clone()));

        LabelPipeline {
            detector: spawn_loader(Stage::Detector, self.detector, updates.clone()),
            classifier: spawn_loader(Stage::Classifier, self.classifier, updates.clone()),
            text: spawn_loader(Stage::Ocr, self.text, updates.clone()),
            submissions: Mutex::new(0),
            updates,
            results,
            events,
        }
    }
}

fn spawn_loader<T: Send + Sync + 'static>(
    stage: Stage,
    loader: Option<Loader<T>>,
    updates: mpsc::UnboundedSender<Update>,
) -> watch::Receiver<ModelState<T>> {
    let Some(loader) = loader else {
        info!("No {} backend configured, stage disabled", stage);
        let (_, rx) = watch::channel(ModelState::Unavailable("not configured".to_string()));
        return rx;
    };

    let (tx, rx) = watch::channel(ModelState::Loading);

    tokio::spawn(async move {
        let failure = match tokio::task::spawn_blocking(loader).await {
            Ok(Ok(model)) => {
                info!("{} model initialized", stage);
                tx.send_replace(ModelState::Ready(Arc::new(model)));
                return;
            }
            Ok(Err(e)) => StageError::ModelUnavailable {
                stage,
                reason: e.to_string(),
            },
            Err(e) => StageError::ModelUnavailable {
                stage,
                reason: format!("loader panicked: {}", e),
            },
        };

        let reason = failure.to_string();
        error!("{}", reason);
        let _ = updates.send(Update::ModelUnavailable {
            stage,
            reason: reason.clone(),
        });
        let state = ModelState::Unavailable(reason);
        tx.send_replace(state);
    });

    rx
}

/// Fans one image out to the detector, classifier and OCR stages and keeps
/// the latest result of each for the most recently submitted image.
///
/// Results are applied by a single publisher task. A stage result that
/// arrives after a newer image was submitted is dropped.
pub struct LabelPipeline {
    detector: watch::Receiver<ModelState<LabelDetector>>,
    classifier: watch::Receiver<ModelState<LabelClassifier>>,
    text: watch::Receiver<ModelState<TextExtractor>>,
    submissions: Mutex<u64>,
    updates: mpsc::UnboundedSender<Update>,
    results: watch::Receiver<PipelineResult>,
    events: broadcast::Sender<PipelineEvent>,
}

impl LabelPipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    /// Make `image` current and start all three stages on it
    pub fn submit(&self, image: DynamicImage) -> ImageId {
        let image = Arc::new(image);

        // Sent before any stage starts, so the publisher always sees the
        // submission ahead of its results
        let image_id = {
            let mut sequence = self
                .submissions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *sequence += 1;
            let image_id = ImageId::new(*sequence);
            let _ = self.updates.send(Update::Submitted(image_id));
            image_id
        };

        debug!(
            "Submitted image {} ({}x{})",
            image_id,
            image.width(),
            image.height()
        );

        tokio::spawn(run_stage(
            Stage::Detector,
            self.detector.clone(),
            image.clone(),
            image_id,
            self.updates.clone(),
            |detector: &LabelDetector, img: &DynamicImage| {
                detector.detect(img).map(Outcome::Detections)
            },
        ));

        tokio::spawn(run_stage(
            Stage::Classifier,
            self.classifier.clone(),
            image.clone(),
            image_id,
            self.updates.clone(),
            |classifier: &LabelClassifier, img: &DynamicImage| {
                classifier.classify(img).map(Outcome::Classification)
            },
        ));

        tokio::spawn(run_stage(
            Stage::Ocr,
            self.text.clone(),
            image,
            image_id,
            self.updates.clone(),
            |extractor: &TextExtractor, img: &DynamicImage| {
                extractor.recognize(img).map(Outcome::Text)
            },
        ));

        image_id
    }

    /// Current state of all slots
    pub fn snapshot(&self) -> PipelineResult {
        self.results.borrow().clone()
    }

    /// Watch the result slots change
    pub fn subscribe(&self) -> watch::Receiver<PipelineResult> {
        self.results.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn model_status(&self, stage: Stage) -> ModelStatus {
        match stage {
            Stage::Detector => self.detector.borrow().status(),
            Stage::Classifier => self.classifier.borrow().status(),
            Stage::Ocr => self.text.borrow().status(),
        }
    }

    /// Wait until no model is still loading
    pub async fn wait_for_models(&self) {
        let _ = self.detector.clone().wait_for(|s| !s.is_loading()).await;
        let _ = self.classifier.clone().wait_for(|s| !s.is_loading()).await;
        let _ = self.text.clone().wait_for(|s| !s.is_loading()).await;
    }

    /// Wait until every stage has reported for `image_id`.
    ///
    /// Returns `None` once a newer image has replaced it.
    pub async fn settled(&self, image_id: ImageId) -> Option<PipelineResult> {
        let mut results = self.results.clone();
        let state = results
            .wait_for(|r| match r.image_id {
                Some(current) if current == image_id => r.is_settled(),
                Some(current) => current.is_newer_than(&image_id),
                None => false,
            })
            .await
            .ok()?
            .clone();

        (state.image_id == Some(image_id)).then_some(state)
    }
}

async fn run_stage<T, F>(
    stage: Stage,
    mut model: watch::Receiver<ModelState<T>>,
    image: Arc<DynamicImage>,
    image_id: ImageId,
    updates: mpsc::UnboundedSender<Update>,
    infer: F,
) where
    T: Send + Sync + 'static,
    F: FnOnce(&T, &DynamicImage) -> StageResult<Outcome> + Send + 'static,
{
    let state = match model.wait_for(|s| !s.is_loading()).await {
        Ok(state) => state.clone(),
        Err(_) => ModelState::Unavailable("model loader went away".to_string()),
    };

    let outcome = match state {
        ModelState::Ready(model) => {
            match tokio::task::spawn_blocking(move || infer(&*model, &*image)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => Outcome::Failed(e.to_string()),
                Err(e) => Outcome::Failed(format!("stage task panicked: {}", e)),
            }
        }
        ModelState::Loading | ModelState::Unavailable(_) => Outcome::Skipped,
    };

    let _ = updates.send(Update::Stage {
        image_id,
        stage,
        outcome,
    });
}

async fn publish_loop(
    mut updates: mpsc::UnboundedReceiver<Update>,
    results: watch::Sender<PipelineResult>,
    events: broadcast::Sender<PipelineEvent>,
) {
    while let Some(update) = updates.recv().await {
        match update {
            Update::Submitted(image_id) => {
                results.send_modify(|r| r.reset_for(image_id));
                let _ = events.send(PipelineEvent::Submitted(image_id));
            }
            Update::ModelUnavailable { stage, reason } => {
                results.send_modify(|r| {
                    if r.initialization_error.is_none() {
                        r.initialization_error = Some(reason.clone());
                    }
                });
                let _ = events.send(PipelineEvent::ModelUnavailable { stage, reason });
            }
            Update::Stage {
                image_id,
                stage,
                outcome,
            } => {
                let current = results.borrow().image_id;
                if current != Some(image_id) {
                    debug!("Dropping stale {} result for image {}", stage, image_id);
                    let _ = events.send(PipelineEvent::Discarded { image_id, stage });
                    continue;
                }

                let event = match &outcome {
                    Outcome::Failed(reason) => {
                        warn!("{} failed for image {}: {}", stage, image_id, reason);
                        Some(PipelineEvent::Failed {
                            image_id,
                            stage,
                            reason: reason.clone(),
                        })
                    }
                    Outcome::Skipped => None,
                    _ => Some(PipelineEvent::Published { image_id, stage }),
                };

                results.send_modify(move |r| {
                    r.pending.remove(&stage);
                    match outcome {
                        Outcome::Detections(detections) => r.detections = Some(detections),
                        Outcome::Classification(c) => r.classification = Some(c),
                        Outcome::Text(text) => r.text_recognition = Some(text),
                        Outcome::Failed(_) | Outcome::Skipped => {}
                    }
                });

                if let Some(event) = event {
                    let _ = events.send(event);
                }
            }
        }
    }

    debug!("Publisher stopped");
}
