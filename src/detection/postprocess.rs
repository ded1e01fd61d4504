use tracing::{debug, warn};

use crate::error::{StageError, StageResult};
use crate::models::{Detection, NormalizedRect};

const COORDINATES_PER_BOX: usize = 4;

/// Raw detector output: per-box class scores and per-box `(cx, cy, w, h)`
/// in the model's normalized input frame. Stored row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOutput {
    confidence: Vec<f32>,
    coordinates: Vec<f32>,
    num_boxes: usize,
    num_classes: usize,
}

impl DetectorOutput {
    /// Build from nested rows, one confidence row and one coordinate row per box
    pub fn from_rows(confidence: Vec<Vec<f32>>, coordinates: Vec<[f32; 4]>) -> StageResult<Self> {
        if confidence.len() != coordinates.len() {
            return Err(StageError::InvalidOutput(format!(
                "{} confidence rows but {} coordinate rows",
                confidence.len(),
                coordinates.len()
            )));
        }

        let num_boxes = confidence.len();
        let num_classes = confidence.first().map(Vec::len).unwrap_or(0);
        if confidence.iter().any(|row| row.len() != num_classes) {
            return Err(StageError::InvalidOutput(
                "confidence rows have differing class counts".to_string(),
            ));
        }

        Ok(Self {
            confidence: confidence.into_iter().flatten().collect(),
            coordinates: coordinates.into_iter().flatten().collect(),
            num_boxes,
            num_classes,
        })
    }

    /// Build from flat tensors. Accepts `[boxes, classes]` / `[boxes, 4]` or the
    /// batched `[1, boxes, classes]` / `[1, boxes, 4]` feature shapes.
    pub fn from_tensors(
        confidence: Vec<f32>,
        confidence_shape: &[usize],
        coordinates: Vec<f32>,
        coordinates_shape: &[usize],
    ) -> StageResult<Self> {
        let (num_boxes, num_classes) = unbatch_shape(confidence_shape, "confidence")?;
        let (coord_boxes, coord_width) = unbatch_shape(coordinates_shape, "coordinates")?;

        if coord_width != COORDINATES_PER_BOX {
            return Err(StageError::InvalidOutput(format!(
                "coordinates must have {} values per box, got {}",
                COORDINATES_PER_BOX, coord_width
            )));
        }
        if coord_boxes != num_boxes {
            return Err(StageError::InvalidOutput(format!(
                "{} confidence boxes but {} coordinate boxes",
                num_boxes, coord_boxes
            )));
        }
        if confidence.len() != num_boxes * num_classes {
            return Err(StageError::InvalidOutput(format!(
                "confidence tensor holds {} values, shape needs {}",
                confidence.len(),
                num_boxes * num_classes
            )));
        }
        if coordinates.len() != num_boxes * COORDINATES_PER_BOX {
            return Err(StageError::InvalidOutput(format!(
                "coordinates tensor holds {} values, shape needs {}",
                coordinates.len(),
                num_boxes * COORDINATES_PER_BOX
            )));
        }

        Ok(Self {
            confidence,
            coordinates,
            num_boxes,
            num_classes,
        })
    }

    pub fn num_boxes(&self) -> usize {
        self.num_boxes
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn confidence_row(&self, index: usize) -> &[f32] {
        let start = index * self.num_classes;
        &self.confidence[start..start + self.num_classes]
    }

    pub fn coordinates_row(&self, index: usize) -> &[f32] {
        let start = index * COORDINATES_PER_BOX;
        &self.coordinates[start..start + COORDINATES_PER_BOX]
    }
}

fn unbatch_shape(shape: &[usize], name: &str) -> StageResult<(usize, usize)> {
    match shape {
        [rows, cols] => Ok((*rows, *cols)),
        [1, rows, cols] => Ok((*rows, *cols)),
        _ => Err(StageError::InvalidOutput(format!(
            "unsupported {} shape {:?}",
            name, shape
        ))),
    }
}

/// Best class of a score row. The first index wins ties; NaN never wins.
pub fn argmax(scores: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((index, score)),
        }
    }
    best
}

/// Turns raw detector tensors into thresholded [`Detection`]s.
///
/// The model is expected to have run its own non-maximum suppression, so
/// this only filters and re-projects. Input box order is preserved.
#[derive(Debug, Clone)]
pub struct Postprocessor {
    pub confidence_threshold: f32,
    pub class_labels: Vec<String>,
}

impl Postprocessor {
    pub fn new(confidence_threshold: f32, class_labels: Vec<String>) -> Self {
        Self {
            confidence_threshold,
            class_labels,
        }
    }

    pub fn process(&self, output: &DetectorOutput, image_size: (u32, u32)) -> Vec<Detection> {
        let mut detections = Vec::new();

        for i in 0..output.num_boxes() {
            let Some((class_index, max_confidence)) = argmax(output.confidence_row(i)) else {
                continue;
            };

            if !(0.0..=1.0).contains(&max_confidence) {
                warn!("Box {}: score {} outside [0, 1], skipping", i, max_confidence);
                continue;
            }

            if max_confidence < self.confidence_threshold {
                continue;
            }

            let Some(class_name) = self.class_labels.get(class_index) else {
                debug!("Box {}: class index {} has no label, skipping", i, class_index);
                continue;
            };

            let coords = output.coordinates_row(i);
            if coords.iter().any(|v| !v.is_finite()) {
                warn!("Box {}: non-finite coordinates {:?}, skipping", i, coords);
                continue;
            }

            let model_box = NormalizedRect::from_center(coords[0], coords[1], coords[2], coords[3]);

            detections.push(Detection::new(
                model_box,
                max_confidence,
                class_index,
                class_name.clone(),
                image_size,
            ));
        }

        debug!(
            "Kept {} of {} boxes at threshold {:.2}",
            detections.len(),
            output.num_boxes(),
            self.confidence_threshold
        );

        detections
    }
}
