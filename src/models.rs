use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Rectangle in unit coordinates relative to some reference frame.
///
/// `(x, y)` is the top-left corner. Width and height are never negative but
/// the rectangle may reach outside `[0, 1]` until it is intersected with a
/// frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub const UNIT: NormalizedRect = NormalizedRect {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
    };

    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Build a rectangle from center form `(cx, cy, w, h)`
    pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn min_x(&self) -> f32 {
        self.x
    }

    pub fn min_y(&self) -> f32 {
        self.y
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Overlap of two rectangles, `None` when they do not overlap
    pub fn intersection(&self, other: &NormalizedRect) -> Option<NormalizedRect> {
        let min_x = self.min_x().max(other.min_x());
        let min_y = self.min_y().max(other.min_y());
        let max_x = self.max_x().min(other.max_x());
        let max_y = self.max_y().min(other.max_y());

        if max_x <= min_x || max_y <= min_y {
            return None;
        }

        Some(NormalizedRect::new(min_x, min_y, max_x - min_x, max_y - min_y))
    }

    /// Map a rect given in `frame`'s own unit coordinates out into the space
    /// `frame` is expressed in
    pub fn placed_in(&self, frame: &NormalizedRect) -> NormalizedRect {
        NormalizedRect::new(
            frame.x + self.x * frame.width,
            frame.y + self.y * frame.height,
            self.width * frame.width,
            self.height * frame.height,
        )
    }

    /// Inverse of [`placed_in`](Self::placed_in). An empty frame leaves the
    /// rect unchanged.
    pub fn relative_to(&self, frame: &NormalizedRect) -> NormalizedRect {
        if frame.is_empty() {
            return *self;
        }
        NormalizedRect::new(
            (self.x - frame.x) / frame.width,
            (self.y - frame.y) / frame.height,
            self.width / frame.width,
            self.height / frame.height,
        )
    }

    /// Clamp to the unit square, collapsing to an empty rect at the nearest
    /// corner when there is no overlap
    pub fn clamped(&self) -> NormalizedRect {
        self.intersection(&NormalizedRect::UNIT).unwrap_or_else(|| {
            NormalizedRect::new(self.x.clamp(0.0, 1.0), self.y.clamp(0.0, 1.0), 0.0, 0.0)
        })
    }
}

/// The sub-rectangle of the letterboxed unit square holding real image content.
///
/// Landscape images are padded top/bottom, portrait images left/right, and a
/// square image fills the whole unit square.
pub fn valid_region(image_width: u32, image_height: u32) -> NormalizedRect {
    if image_width == 0 || image_height == 0 {
        return NormalizedRect::UNIT;
    }

    let width_ratio = image_width as f32 / image_height as f32;
    let height_ratio = image_height as f32 / image_width as f32;

    if height_ratio < 1.0 {
        NormalizedRect::new(0.0, (1.0 - height_ratio) / 2.0, 1.0, height_ratio)
    } else {
        NormalizedRect::new((1.0 - width_ratio) / 2.0, 0.0, width_ratio, 1.0)
    }
}

/// A single detected region of interest.
///
/// Boxes are kept in the detector's letterboxed frame (`model_box`, the frame
/// the overlay is drawn on) and in the original image frame (`bounding_box`).
/// Edge distance and coverage are measured against the valid region of the
/// letterboxed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    id: Uuid,
    bounding_box: NormalizedRect,
    model_box: NormalizedRect,
    valid_region: NormalizedRect,
    confidence: f32,
    class_index: usize,
    class_name: String,
    min_distance_from_edges: f32,
    area_covered: f32,
}

impl Detection {
    pub fn new(
        model_box: NormalizedRect,
        confidence: f32,
        class_index: usize,
        class_name: impl Into<String>,
        image_size: (u32, u32),
    ) -> Self {
        let region = valid_region(image_size.0, image_size.1);

        let (min_distance_from_edges, area_covered) = match model_box.intersection(&region) {
            Some(clipped) => {
                let to_left = (clipped.min_x() - region.min_x()).max(0.0);
                let to_top = (clipped.min_y() - region.min_y()).max(0.0);
                let to_right = (region.max_x() - clipped.max_x()).max(0.0);
                let to_bottom = (region.max_y() - clipped.max_y()).max(0.0);

                let distance = to_left.min(to_top).min(to_right).min(to_bottom);
                let coverage = if region.area() > 0.0 {
                    (clipped.area() / region.area()).min(1.0)
                } else {
                    0.0
                };
                (distance, coverage)
            }
            None => (0.0, 0.0),
        };

        let bounding_box = model_box.relative_to(&region);

        Self {
            id: Uuid::new_v4(),
            bounding_box,
            model_box,
            valid_region: region,
            confidence,
            class_index,
            class_name: class_name.into(),
            min_distance_from_edges,
            area_covered,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Box in original-image normalized coordinates, unclamped
    pub fn bounding_box(&self) -> NormalizedRect {
        self.bounding_box
    }

    /// Box in original-image normalized coordinates, clamped to the image
    pub fn image_rect(&self) -> NormalizedRect {
        self.bounding_box.clamped()
    }

    /// Box in the detector's letterboxed square
    pub fn model_box(&self) -> NormalizedRect {
        self.model_box
    }

    pub fn valid_region(&self) -> NormalizedRect {
        self.valid_region
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn class_index(&self) -> usize {
        self.class_index
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn min_distance_from_edges(&self) -> f32 {
        self.min_distance_from_edges
    }

    pub fn area_covered(&self) -> f32 {
        self.area_covered
    }
}

/// Result of one classifier call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
    pub all_probabilities: BTreeMap<String, f32>,
}

impl Classification {
    /// Use the model's own top label, reading its confidence from the map
    pub fn new(label: impl Into<String>, all_probabilities: BTreeMap<String, f32>) -> Self {
        let label = label.into();
        let confidence = all_probabilities.get(&label).copied().unwrap_or(0.0);
        Self {
            label,
            confidence,
            all_probabilities,
        }
    }

    /// Pick the most probable label. Ties go to the smallest label; NaN
    /// probabilities are never picked.
    pub fn from_probabilities(all_probabilities: BTreeMap<String, f32>) -> Option<Self> {
        let (label, confidence) = all_probabilities
            .iter()
            .filter(|(_, p)| !p.is_nan())
            .fold(None::<(&String, f32)>, |best, (label, &p)| match best {
                Some((_, best_p)) if best_p >= p => best,
                _ => Some((label, p)),
            })?;

        Some(Self {
            label: label.clone(),
            confidence,
            all_probabilities: all_probabilities.clone(),
        })
    }
}
