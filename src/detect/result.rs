use serde::{Deserialize, Serialize};

/// Label used when a face has no gallery match or a class index has no label.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned box in upright image pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl BoundingBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Widened so boxes spanning the whole `i32` range cannot overflow.
    pub fn width(&self) -> i64 {
        i64::from(self.right) - i64::from(self.left)
    }

    pub fn height(&self) -> i64 {
        i64::from(self.bottom) - i64::from(self.top)
    }

    /// True when `right < left` or `bottom < top`.
    pub fn is_degenerate(&self) -> bool {
        self.right < self.left || self.bottom < self.top
    }

    /// Area in pixels; zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            return 0.0;
        }
        self.width() as f32 * self.height() as f32
    }

    /// Intersection-over-union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            left: self.left.max(other.left),
            top: self.top.max(other.top),
            right: self.right.min(other.right),
            bottom: self.bottom.min(other.bottom),
        }
        .area();
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Clip to `[0, width] x [0, height]`. Returns `None` when nothing of the
    /// box remains inside the image.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let max_x = i32::try_from(width).unwrap_or(i32::MAX);
        let max_y = i32::try_from(height).unwrap_or(i32::MAX);
        let clipped = BoundingBox {
            left: self.left.clamp(0, max_x),
            top: self.top.clamp(0, max_y),
            right: self.right.clamp(0, max_x),
            bottom: self.bottom.clamp(0, max_y),
        };
        if clipped.width() <= 0 || clipped.height() <= 0 {
            return None;
        }
        Some(clipped)
    }
}

/// One labelled object found by the object path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub label: String,
    pub confidence: f32,
}

/// Outcome of the face path for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecognitionResult {
    Loading,
    NoFaceDetected,
    MultipleFacesDetected {
        count: usize,
    },
    /// A single face was embedded and compared. `name` is [`UNKNOWN_LABEL`]
    /// when nothing in the gallery beat the similarity threshold.
    Matched {
        name: String,
        score: f32,
        bbox: BoundingBox,
    },
    Error {
        reason: String,
    },
}

impl RecognitionResult {
    pub fn error(err: &anyhow::Error) -> Self {
        RecognitionResult::Error {
            reason: format!("{:#}", err),
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, RecognitionResult::Loading)
    }
}

/// Outcome of the object path for one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ObjectDetectionResult {
    Loading,
    NoObjectsDetected,
    Success {
        detections: Vec<Detection>,
        inference_time_ms: u64,
    },
    Error {
        reason: String,
    },
}

impl ObjectDetectionResult {
    pub fn error(err: &anyhow::Error) -> Self {
        ObjectDetectionResult::Error {
            reason: format!("{:#}", err),
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, ObjectDetectionResult::Loading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(0, 0, 10, 10);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(20, 20, 30, 30);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_of_touching_boxes_is_zero() {
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(10, 0, 20, 10);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        // inter = 50, union = 100 + 100 - 50
        let a = BoundingBox::new(0, 0, 10, 10);
        let b = BoundingBox::new(5, 0, 15, 10);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn clamp_clips_out_of_bounds_box() {
        let b = BoundingBox::new(-20, -5, 700, 300);
        assert_eq!(b.clamp_to(640, 480), Some(BoundingBox::new(0, 0, 640, 300)));
    }

    #[test]
    fn clamp_rejects_box_outside_image() {
        let b = BoundingBox::new(700, 10, 800, 50);
        assert_eq!(b.clamp_to(640, 480), None);
    }

    #[test]
    fn full_range_box_measures_without_overflow() {
        let b = BoundingBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(b.width(), u32::MAX as i64);
        assert!(b.area() > 1e19);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn degenerate_box_has_zero_area() {
        let b = BoundingBox::new(10, 10, 5, 20);
        assert!(b.is_degenerate());
        assert_eq!(b.area(), 0.0);
    }

    #[test]
    fn results_serialize_with_state_tag() {
        let json = serde_json::to_string(&RecognitionResult::MultipleFacesDetected { count: 2 })
            .unwrap();
        assert_eq!(json, r#"{"state":"multiple_faces_detected","count":2}"#);
    }
}
