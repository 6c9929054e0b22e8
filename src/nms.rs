//! Greedy non-maximum suppression.

use std::cmp::Ordering;

use crate::detect::Detection;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

/// Keep the most confident detection of every overlapping cluster.
///
/// Detections are ranked by confidence (stable for equal scores). The top
/// remaining detection is kept and every remaining detection whose IoU with
/// it is strictly above `iou_threshold` is discarded, until none remain.
/// Classes are not considered: a "cup" can suppress an overlapping "bowl".
/// Degenerate boxes are dropped up front.
pub fn non_max_suppression(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    let mut remaining: Vec<Detection> = detections
        .into_iter()
        .filter(|d| !d.bbox.is_degenerate())
        .collect();
    remaining.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut kept: Vec<Detection> = Vec::with_capacity(remaining.len());
    for candidate in remaining {
        let suppressed = kept
            .iter()
            .any(|winner| winner.bbox.iou(&candidate.bbox) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::TensorDecoder;
    use crate::detect::BoundingBox;

    fn det(bbox: BoundingBox, label: &str, confidence: f32) -> Detection {
        Detection {
            bbox,
            label: label.to_string(),
            confidence,
        }
    }

    #[test]
    fn heavy_overlap_keeps_only_the_confident_box() {
        // inter = 90 * 100, union = 100*100 + 90*100 - 9000 -> iou 0.9
        let strong = det(BoundingBox::new(0, 0, 100, 100), "cup", 0.9);
        let weak = det(BoundingBox::new(10, 0, 100, 100), "cup", 0.6);
        assert!(strong.bbox.iou(&weak.bbox) > 0.8);

        let kept = non_max_suppression(vec![weak, strong.clone()], 0.5);

        assert_eq!(kept, vec![strong]);
    }

    #[test]
    fn iou_of_eight_tenths_suppresses() {
        // a = 100x100, b = 100x80 inside a -> iou = 8000 / 10000 = 0.8
        let a = det(BoundingBox::new(0, 0, 100, 100), "chair", 0.9);
        let b = det(BoundingBox::new(0, 0, 100, 80), "chair", 0.6);
        assert!((a.bbox.iou(&b.bbox) - 0.8).abs() < 1e-6);

        let kept = non_max_suppression(vec![a.clone(), b], 0.5);
        assert_eq!(kept, vec![a]);
    }

    #[test]
    fn light_overlap_keeps_both() {
        // a = 100x100, b = 100x100 shifted 50 right, 50 down: inter 2500,
        // union 17500 -> iou ~0.14
        let a = det(BoundingBox::new(0, 0, 100, 100), "cup", 0.9);
        let b = det(BoundingBox::new(50, 50, 150, 150), "cup", 0.6);
        assert!(a.bbox.iou(&b.bbox) < 0.3);

        let kept = non_max_suppression(vec![b.clone(), a.clone()], 0.5);
        assert_eq!(kept, vec![a, b]);
    }

    #[test]
    fn different_classes_still_suppress_each_other() {
        let cup = det(BoundingBox::new(0, 0, 100, 100), "cup", 0.8);
        let bowl = det(BoundingBox::new(0, 0, 100, 95), "bowl", 0.7);
        let kept = non_max_suppression(vec![bowl, cup.clone()], 0.5);
        assert_eq!(kept, vec![cup]);
    }

    #[test]
    fn suppressed_box_does_not_suppress_others() {
        // b overlaps a and c; a suppresses b, so c must survive even though
        // b and c overlap heavily.
        let a = det(BoundingBox::new(0, 0, 100, 100), "x", 0.9);
        let b = det(BoundingBox::new(25, 0, 125, 100), "x", 0.8);
        let c = det(BoundingBox::new(50, 0, 150, 100), "x", 0.7);
        assert!(a.bbox.iou(&c.bbox) < 0.5);
        assert!(b.bbox.iou(&c.bbox) > 0.5);

        let kept = non_max_suppression(vec![c.clone(), b, a.clone()], 0.5);
        assert_eq!(kept, vec![a, c]);
    }

    #[test]
    fn extreme_decoded_boxes_do_not_overflow() -> anyhow::Result<()> {
        let decoder = TensorDecoder::new(vec!["person".to_string()]);
        let tensor = vec![
            -3e9, -3e9, 6e9, 6e9, 0.9, 1.0, //
            -3e9, -3e9, 6e9, 6e9, 0.8, 1.0,
        ];
        let decoded = decoder.decode(&tensor, 640, 640)?;
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].bbox.left, i32::MIN);
        assert_eq!(decoded[0].bbox.right, i32::MAX);

        let kept = non_max_suppression(decoded, DEFAULT_IOU_THRESHOLD);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
        Ok(())
    }

    #[test]
    fn empty_input_yields_empty_output() {
        assert!(non_max_suppression(Vec::new(), DEFAULT_IOU_THRESHOLD).is_empty());
    }
}
