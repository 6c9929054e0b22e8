//! Raw detection tensor decoding.
//!
//! The object model emits a flat `f32` buffer of `N` records, each
//! `[x, y, w, h, confidence, score_0 .. score_{C-1}]` in model-input pixels.
//! Decoding thresholds on `confidence`, picks the arg-max class, scales the
//! box back to image space and stops after `max_detections` accepted records.

use anyhow::Result;

use crate::detect::{BoundingBox, Detection, DEFAULT_DETECTOR_INPUT, UNKNOWN_LABEL};
use crate::error::PipelineError;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_MAX_DETECTIONS: usize = 20;

/// Leading fields of every record before the class scores.
const RECORD_HEADER: usize = 5;

#[derive(Clone, Debug)]
pub struct TensorDecoder {
    labels: Vec<String>,
    confidence_threshold: f32,
    max_detections: usize,
    model_input_size: u32,
}

impl TensorDecoder {
    /// Decoder with one class per label and default thresholds.
    pub fn new(labels: Vec<String>) -> Self {
        Self {
            labels,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
            model_input_size: DEFAULT_DETECTOR_INPUT,
        }
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_max_detections(mut self, max_detections: usize) -> Self {
        self.max_detections = max_detections;
        self
    }

    pub fn with_model_input_size(mut self, size: u32) -> Self {
        self.model_input_size = size;
        self
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of `f32` values per record.
    pub fn record_stride(&self) -> usize {
        RECORD_HEADER + self.labels.len()
    }

    /// Decode `tensor` for an image of `image_width x image_height`.
    ///
    /// The `max_detections` cap is applied in buffer order, not by score: a
    /// strong detection late in the buffer is dropped once the cap is hit.
    /// Records whose scaled box is degenerate (negative width or height) are
    /// skipped and do not count toward the cap.
    pub fn decode(
        &self,
        tensor: &[f32],
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<Detection>> {
        self.decode_with_input(tensor, self.model_input_size, image_width, image_height)
    }

    /// Like [`TensorDecoder::decode`], for a model whose square input edge
    /// is `model_input_size` rather than the configured one.
    pub fn decode_with_input(
        &self,
        tensor: &[f32],
        model_input_size: u32,
        image_width: u32,
        image_height: u32,
    ) -> Result<Vec<Detection>> {
        let stride = self.record_stride();
        if tensor.len() % stride != 0 {
            return Err(PipelineError::TensorShape {
                len: tensor.len(),
                stride,
            }
            .into());
        }

        if model_input_size == 0 {
            return Err(
                PipelineError::InvalidConfig("model input size must be non-zero".into()).into(),
            );
        }
        let input = model_input_size as f32;
        let scale_x = image_width as f32 / input;
        let scale_y = image_height as f32 / input;

        let mut out = Vec::new();
        for record in tensor.chunks_exact(stride) {
            if out.len() >= self.max_detections {
                break;
            }
            let confidence = record[4];
            if confidence.is_nan() || confidence < self.confidence_threshold {
                continue;
            }

            let label = argmax(&record[RECORD_HEADER..])
                .and_then(|class| self.labels.get(class))
                .map(String::as_str)
                .unwrap_or(UNKNOWN_LABEL);

            let x = record[0] * scale_x;
            let y = record[1] * scale_y;
            let w = record[2] * scale_x;
            let h = record[3] * scale_y;
            let bbox = BoundingBox::new(x as i32, y as i32, (x + w) as i32, (y + h) as i32);
            if bbox.is_degenerate() {
                log::debug!("decode: skipping degenerate box {:?}", bbox);
                continue;
            }

            out.push(Detection {
                bbox,
                label: label.to_string(),
                confidence,
            });
        }
        Ok(out)
    }
}

/// Index of the largest score; the first index wins ties.
fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &score) in scores.iter().enumerate() {
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((i, score)),
        }
    }
    best.map(|(i, _)| i)
}

/// Parse a labels file: one label per line, blank lines and `#` comments
/// ignored.
pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        vec!["person".into(), "cup".into(), "chair".into()]
    }

    fn record(x: f32, y: f32, w: f32, h: f32, conf: f32, scores: [f32; 3]) -> Vec<f32> {
        let mut r = vec![x, y, w, h, conf];
        r.extend_from_slice(&scores);
        r
    }

    #[test]
    fn confident_record_is_scaled_to_image_space() -> Result<()> {
        let decoder = TensorDecoder::new(labels());
        let tensor = record(64.0, 32.0, 128.0, 64.0, 0.9, [0.1, 0.8, 0.1]);

        let out = decoder.decode(&tensor, 1280, 960)?;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, "cup");
        assert_eq!(out[0].confidence, 0.9);
        // scale = (2.0, 1.5)
        assert_eq!(out[0].bbox, BoundingBox::new(128, 48, 384, 144));
        Ok(())
    }

    #[test]
    fn low_confidence_record_is_dropped() -> Result<()> {
        let decoder = TensorDecoder::new(labels());
        let tensor = record(10.0, 10.0, 10.0, 10.0, 0.3, [0.9, 0.0, 0.0]);
        assert!(decoder.decode(&tensor, 640, 640)?.is_empty());
        Ok(())
    }

    #[test]
    fn confidence_equal_to_threshold_is_kept() -> Result<()> {
        let decoder = TensorDecoder::new(labels());
        let tensor = record(10.0, 10.0, 10.0, 10.0, 0.5, [0.9, 0.0, 0.0]);
        assert_eq!(decoder.decode(&tensor, 640, 640)?.len(), 1);
        Ok(())
    }

    #[test]
    fn record_without_class_scores_is_unknown() -> Result<()> {
        let decoder = TensorDecoder::new(Vec::new());
        let tensor = vec![0.0, 0.0, 10.0, 10.0, 0.9];
        let out = decoder.decode(&tensor, 640, 640)?;
        assert_eq!(out[0].label, UNKNOWN_LABEL);
        Ok(())
    }

    #[test]
    fn stops_after_max_detections_in_buffer_order() -> Result<()> {
        let decoder = TensorDecoder::new(labels()).with_max_detections(2);
        let mut tensor = Vec::new();
        tensor.extend(record(0.0, 0.0, 10.0, 10.0, 0.6, [1.0, 0.0, 0.0]));
        tensor.extend(record(20.0, 0.0, 10.0, 10.0, 0.7, [1.0, 0.0, 0.0]));
        tensor.extend(record(40.0, 0.0, 10.0, 10.0, 0.99, [1.0, 0.0, 0.0]));

        let out = decoder.decode(&tensor, 640, 640)?;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.6);
        assert_eq!(out[1].confidence, 0.7);
        Ok(())
    }

    #[test]
    fn degenerate_boxes_are_skipped() -> Result<()> {
        let decoder = TensorDecoder::new(labels());
        let tensor = record(50.0, 50.0, -20.0, 10.0, 0.9, [1.0, 0.0, 0.0]);
        assert!(decoder.decode(&tensor, 640, 640)?.is_empty());
        Ok(())
    }

    #[test]
    fn ragged_tensor_is_shape_error() {
        let decoder = TensorDecoder::new(labels());
        let err = decoder.decode(&[0.0; 9], 640, 640).unwrap_err();
        assert_eq!(
            err.downcast_ref::<PipelineError>(),
            Some(&PipelineError::TensorShape { len: 9, stride: 8 })
        );
    }

    #[test]
    fn argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.2, 0.7, 0.7]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn labels_file_skips_comments_and_blanks() {
        let parsed = parse_labels("# coco subset\nperson\n\n  cup  \n");
        assert_eq!(parsed, vec!["person".to_string(), "cup".to_string()]);
    }
}
