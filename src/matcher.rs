//! Face gallery matching and enrollment.

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::preprocess::prepare_face;
use crate::detect::{BoundingBox, FaceDetector, FaceEmbedder, RecognitionResult, UNKNOWN_LABEL};
use crate::embedding::{check_dimension, cosine_similarity, normalize};
use crate::gallery::{GalleryEntry, GalleryStore};

pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.7;

/// How many faces a detector reported, decided before any embedding work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceCount {
    None,
    Single(BoundingBox),
    Multiple(usize),
}

impl FaceCount {
    pub fn classify(boxes: &[BoundingBox]) -> Self {
        match boxes {
            [] => FaceCount::None,
            [only] => FaceCount::Single(*only),
            many => FaceCount::Multiple(many.len()),
        }
    }
}

/// Closest gallery entry to a query embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct BestMatch {
    pub name: String,
    pub score: f32,
    /// Set only when `score` beat the threshold.
    pub entry_id: Option<i64>,
}

#[derive(Clone, Debug)]
pub struct FaceMatcher {
    similarity_threshold: f32,
    track_last_seen: bool,
}

impl Default for FaceMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            track_last_seen: true,
        }
    }
}

impl FaceMatcher {
    pub fn new(similarity_threshold: f32) -> Self {
        Self {
            similarity_threshold,
            ..Self::default()
        }
    }

    /// Record `last_seen_ms` on the matched entry after a named match.
    pub fn with_last_seen_tracking(mut self, enabled: bool) -> Self {
        self.track_last_seen = enabled;
        self
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Compare a normalized query against a gallery snapshot.
    ///
    /// Stored embeddings are re-normalized before comparison. Entries that
    /// cannot be compared (wrong length, zero vector) are skipped. The first
    /// entry wins a tie. With nothing comparable the result is `Unknown` with
    /// score 0; below the threshold it is `Unknown` with the best score seen.
    pub fn best_match(&self, query: &[f32], entries: &[GalleryEntry]) -> BestMatch {
        let mut best: Option<(&GalleryEntry, f32)> = None;
        for entry in entries {
            let stored = match normalize(&entry.embedding) {
                Ok(stored) => stored,
                Err(e) => {
                    log::warn!("skipping gallery entry '{}' ({:?}): {}", entry.name, entry.id, e);
                    continue;
                }
            };
            let score = match cosine_similarity(query, &stored) {
                Ok(score) => score,
                Err(e) => {
                    log::warn!("skipping gallery entry '{}' ({:?}): {}", entry.name, entry.id, e);
                    continue;
                }
            };
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((entry, score)),
            }
        }

        match best {
            Some((entry, score)) if score > self.similarity_threshold => BestMatch {
                name: entry.name.clone(),
                score,
                entry_id: entry.id,
            },
            Some((_, score)) => BestMatch {
                name: UNKNOWN_LABEL.to_string(),
                score,
                entry_id: None,
            },
            None => BestMatch {
                name: UNKNOWN_LABEL.to_string(),
                score: 0.0,
                entry_id: None,
            },
        }
    }

    /// Normalize a raw embedding and match it against a fresh gallery
    /// snapshot.
    pub fn match_embedding(
        &self,
        raw: &[f32],
        bbox: BoundingBox,
        gallery: &dyn GalleryStore,
        now_ms: u64,
    ) -> Result<RecognitionResult> {
        check_dimension(raw)?;
        let query = normalize(raw)?;
        let snapshot = gallery.get_all()?;
        let best = self.best_match(&query, &snapshot);
        log::debug!(
            "face match: best='{}' score={:.3} gallery={}",
            best.name,
            best.score,
            snapshot.len()
        );

        if let (true, Some(id)) = (self.track_last_seen, best.entry_id) {
            if let Err(e) = gallery.mark_seen(id, now_ms) {
                log::warn!("failed to update last-seen for gallery entry {}: {}", id, e);
            }
        }

        Ok(RecognitionResult::Matched {
            name: best.name,
            score: best.score,
            bbox,
        })
    }

    /// Crop, embed and match one face synchronously.
    pub fn match_face(
        &self,
        image: &RgbImage,
        bbox: BoundingBox,
        embedder: &mut dyn FaceEmbedder,
        gallery: &dyn GalleryStore,
        now_ms: u64,
    ) -> Result<RecognitionResult> {
        let face = prepare_face(image, &bbox, embedder.input_size())?;
        let raw = embedder.embed(&face)?;
        self.match_embedding(&raw, bbox, gallery, now_ms)
    }

    /// Full face path without worker threads: detect, apply the face-count
    /// policy, then match.
    pub fn recognize(
        &self,
        image: &RgbImage,
        detector: &mut dyn FaceDetector,
        embedder: &mut dyn FaceEmbedder,
        gallery: &dyn GalleryStore,
        now_ms: u64,
    ) -> Result<RecognitionResult> {
        let boxes = detector.detect(image)?;
        match FaceCount::classify(&boxes) {
            FaceCount::None => Ok(RecognitionResult::NoFaceDetected),
            FaceCount::Multiple(count) => Ok(RecognitionResult::MultipleFacesDetected { count }),
            FaceCount::Single(bbox) => self.match_face(image, bbox, embedder, gallery, now_ms),
        }
    }
}

/// Normalize and store a new identity. Returns the new entry's id.
pub fn enroll(
    gallery: &dyn GalleryStore,
    name: &str,
    raw: &[f32],
    tracking_id: Option<i64>,
    now_ms: u64,
) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("enrollment name must not be empty"));
    }
    check_dimension(raw)?;
    let mut entry = GalleryEntry::new(name, normalize(raw)?, now_ms);
    entry.tracking_id = tracking_id;
    let id = gallery.insert(&entry)?;
    log::info!("enrolled '{}' as gallery entry {}", name, id);
    Ok(id)
}

/// Detect exactly one face in `image`, embed it and enroll it under `name`.
pub fn enroll_from_image(
    image: &RgbImage,
    name: &str,
    detector: &mut dyn FaceDetector,
    embedder: &mut dyn FaceEmbedder,
    gallery: &dyn GalleryStore,
    now_ms: u64,
) -> Result<i64> {
    let boxes = detector.detect(image)?;
    let bbox = match FaceCount::classify(&boxes) {
        FaceCount::Single(bbox) => bbox,
        FaceCount::None => return Err(anyhow!("no face found to enroll")),
        FaceCount::Multiple(n) => {
            return Err(anyhow!("{} faces found; enrollment needs exactly one", n))
        }
    };
    let face = prepare_face(image, &bbox, embedder.input_size())?;
    let raw = embedder.embed(&face)?;
    enroll(gallery, name, &raw, None, now_ms)
}
