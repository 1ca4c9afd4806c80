// src/analysis/scale_candidates.rs
//
// Turns detector output into feet-per-pixel hypotheses. The bounding-box
// height is the calibration axis: reference objects like doors vary far less
// in height than in width across styles.

use crate::analysis::size_model::ObjectSizeModel;
use crate::types::Detection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One reference object's proposed pixel-to-feet conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleCandidate {
    pub object_type: String,
    /// Feet per pixel
    pub scale: f64,
    /// detection_confidence * prior_confidence
    pub confidence: f64,
    pub real_size_used: f64,
    pub pixel_size: f64,
    pub detection_confidence: f64,
    pub prior_confidence: f64,
}

pub struct ScaleCandidateGenerator<'a> {
    model: &'a ObjectSizeModel,
}

impl<'a> ScaleCandidateGenerator<'a> {
    pub fn new(model: &'a ObjectSizeModel) -> Self {
        Self { model }
    }

    /// Candidate for a single detection.
    ///
    /// Returns `None` for unknown object types and for boxes without a
    /// positive height. Always uses the distribution mean; no sampling.
    pub fn candidate(&self, detection: &Detection) -> Option<ScaleCandidate> {
        let dist = self.model.lookup(&detection.class_name)?;
        let pixel_size = detection.bounding_box.h;

        if pixel_size <= 0.0 || !pixel_size.is_finite() {
            return None;
        }

        let real_size = dist.mean;

        Some(ScaleCandidate {
            object_type: dist.object_type.clone(),
            scale: real_size / pixel_size,
            confidence: detection.confidence * dist.prior_confidence,
            real_size_used: real_size,
            pixel_size,
            detection_confidence: detection.confidence,
            prior_confidence: dist.prior_confidence,
        })
    }

    /// Candidates for every usable detection, in detection order
    pub fn generate(&self, detections: &[Detection]) -> Vec<ScaleCandidate> {
        detections.iter().filter_map(|d| self.candidate(d)).collect()
    }
}

// ============================================================================
// REFERENCE RANKING
// ============================================================================

/// Rule-based reliability of an object class as a measurement reference
pub fn reference_reliability(class_name: &str) -> f64 {
    match class_name.to_lowercase().as_str() {
        "door" => 0.9,
        "window" => 0.7,
        "person" => 0.6,
        "switchboard" => 0.5,
        "tile" => 0.4,
        _ => 0.3,
    }
}

/// Detections ordered from most to least reliable reference. Stable, so equal
/// classes keep detector order.
pub fn rank_reference_objects(detections: &[Detection]) -> Vec<(&Detection, f64)> {
    let mut ranked: Vec<(&Detection, f64)> = detections
        .iter()
        .map(|d| (d, reference_reliability(&d.class_name)))
        .collect();

    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use approx::assert_relative_eq;

    fn door(confidence: f64, h: f64) -> Detection {
        Detection::new("door", confidence, BoundingBox::new(100.0, 50.0, 90.0, h))
    }

    #[test]
    fn test_door_candidate() {
        let model = ObjectSizeModel::new();
        let generator = ScaleCandidateGenerator::new(&model);

        let candidate = generator.candidate(&door(0.9, 350.0)).unwrap();

        assert_relative_eq!(candidate.scale, 0.02, epsilon = 1e-12);
        assert_relative_eq!(candidate.confidence, 0.81, epsilon = 1e-12);
        assert_eq!(candidate.real_size_used, 7.0);
        assert_eq!(candidate.pixel_size, 350.0);
        assert_eq!(candidate.prior_confidence, 0.9);
    }

    #[test]
    fn test_zero_height_and_unknown_type_are_skipped() {
        let model = ObjectSizeModel::new();
        let generator = ScaleCandidateGenerator::new(&model);

        let sofa = Detection::new("sofa", 0.95, BoundingBox::new(0.0, 0.0, 200.0, 120.0));
        let detections = vec![door(0.9, 0.0), door(0.9, -5.0), sofa, door(0.8, 280.0)];

        let candidates = generator.generate(&detections);
        assert_eq!(candidates.len(), 1);
        assert_relative_eq!(candidates[0].scale, 0.025, epsilon = 1e-12);
    }

    #[test]
    fn test_generation_is_deterministic() {
        let model = ObjectSizeModel::new();
        let generator = ScaleCandidateGenerator::new(&model);
        let detections = vec![
            door(0.9, 350.0),
            Detection::new("window", 0.7, BoundingBox::new(0.0, 0.0, 100.0, 210.0)),
        ];

        assert_eq!(generator.generate(&detections), generator.generate(&detections));
    }

    #[test]
    fn test_rank_reference_objects() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let detections = vec![
            Detection::new("tile", 0.99, bbox),
            Detection::new("lamp", 0.99, bbox),
            Detection::new("Door", 0.5, bbox),
            Detection::new("window", 0.6, bbox),
        ];

        let ranked = rank_reference_objects(&detections);
        let order: Vec<&str> = ranked.iter().map(|(d, _)| d.class_name.as_str()).collect();
        assert_eq!(order, vec!["Door", "window", "tile", "lamp"]);
        assert_eq!(ranked[3].1, 0.3);
    }
}
