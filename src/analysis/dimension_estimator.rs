// src/analysis/dimension_estimator.rs
//
// Converts a resolved scale into room dimensions for one image.
//
// Calibration is a value (`CalibrationContext`) handed to each call rather than
// state held by the estimator, so one room's scale can never leak into the
// next image of a multi-room batch.

use crate::analysis::confidence;
use crate::analysis::scale_candidates::{ScaleCandidate, ScaleCandidateGenerator};
use crate::analysis::scale_fusion::{FusedScale, ScaleFusion};
use crate::analysis::size_model::ObjectSizeModel;
use crate::error::{EstimationError, Result};
use crate::types::{
    round2, round3, BoundingBox, Detection, DimensionEstimate, DimensionRecord,
    EstimationConfig, EstimationMethod, FrameInput, ImageShape, ManualDimensions, ObjectCounts,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Scale confidence assumed for a hand-measured reference object
const MANUAL_REFERENCE_CONFIDENCE: f64 = 0.7;
/// Largest manual dimension accepted, in feet
const MAX_MANUAL_DIMENSION_FT: f64 = 100.0;

// ============================================================================
// CALIBRATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Fused from every reference object in the image
    ProbabilisticInference,
    /// A single reference with a known real size
    ManualReference,
}

/// Pixel-to-feet calibration for exactly one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationContext {
    /// Feet per pixel
    pub scale_factor: f64,
    pub confidence: f64,
    pub method: CalibrationMethod,
    pub candidate_count: usize,
    pub reference_object: Option<String>,
}

impl CalibrationContext {
    /// Calibration from a fused scale; `None` when nothing could be fused
    pub fn from_fused(fused: &FusedScale) -> Option<Self> {
        fused.scale.map(|scale_factor| Self {
            scale_factor,
            confidence: fused.confidence,
            method: CalibrationMethod::ProbabilisticInference,
            candidate_count: fused.candidate_count,
            reference_object: None,
        })
    }

    pub fn from_reference(
        reference_pixels: f64,
        reference_feet: f64,
        object_type: &str,
    ) -> Result<Self> {
        if reference_pixels <= 0.0 || !reference_pixels.is_finite() {
            return Err(EstimationError::InvalidPixelSize {
                object_type: object_type.to_string(),
                pixels: reference_pixels,
            });
        }

        Ok(Self {
            scale_factor: reference_feet / reference_pixels,
            confidence: MANUAL_REFERENCE_CONFIDENCE,
            method: CalibrationMethod::ManualReference,
            candidate_count: 1,
            reference_object: Some(object_type.to_string()),
        })
    }

    /// Calibrate from one detected box, using the model's mean height (or the
    /// generic door size for unknown types)
    pub fn from_detection(
        model: &ObjectSizeModel,
        bbox: &BoundingBox,
        object_type: &str,
    ) -> Result<Self> {
        let real_size = model.get(object_type).mean;
        Self::from_reference(bbox.h, real_size, object_type)
    }

    pub fn pixels_to_feet(&self, pixels: f64) -> f64 {
        round2(pixels * self.scale_factor)
    }

    pub fn feet_to_pixels(&self, feet: f64) -> f64 {
        round2(feet / self.scale_factor)
    }
}

/// Maps boxes detected on a resized inference image back to the original
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolutionMapping {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl ResolutionMapping {
    pub fn new(original: ImageShape, inference: ImageShape) -> Self {
        let ratio = |orig: u32, inf: u32| {
            if inf == 0 {
                1.0
            } else {
                orig as f64 / inf as f64
            }
        };

        Self {
            scale_x: ratio(original.width, inference.width),
            scale_y: ratio(original.height, inference.height),
        }
    }

    /// Mapping for a frame whose detector ran on a resized copy
    pub fn for_frame(frame: &FrameInput) -> Option<Self> {
        frame
            .inference_shape
            .filter(|shape| *shape != frame.image_shape)
            .map(|shape| Self::new(frame.image_shape, shape))
    }

    /// Whole-pixel box in original coordinates
    pub fn map_bbox(&self, bbox: &BoundingBox) -> BoundingBox {
        BoundingBox {
            x: (bbox.x * self.scale_x).trunc(),
            y: (bbox.y * self.scale_y).trunc(),
            w: (bbox.w * self.scale_x).trunc(),
            h: (bbox.h * self.scale_y).trunc(),
        }
    }

    pub fn map_detections(&self, detections: &[Detection]) -> Vec<Detection> {
        detections
            .iter()
            .map(|d| Detection {
                bounding_box: self.map_bbox(&d.bounding_box),
                ..d.clone()
            })
            .collect()
    }
}

// ============================================================================
// ESTIMATOR
// ============================================================================

/// Everything learned from one image's detections
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub estimate: DimensionEstimate,
    pub fused_scale: FusedScale,
    pub candidates: Vec<ScaleCandidate>,
    pub counts: ObjectCounts,
    pub calibration: Option<CalibrationContext>,
}

pub struct DimensionEstimator<'a> {
    model: &'a ObjectSizeModel,
    fusion: ScaleFusion,
    config: EstimationConfig,
}

impl<'a> DimensionEstimator<'a> {
    pub fn new(model: &'a ObjectSizeModel, fusion: ScaleFusion, config: EstimationConfig) -> Self {
        Self {
            model,
            fusion,
            config,
        }
    }

    /// Dimensions for a single image from its detections
    pub fn estimate_from_detections(
        &self,
        image_shape: ImageShape,
        detections: &[Detection],
    ) -> DimensionEstimate {
        self.analyze(image_shape, detections).estimate
    }

    /// Full candidate → fusion → dimensions pass for one image
    pub fn analyze(&self, image_shape: ImageShape, detections: &[Detection]) -> ImageAnalysis {
        let candidates = ScaleCandidateGenerator::new(self.model).generate(detections);
        let fused_scale = self.fusion.fuse(&candidates);
        let calibration = CalibrationContext::from_fused(&fused_scale);

        let estimate = self.estimate_with_calibration(calibration.as_ref(), image_shape, detections);

        ImageAnalysis {
            estimate,
            fused_scale,
            candidates,
            counts: ObjectCounts::from_detections(detections),
            calibration,
        }
    }

    /// Dimensions under an explicit calibration. No calibration degrades to the
    /// default room, never to an error.
    pub fn estimate_with_calibration(
        &self,
        calibration: Option<&CalibrationContext>,
        image_shape: ImageShape,
        detections: &[Detection],
    ) -> DimensionEstimate {
        let Some(calibration) = calibration else {
            debug!("No reference object usable for scale; using default room assumption");
            return self.fallback_estimate();
        };

        // Room depth is not observable from one view; assume it matches width
        let width = calibration.pixels_to_feet(image_shape.width as f64);
        let length = width;

        let ceiling_height = if detections.iter().any(|d| d.is_class("door")) {
            self.model.get("door").mean + self.config.ceiling_clearance_ft
        } else {
            self.config.default_ceiling_ft
        };

        let dimension_confidence =
            confidence::dimension_confidence(calibration.confidence, EstimationMethod::CvEstimation);

        DimensionEstimate {
            length: round2(length),
            width: round2(width),
            height: round2(ceiling_height),
            estimated: true,
            method: EstimationMethod::CvEstimation,
            confidence: round3(dimension_confidence),
        }
    }

    /// Unverified guess used when no scale can be resolved
    pub fn fallback_estimate(&self) -> DimensionEstimate {
        DimensionEstimate {
            length: self.config.fallback_length_ft,
            width: self.config.fallback_width_ft,
            height: self.config.fallback_height_ft,
            estimated: true,
            method: EstimationMethod::DefaultAssumption,
            confidence: self.config.fallback_confidence,
        }
    }

    /// User-supplied dimensions; missing fields take the fallback room size
    pub fn from_manual(&self, manual: &ManualDimensions) -> Result<DimensionEstimate> {
        let resolve = |field: &'static str, value: Option<f64>, default: f64| -> Result<f64> {
            match value {
                Some(v) if v <= 0.0 || v > MAX_MANUAL_DIMENSION_FT || !v.is_finite() => {
                    Err(EstimationError::InvalidManualDimension { field, value: v })
                }
                Some(v) => Ok(v),
                None => Ok(default),
            }
        };

        Ok(DimensionEstimate {
            length: resolve("length", manual.length, self.config.fallback_length_ft)?,
            width: resolve("width", manual.width, self.config.fallback_width_ft)?,
            height: resolve("height", manual.height, self.config.fallback_height_ft)?,
            estimated: false,
            method: EstimationMethod::ManualInput,
            confidence: 1.0,
        })
    }

    /// Best floor-plan dimension record, with the ceiling supplied by the caller
    pub fn from_dimension_records(
        &self,
        records: &[DimensionRecord],
        ceiling_height: f64,
    ) -> Option<DimensionEstimate> {
        let best = records
            .iter()
            .filter(|r| r.length > 0.0 && r.width > 0.0)
            .max_by(|a, b| {
                normalized_confidence(a.confidence)
                    .partial_cmp(&normalized_confidence(b.confidence))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })?;

        info!(
            "📐 Using floor plan dimension '{}' → {:.2} x {:.2} ft",
            best.raw_text, best.length, best.width
        );

        let ocr_confidence = normalized_confidence(best.confidence);

        Some(DimensionEstimate {
            length: round2(best.length),
            width: round2(best.width),
            height: round2(ceiling_height),
            estimated: true,
            method: EstimationMethod::FloorplanOcr,
            confidence: round3(confidence::dimension_confidence(
                ocr_confidence,
                EstimationMethod::FloorplanOcr,
            )),
        })
    }
}

/// OCR engines disagree on whether confidence is a fraction or a percentage
fn normalized_confidence(raw: f64) -> f64 {
    if raw > 1.0 {
        (raw / 100.0).min(1.0)
    } else {
        raw.max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn estimator(model: &ObjectSizeModel) -> DimensionEstimator<'_> {
        DimensionEstimator::new(model, ScaleFusion::default(), EstimationConfig::default())
    }

    fn door(h: f64) -> Detection {
        Detection::new("door", 0.9, BoundingBox::new(400.0, 300.0, 150.0, h))
    }

    #[test]
    fn test_no_detections_falls_back_to_default_room() {
        let model = ObjectSizeModel::new();
        let estimate = estimator(&model).estimate_from_detections(ImageShape::new(1080, 1920), &[]);

        assert_eq!(estimate.length, 12.0);
        assert_eq!(estimate.width, 10.0);
        assert_eq!(estimate.height, 10.0);
        assert_eq!(estimate.method, EstimationMethod::DefaultAssumption);
        assert_eq!(estimate.confidence, 0.3);
        assert!(estimate.estimated);
    }

    #[test]
    fn test_door_calibrated_estimate() {
        let model = ObjectSizeModel::new();
        let analysis = estimator(&model).analyze(ImageShape::new(1080, 1920), &[door(350.0)]);
        let estimate = &analysis.estimate;

        // 1920 px * 0.02 ft/px
        assert_relative_eq!(estimate.width, 38.4, epsilon = 1e-9);
        assert_eq!(estimate.length, estimate.width);
        // door mean 7.0 + 3.0 ft clearance
        assert_relative_eq!(estimate.height, 10.0, epsilon = 1e-9);
        assert_eq!(estimate.method, EstimationMethod::CvEstimation);
        // 0.81 * 0.85
        assert_relative_eq!(estimate.confidence, 0.689, epsilon = 1e-9);

        assert_eq!(analysis.counts.doors, 1);
        assert_eq!(analysis.candidates.len(), 1);
        assert!(analysis.calibration.is_some());
    }

    #[test]
    fn test_ceiling_follows_learned_door_height() {
        let mut model = ObjectSizeModel::new();
        model.update("door", 8.0, 1.0);

        let estimate =
            estimator(&model).estimate_from_detections(ImageShape::new(720, 1280), &[door(400.0)]);
        assert_relative_eq!(estimate.height, 11.0, epsilon = 1e-9);
    }

    #[test]
    fn test_window_only_uses_default_ceiling() {
        let model = ObjectSizeModel::new();
        let window = Detection::new("window", 0.8, BoundingBox::new(0.0, 0.0, 120.0, 200.0));
        let estimate =
            estimator(&model).estimate_from_detections(ImageShape::new(720, 1280), &[window]);

        assert_eq!(estimate.height, 10.0);
        // 1280 * (4.0 / 200)
        assert_relative_eq!(estimate.width, 25.6, epsilon = 1e-9);
    }

    #[test]
    fn test_reference_calibration() {
        let calibration = CalibrationContext::from_reference(350.0, 7.0, "door").unwrap();
        assert_relative_eq!(calibration.scale_factor, 0.02, epsilon = 1e-12);
        assert_eq!(calibration.pixels_to_feet(500.0), 10.0);
        assert_eq!(calibration.feet_to_pixels(7.0), 350.0);
        assert_eq!(calibration.method, CalibrationMethod::ManualReference);

        let err = CalibrationContext::from_reference(0.0, 7.0, "door").unwrap_err();
        assert!(matches!(err, EstimationError::InvalidPixelSize { .. }));
    }

    #[test]
    fn test_detection_calibration_unknown_type_uses_door_size() {
        let model = ObjectSizeModel::new();
        let bbox = BoundingBox::new(0.0, 0.0, 50.0, 140.0);
        let calibration = CalibrationContext::from_detection(&model, &bbox, "wardrobe").unwrap();
        assert_relative_eq!(calibration.scale_factor, 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_resolution_mapping() {
        let mapping = ResolutionMapping::new(ImageShape::new(2160, 3840), ImageShape::new(640, 640));
        let mapped = mapping.map_bbox(&BoundingBox::new(10.0, 20.0, 30.0, 100.0));

        assert_eq!(mapped, BoundingBox::new(60.0, 67.0, 180.0, 337.0));
    }

    #[test]
    fn test_map_detections_keeps_class_and_confidence() {
        let frame = FrameInput::new(
            0,
            ImageShape::new(2160, 3840),
            vec![door(100.0)],
        )
        .with_inference_shape(ImageShape::new(640, 640));

        let mapping = ResolutionMapping::for_frame(&frame).unwrap();
        let mapped = mapping.map_detections(&frame.detections);

        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].class_name, "door");
        assert_eq!(mapped[0].confidence, 0.9);
        assert_eq!(mapped[0].bounding_box, BoundingBox::new(2400.0, 1012.0, 900.0, 337.0));

        let same_size = FrameInput::new(0, ImageShape::new(640, 640), Vec::new())
            .with_inference_shape(ImageShape::new(640, 640));
        assert!(ResolutionMapping::for_frame(&same_size).is_none());
    }

    #[test]
    fn test_manual_dimensions() {
        let model = ObjectSizeModel::new();
        let manual = ManualDimensions {
            length: Some(14.0),
            width: None,
            height: Some(9.5),
        };

        let estimate = estimator(&model).from_manual(&manual).unwrap();
        assert_eq!((estimate.length, estimate.width, estimate.height), (14.0, 10.0, 9.5));
        assert!(!estimate.estimated);
        assert_eq!(estimate.method, EstimationMethod::ManualInput);

        let bad = ManualDimensions {
            length: Some(150.0),
            ..Default::default()
        };
        let err = estimator(&model).from_manual(&bad).unwrap_err();
        assert!(matches!(
            err,
            EstimationError::InvalidManualDimension { field: "length", .. }
        ));
    }

    #[test]
    fn test_dimension_records_pick_most_confident() {
        let model = ObjectSizeModel::new();
        let records = vec![
            DimensionRecord {
                raw_text: "13'2\" x 9'1\"".to_string(),
                length: 13.17,
                width: 9.08,
                confidence: 92.0,
            },
            DimensionRecord {
                raw_text: "27.11 x 31.4".to_string(),
                length: 27.11,
                width: 31.4,
                confidence: 0.6,
            },
        ];

        let estimate = estimator(&model).from_dimension_records(&records, 10.0).unwrap();
        assert_eq!(estimate.length, 13.17);
        assert_eq!(estimate.method, EstimationMethod::FloorplanOcr);
        // 0.92 * 0.7
        assert_relative_eq!(estimate.confidence, 0.644, epsilon = 1e-9);

        assert!(estimator(&model).from_dimension_records(&[], 10.0).is_none());
    }
}
