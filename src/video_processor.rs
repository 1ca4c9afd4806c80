// src/video_processor.rs
//
// Request-level orchestration: photos, video walkthroughs, multi-room batches
// and floor-plan records in, one scored dimension estimate out.
//
// Order of preference for a photo: vision waterfall → CV scale inference →
// default room. For video, every frame gets a CV estimate, the best frames
// also go to the vision waterfall, and the aggregator decides.

use crate::analysis::confidence::{self, ConfidenceReport};
use crate::analysis::dimension_estimator::{DimensionEstimator, ResolutionMapping};
use crate::analysis::frame_aggregator::{AggregatedResult, FrameAggregator, FrameObservation, VisionEstimate};
use crate::analysis::scale_candidates::ScaleCandidate;
use crate::analysis::scale_fusion::{detect_contradictions, ScaleConsistency, ScaleFusion};
use crate::analysis::size_model::ObjectSizeModel;
use crate::error::{EstimationError, Result};
use crate::learning::LearningRecord;
use crate::types::{
    round2, round3, AggregationConfig, Config, Detection, DimensionEstimate, DimensionRecord,
    EstimationMethod, FrameInput, ManualDimensions, ObjectCounts,
};
use crate::vision_sources::VisionWaterfall;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

// ============================================================================
// REQUESTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomInput {
    pub name: String,
    pub frame: FrameInput,
    #[serde(default)]
    pub manual: Option<ManualDimensions>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EstimationRequest {
    Image {
        frame: FrameInput,
        #[serde(default)]
        manual: Option<ManualDimensions>,
    },
    Video {
        frames: Vec<FrameInput>,
        #[serde(default)]
        manual: Option<ManualDimensions>,
    },
    Rooms {
        rooms: Vec<RoomInput>,
    },
    FloorPlan {
        records: Vec<DimensionRecord>,
        #[serde(default)]
        ceiling_height: Option<f64>,
    },
}

/// One request file as found in the input directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFile {
    #[serde(default)]
    pub request_id: Option<String>,
    /// Free-form caller data; anonymized before any learning storage
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub request: EstimationRequest,
}

// ============================================================================
// RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    pub dimensions: DimensionEstimate,
    pub counts: ObjectCounts,
    pub confidence: ConfidenceReport,
    pub scale_candidates: Vec<ScaleCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_consistency: Option<ScaleConsistency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregatedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomResult {
    pub name: String,
    #[serde(flatten)]
    pub result: EstimationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestOutcome {
    Single(EstimationResult),
    Rooms(Vec<RoomResult>),
}

impl RequestOutcome {
    pub fn results(&self) -> Vec<&EstimationResult> {
        match self {
            RequestOutcome::Single(result) => vec![result],
            RequestOutcome::Rooms(rooms) => rooms.iter().map(|r| &r.result).collect(),
        }
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct EstimationPipeline {
    config: Config,
    model: ObjectSizeModel,
    fusion: ScaleFusion,
    waterfall: VisionWaterfall,
}

impl EstimationPipeline {
    pub fn new(config: Config) -> Result<Self> {
        let fusion = ScaleFusion::new(config.fusion_strategy()?);
        let waterfall = VisionWaterfall::from_config(&config);

        Ok(Self {
            config,
            model: ObjectSizeModel::new(),
            fusion,
            waterfall,
        })
    }

    pub fn with_model(mut self, model: ObjectSizeModel) -> Self {
        self.model = model;
        self
    }

    pub fn with_waterfall(mut self, waterfall: VisionWaterfall) -> Self {
        self.waterfall = waterfall;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &ObjectSizeModel {
        &self.model
    }

    /// Exclusive access for learning updates; no estimate can run meanwhile
    pub fn model_mut(&mut self) -> &mut ObjectSizeModel {
        &mut self.model
    }

    fn estimator(&self) -> DimensionEstimator<'_> {
        DimensionEstimator::new(&self.model, self.fusion, self.config.estimation.clone())
    }

    fn report(&self, scale: f64, dimension: f64, detection: f64, mode: EstimationMethod) -> ConfidenceReport {
        confidence::score_confidence_with_threshold(
            scale,
            dimension,
            detection,
            mode,
            self.config.confidence.manual_input_threshold,
        )
    }

    pub fn process(&self, request: &EstimationRequest) -> Result<RequestOutcome> {
        match request {
            EstimationRequest::Image { frame, manual } => {
                self.process_image(frame, manual.as_ref()).map(RequestOutcome::Single)
            }
            EstimationRequest::Video { frames, manual } => {
                self.process_video(frames, manual.as_ref()).map(RequestOutcome::Single)
            }
            EstimationRequest::Rooms { rooms } => self.process_rooms(rooms).map(RequestOutcome::Rooms),
            EstimationRequest::FloorPlan {
                records,
                ceiling_height,
            } => Ok(RequestOutcome::Single(
                self.process_floor_plan(records, *ceiling_height),
            )),
        }
    }

    /// Single photo
    pub fn process_image(
        &self,
        frame: &FrameInput,
        manual: Option<&ManualDimensions>,
    ) -> Result<EstimationResult> {
        let estimator = self.estimator();
        let detections = image_space_detections(frame);
        let analysis = estimator.analyze(frame.image_shape, &detections);
        let detection_confidence = self.detection_confidence(&detections);

        if let Some(manual) = manual.filter(|m| !m.is_empty()) {
            let dimensions = estimator.from_manual(manual)?;
            return Ok(EstimationResult {
                dimensions,
                counts: analysis.counts,
                confidence: self.report(1.0, 1.0, 1.0, EstimationMethod::ManualInput),
                scale_candidates: analysis.candidates,
                scale_consistency: None,
                aggregation: None,
                vision_source: None,
            });
        }

        if let Some(vision) = self.waterfall.analyze(frame) {
            if let Some(best) = vision.best() {
                let dimension_confidence =
                    confidence::dimension_confidence(best.confidence, EstimationMethod::PhotoEstimation);
                let detection_confidence = if frame.detections.is_empty() {
                    best.confidence
                } else {
                    detection_confidence
                };
                let counts = if frame.detections.is_empty() {
                    vision.detected_counts.unwrap_or(analysis.counts)
                } else {
                    analysis.counts
                };

                info!("🔭 Photo estimated by {} (conf={:.2})", vision.source, best.confidence);

                return Ok(EstimationResult {
                    dimensions: DimensionEstimate {
                        length: round2(best.length),
                        width: round2(best.width),
                        height: round2(best.height),
                        estimated: true,
                        method: EstimationMethod::PhotoEstimation,
                        confidence: round3(dimension_confidence),
                    },
                    counts,
                    confidence: self.report(
                        best.confidence,
                        dimension_confidence,
                        detection_confidence,
                        EstimationMethod::PhotoEstimation,
                    ),
                    scale_candidates: analysis.candidates,
                    scale_consistency: None,
                    aggregation: None,
                    vision_source: Some(vision.source.clone()),
                });
            }
        }

        let scale_confidence = if analysis.fused_scale.is_resolved() {
            confidence::scale_confidence(&analysis.fused_scale)
        } else {
            warn!("⚠️  No usable reference object; falling back to default room size");
            self.config.estimation.fallback_confidence
        };

        let consistency = detect_contradictions(&analysis.candidates);
        let report = self.report(
            scale_confidence,
            analysis.estimate.confidence,
            detection_confidence,
            analysis.estimate.method,
        );

        Ok(EstimationResult {
            dimensions: analysis.estimate,
            counts: analysis.counts,
            confidence: report,
            scale_candidates: analysis.candidates,
            scale_consistency: Some(consistency),
            aggregation: None,
            vision_source: None,
        })
    }

    /// Multi-frame walkthrough
    pub fn process_video(
        &self,
        frames: &[FrameInput],
        manual: Option<&ManualDimensions>,
    ) -> Result<EstimationResult> {
        if frames.is_empty() {
            return Err(EstimationError::EmptyFrameSet);
        }

        let estimator = self.estimator();
        let manual_estimate = match manual.filter(|m| !m.is_empty()) {
            Some(m) => Some(estimator.from_manual(m)?),
            None => None,
        };

        let mut observations = Vec::with_capacity(frames.len());
        let mut candidates = Vec::new();
        for frame in frames {
            let analysis = estimator.analyze(frame.image_shape, &image_space_detections(frame));
            debug!(
                "Frame {}: {:.2} x {:.2} ft via {} ({} candidates)",
                frame.frame_number,
                analysis.estimate.length,
                analysis.estimate.width,
                analysis.estimate.method,
                analysis.candidates.len()
            );
            let scale_confidence = if analysis.fused_scale.is_resolved() {
                confidence::scale_confidence(&analysis.fused_scale)
            } else {
                0.0
            };
            observations.push(FrameObservation {
                frame_number: frame.frame_number,
                estimate: analysis.estimate,
                scale_confidence,
                counts: analysis.counts,
            });
            candidates.extend(analysis.candidates);
        }

        let vision_estimates = if manual_estimate.is_none() {
            self.vision_estimates(frames)
        } else {
            Vec::new()
        };

        let aggregated = FrameAggregator::new(self.config.aggregation.clone()).aggregate(
            &observations,
            &vision_estimates,
            manual_estimate.as_ref(),
        )?;

        let report = self.report(
            aggregated.confidence.scale_confidence,
            aggregated.confidence.dimension_confidence,
            aggregated.confidence.detection_confidence,
            aggregated.dimensions.method,
        );

        if report.manual_input_required {
            warn!(
                "⚠️  Overall confidence {:.2} below threshold; manual dimensions recommended",
                report.overall_confidence
            );
        }

        Ok(EstimationResult {
            dimensions: aggregated.dimensions.clone(),
            counts: aggregated.counts,
            confidence: report,
            scale_consistency: Some(detect_contradictions(&candidates)),
            scale_candidates: candidates,
            vision_source: aggregated.vision.as_ref().map(|v| v.source.clone()),
            aggregation: Some(aggregated),
        })
    }

    fn vision_estimates(&self, frames: &[FrameInput]) -> Vec<VisionEstimate> {
        if self.waterfall.is_empty() {
            return Vec::new();
        }

        let selected = select_vision_frames(frames, &self.config.aggregation);
        info!(
            "🔭 Sending {} of {} frames to vision services",
            selected.len(),
            frames.len()
        );

        selected
            .into_iter()
            .filter_map(|frame| {
                self.waterfall
                    .analyze(frame)
                    .and_then(|analysis| analysis.to_estimate(frame.frame_number))
            })
            .collect()
    }

    /// Independent rooms; each photo gets its own calibration
    pub fn process_rooms(&self, rooms: &[RoomInput]) -> Result<Vec<RoomResult>> {
        rooms
            .iter()
            .map(|room| {
                let result = self.process_image(&room.frame, room.manual.as_ref())?;
                info!(
                    "🏠 {}: {:.2} x {:.2} x {:.2} ft ({})",
                    room.name,
                    result.dimensions.length,
                    result.dimensions.width,
                    result.dimensions.height,
                    result.dimensions.method
                );
                Ok(RoomResult {
                    name: room.name.clone(),
                    result,
                })
            })
            .collect()
    }

    /// Floor-plan dimension records from an OCR collaborator
    pub fn process_floor_plan(
        &self,
        records: &[DimensionRecord],
        ceiling_height: Option<f64>,
    ) -> EstimationResult {
        let estimator = self.estimator();
        let ceiling = ceiling_height.unwrap_or(self.config.estimation.default_ceiling_ft);

        let dimensions = estimator
            .from_dimension_records(records, ceiling)
            .unwrap_or_else(|| {
                warn!("⚠️  No usable floor plan dimensions; falling back to default room size");
                estimator.fallback_estimate()
            });

        let c = dimensions.confidence;
        EstimationResult {
            confidence: self.report(c, c, c, dimensions.method),
            dimensions,
            counts: ObjectCounts::default(),
            scale_candidates: Vec::new(),
            scale_consistency: None,
            aggregation: None,
            vision_source: None,
        }
    }

    /// Learning log entry for a finished estimate
    pub fn learning_record(&self, result: &EstimationResult, metadata: &Map<String, Value>) -> LearningRecord {
        LearningRecord::new(
            result.confidence.estimation_mode,
            result.scale_candidates.clone(),
            result.dimensions.clone(),
            result.confidence.clone(),
        )
        .with_metadata(metadata.clone())
    }

    /// Mean detector confidence, or the fallback confidence with no detections
    fn detection_confidence(&self, detections: &[Detection]) -> f64 {
        if detections.is_empty() {
            return self.config.estimation.fallback_confidence;
        }
        detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64
    }
}

/// Detections in original image coordinates
fn image_space_detections(frame: &FrameInput) -> Vec<Detection> {
    match ResolutionMapping::for_frame(frame) {
        Some(mapping) => mapping.map_detections(&frame.detections),
        None => frame.detections.clone(),
    }
}

/// Frames worth a vision call: quality gate, then best first, capped
pub fn select_vision_frames<'a>(
    frames: &'a [FrameInput],
    config: &AggregationConfig,
) -> Vec<&'a FrameInput> {
    let mut eligible: Vec<&FrameInput> = frames
        .iter()
        .filter(|f| f.quality >= config.min_frame_quality)
        .collect();

    eligible.sort_by(|a, b| b.quality.partial_cmp(&a.quality).unwrap_or(Ordering::Equal));
    eligible.truncate(config.max_vision_frames);
    eligible
}

// ============================================================================
// REQUEST FILES
// ============================================================================

pub fn find_request_files(input_dir: impl AsRef<Path>) -> anyhow::Result<Vec<PathBuf>> {
    let input_dir = input_dir.as_ref();
    if !input_dir.exists() {
        anyhow::bail!("Input directory {} does not exist", input_dir.display());
    }

    let mut requests: Vec<PathBuf> = WalkDir::new(input_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| ext.eq_ignore_ascii_case("json"))
        })
        .collect();

    requests.sort();
    info!("Found {} request files", requests.len());
    Ok(requests)
}

pub fn load_request(path: &Path) -> anyhow::Result<RequestFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid request {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::confidence::ConfidenceLevel;
    use crate::types::{BoundingBox, ImageShape};
    use crate::vision_sources::{DimensionSource, SourceError, VisionAnalysis, VisionDimensions};
    use approx::assert_relative_eq;
    use std::cell::Cell;
    use std::rc::Rc;

    struct StubSource {
        length: f64,
        confidence: f64,
        calls: Rc<Cell<usize>>,
    }

    impl DimensionSource for StubSource {
        fn name(&self) -> &str {
            "stub"
        }

        fn try_extract(&self, _frame: &FrameInput) -> std::result::Result<VisionAnalysis, SourceError> {
            self.calls.set(self.calls.get() + 1);
            Ok(VisionAnalysis {
                source: "stub".to_string(),
                dimensions: vec![VisionDimensions {
                    length: self.length,
                    width: 11.0,
                    height: 9.0,
                    confidence: self.confidence,
                }],
                detected_counts: Some(ObjectCounts { doors: 2, windows: 1 }),
            })
        }
    }

    fn pipeline() -> EstimationPipeline {
        EstimationPipeline::new(Config::default()).unwrap()
    }

    fn stub_waterfall(length: f64, confidence: f64) -> (VisionWaterfall, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let waterfall = VisionWaterfall::new(0.6).with_source(Box::new(StubSource {
            length,
            confidence,
            calls: Rc::clone(&calls),
        }));
        (waterfall, calls)
    }

    fn door_frame(n: usize) -> FrameInput {
        FrameInput::new(
            n,
            ImageShape::new(1080, 1920),
            vec![Detection::new("door", 0.9, BoundingBox::new(400.0, 300.0, 150.0, 350.0))],
        )
    }

    fn empty_frame(n: usize) -> FrameInput {
        FrameInput::new(n, ImageShape::new(1080, 1920), Vec::new())
    }

    #[test]
    fn test_image_with_door() {
        let result = pipeline().process_image(&door_frame(0), None).unwrap();

        assert_eq!(result.dimensions.method, EstimationMethod::CvEstimation);
        assert_relative_eq!(result.dimensions.width, 38.4, epsilon = 1e-9);
        assert_eq!(result.counts.doors, 1);
        // 0.81 + 0.05 boost
        assert_relative_eq!(result.confidence.breakdown.scale_confidence, 0.86, epsilon = 1e-9);
        assert_eq!(result.confidence.estimation_mode, EstimationMethod::CvEstimation);
        assert_eq!(result.confidence.confidence_level, ConfidenceLevel::High);
        assert!(!result.confidence.manual_input_required);
    }

    #[test]
    fn test_image_without_reference_requests_manual_input() {
        let result = pipeline().process_image(&empty_frame(0), None).unwrap();

        assert_eq!(result.dimensions.method, EstimationMethod::DefaultAssumption);
        assert_relative_eq!(result.confidence.overall_confidence, 0.3, epsilon = 1e-9);
        assert!(result.confidence.manual_input_required);
    }

    #[test]
    fn test_image_prefers_vision_source() {
        let (waterfall, calls) = stub_waterfall(13.0, 0.85);
        let pipeline = pipeline().with_waterfall(waterfall);

        let result = pipeline.process_image(&empty_frame(0), None).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(result.dimensions.method, EstimationMethod::PhotoEstimation);
        assert_eq!(result.dimensions.length, 13.0);
        assert_eq!(result.counts, ObjectCounts { doors: 2, windows: 1 });
        assert_eq!(result.vision_source.as_deref(), Some("stub"));
    }

    #[test]
    fn test_image_manual_override() {
        let (waterfall, calls) = stub_waterfall(13.0, 0.85);
        let pipeline = pipeline().with_waterfall(waterfall);
        let manual = ManualDimensions {
            length: Some(15.0),
            width: Some(11.0),
            height: None,
        };

        let result = pipeline.process_image(&door_frame(0), Some(&manual)).unwrap();

        assert_eq!(calls.get(), 0);
        assert_eq!(result.dimensions.method, EstimationMethod::ManualInput);
        assert_eq!(result.dimensions.height, 10.0);
        assert_eq!(result.confidence.overall_confidence, 1.0);
    }

    #[test]
    fn test_video_cv_aggregation() {
        let frames = vec![door_frame(0), door_frame(1), empty_frame(2), door_frame(3), door_frame(4)];
        let result = pipeline().process_video(&frames, None).unwrap();

        assert_eq!(result.dimensions.method, EstimationMethod::VideoMultiFrameMedian);
        assert_relative_eq!(result.dimensions.width, 38.4, epsilon = 1e-9);
        assert_eq!(result.counts.doors, 1);
        assert_eq!(result.scale_candidates.len(), 4);

        let aggregation = result.aggregation.unwrap();
        // doors [1,1,0,1,1] → 0.8, windows all 0 → 1.0
        assert_relative_eq!(aggregation.confidence.detection_confidence, 0.9, epsilon = 1e-9);
        assert_eq!(aggregation.frame_count, 5);
        assert_eq!(aggregation.measured_frame_count, 4);
    }

    #[test]
    fn test_video_breakdown_matches_single_image() {
        let pipeline = pipeline();
        let image = pipeline.process_image(&door_frame(0), None).unwrap();
        let video = pipeline
            .process_video(&[door_frame(0), door_frame(1), door_frame(2)], None)
            .unwrap();

        assert_relative_eq!(
            video.confidence.breakdown.scale_confidence,
            image.confidence.breakdown.scale_confidence,
            epsilon = 1e-9
        );
        assert_relative_eq!(video.confidence.breakdown.scale_confidence, 0.86, epsilon = 1e-9);
        assert_eq!(video.dimensions.width, image.dimensions.width);
    }

    #[test]
    fn test_video_without_references_requests_manual_input() {
        let frames: Vec<FrameInput> = (0..5).map(empty_frame).collect();
        let result = pipeline().process_video(&frames, None).unwrap();

        assert_eq!(result.dimensions.method, EstimationMethod::DefaultAssumption);
        assert_eq!(result.dimensions.length, 12.0);
        assert_relative_eq!(result.confidence.overall_confidence, 0.3, epsilon = 1e-9);
        assert_eq!(result.confidence.confidence_level, ConfidenceLevel::VeryLow);
        assert_eq!(result.confidence.expected_error_percent, 30.0);
        assert!(result.confidence.manual_input_required);
        assert_eq!(result.aggregation.unwrap().measured_frame_count, 0);
    }

    #[test]
    fn test_video_measured_frames_outweigh_unreferenced_majority() {
        let frames = vec![empty_frame(0), door_frame(1), empty_frame(2), door_frame(3), empty_frame(4)];
        let result = pipeline().process_video(&frames, None).unwrap();

        assert_eq!(result.dimensions.method, EstimationMethod::VideoMultiFrameMedian);
        assert_relative_eq!(result.dimensions.width, 38.4, epsilon = 1e-9);
        assert_eq!(result.counts.doors, 1);

        let aggregation = result.aggregation.unwrap();
        assert_eq!(aggregation.measured_frame_count, 2);
        // doors [0,1,0,1,0] → 0.4, windows all 0 → 1.0
        assert_relative_eq!(aggregation.confidence.detection_confidence, 0.7, epsilon = 1e-9);
    }

    #[test]
    fn test_image_detections_mapped_from_inference_size() {
        // Detector ran at half resolution; the 175 px door is 350 px in the photo
        let frame = FrameInput::new(
            0,
            ImageShape::new(1080, 1920),
            vec![Detection::new("door", 0.9, BoundingBox::new(200.0, 150.0, 75.0, 175.0))],
        )
        .with_inference_shape(ImageShape::new(540, 960));

        let result = pipeline().process_image(&frame, None).unwrap();

        assert_eq!(result.dimensions.method, EstimationMethod::CvEstimation);
        assert_relative_eq!(result.dimensions.width, 38.4, epsilon = 1e-9);
        assert_relative_eq!(result.scale_candidates[0].pixel_size, 350.0, epsilon = 1e-9);
    }

    #[test]
    fn test_video_vision_override_respects_quality_gate() {
        let (waterfall, calls) = stub_waterfall(14.0, 0.9);
        let pipeline = pipeline().with_waterfall(waterfall);

        let frames: Vec<FrameInput> = (0..8)
            .map(|i| door_frame(i).with_quality(if i < 2 { 20.0 } else { 60.0 + i as f64 }))
            .collect();

        let result = pipeline.process_video(&frames, None).unwrap();

        // 6 frames pass the gate, capped at 5
        assert_eq!(calls.get(), 5);
        assert_eq!(result.dimensions.method, EstimationMethod::VisionApiMedian);
        assert_eq!(result.dimensions.length, 14.0);
        assert_eq!(result.counts.doors, 1);
        assert_eq!(result.vision_source.as_deref(), Some("stub"));
        assert_eq!(result.aggregation.unwrap().vision.unwrap().frames_analyzed, 5);
    }

    #[test]
    fn test_video_manual_skips_vision() {
        let (waterfall, calls) = stub_waterfall(14.0, 0.9);
        let pipeline = pipeline().with_waterfall(waterfall);
        let manual = ManualDimensions {
            length: Some(12.5),
            width: Some(10.5),
            height: Some(9.0),
        };

        let result = pipeline
            .process_video(&[door_frame(0), empty_frame(1)], Some(&manual))
            .unwrap();

        assert_eq!(calls.get(), 0);
        assert_eq!(result.dimensions.method, EstimationMethod::ManualInput);
        assert!(!result.dimensions.estimated);
        assert_eq!(result.counts.doors, 1);
    }

    #[test]
    fn test_video_rejects_empty_and_invalid_manual() {
        let err = pipeline().process_video(&[], None).unwrap_err();
        assert!(matches!(err, EstimationError::EmptyFrameSet));

        let manual = ManualDimensions {
            width: Some(-3.0),
            ..Default::default()
        };
        let err = pipeline().process_video(&[door_frame(0)], Some(&manual)).unwrap_err();
        assert!(matches!(err, EstimationError::InvalidManualDimension { field: "width", .. }));
    }

    #[test]
    fn test_rooms_do_not_share_calibration() {
        let rooms = vec![
            RoomInput {
                name: "kitchen".to_string(),
                frame: door_frame(0),
                manual: None,
            },
            RoomInput {
                name: "hallway".to_string(),
                frame: empty_frame(0),
                manual: None,
            },
        ];

        let results = pipeline().process_rooms(&rooms).unwrap();

        assert_eq!(results[0].result.dimensions.method, EstimationMethod::CvEstimation);
        assert_eq!(results[1].name, "hallway");
        assert_eq!(results[1].result.dimensions.method, EstimationMethod::DefaultAssumption);
        assert_eq!(results[1].result.dimensions.width, 10.0);
    }

    #[test]
    fn test_floor_plan_records() {
        let records = vec![DimensionRecord {
            raw_text: "14' x 12'".to_string(),
            length: 14.0,
            width: 12.0,
            confidence: 0.9,
        }];
        let result = pipeline().process_floor_plan(&records, Some(9.0));

        assert_eq!(result.dimensions.method, EstimationMethod::FloorplanOcr);
        assert_eq!(result.dimensions.height, 9.0);

        let fallback = pipeline().process_floor_plan(&[], None);
        assert_eq!(fallback.dimensions.method, EstimationMethod::DefaultAssumption);
    }

    #[test]
    fn test_select_vision_frames() {
        let frames: Vec<FrameInput> = [40.0, 90.0, 55.0, 70.0]
            .iter()
            .enumerate()
            .map(|(i, &q)| empty_frame(i).with_quality(q))
            .collect();
        let config = AggregationConfig {
            max_vision_frames: 2,
            ..AggregationConfig::default()
        };

        let selected: Vec<usize> = select_vision_frames(&frames, &config)
            .iter()
            .map(|f| f.frame_number)
            .collect();
        assert_eq!(selected, vec![1, 3]);
    }

    #[test]
    fn test_learning_record_from_result() {
        let pipeline = pipeline();
        let result = pipeline.process_image(&door_frame(0), None).unwrap();
        let mut metadata = Map::new();
        metadata.insert("room".to_string(), Value::String("kitchen".to_string()));

        let record = pipeline.learning_record(&result, &metadata);
        assert_eq!(record.estimation_mode, EstimationMethod::CvEstimation);
        assert_eq!(record.scale_candidates.len(), 1);
        assert_eq!(record.overall_confidence(), result.confidence.overall_confidence);
    }

    #[test]
    fn test_request_parsing_and_discovery() {
        let dir = std::env::temp_dir().join(format!("roomscale-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(dir.join("nested")).unwrap();

        let request = r#"{
            "request_id": "r-1",
            "type": "image",
            "frame": {
                "image_shape": {"height": 1080, "width": 1920},
                "detections": [
                    {"class_name": "door", "confidence": 0.9, "bbox": {"x": 400, "y": 300, "w": 150, "h": 350}}
                ]
            }
        }"#;
        std::fs::write(dir.join("nested/b.json"), request).unwrap();
        std::fs::write(dir.join("a.JSON"), r#"{"type": "floor_plan", "records": []}"#).unwrap();
        std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let files = find_request_files(&dir).unwrap();
        assert_eq!(files.len(), 2);

        let parsed = load_request(&dir.join("nested/b.json")).unwrap();
        assert_eq!(parsed.request_id.as_deref(), Some("r-1"));
        match &parsed.request {
            EstimationRequest::Image { frame, manual } => {
                assert_eq!(frame.quality, 100.0);
                assert_eq!(frame.detections.len(), 1);
                assert!(manual.is_none());
            }
            other => panic!("unexpected request {:?}", other),
        }

        let outcome = pipeline().process(&parsed.request).unwrap();
        assert_eq!(outcome.results().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
