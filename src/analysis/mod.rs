// src/analysis/mod.rs
//
// Scale inference and multi-observation fusion.
//
// Signal flow:
//   Detections → scale_candidates → scale_fusion → dimension_estimator ─┐
//   Vision estimates (quality-gated) ───────────────────────────────────┼→ frame_aggregator → confidence
//   Manual dimensions ──────────────────────────────────────────────────┘
//
// size_model is read by scale_candidates and refined out of band by
// crate::learning. Orchestrated by video_processor::EstimationPipeline.

pub mod confidence;
pub mod dimension_estimator;
pub mod frame_aggregator;
pub mod scale_candidates;
pub mod scale_fusion;
pub mod size_model;

pub use confidence::{score_confidence, ConfidenceLevel, ConfidenceReport};
pub use dimension_estimator::{
    CalibrationContext, CalibrationMethod, DimensionEstimator, ImageAnalysis, ResolutionMapping,
};
pub use frame_aggregator::{
    AggregateConfidence, AggregatedResult, DimensionVariance, FrameAggregator, FrameObservation,
    VisionEstimate, VisionOverride,
};
pub use scale_candidates::{rank_reference_objects, ScaleCandidate, ScaleCandidateGenerator};
pub use scale_fusion::{detect_contradictions, FusedScale, FusionStrategy, ScaleConsistency, ScaleFusion};
pub use size_model::{ObjectSizeDistribution, ObjectSizeModel};
