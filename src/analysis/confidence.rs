// src/analysis/confidence.rs
//
// Stateless confidence calibration. The error and level tables are
// compatibility contracts with existing consumers; keep the thresholds exact.

use crate::analysis::scale_fusion::FusedScale;
use crate::types::{round3, EstimationMethod};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MANUAL_INPUT_THRESHOLD: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    #[serde(rename = "Very High")]
    VeryHigh,
    High,
    Medium,
    Low,
    #[serde(rename = "Very Low")]
    VeryLow,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::VeryHigh => "Very High",
            ConfidenceLevel::High => "High",
            ConfidenceLevel::Medium => "Medium",
            ConfidenceLevel::Low => "Low",
            ConfidenceLevel::VeryLow => "Very Low",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geometric mean of the three factors; one weak link drags the whole chain
/// down, and any zero factor makes the result zero.
pub fn overall_confidence(scale: f64, dimension: f64, detection: f64) -> f64 {
    let product = scale.max(0.0) * dimension.max(0.0) * detection.max(0.0);
    product.powf(1.0 / 3.0)
}

/// Expected ± error in percent for an overall confidence
pub fn estimate_error_percentage(confidence: f64) -> f64 {
    if confidence >= 0.95 {
        5.0
    } else if confidence >= 0.85 {
        10.0
    } else if confidence >= 0.75 {
        15.0
    } else if confidence >= 0.60 {
        20.0
    } else {
        30.0
    }
}

pub fn confidence_level(confidence: f64) -> ConfidenceLevel {
    if confidence >= 0.90 {
        ConfidenceLevel::VeryHigh
    } else if confidence >= 0.75 {
        ConfidenceLevel::High
    } else if confidence >= 0.60 {
        ConfidenceLevel::Medium
    } else if confidence >= 0.40 {
        ConfidenceLevel::Low
    } else {
        ConfidenceLevel::VeryLow
    }
}

/// The only gate deciding whether the caller asks the user for dimensions
pub fn should_request_manual_input(confidence: f64, threshold: f64) -> bool {
    confidence < threshold
}

/// Fused scale confidence plus a diminishing bonus for corroborating candidates
pub fn scale_confidence(fused: &FusedScale) -> f64 {
    let boost = (fused.candidate_count as f64 * 0.05).min(0.2);
    (fused.confidence + boost).min(1.0)
}

/// How much the estimation method itself is trusted
pub fn method_multiplier(method: EstimationMethod) -> f64 {
    match method {
        EstimationMethod::VisionApi
        | EstimationMethod::VisionApiMedian
        | EstimationMethod::PhotoEstimation => 1.0,
        EstimationMethod::VideoMultiFrame | EstimationMethod::VideoMultiFrameMedian => 0.95,
        EstimationMethod::CvEstimation => 0.85,
        EstimationMethod::ManualInput => 1.0,
        EstimationMethod::DefaultAssumption => 0.3,
        EstimationMethod::FloorplanOcr => 0.7,
    }
}

pub fn dimension_confidence(scale_confidence: f64, method: EstimationMethod) -> f64 {
    (scale_confidence * method_multiplier(method)).min(1.0)
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub scale_confidence: f64,
    pub dimension_confidence: f64,
    pub detection_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub overall_confidence: f64,
    pub confidence_level: ConfidenceLevel,
    pub expected_error_percent: f64,
    pub estimation_mode: EstimationMethod,
    pub breakdown: ConfidenceBreakdown,
    pub manual_input_required: bool,
}

pub fn score_confidence(
    scale: f64,
    dimension: f64,
    detection: f64,
    mode: EstimationMethod,
) -> ConfidenceReport {
    score_confidence_with_threshold(
        scale,
        dimension,
        detection,
        mode,
        DEFAULT_MANUAL_INPUT_THRESHOLD,
    )
}

pub fn score_confidence_with_threshold(
    scale: f64,
    dimension: f64,
    detection: f64,
    mode: EstimationMethod,
    manual_threshold: f64,
) -> ConfidenceReport {
    let overall = overall_confidence(scale, dimension, detection);

    ConfidenceReport {
        overall_confidence: round3(overall),
        confidence_level: confidence_level(overall),
        expected_error_percent: estimate_error_percentage(overall),
        estimation_mode: mode,
        breakdown: ConfidenceBreakdown {
            scale_confidence: round3(scale),
            dimension_confidence: round3(dimension),
            detection_confidence: round3(detection),
        },
        manual_input_required: should_request_manual_input(overall, manual_threshold),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_error_table_boundaries() {
        assert_eq!(estimate_error_percentage(0.96), 5.0);
        assert_eq!(estimate_error_percentage(0.95), 5.0);
        assert_eq!(estimate_error_percentage(0.949), 10.0);
        assert_eq!(estimate_error_percentage(0.85), 10.0);
        assert_eq!(estimate_error_percentage(0.80), 15.0);
        assert_eq!(estimate_error_percentage(0.75), 15.0);
        assert_eq!(estimate_error_percentage(0.60), 20.0);
        assert_eq!(estimate_error_percentage(0.5999), 30.0);
        assert_eq!(estimate_error_percentage(0.50), 30.0);
    }

    #[test]
    fn test_confidence_levels() {
        assert_eq!(confidence_level(0.90), ConfidenceLevel::VeryHigh);
        assert_eq!(confidence_level(0.89), ConfidenceLevel::High);
        assert_eq!(confidence_level(0.60), ConfidenceLevel::Medium);
        assert_eq!(confidence_level(0.40), ConfidenceLevel::Low);
        assert_eq!(confidence_level(0.39), ConfidenceLevel::VeryLow);
        assert_eq!(ConfidenceLevel::VeryHigh.to_string(), "Very High");
    }

    #[test]
    fn test_geometric_mean_monotonic() {
        let mut previous = overall_confidence(0.9, 0.8, 1.0);
        for step in 1..=9 {
            let detection = 1.0 - step as f64 * 0.1;
            let current = overall_confidence(0.9, 0.8, detection);
            assert!(current < previous, "overall must fall as detection falls");
            previous = current;
        }

        assert_eq!(overall_confidence(0.0, 0.9, 0.9), 0.0);
        assert_eq!(overall_confidence(0.9, 0.0, 0.9), 0.0);
        assert_eq!(overall_confidence(0.9, 0.9, 0.0), 0.0);
        assert_relative_eq!(overall_confidence(0.8, 0.8, 0.8), 0.8, epsilon = 1e-12);
    }

    #[test]
    fn test_manual_input_gate() {
        assert!(should_request_manual_input(0.39, 0.4));
        assert!(!should_request_manual_input(0.4, 0.4));
        assert!(!should_request_manual_input(0.9, DEFAULT_MANUAL_INPUT_THRESHOLD));
    }

    #[test]
    fn test_scale_confidence_boost() {
        let fused = FusedScale {
            scale: Some(0.02),
            confidence: 0.7,
            method: "weighted_median".to_string(),
            candidate_count: 2,
        };
        assert_relative_eq!(scale_confidence(&fused), 0.8, epsilon = 1e-12);

        let many = FusedScale {
            candidate_count: 10,
            confidence: 0.95,
            ..fused
        };
        assert_eq!(scale_confidence(&many), 1.0);
    }

    #[test]
    fn test_dimension_confidence_multipliers() {
        assert_relative_eq!(
            dimension_confidence(0.81, EstimationMethod::CvEstimation),
            0.6885,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            dimension_confidence(0.9, EstimationMethod::DefaultAssumption),
            0.27,
            epsilon = 1e-12
        );
        assert_eq!(dimension_confidence(1.0, EstimationMethod::ManualInput), 1.0);
    }

    #[test]
    fn test_report() {
        let report = score_confidence(0.92, 0.92, 0.92, EstimationMethod::VideoMultiFrameMedian);

        assert_relative_eq!(report.overall_confidence, 0.92, epsilon = 1e-9);
        assert_eq!(report.confidence_level, ConfidenceLevel::VeryHigh);
        assert_eq!(report.expected_error_percent, 10.0);
        assert!(!report.manual_input_required);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["confidence_level"], "Very High");
        assert_eq!(json["estimation_mode"], "video_multi_frame_median");

        let weak = score_confidence(0.3, 0.3, 0.3, EstimationMethod::DefaultAssumption);
        assert!(weak.manual_input_required);
        assert_eq!(weak.expected_error_percent, 30.0);
    }
}
