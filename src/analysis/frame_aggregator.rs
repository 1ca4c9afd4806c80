// src/analysis/frame_aggregator.rs
//
// Merges per-frame dimension estimates into one measurement.
//
// - Dimensions: median across frames that resolved a scale (outlier frames
//   with an occluded reference object must not drag the result). Frames that
//   fell back to the default room only contribute counts; when no frame
//   resolved a scale the result stays a default assumption.
// - Counts: maximum across frames (missed detections are likelier than
//   false positives)
// - Vision estimates, when any pass the confidence gate, replace the CV
//   dimensions; CV counts are kept either way

use crate::analysis::confidence;
use crate::error::{EstimationError, Result};
use crate::types::{round2, round3, AggregationConfig, DimensionEstimate, EstimationMethod, ObjectCounts};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{debug, info, warn};

/// One frame's CV result as seen by the aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameObservation {
    pub frame_number: usize,
    pub estimate: DimensionEstimate,
    /// Fused scale confidence with its candidate boost; 0 when unresolved
    pub scale_confidence: f64,
    pub counts: ObjectCounts,
}

impl FrameObservation {
    pub fn is_measured(&self) -> bool {
        self.estimate.method != EstimationMethod::DefaultAssumption
    }
}

/// Room size reported by an external vision model for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionEstimate {
    pub frame_number: usize,
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
    /// Name of the service that produced the estimate
    pub source: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionVariance {
    pub length_std: f64,
    pub width_std: f64,
    pub height_std: f64,
}

impl DimensionVariance {
    pub fn average_std(&self) -> f64 {
        (self.length_std + self.width_std + self.height_std) / 3.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregateConfidence {
    pub scale_confidence: f64,
    pub dimension_confidence: f64,
    pub detection_confidence: f64,
    pub overall_confidence: f64,
}

/// Provenance of dimensions supplied by a vision service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionOverride {
    pub source: String,
    pub frames_analyzed: usize,
    pub variance: DimensionVariance,
    pub confidence: f64,
    pub expected_error_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    pub dimensions: DimensionEstimate,
    pub variance: DimensionVariance,
    pub counts: ObjectCounts,
    pub confidence: AggregateConfidence,
    pub frame_count: usize,
    /// Frames whose dimensions came from a resolved scale
    pub measured_frame_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision: Option<VisionOverride>,
}

pub struct FrameAggregator {
    config: AggregationConfig,
}

impl FrameAggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    /// Combine all frames of one request.
    ///
    /// `manual` must already be resolved (see `DimensionEstimator::from_manual`);
    /// when present it wins outright with full confidence.
    pub fn aggregate(
        &self,
        frames: &[FrameObservation],
        vision: &[VisionEstimate],
        manual: Option<&DimensionEstimate>,
    ) -> Result<AggregatedResult> {
        if frames.is_empty() {
            return Err(EstimationError::EmptyFrameSet);
        }

        let counts = max_counts(frames);

        if let Some(manual) = manual {
            debug!("Manual dimensions supplied; skipping aggregation of {} frames", frames.len());
            return Ok(AggregatedResult {
                dimensions: manual.clone(),
                variance: DimensionVariance::default(),
                counts,
                confidence: AggregateConfidence {
                    scale_confidence: 1.0,
                    dimension_confidence: 1.0,
                    detection_confidence: 1.0,
                    overall_confidence: 1.0,
                },
                frame_count: frames.len(),
                measured_frame_count: frames.iter().filter(|f| f.is_measured()).count(),
                vision: None,
            });
        }

        let detection_confidence = detection_consistency(frames);

        let usable: Vec<&VisionEstimate> = vision
            .iter()
            .filter(|v| v.confidence >= self.config.min_vision_confidence)
            .collect();

        if !usable.is_empty() {
            return Ok(self.vision_result(&usable, counts, detection_confidence, frames));
        }

        let measured: Vec<&FrameObservation> = frames.iter().filter(|f| f.is_measured()).collect();
        if measured.is_empty() {
            return Ok(default_result(frames, counts));
        }

        let lengths: Vec<f64> = measured.iter().map(|f| f.estimate.length).collect();
        let widths: Vec<f64> = measured.iter().map(|f| f.estimate.width).collect();
        let heights: Vec<f64> = measured.iter().map(|f| f.estimate.height).collect();
        let scale_confidences: Vec<f64> = measured.iter().map(|f| f.scale_confidence).collect();

        let variance = variance_of(&lengths, &widths, &heights);
        let dimension_confidence = variance_confidence(&variance, measured.len());
        let scale_confidence = median(&scale_confidences);
        let overall =
            confidence::overall_confidence(scale_confidence, dimension_confidence, detection_confidence);

        info!(
            "📊 Aggregated {}/{} frames → {:.2} x {:.2} x {:.2} ft (dim_conf={:.2}, det_conf={:.2})",
            measured.len(),
            frames.len(),
            median(&lengths),
            median(&widths),
            median(&heights),
            dimension_confidence,
            detection_confidence
        );

        Ok(AggregatedResult {
            dimensions: DimensionEstimate {
                length: round2(median(&lengths)),
                width: round2(median(&widths)),
                height: round2(median(&heights)),
                estimated: true,
                method: EstimationMethod::VideoMultiFrameMedian,
                confidence: round3(dimension_confidence),
            },
            variance: rounded(variance),
            counts,
            confidence: AggregateConfidence {
                scale_confidence: round3(scale_confidence),
                dimension_confidence: round3(dimension_confidence),
                detection_confidence: round3(detection_confidence),
                overall_confidence: round3(overall),
            },
            frame_count: frames.len(),
            measured_frame_count: measured.len(),
            vision: None,
        })
    }

    fn vision_result(
        &self,
        usable: &[&VisionEstimate],
        counts: ObjectCounts,
        detection_confidence: f64,
        frames: &[FrameObservation],
    ) -> AggregatedResult {
        let lengths: Vec<f64> = usable.iter().map(|v| v.length).collect();
        let widths: Vec<f64> = usable.iter().map(|v| v.width).collect();
        let heights: Vec<f64> = usable.iter().map(|v| v.height).collect();
        let confidences: Vec<f64> = usable.iter().map(|v| v.confidence).collect();

        let variance = variance_of(&lengths, &widths, &heights);
        let dimension_confidence = variance_confidence(&variance, usable.len());
        let vision_confidence = median(&confidences);
        let overall =
            confidence::overall_confidence(vision_confidence, dimension_confidence, detection_confidence);

        // Most frequent supplier; ties go to the one seen first
        let source = dominant_source(usable);

        info!(
            "🔭 Vision override from '{}' across {} frames (conf={:.2})",
            source,
            usable.len(),
            vision_confidence
        );

        AggregatedResult {
            dimensions: DimensionEstimate {
                length: round2(median(&lengths)),
                width: round2(median(&widths)),
                height: round2(median(&heights)),
                estimated: true,
                method: EstimationMethod::VisionApiMedian,
                confidence: round3(vision_confidence),
            },
            variance: rounded(variance),
            counts,
            confidence: AggregateConfidence {
                scale_confidence: round3(vision_confidence),
                dimension_confidence: round3(dimension_confidence),
                detection_confidence: round3(detection_confidence),
                overall_confidence: round3(overall),
            },
            frame_count: frames.len(),
            measured_frame_count: frames.iter().filter(|f| f.is_measured()).count(),
            vision: Some(VisionOverride {
                source,
                frames_analyzed: usable.len(),
                variance: rounded(variance),
                confidence: round3(vision_confidence),
                expected_error_percent: confidence::estimate_error_percentage(vision_confidence),
            }),
        }
    }
}

/// No frame resolved a scale: keep the default room and its low confidence
fn default_result(frames: &[FrameObservation], counts: ObjectCounts) -> AggregatedResult {
    let fallback = frames[0].estimate.clone();
    let c = fallback.confidence;

    warn!(
        "⚠️  None of {} frames resolved a scale; keeping default room size",
        frames.len()
    );

    AggregatedResult {
        dimensions: fallback,
        variance: DimensionVariance::default(),
        counts,
        confidence: AggregateConfidence {
            scale_confidence: c,
            dimension_confidence: c,
            detection_confidence: c,
            overall_confidence: round3(confidence::overall_confidence(c, c, c)),
        },
        frame_count: frames.len(),
        measured_frame_count: 0,
        vision: None,
    }
}

impl Default for FrameAggregator {
    fn default() -> Self {
        Self::new(AggregationConfig::default())
    }
}

// ============================================================================
// STATISTICS
// ============================================================================

/// Median; the mean of the two middle values for even counts, 0 when empty
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample standard deviation (n - 1); 0 for fewer than two values
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
    (sum_sq / (n - 1.0)).sqrt()
}

/// Fraction of frames whose count equals the maximum count
pub fn count_consistency(counts: &[u32]) -> f64 {
    let Some(&max) = counts.iter().max() else {
        return 0.0;
    };

    counts.iter().filter(|&&c| c == max).count() as f64 / counts.len() as f64
}

fn detection_consistency(frames: &[FrameObservation]) -> f64 {
    let doors: Vec<u32> = frames.iter().map(|f| f.counts.doors).collect();
    let windows: Vec<u32> = frames.iter().map(|f| f.counts.windows).collect();
    (count_consistency(&doors) + count_consistency(&windows)) / 2.0
}

fn max_counts(frames: &[FrameObservation]) -> ObjectCounts {
    ObjectCounts {
        doors: frames.iter().map(|f| f.counts.doors).max().unwrap_or(0),
        windows: frames.iter().map(|f| f.counts.windows).max().unwrap_or(0),
    }
}

fn variance_of(lengths: &[f64], widths: &[f64], heights: &[f64]) -> DimensionVariance {
    DimensionVariance {
        length_std: sample_std(lengths),
        width_std: sample_std(widths),
        height_std: sample_std(heights),
    }
}

fn rounded(variance: DimensionVariance) -> DimensionVariance {
    DimensionVariance {
        length_std: round2(variance.length_std),
        width_std: round2(variance.width_std),
        height_std: round2(variance.height_std),
    }
}

/// exp(-avg_std / 3) plus up to 0.2 for corroborating observations
fn variance_confidence(variance: &DimensionVariance, observations: usize) -> f64 {
    let base = (-variance.average_std() / 3.0).exp();
    let boost = (0.02 * observations as f64).min(0.2);
    (base + boost).min(1.0)
}

fn dominant_source(estimates: &[&VisionEstimate]) -> String {
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for estimate in estimates {
        match tally.iter_mut().find(|(name, _)| *name == estimate.source) {
            Some(entry) => entry.1 += 1,
            None => tally.push((estimate.source.as_str(), 1)),
        }
    }

    tally
        .iter()
        .fold(None::<(&str, usize)>, |best, &(name, n)| match best {
            Some((_, m)) if m >= n => best,
            _ => Some((name, n)),
        })
        .map(|(name, _)| name.to_string())
        .unwrap_or_default()
}
