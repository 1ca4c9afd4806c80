// src/analysis/scale_fusion.rs
//
// Resolves the scale candidates of one image into a single feet-per-pixel
// factor. The fused confidence is the plain mean of candidate confidences: it
// says how much evidence agrees, independently of which scale was chosen.

use crate::analysis::scale_candidates::ScaleCandidate;
use crate::error::{EstimationError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;
use tracing::{debug, warn};

/// Coefficient of variation above which candidate scales contradict each other
const CONTRADICTION_CV_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    /// Candidate at the 50% cumulative-confidence crossing (outlier robust)
    #[default]
    WeightedMedian,
    /// Confidence-weighted arithmetic mean
    WeightedMean,
    /// Highest-confidence candidate
    Best,
}

impl FusionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionStrategy::WeightedMedian => "weighted_median",
            FusionStrategy::WeightedMean => "weighted_mean",
            FusionStrategy::Best => "best",
        }
    }
}

impl FromStr for FusionStrategy {
    type Err = EstimationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "weighted_median" => Ok(FusionStrategy::WeightedMedian),
            "weighted_mean" => Ok(FusionStrategy::WeightedMean),
            "best" => Ok(FusionStrategy::Best),
            other => Err(EstimationError::UnknownFusionStrategy(other.to_string())),
        }
    }
}

/// Scale resolved for one image or frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedScale {
    /// Feet per pixel; `None` iff there were no usable candidates
    pub scale: Option<f64>,
    pub confidence: f64,
    pub method: String,
    pub candidate_count: usize,
}

impl FusedScale {
    pub fn none() -> Self {
        Self {
            scale: None,
            confidence: 0.0,
            method: "none".to_string(),
            candidate_count: 0,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.scale.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScaleFusion {
    strategy: FusionStrategy,
}

impl ScaleFusion {
    pub fn new(strategy: FusionStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> FusionStrategy {
        self.strategy
    }

    pub fn fuse(&self, candidates: &[ScaleCandidate]) -> FusedScale {
        let method = self.strategy.as_str().to_string();

        match candidates {
            [] => FusedScale::none(),
            [only] => FusedScale {
                scale: Some(only.scale),
                confidence: only.confidence,
                method,
                candidate_count: 1,
            },
            _ => {
                let scale = match self.strategy {
                    FusionStrategy::WeightedMedian => weighted_median(candidates),
                    FusionStrategy::WeightedMean => weighted_mean(candidates),
                    FusionStrategy::Best => best(candidates),
                };
                let confidence = candidates.iter().map(|c| c.confidence).sum::<f64>()
                    / candidates.len() as f64;

                debug!(
                    "Fused {} scale candidates via {} → {:.5} ft/px (conf={:.2})",
                    candidates.len(),
                    method,
                    scale,
                    confidence
                );

                FusedScale {
                    scale: Some(scale),
                    confidence,
                    method,
                    candidate_count: candidates.len(),
                }
            }
        }
    }
}

fn weighted_median(candidates: &[ScaleCandidate]) -> f64 {
    let mut sorted: Vec<&ScaleCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| a.scale.partial_cmp(&b.scale).unwrap_or(Ordering::Equal));

    let total: f64 = sorted.iter().map(|c| c.confidence).sum();
    let half = total / 2.0;

    let mut cumulative = 0.0;
    for candidate in &sorted {
        cumulative += candidate.confidence;
        if cumulative >= half {
            return candidate.scale;
        }
    }

    // Only reachable through float rounding in the running sum
    sorted[sorted.len() - 1].scale
}

fn weighted_mean(candidates: &[ScaleCandidate]) -> f64 {
    let total: f64 = candidates.iter().map(|c| c.confidence).sum();

    if total <= 0.0 {
        warn!("All scale candidates have zero confidence; using unweighted mean");
        return candidates.iter().map(|c| c.scale).sum::<f64>() / candidates.len() as f64;
    }

    candidates.iter().map(|c| c.scale * c.confidence).sum::<f64>() / total
}

fn best(candidates: &[ScaleCandidate]) -> f64 {
    // First maximum wins on ties
    candidates
        .iter()
        .fold(None::<&ScaleCandidate>, |best, c| match best {
            Some(b) if b.confidence >= c.confidence => Some(b),
            _ => Some(c),
        })
        .map(|c| c.scale)
        .unwrap_or(0.0)
}

// ============================================================================
// CONTRADICTION CHECK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScaleConsistency {
    pub has_contradictions: bool,
    pub reasoning: String,
    pub recommendation: Option<String>,
    pub variance: Option<f64>,
    pub std_dev: Option<f64>,
}

/// Flag candidate sets whose scales disagree by more than 30% (coefficient of
/// variation, population statistics).
pub fn detect_contradictions(candidates: &[ScaleCandidate]) -> ScaleConsistency {
    if candidates.len() < 2 {
        return ScaleConsistency {
            has_contradictions: false,
            reasoning: "Not enough candidates".to_string(),
            recommendation: None,
            variance: None,
            std_dev: None,
        };
    }

    let n = candidates.len() as f64;
    let mean = candidates.iter().map(|c| c.scale).sum::<f64>() / n;
    let variance = candidates.iter().map(|c| (c.scale - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    let cv = if mean > 0.0 { std_dev / mean } else { 0.0 };

    if cv > CONTRADICTION_CV_THRESHOLD {
        warn!(
            "⚠️  Contradictory scale hypotheses across {} candidates (CV: {:.2})",
            candidates.len(),
            cv
        );
        return ScaleConsistency {
            has_contradictions: true,
            reasoning: format!("High variance in scale estimates (CV: {:.2})", cv),
            recommendation: Some("manual_verification".to_string()),
            variance: Some(variance),
            std_dev: Some(std_dev),
        };
    }

    ScaleConsistency {
        has_contradictions: false,
        reasoning: "Scale estimates are consistent".to_string(),
        recommendation: None,
        variance: Some(variance),
        std_dev: Some(std_dev),
    }
}
