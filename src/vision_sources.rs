// src/vision_sources.rs
//
// External vision-model services that estimate room size straight from a
// photo. Each service is a `DimensionSource`; `VisionWaterfall` tries them in
// priority order and moves on past failures and low-confidence answers.
//
// Failures never leave this module as errors: the caller gets `None` and falls
// back to local CV estimation.

use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::analysis::frame_aggregator::VisionEstimate;
use crate::types::{Config, FrameInput, ObjectCounts, VisionProviderConfig};

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("{source_name} unavailable: {reason}")]
    Unavailable { source_name: String, reason: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("cannot read frame image: {0}")]
    Io(#[from] std::io::Error),
}

/// One room-size hypothesis from a vision service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisionDimensions {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub source: String,
    pub dimensions: Vec<VisionDimensions>,
    #[serde(default)]
    pub detected_counts: Option<ObjectCounts>,
}

impl VisionAnalysis {
    /// Highest-confidence hypothesis; first wins on ties
    pub fn best(&self) -> Option<&VisionDimensions> {
        self.dimensions.iter().fold(None, |best: Option<&VisionDimensions>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
    }

    pub fn best_confidence(&self) -> f64 {
        self.best().map_or(0.0, |d| d.confidence)
    }

    pub fn to_estimate(&self, frame_number: usize) -> Option<VisionEstimate> {
        self.best().map(|d| VisionEstimate {
            frame_number,
            length: d.length,
            width: d.width,
            height: d.height,
            confidence: d.confidence,
            source: self.source.clone(),
        })
    }
}

pub trait DimensionSource {
    fn name(&self) -> &str;

    fn try_extract(&self, frame: &FrameInput) -> Result<VisionAnalysis, SourceError>;
}

// ============================================================================
// HTTP SOURCE
// ============================================================================

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    frame_number: usize,
    width: u32,
    height: u32,
    /// Base64-encoded image file
    image_base64: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    dimensions: Vec<VisionDimensions>,
    #[serde(default)]
    detected_counts: Option<ObjectCounts>,
}

/// Vision service reached over HTTP with a JSON `analyze_photo` contract
pub struct HttpVisionSource {
    name: String,
    url: String,
    http_client: reqwest::blocking::Client,
    api_key: Option<String>,
    /// Env var that was configured but empty at startup
    missing_key: Option<String>,
}

impl HttpVisionSource {
    pub fn new(config: &VisionProviderConfig) -> Result<Self, SourceError> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let (api_key, missing_key) = match &config.api_key_env {
            Some(var) => match std::env::var(var) {
                Ok(key) if !key.is_empty() => (Some(key), None),
                _ => (None, Some(var.clone())),
            },
            None => (None, None),
        };

        if let Some(var) = &missing_key {
            warn!("⚠️  {} API key not set (${}); source disabled", config.name, var);
        }

        Ok(Self {
            name: config.name.clone(),
            url: config.url.clone(),
            http_client,
            api_key,
            missing_key,
        })
    }

    fn unavailable(&self, reason: impl Into<String>) -> SourceError {
        SourceError::Unavailable {
            source_name: self.name.clone(),
            reason: reason.into(),
        }
    }
}

impl DimensionSource for HttpVisionSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_extract(&self, frame: &FrameInput) -> Result<VisionAnalysis, SourceError> {
        if let Some(var) = &self.missing_key {
            return Err(self.unavailable(format!("${} is not set", var)));
        }
        let Some(path) = &frame.image_path else {
            return Err(self.unavailable("frame has no image"));
        };

        let image_base64 = base64::engine::general_purpose::STANDARD.encode(std::fs::read(path)?);
        let request = AnalyzeRequest {
            frame_number: frame.frame_number,
            width: frame.image_shape.width,
            height: frame.image_shape.height,
            image_base64: &image_base64,
        };

        debug!("🌐 Sending frame {} to {} ({})", frame.frame_number, self.name, self.url);

        let mut builder = self.http_client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_else(|_| "<no body>".to_string());
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AnalyzeResponse = response
            .json()
            .map_err(|e| SourceError::Malformed(e.to_string()))?;

        analysis_from_response(&self.name, parsed)
    }
}

fn analysis_from_response(
    source: &str,
    response: AnalyzeResponse,
) -> Result<VisionAnalysis, SourceError> {
    let dimensions: Vec<VisionDimensions> = response
        .dimensions
        .into_iter()
        .filter(|d| d.length > 0.0 && d.width > 0.0 && d.height > 0.0)
        .map(|d| VisionDimensions {
            // Some services report percentages
            confidence: if d.confidence > 1.0 {
                (d.confidence / 100.0).min(1.0)
            } else {
                d.confidence.max(0.0)
            },
            ..d
        })
        .collect();

    if dimensions.is_empty() {
        return Err(SourceError::Malformed(format!(
            "{} returned no usable dimensions",
            source
        )));
    }

    Ok(VisionAnalysis {
        source: source.to_string(),
        dimensions,
        detected_counts: response.detected_counts,
    })
}

// ============================================================================
// WATERFALL
// ============================================================================

/// Priority-ordered chain of vision sources
pub struct VisionWaterfall {
    sources: Vec<Box<dyn DimensionSource>>,
    min_confidence: f64,
}

impl VisionWaterfall {
    pub fn new(min_confidence: f64) -> Self {
        Self {
            sources: Vec::new(),
            min_confidence,
        }
    }

    /// One HTTP source per configured provider, in config order. Providers whose
    /// client cannot be built are skipped.
    pub fn from_config(config: &Config) -> Self {
        let mut waterfall = Self::new(config.aggregation.min_vision_confidence);

        for provider in &config.vision.providers {
            match HttpVisionSource::new(provider) {
                Ok(source) => waterfall.push(Box::new(source)),
                Err(e) => warn!("⚠️  Skipping vision provider {}: {}", provider.name, e),
            }
        }

        if !waterfall.is_empty() {
            info!("🔭 Vision waterfall: {}", waterfall.source_names().join(" → "));
        }

        waterfall
    }

    pub fn push(&mut self, source: Box<dyn DimensionSource>) {
        self.sources.push(source);
    }

    pub fn with_source(mut self, source: Box<dyn DimensionSource>) -> Self {
        self.push(source);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// First answer meeting the confidence gate, or `None` once every source
    /// has failed or come back unsure.
    pub fn analyze(&self, frame: &FrameInput) -> Option<VisionAnalysis> {
        for source in &self.sources {
            match source.try_extract(frame) {
                Ok(analysis) if analysis.best_confidence() >= self.min_confidence => {
                    debug!(
                        "{} answered frame {} (conf={:.2})",
                        source.name(),
                        frame.frame_number,
                        analysis.best_confidence()
                    );
                    return Some(analysis);
                }
                Ok(analysis) => {
                    info!(
                        "{} confidence {:.2} below {:.2} for frame {}; trying next source",
                        source.name(),
                        analysis.best_confidence(),
                        self.min_confidence,
                        frame.frame_number
                    );
                }
                Err(e) => {
                    warn!("⚠️  {} failed for frame {}: {}", source.name(), frame.frame_number, e);
                }
            }
        }

        None
    }
}
