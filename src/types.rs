// src/types.rs

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fusion: FusionConfig,
    pub estimation: EstimationConfig,
    pub aggregation: AggregationConfig,
    pub confidence: ConfidenceConfig,
    pub learning: LearningConfig,
    pub vision: VisionConfig,
    pub io: IoConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// One of "weighted_median", "weighted_mean", "best"
    pub strategy: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            strategy: "weighted_median".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimationConfig {
    pub fallback_length_ft: f64,
    pub fallback_width_ft: f64,
    pub fallback_height_ft: f64,
    pub fallback_confidence: f64,
    pub default_ceiling_ft: f64,
    /// Wall above the door frame when deriving ceiling height from a door
    pub ceiling_clearance_ft: f64,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            fallback_length_ft: 12.0,
            fallback_width_ft: 10.0,
            fallback_height_ft: 10.0,
            fallback_confidence: 0.3,
            default_ceiling_ft: 10.0,
            ceiling_clearance_ft: 3.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Frames below this quality (0-100) are never sent to a vision service
    pub min_frame_quality: f64,
    /// Vision estimates below this confidence are treated as unusable
    pub min_vision_confidence: f64,
    /// Upper bound on frames analyzed by vision services per request
    pub max_vision_frames: usize,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            min_frame_quality: 50.0,
            min_vision_confidence: 0.6,
            max_vision_frames: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    pub manual_input_threshold: f64,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        Self {
            manual_input_threshold: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub enabled: bool,
    pub log_path: String,
    pub min_data_points: usize,
    pub learning_rate: f64,
    pub min_record_confidence: f64,
    pub min_observations_per_type: usize,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            log_path: "data/learning/estimation_results.jsonl".to_string(),
            min_data_points: 100,
            learning_rate: 0.1,
            min_record_confidence: 0.75,
            min_observations_per_type: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Tried in order; the first usable answer wins
    pub providers: Vec<VisionProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionProviderConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
    /// Environment variable holding the bearer token, if the service needs one
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_provider_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    pub input_dir: String,
    pub output_dir: String,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            input_dir: "requests".to_string(),
            output_dir: "output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "roomscale=info".to_string(),
        }
    }
}

// ============================================================================
// DETECTOR OUTPUT
// ============================================================================

/// Axis-aligned box in image pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }
}

/// One object reported by the external detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_name: String,
    pub confidence: f64,
    #[serde(alias = "bbox")]
    pub bounding_box: BoundingBox,
}

impl Detection {
    pub fn new(class_name: &str, confidence: f64, bounding_box: BoundingBox) -> Self {
        Self {
            class_name: class_name.to_string(),
            confidence,
            bounding_box,
        }
    }

    pub fn is_class(&self, class_name: &str) -> bool {
        self.class_name.eq_ignore_ascii_case(class_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub height: u32,
    pub width: u32,
}

impl ImageShape {
    pub fn new(height: u32, width: u32) -> Self {
        Self { height, width }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectCounts {
    pub doors: u32,
    pub windows: u32,
}

impl ObjectCounts {
    pub fn from_detections(detections: &[Detection]) -> Self {
        Self {
            doors: detections.iter().filter(|d| d.is_class("door")).count() as u32,
            windows: detections.iter().filter(|d| d.is_class("window")).count() as u32,
        }
    }
}

fn default_frame_quality() -> f64 {
    100.0
}

/// One photo or decoded video frame, with the detector's output for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameInput {
    #[serde(default)]
    pub frame_number: usize,
    pub image_shape: ImageShape,
    /// Size of the resized image the detector ran on, when it differs
    #[serde(default)]
    pub inference_shape: Option<ImageShape>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Sharpness/exposure score from the frame extractor, 0-100
    #[serde(default = "default_frame_quality")]
    pub quality: f64,
    /// Encoded image on disk, needed only by vision services
    #[serde(default)]
    pub image_path: Option<std::path::PathBuf>,
}

impl FrameInput {
    pub fn new(frame_number: usize, image_shape: ImageShape, detections: Vec<Detection>) -> Self {
        Self {
            frame_number,
            image_shape,
            inference_shape: None,
            detections,
            quality: default_frame_quality(),
            image_path: None,
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_inference_shape(mut self, shape: ImageShape) -> Self {
        self.inference_shape = Some(shape);
        self
    }
}

/// Dimension string pulled from a floor plan by an OCR collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRecord {
    pub raw_text: String,
    pub length: f64,
    pub width: f64,
    /// OCR engines report either [0,1] or [0,100]
    pub confidence: f64,
}

// ============================================================================
// DIMENSIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimationMethod {
    ManualInput,
    CvEstimation,
    VideoMultiFrame,
    VideoMultiFrameMedian,
    VisionApi,
    VisionApiMedian,
    PhotoEstimation,
    FloorplanOcr,
    DefaultAssumption,
}

impl EstimationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimationMethod::ManualInput => "manual_input",
            EstimationMethod::CvEstimation => "cv_estimation",
            EstimationMethod::VideoMultiFrame => "video_multi_frame",
            EstimationMethod::VideoMultiFrameMedian => "video_multi_frame_median",
            EstimationMethod::VisionApi => "vision_api",
            EstimationMethod::VisionApiMedian => "vision_api_median",
            EstimationMethod::PhotoEstimation => "photo_estimation",
            EstimationMethod::FloorplanOcr => "floorplan_ocr",
            EstimationMethod::DefaultAssumption => "default_assumption",
        }
    }
}

impl std::fmt::Display for EstimationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room size in feet with its provenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionEstimate {
    pub length: f64,
    pub width: f64,
    pub height: f64,
    /// false only for user-supplied dimensions
    pub estimated: bool,
    pub method: EstimationMethod,
    pub confidence: f64,
}

/// User overrides; any missing field takes the fallback room size
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ManualDimensions {
    pub length: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

impl ManualDimensions {
    pub fn is_empty(&self) -> bool {
        self.length.is_none() && self.width.is_none() && self.height.is_none()
    }
}

/// Round to two decimals, the precision every reported measurement uses
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
