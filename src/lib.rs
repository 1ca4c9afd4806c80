// src/lib.rs
//
// Room dimension estimation from noisy reference-object detections, vision
// model estimates and floor-plan records, with calibrated confidence.

pub mod analysis;
pub mod config;
pub mod error;
pub mod learning;
pub mod types;
pub mod video_processor;
pub mod vision_sources;

pub use error::{EstimationError, Result};
pub use types::Config;
pub use video_processor::{EstimationPipeline, EstimationRequest, EstimationResult, RequestOutcome};
