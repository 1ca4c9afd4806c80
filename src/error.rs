// src/error.rs
//
// Error taxonomy for the estimation core. Only genuine input errors live here;
// degraded results (no reference object visible) and skipped learning updates
// are ordinary values, and vision-service failures use `SourceError` in
// `vision_sources.rs` because the waterfall always recovers from them.

use thiserror::Error;

/// Result alias for estimation operations
pub type Result<T> = std::result::Result<T, EstimationError>;

#[derive(Error, Debug)]
pub enum EstimationError {
    /// Aggregation was asked to combine zero frames
    #[error("No frame results to aggregate")]
    EmptyFrameSet,

    /// A bounding box used for calibration had no usable height
    #[error("Reference object '{object_type}' has invalid pixel size {pixels} (must be > 0)")]
    InvalidPixelSize { object_type: String, pixels: f64 },

    /// Fusion strategy named in config or by a caller is not known
    #[error("Unknown fusion method: {0}")]
    UnknownFusionStrategy(String),

    /// Manual override outside the accepted (0, 100] ft range
    #[error("Manual {field} = {value} ft is invalid (must be between 0 and 100 feet)")]
    InvalidManualDimension { field: &'static str, value: f64 },

    /// Learning record storage failed
    #[error("Record storage error: {message}")]
    Storage {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl EstimationError {
    /// Create a storage error with its underlying cause
    pub fn storage<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Storage problems can be retried; everything else is a caller mistake.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, EstimationError::Storage { .. })
    }

    /// Message suitable for surfacing to an end user
    pub fn user_message(&self) -> String {
        match self {
            EstimationError::EmptyFrameSet => {
                "No usable frames were found in the video. Please record a longer walkthrough."
                    .to_string()
            }
            EstimationError::InvalidPixelSize { .. } => {
                "The reference object could not be measured. Please make sure it is fully visible."
                    .to_string()
            }
            EstimationError::InvalidManualDimension { field, value } => {
                format!(
                    "Room {} of {} ft is not valid. Please enter a value between 0 and 100 feet.",
                    field, value
                )
            }
            _ => "Room estimation failed. Please try again or enter dimensions manually.".to_string(),
        }
    }
}
