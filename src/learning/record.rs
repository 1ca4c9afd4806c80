// src/learning/record.rs

use crate::analysis::confidence::ConfidenceReport;
use crate::analysis::scale_candidates::ScaleCandidate;
use crate::types::{DimensionEstimate, EstimationMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata keys that must never be stored in clear text
const PII_FIELDS: [&str; 5] = ["user_id", "ip_address", "email", "name", "address"];
/// Payload keys dropped before storage
const BULK_FIELDS: [&str; 2] = ["image_data", "video_data"];

/// One finished estimation, as kept for distribution learning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRecord {
    pub id: String,
    pub estimation_mode: EstimationMethod,
    pub scale_candidates: Vec<ScaleCandidate>,
    pub final_dimensions: DimensionEstimate,
    pub confidence_scores: ConfidenceReport,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LearningRecord {
    pub fn new(
        estimation_mode: EstimationMethod,
        scale_candidates: Vec<ScaleCandidate>,
        final_dimensions: DimensionEstimate,
        confidence_scores: ConfidenceReport,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            estimation_mode,
            scale_candidates,
            final_dimensions,
            confidence_scores,
            timestamp: Utc::now(),
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn overall_confidence(&self) -> f64 {
        self.confidence_scores.overall_confidence
    }

    /// Copy with PII keys replaced by `<key>_hash` and bulk payloads dropped
    pub fn anonymized(&self) -> Self {
        let mut record = self.clone();
        anonymize(&mut record.metadata);
        record
    }
}

/// Strip identifying data from request metadata in place.
///
/// Hashes are stable (UUIDv5 over the value), so the same user maps to the
/// same hash across records without the value being recoverable.
pub fn anonymize(metadata: &mut Map<String, Value>) {
    for field in PII_FIELDS {
        let Some(value) = metadata.remove(field) else {
            continue;
        };

        let text = match value {
            Value::Null => continue,
            Value::String(s) if s.is_empty() => continue,
            Value::String(s) => s,
            other => other.to_string(),
        };

        metadata.insert(format!("{}_hash", field), Value::String(stable_hash(&text)));
    }

    for field in BULK_FIELDS {
        metadata.remove(field);
    }
}

fn stable_hash(text: &str) -> String {
    let digest = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, text.as_bytes());
    digest.simple().to_string()[..16].to_string()
}
