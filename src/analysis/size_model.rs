// src/analysis/size_model.rs
//
// Real-world size priors for reference objects (heights, in feet). Seeded from
// Indian residential building standards and refined by the learning loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Size used for object types the model has never seen (a generic door)
pub const FALLBACK_SIZE_FT: f64 = 7.0;
/// Prior confidence penalty for the fallback size
pub const FALLBACK_PRIOR_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSizeDistribution {
    pub object_type: String,
    /// Mean height in feet
    pub mean: f64,
    /// Standard deviation in feet, never negative
    pub std: f64,
    /// How much a detection of this type is trusted as a reference [0, 1]
    pub prior_confidence: f64,
}

impl ObjectSizeDistribution {
    pub fn new(object_type: &str, mean: f64, std: f64, prior_confidence: f64) -> Self {
        Self {
            object_type: object_type.to_string(),
            mean,
            std: std.max(0.0),
            prior_confidence: prior_confidence.clamp(0.0, 1.0),
        }
    }

    fn fallback(object_type: &str) -> Self {
        Self::new(object_type, FALLBACK_SIZE_FT, 0.5, FALLBACK_PRIOR_CONFIDENCE)
    }
}

/// Per-object-type size distributions.
///
/// Reads are plain field lookups; updates need `&mut self`, so a batch update
/// can never interleave with inference on the same model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectSizeModel {
    distributions: BTreeMap<String, ObjectSizeDistribution>,
}

impl ObjectSizeModel {
    /// Model seeded with the standard residential priors
    pub fn new() -> Self {
        let seeds = [
            ObjectSizeDistribution::new("door", 7.0, 0.5, 0.9),
            ObjectSizeDistribution::new("window", 4.0, 0.8, 0.7),
            ObjectSizeDistribution::new("person", 5.5, 0.4, 0.6),
            ObjectSizeDistribution::new("switchboard", 0.33, 0.08, 0.5),
            ObjectSizeDistribution::new("tile", 2.0, 0.5, 0.4),
        ];

        Self::from_distributions(seeds)
    }

    pub fn from_distributions(
        distributions: impl IntoIterator<Item = ObjectSizeDistribution>,
    ) -> Self {
        Self {
            distributions: distributions
                .into_iter()
                .map(|d| (d.object_type.to_lowercase(), d))
                .collect(),
        }
    }

    /// Distribution for a known object type
    pub fn lookup(&self, object_type: &str) -> Option<&ObjectSizeDistribution> {
        self.distributions.get(&object_type.to_lowercase())
    }

    /// Distribution for `object_type`, or the low-confidence generic door
    pub fn get(&self, object_type: &str) -> ObjectSizeDistribution {
        self.lookup(object_type)
            .cloned()
            .unwrap_or_else(|| ObjectSizeDistribution::fallback(object_type))
    }

    pub fn contains(&self, object_type: &str) -> bool {
        self.lookup(object_type).is_some()
    }

    pub fn object_types(&self) -> impl Iterator<Item = &str> {
        self.distributions.keys().map(String::as_str)
    }

    /// Fold one observation into the distribution.
    ///
    /// Single-sample exponential moving average; an approximation of a
    /// Bayesian update, not a true posterior. The deviation term is measured
    /// against the old mean. Unknown object types are ignored.
    pub fn update(&mut self, object_type: &str, observed_size: f64, weight: f64) {
        let Some(dist) = self.distributions.get_mut(&object_type.to_lowercase()) else {
            debug!("Ignoring size update for unknown object type '{}'", object_type);
            return;
        };

        let w = weight.clamp(0.0, 1.0);
        let deviation = (observed_size - dist.mean).abs();

        dist.mean = (1.0 - w) * dist.mean + w * observed_size;
        dist.std = ((1.0 - w) * dist.std + w * deviation).max(0.0);
    }
}

impl Default for ObjectSizeModel {
    fn default() -> Self {
        Self::new()
    }
}
