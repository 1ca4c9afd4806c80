// src/learning/learning_loop.rs
//
// Out-of-band refinement of the object size model from logged results.
//
// Observed sizes are recovered per record: every candidate's pixel height is
// converted with the record's consensus scale (weighted median of its
// candidates), so one object type can correct another. A record with a single
// candidate reproduces the prior exactly and pulls nothing.

use crate::analysis::scale_candidates::ScaleCandidate;
use crate::analysis::scale_fusion::{FusionStrategy, ScaleFusion};
use crate::analysis::size_model::ObjectSizeModel;
use crate::error::{EstimationError, Result};
use crate::learning::record::LearningRecord;
use crate::learning::sink::{RecordFilter, RecordSink};
use crate::types::LearningConfig;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_RECORD_CONFIDENCE: f64 = 0.75;
pub const DEFAULT_MIN_OBSERVATIONS_PER_TYPE: usize = 10;
/// Overall confidence above which a result counts as high confidence
const HIGH_CONFIDENCE: f64 = 0.75;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionUpdate {
    pub object_type: String,
    pub old_mean: f64,
    pub new_mean: f64,
    pub old_std: f64,
    pub new_std: f64,
    /// Batch statistics of the implied real-world sizes
    pub observed_mean: f64,
    pub observed_std: f64,
    pub observations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateSummary {
    pub updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub objects_updated: usize,
    pub updates: Vec<DistributionUpdate>,
    pub total_results_used: usize,
}

impl UpdateSummary {
    fn skipped(reason: String, total_results_used: usize) -> Self {
        Self {
            updated: false,
            reason: Some(reason),
            objects_updated: 0,
            updates: Vec::new(),
            total_results_used,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateParams {
    pub min_data_points: usize,
    pub learning_rate: f64,
    pub min_record_confidence: f64,
    pub min_observations_per_type: usize,
}

impl From<&LearningConfig> for UpdateParams {
    fn from(config: &LearningConfig) -> Self {
        Self {
            min_data_points: config.min_data_points,
            learning_rate: config.learning_rate,
            min_record_confidence: config.min_record_confidence,
            min_observations_per_type: config.min_observations_per_type,
        }
    }
}

impl Default for UpdateParams {
    fn default() -> Self {
        Self::from(&LearningConfig::default())
    }
}

/// Refine `model` from accumulated results with the standard qualification rules
pub fn update_distributions(
    model: &mut ObjectSizeModel,
    records: &[LearningRecord],
    min_data_points: usize,
    learning_rate: f64,
) -> UpdateSummary {
    update_distributions_with(
        model,
        records,
        &UpdateParams {
            min_data_points,
            learning_rate,
            min_record_confidence: DEFAULT_MIN_RECORD_CONFIDENCE,
            min_observations_per_type: DEFAULT_MIN_OBSERVATIONS_PER_TYPE,
        },
    )
}

pub fn update_distributions_with(
    model: &mut ObjectSizeModel,
    records: &[LearningRecord],
    params: &UpdateParams,
) -> UpdateSummary {
    let qualified: Vec<&LearningRecord> = records
        .iter()
        .filter(|r| r.overall_confidence() >= params.min_record_confidence)
        .collect();

    if qualified.len() < params.min_data_points {
        let reason = format!(
            "Not enough data points ({} < {})",
            qualified.len(),
            params.min_data_points
        );
        debug!("Skipping distribution update: {}", reason);
        return UpdateSummary::skipped(reason, qualified.len());
    }

    info!("📊 Updating distributions from {} results...", qualified.len());

    let mut observations: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for record in &qualified {
        for (object_type, size) in observed_sizes(&record.scale_candidates) {
            observations.entry(object_type).or_default().push(size);
        }
    }

    let mut updates = Vec::new();
    for (object_type, sizes) in &observations {
        if sizes.len() < params.min_observations_per_type {
            debug!(
                "Only {} observations for '{}'; need {}",
                sizes.len(),
                object_type,
                params.min_observations_per_type
            );
            continue;
        }

        let Some(old) = model.lookup(object_type).cloned() else {
            continue;
        };

        let observed_mean = sizes.iter().sum::<f64>() / sizes.len() as f64;
        let observed_std = population_std(sizes, observed_mean);
        model.update(object_type, observed_mean, params.learning_rate);
        let new = model.get(object_type);

        info!(
            "   Updated {}: {:.2} → {:.2} ft (observed {:.2} ± {:.2}, {} observations)",
            object_type,
            old.mean,
            new.mean,
            observed_mean,
            observed_std,
            sizes.len()
        );

        updates.push(DistributionUpdate {
            object_type: object_type.clone(),
            old_mean: old.mean,
            new_mean: new.mean,
            old_std: old.std,
            new_std: new.std,
            observed_mean,
            observed_std,
            observations: sizes.len(),
        });
    }

    UpdateSummary {
        updated: true,
        reason: None,
        objects_updated: updates.len(),
        updates,
        total_results_used: qualified.len(),
    }
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// (object_type, real-world size) pairs implied by one record's consensus scale
fn observed_sizes(candidates: &[ScaleCandidate]) -> Vec<(String, f64)> {
    let Some(consensus) = ScaleFusion::new(FusionStrategy::WeightedMedian).fuse(candidates).scale else {
        return Vec::new();
    };

    candidates
        .iter()
        .filter(|c| c.pixel_size > 0.0)
        .map(|c| (c.object_type.to_lowercase(), c.pixel_size * consensus))
        .collect()
}

// ============================================================================
// LEARNING LOOP
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningStatistics {
    pub total_results: usize,
    pub avg_confidence: f64,
    pub estimation_modes: BTreeMap<String, usize>,
    pub high_confidence_ratio: f64,
}

/// Logging and batch updates over one record sink
pub struct LearningLoop<S: RecordSink> {
    sink: S,
    params: UpdateParams,
}

impl<S: RecordSink> LearningLoop<S> {
    pub fn new(sink: S, config: &LearningConfig) -> Self {
        Self {
            sink,
            params: UpdateParams::from(config),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Anonymize and append one result
    pub fn log_result(&mut self, record: &LearningRecord) -> Result<()> {
        self.sink.append(&record.anonymized())?;
        debug!(
            "Logged {} result {} (conf={:.3})",
            record.estimation_mode,
            record.id,
            record.overall_confidence()
        );
        Ok(())
    }

    pub fn stored_results(&self, filter: &RecordFilter) -> Result<Vec<LearningRecord>> {
        self.sink.read_all(filter)
    }

    pub fn statistics(&self) -> Result<LearningStatistics> {
        let records = self.sink.read_all(&RecordFilter::all())?;

        if records.is_empty() {
            return Ok(LearningStatistics {
                total_results: 0,
                avg_confidence: 0.0,
                estimation_modes: BTreeMap::new(),
                high_confidence_ratio: 0.0,
            });
        }

        let n = records.len() as f64;
        let mut modes = BTreeMap::new();
        for record in &records {
            *modes.entry(record.estimation_mode.as_str().to_string()).or_insert(0) += 1;
        }

        Ok(LearningStatistics {
            total_results: records.len(),
            avg_confidence: records.iter().map(|r| r.overall_confidence()).sum::<f64>() / n,
            estimation_modes: modes,
            high_confidence_ratio: records
                .iter()
                .filter(|r| r.overall_confidence() > HIGH_CONFIDENCE)
                .count() as f64
                / n,
        })
    }

    /// Run a batch update of `model` from every qualifying stored record
    pub fn update_model(&self, model: &mut ObjectSizeModel) -> Result<UpdateSummary> {
        let records = self
            .sink
            .read_all(&RecordFilter::min_confidence(self.params.min_record_confidence))?;
        Ok(update_distributions_with(model, &records, &self.params))
    }
}

/// Append one summary to a JSON array history file, creating it if needed
pub fn append_update_history(path: &Path, summary: &UpdateSummary) -> Result<()> {
    let mut history: Vec<serde_json::Value> = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
            warn!("Discarding unreadable update history {}: {}", path.display(), e);
            Vec::new()
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => {
            return Err(EstimationError::storage(format!("cannot read {}", path.display()), e))
        }
    };

    history.push(serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "updates": summary.updates,
    }));

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| EstimationError::storage(format!("cannot create {}", parent.display()), e))?;
    }

    let text = serde_json::to_string_pretty(&history)
        .map_err(|e| EstimationError::storage("cannot serialize update history", e))?;
    std::fs::write(path, text)
        .map_err(|e| EstimationError::storage(format!("cannot write {}", path.display()), e))
}
