// src/learning/sink.rs
//
// Append-only storage for learning records. The core only needs `append` and
// a filtered `read_all`; where records live is the sink's business.

use crate::error::{EstimationError, Result};
use crate::learning::record::LearningRecord;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordFilter {
    /// Keep records whose overall confidence is at least this
    pub min_confidence: Option<f64>,
    /// Stop after this many matching records, in storage order
    pub limit: Option<usize>,
}

impl RecordFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn min_confidence(min_confidence: f64) -> Self {
        Self {
            min_confidence: Some(min_confidence),
            limit: None,
        }
    }

    pub fn matches(&self, record: &LearningRecord) -> bool {
        self.min_confidence
            .map_or(true, |min| record.overall_confidence() >= min)
    }

    fn apply<'a>(&self, records: impl Iterator<Item = &'a LearningRecord>) -> Vec<LearningRecord> {
        records
            .filter(|r| self.matches(r))
            .take(self.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }
}

pub trait RecordSink {
    fn append(&mut self, record: &LearningRecord) -> Result<()>;

    fn read_all(&self, filter: &RecordFilter) -> Result<Vec<LearningRecord>>;
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<LearningRecord>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordSink for MemorySink {
    fn append(&mut self, record: &LearningRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn read_all(&self, filter: &RecordFilter) -> Result<Vec<LearningRecord>> {
        Ok(filter.apply(self.records.iter()))
    }
}

// ============================================================================
// JSONL FILE
// ============================================================================

/// One JSON object per line, opened in append mode for every write
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordSink for JsonlSink {
    fn append(&mut self, record: &LearningRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EstimationError::storage(format!("cannot create {}", parent.display()), e)
            })?;
        }

        let line = serde_json::to_string(record)
            .map_err(|e| EstimationError::storage("cannot serialize learning record", e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| EstimationError::storage(format!("cannot open {}", self.path.display()), e))?;

        writeln!(file, "{}", line)
            .map_err(|e| EstimationError::storage(format!("cannot write {}", self.path.display()), e))?;

        debug!("Appended learning record {} to {}", record.id, self.path.display());
        Ok(())
    }

    fn read_all(&self, filter: &RecordFilter) -> Result<Vec<LearningRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .map_err(|e| EstimationError::storage(format!("cannot open {}", self.path.display()), e))?;

        let mut records = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                EstimationError::storage(format!("cannot read {}", self.path.display()), e)
            })?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<LearningRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping malformed learning record at {}:{}: {}",
                    self.path.display(),
                    line_no + 1,
                    e
                ),
            }
        }

        Ok(filter.apply(records.iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::confidence::score_confidence;
    use crate::types::{DimensionEstimate, EstimationMethod};

    fn record(confidence: f64) -> LearningRecord {
        LearningRecord::new(
            EstimationMethod::VideoMultiFrameMedian,
            Vec::new(),
            DimensionEstimate {
                length: 14.0,
                width: 12.0,
                height: 10.0,
                estimated: true,
                method: EstimationMethod::VideoMultiFrameMedian,
                confidence,
            },
            score_confidence(confidence, confidence, confidence, EstimationMethod::VideoMultiFrameMedian),
        )
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("roomscale-test-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_memory_sink_filters() {
        let mut sink = MemorySink::new();
        for c in [0.5, 0.8, 0.9, 0.95] {
            sink.append(&record(c)).unwrap();
        }

        assert_eq!(sink.len(), 4);
        assert_eq!(sink.read_all(&RecordFilter::all()).unwrap().len(), 4);
        assert_eq!(sink.read_all(&RecordFilter::min_confidence(0.75)).unwrap().len(), 3);

        let limited = RecordFilter {
            min_confidence: Some(0.75),
            limit: Some(2),
        };
        let records = sink.read_all(&limited).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].overall_confidence(), 0.8);
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let path = temp_path("results.jsonl");
        let mut sink = JsonlSink::new(&path);

        assert!(sink.read_all(&RecordFilter::all()).unwrap().is_empty());

        sink.append(&record(0.9)).unwrap();
        sink.append(&record(0.6)).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);

        let strong = sink.read_all(&RecordFilter::min_confidence(0.75)).unwrap();
        assert_eq!(strong.len(), 1);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_jsonl_sink_skips_malformed_lines() {
        let path = temp_path("mixed.jsonl");
        let mut sink = JsonlSink::new(&path);
        sink.append(&record(0.9)).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{not json").unwrap();
        writeln!(file).unwrap();
        sink.append(&record(0.8)).unwrap();

        assert_eq!(sink.read_all(&RecordFilter::all()).unwrap().len(), 2);

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}
