// src/learning/mod.rs
//
// Append-only result log and the batch update that feeds it back into
// analysis::size_model. Never runs on the request path.

pub mod learning_loop;
pub mod record;
pub mod sink;

pub use learning_loop::{
    append_update_history, update_distributions, update_distributions_with, DistributionUpdate,
    LearningLoop, LearningStatistics, UpdateParams, UpdateSummary,
};
pub use record::{anonymize, LearningRecord};
pub use sink::{JsonlSink, MemorySink, RecordFilter, RecordSink};
