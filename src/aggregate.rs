//! Result aggregation.
//!
//! Drains per-batch outcomes as workers publish them, in whatever order they
//! finish, and restores stream order from each record's carried index.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::{
    errors::{FailureKind, PipelineError},
    record::EmbeddingResult,
};

/// Why a batch was dropped from the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub ordinal: usize,
    /// Original index of the batch's first record.
    pub first_index: Option<usize>,
    pub record_count: usize,
    pub kind: FailureKind,
    pub message: String,
    /// Executor attempts repeated before the batch was given up.
    #[serde(default)]
    pub retries: usize,
}

impl BatchFailure {
    #[must_use]
    pub fn new(ordinal: usize, indices: &[usize], error: &PipelineError) -> Self {
        Self {
            ordinal,
            first_index: indices.first().copied(),
            record_count: indices.len(),
            kind: error.kind(),
            message: error.to_string(),
            retries: 0,
        }
    }

    /// Records how many retries the batch consumed before failing.
    #[must_use]
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }
}

/// What a worker reports for one batch.
#[derive(Debug)]
pub enum BatchOutcome {
    Completed {
        ordinal: usize,
        results: Vec<EmbeddingResult>,
        retries: usize,
    },
    Failed(BatchFailure),
}

/// Counters accumulated over one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Records that produced an embedding.
    pub processed: usize,
    pub completed_batches: usize,
    pub failed_batches: usize,
    /// Records excluded because their batch failed.
    pub dropped_records: usize,
    /// Executor attempts repeated after a transient failure.
    pub retries: usize,
    /// Wall-clock time from the first producer activity to the result
    /// queue closing.
    pub elapsed: Duration,
    pub failures: Vec<BatchFailure>,
}

/// Collects batch outcomes into the final ordered output.
#[derive(Debug, Default)]
pub struct ResultAggregator {
    results: Vec<EmbeddingResult>,
    metrics: PipelineMetrics,
}

impl ResultAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one outcome into the running totals.
    pub fn accept(&mut self, outcome: BatchOutcome) {
        match outcome {
            BatchOutcome::Completed {
                ordinal,
                results,
                retries,
            } => {
                debug!(ordinal, records = results.len(), "batch completed");
                self.metrics.processed += results.len();
                self.metrics.completed_batches += 1;
                self.metrics.retries += retries;
                self.results.extend(results);
            }
            BatchOutcome::Failed(failure) => {
                self.metrics.failed_batches += 1;
                self.metrics.dropped_records += failure.record_count;
                self.metrics.retries += failure.retries;
                self.metrics.failures.push(failure);
            }
        }
    }

    /// Receives outcomes until every sender has been dropped.
    pub async fn drain(mut self, mut outcomes: mpsc::Receiver<BatchOutcome>) -> Self {
        while let Some(outcome) = outcomes.recv().await {
            self.accept(outcome);
        }
        self
    }

    /// Sorts results by original index and stamps the elapsed time.
    #[must_use]
    pub fn finish(mut self, elapsed: Duration) -> (Vec<EmbeddingResult>, PipelineMetrics) {
        self.results.sort_by_key(|result| result.index);
        self.metrics.failures.sort_by_key(|failure| failure.ordinal);
        self.metrics.elapsed = elapsed;
        (self.results, self.metrics)
    }
}
