//! Pipeline configuration types and serialisation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{errors::PipelineError, reshape::Pooling};

/// Records per batch when none is configured.
pub const DEFAULT_BATCH_SIZE: usize = 32;
/// Worker count when none is configured.
pub const DEFAULT_WORKER_COUNT: usize = 4;
/// Bounded queue capacity when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// Configuration for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Records per batch; must be greater than zero.
    pub batch_size: usize,
    /// Parallel workers; must be greater than zero.
    pub worker_count: usize,
    /// Capacity of the producer-to-worker queue.
    pub batch_queue_capacity: usize,
    /// Capacity of the worker-to-aggregator queue.
    pub result_queue_capacity: usize,
    /// Per-batch deadline in milliseconds. Timed-out batches fail without
    /// retry.
    pub batch_timeout_ms: Option<u64>,
    /// Extra attempts for batches whose execution fails.
    pub max_retries: usize,
    /// Base delay before the first retry, doubled for each further attempt.
    pub retry_backoff_ms: u64,
    /// Graph output to pool; the first declared output when unset.
    pub output_name: Option<String>,
    pub pooling: Pooling,
    /// Scale every embedding to unit length.
    pub normalize: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            worker_count: DEFAULT_WORKER_COUNT,
            batch_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            result_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_timeout_ms: None,
            max_retries: 0,
            retry_backoff_ms: 50,
            output_name: None,
            pooling: Pooling::Mean,
            normalize: false,
        }
    }
}

impl PipelineConfig {
    /// Default configuration with the given batch size and worker count.
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_embed::PipelineConfig;
    ///
    /// let config = PipelineConfig::new(16, 2).validate().expect("valid sizes");
    /// assert_eq!(config.batch_size, 16);
    /// assert!(PipelineConfig::new(0, 2).validate().is_err());
    /// ```
    #[must_use]
    pub fn new(batch_size: usize, worker_count: usize) -> Self {
        Self {
            batch_size,
            worker_count,
            ..Self::default()
        }
    }

    /// Ensure the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if a size or capacity is zero.
    #[must_use = "Validation should not be ignored"]
    pub fn validate(self) -> Result<Self, PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch_size must be greater than 0"));
        }
        if self.worker_count == 0 {
            return Err(PipelineError::config("worker_count must be greater than 0"));
        }
        if self.batch_queue_capacity == 0 {
            return Err(PipelineError::config(
                "batch_queue_capacity must be greater than 0",
            ));
        }
        if self.result_queue_capacity == 0 {
            return Err(PipelineError::config(
                "result_queue_capacity must be greater than 0",
            ));
        }
        if self.batch_timeout_ms == Some(0) {
            return Err(PipelineError::config(
                "batch_timeout_ms must be greater than 0 when set",
            ));
        }
        Ok(self)
    }

    #[must_use]
    pub fn batch_timeout(&self) -> Option<Duration> {
        self.batch_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}
