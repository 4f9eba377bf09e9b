//! Helpers shared by the integration tests.
#![allow(dead_code, reason = "each test crate uses a different subset")]

use std::{
    sync::Arc,
    time::Duration,
};

use batch_embed::{
    CancellationSignal, EmbeddingResult, GraphExecutor, PipelineConfig, PipelineError,
    PipelineMetrics, TokenizedRecord, WorkerPool,
};

/// Runs `records` through a fresh pool on the current runtime.
pub async fn run_pool(
    executor: Arc<dyn GraphExecutor>,
    config: PipelineConfig,
    records: Vec<TokenizedRecord>,
) -> Result<(Vec<EmbeddingResult>, PipelineMetrics), PipelineError> {
    let pool = WorkerPool::new(executor, config)
        .unwrap_or_else(|e| panic!("pool construction failed: {e}"));
    pool.run(records, &CancellationSignal::new()).await
}

/// Pipeline configuration with the given sizes and small queues.
#[must_use]
pub fn small_config(batch_size: usize, worker_count: usize) -> PipelineConfig {
    PipelineConfig {
        batch_queue_capacity: 2,
        result_queue_capacity: 2,
        retry_backoff_ms: 1,
        ..PipelineConfig::new(batch_size, worker_count)
    }
}

/// Upper bound for any single pipeline test, so a deadlock fails instead of
/// hanging the suite.
pub const TEST_DEADLINE: Duration = Duration::from_secs(10);
