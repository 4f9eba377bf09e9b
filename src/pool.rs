//! Concurrent batch scheduling.
//!
//! A producer task pulls batches from the assembler into a bounded queue.
//! Workers share the receiving end, build tensors, call the executor on the
//! blocking thread pool and push one [`BatchOutcome`] per batch into a second
//! bounded queue that the [`ResultAggregator`] drains. When either queue is
//! full its sender waits, so the producer never runs more than
//! `batch_queue_capacity` batches ahead of the workers.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::{
    aggregate::{BatchFailure, BatchOutcome, PipelineMetrics, ResultAggregator},
    assembler::{Batches, assemble},
    config::PipelineConfig,
    errors::PipelineError,
    graph::{GraphExecutor, RawOutput},
    record::{Batch, EmbeddingResult, TokenizedRecord},
    reshape::OutputReshaper,
    tensor::{InputTensorSet, TensorBuilder},
};

/// Cooperative stop request shared between a caller and a running pipeline.
///
/// Once cancelled, the producer stops assembling batches and idle workers
/// stop taking new ones. A batch already inside the executor runs to
/// completion.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once [`CancellationSignal::cancel`] has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Running totals of batches passing through the work queue.
///
/// Counts accumulate across every run of the owning pool.
#[derive(Debug, Default)]
pub struct QueueCounters {
    enqueued: AtomicUsize,
    dequeued: AtomicUsize,
}

impl QueueCounters {
    /// Batches the producer has handed to the work queue.
    #[must_use]
    pub fn enqueued(&self) -> usize {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Batches a worker has taken from the work queue.
    #[must_use]
    pub fn dequeued(&self) -> usize {
        self.dequeued.load(Ordering::SeqCst)
    }

    fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::SeqCst);
    }

    fn record_dequeued(&self) {
        self.dequeued.fetch_add(1, Ordering::SeqCst);
    }
}

/// What the producer managed before it stopped.
#[derive(Debug, Clone, Copy)]
struct ProducerReport {
    sent: usize,
    exhausted: bool,
}

/// Fixed set of workers driving one executor.
pub struct WorkerPool {
    executor: Arc<dyn GraphExecutor>,
    builder: Arc<TensorBuilder>,
    reshaper: Arc<OutputReshaper>,
    config: PipelineConfig,
    counters: Arc<QueueCounters>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("reshaper", &self.reshaper)
            .field("config", &self.config)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Validates `config` and resolves the tensor and output plans against
    /// the executor's declared metadata.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] for an invalid configuration or an
    /// output name the executor does not declare.
    pub fn new(
        executor: Arc<dyn GraphExecutor>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let config = config.validate()?;
        let builder = TensorBuilder::new(executor.input_info());
        for name in builder.unrecognized() {
            warn!(input = name, "graph input has no population rule; every batch will fail");
        }
        let reshaper = OutputReshaper::select(
            executor.output_info(),
            config.output_name.as_deref(),
            config.pooling,
            config.normalize,
        )?;
        Ok(Self {
            executor,
            builder: Arc::new(builder),
            reshaper: Arc::new(reshaper),
            config,
            counters: Arc::new(QueueCounters::default()),
        })
    }

    /// Copies the pool with a different batch size and worker count,
    /// reusing the resolved tensor and output plans and the counters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when either value is zero.
    pub fn resized(
        &self,
        batch_size: usize,
        worker_count: usize,
    ) -> Result<Self, PipelineError> {
        let config = PipelineConfig {
            batch_size,
            worker_count,
            ..self.config.clone()
        }
        .validate()?;
        Ok(Self {
            executor: Arc::clone(&self.executor),
            builder: Arc::clone(&self.builder),
            reshaper: Arc::clone(&self.reshaper),
            config,
            counters: Arc::clone(&self.counters),
        })
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Queue counters shared with the running producer and workers.
    #[must_use]
    pub fn counters(&self) -> Arc<QueueCounters> {
        Arc::clone(&self.counters)
    }

    /// Embeds every record, returning results sorted by original index.
    ///
    /// Failed batches are skipped and described in the returned metrics.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Cancelled`] if `cancel` fired before every
    /// batch was processed, [`PipelineError::AllBatchesFailed`] if no batch
    /// of a non-empty input succeeded, and [`PipelineError::Runtime`] if a
    /// pipeline task panicked.
    #[instrument(
        skip_all,
        fields(
            batch_size = self.config.batch_size,
            workers = self.config.worker_count
        )
    )]
    pub async fn run<I>(
        &self,
        records: I,
        cancel: &CancellationSignal,
    ) -> Result<(Vec<EmbeddingResult>, PipelineMetrics), PipelineError>
    where
        I: IntoIterator<Item = TokenizedRecord>,
        I::IntoIter: Send + 'static,
    {
        let started = Instant::now();
        let batches = assemble(records, self.config.batch_size)?;
        let (batch_tx, batch_rx) = mpsc::channel(self.config.batch_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.config.result_queue_capacity);

        let producer = tokio::spawn(produce(
            batches,
            batch_tx,
            Arc::clone(&self.counters),
            cancel.clone(),
        ));

        let batch_rx = Arc::new(Mutex::new(batch_rx));
        let workers: Vec<_> = (0..self.config.worker_count)
            .map(|id| {
                let worker = Worker {
                    id,
                    executor: Arc::clone(&self.executor),
                    builder: Arc::clone(&self.builder),
                    reshaper: Arc::clone(&self.reshaper),
                    counters: Arc::clone(&self.counters),
                    timeout: self.config.batch_timeout(),
                    max_retries: self.config.max_retries,
                    backoff: self.config.retry_backoff(),
                };
                tokio::spawn(worker.run(Arc::clone(&batch_rx), result_tx.clone(), cancel.clone()))
            })
            .collect();
        drop(result_tx);

        let aggregator = ResultAggregator::new().drain(result_rx).await;
        let report = producer.await.map_err(runtime)?;
        for handle in workers {
            handle.await.map_err(runtime)?;
        }
        let (results, metrics) = aggregator.finish(started.elapsed());

        let settled = metrics.completed_batches + metrics.failed_batches;
        if !report.exhausted || settled < report.sent {
            info!(
                sent = report.sent,
                settled, "pipeline cancelled before all batches settled"
            );
            return Err(PipelineError::Cancelled);
        }
        if metrics.completed_batches == 0 && metrics.failed_batches > 0 {
            warn!(failed = metrics.failed_batches, "every batch failed");
            return Err(PipelineError::AllBatchesFailed {
                metrics: Box::new(metrics),
            });
        }
        info!(
            processed = metrics.processed,
            failed_batches = metrics.failed_batches,
            retries = metrics.retries,
            elapsed_ms = u64::try_from(metrics.elapsed.as_millis()).unwrap_or(u64::MAX),
            "pipeline run finished"
        );
        Ok((results, metrics))
    }
}

fn runtime(err: tokio::task::JoinError) -> PipelineError {
    PipelineError::Runtime(Box::new(err))
}

async fn produce<I>(
    batches: Batches<I>,
    queue: mpsc::Sender<Batch>,
    counters: Arc<QueueCounters>,
    cancel: CancellationSignal,
) -> ProducerReport
where
    I: Iterator<Item = TokenizedRecord>,
{
    let mut sent = 0;
    for batch in batches {
        if cancel.is_cancelled() {
            return ProducerReport {
                sent,
                exhausted: false,
            };
        }
        let ordinal = batch.ordinal();
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return ProducerReport { sent, exhausted: false };
            }
            delivered = queue.send(batch) => {
                if delivered.is_err() {
                    return ProducerReport { sent, exhausted: false };
                }
            }
        }
        counters.record_enqueued();
        sent += 1;
        debug!(ordinal, "batch enqueued");
    }
    ProducerReport {
        sent,
        exhausted: true,
    }
}

struct Worker {
    id: usize,
    executor: Arc<dyn GraphExecutor>,
    builder: Arc<TensorBuilder>,
    reshaper: Arc<OutputReshaper>,
    counters: Arc<QueueCounters>,
    timeout: Option<Duration>,
    max_retries: usize,
    backoff: Duration,
}

impl Worker {
    async fn run(
        self,
        queue: Arc<Mutex<mpsc::Receiver<Batch>>>,
        outcomes: mpsc::Sender<BatchOutcome>,
        cancel: CancellationSignal,
    ) {
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => None,
                    batch = queue.recv() => batch,
                }
            };
            let Some(batch) = next else {
                break;
            };
            self.counters.record_dequeued();
            let outcome = self.process(batch).await;
            if outcomes.send(outcome).await.is_err() {
                break;
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    #[instrument(skip_all, fields(worker = self.id, ordinal = batch.ordinal(), records = batch.len()))]
    async fn process(&self, batch: Batch) -> BatchOutcome {
        let ordinal = batch.ordinal();
        let indices = batch.indices();
        let mut retries = 0;
        match self.embed(&batch, &mut retries).await {
            Ok(results) => BatchOutcome::Completed {
                ordinal,
                results,
                retries,
            },
            Err(err) => {
                warn!(error = %err, retries, "batch failed");
                BatchOutcome::Failed(
                    BatchFailure::new(ordinal, &indices, &err).with_retries(retries),
                )
            }
        }
    }

    async fn embed(
        &self,
        batch: &Batch,
        retries: &mut usize,
    ) -> Result<Vec<EmbeddingResult>, PipelineError> {
        let (inputs, padding_mask) = self.builder.build(batch)?;
        let inputs = Arc::new(inputs);
        let outputs = loop {
            match self.execute(batch.ordinal(), Arc::clone(&inputs)).await {
                Ok(outputs) => break outputs,
                Err(err) if err.is_retryable() && *retries < self.max_retries => {
                    let delay = self.retry_delay(*retries);
                    warn!(error = %err, attempt = *retries + 1, ?delay, "retrying batch");
                    tokio::time::sleep(delay).await;
                    *retries += 1;
                }
                Err(err) => return Err(err),
            }
        };
        let wanted = &self.reshaper.output().name;
        let raw = outputs
            .into_iter()
            .find(|output| &output.name == wanted)
            .ok_or_else(|| PipelineError::MissingOutput {
                name: wanted.clone(),
            })?;
        self.reshaper.reshape(raw, &padding_mask, &batch.indices())
    }

    /// Runs the executor off the async threads, bounded by the batch
    /// deadline when one is set. A timed-out call keeps its blocking thread
    /// until the executor returns; its result is discarded.
    async fn execute(
        &self,
        ordinal: usize,
        inputs: Arc<InputTensorSet>,
    ) -> Result<Vec<RawOutput>, PipelineError> {
        let executor = Arc::clone(&self.executor);
        let task = tokio::task::spawn_blocking(move || executor.run(&inputs));
        let joined = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, task)
                .await
                .map_err(|_| PipelineError::Timeout { ordinal, limit })?,
            None => task.await,
        };
        joined.map_err(runtime)?
    }

    fn retry_delay(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(2_u32.saturating_pow(exponent))
    }
}
