//! Caller-facing embedding session.
//!
//! An [`EmbeddingSession`] owns the graph executor and tokenizer for its
//! lifetime. Opening one checks that the executor's declared outputs fit
//! the configuration; closing it releases both collaborators, after which
//! every run fails with [`PipelineError::SessionClosed`].

use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    aggregate::PipelineMetrics,
    config::PipelineConfig,
    errors::PipelineError,
    graph::GraphExecutor,
    pool::{CancellationSignal, WorkerPool},
    record::{EmbeddingResult, TokenizedRecord},
};

/// Converts text into a [`TokenizedRecord`].
pub trait Tokenize: Send + Sync {
    /// Tokenizes `text`, tagging the record with `index`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Tokenize`] when the text cannot be encoded.
    fn tokenize(&self, index: usize, text: &str) -> Result<TokenizedRecord, PipelineError>;
}

struct Collaborators {
    pool: WorkerPool,
    tokenizer: Option<Arc<dyn Tokenize>>,
}

/// Executor, tokenizer and configuration shared by a sequence of runs.
pub struct EmbeddingSession {
    collaborators: Option<Collaborators>,
    config: PipelineConfig,
}

impl std::fmt::Debug for EmbeddingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingSession")
            .field("open", &self.is_open())
            .field("config", &self.config)
            .finish()
    }
}

impl EmbeddingSession {
    /// Opens a session around `executor`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when `config` is invalid or names
    /// an output the executor does not declare.
    pub fn open(
        executor: Arc<dyn GraphExecutor>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        debug!(
            inputs = executor.input_info().len(),
            outputs = executor.output_info().len(),
            "embedding session opened"
        );
        let pool = WorkerPool::new(executor, config)?;
        Ok(Self {
            config: pool.config().clone(),
            collaborators: Some(Collaborators {
                pool,
                tokenizer: None,
            }),
        })
    }

    /// Opens a session backed by an ONNX model and its `tokenizer.json`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Backend`] when either artefact fails
    /// verification or loading, and [`PipelineError::Config`] as for
    /// [`EmbeddingSession::open`].
    #[cfg(feature = "onnx")]
    pub fn open_onnx(
        backend: &crate::backends::onnx::OnnxBackendConfig,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let tokenizer = crate::backends::onnx::HfTokenizer::load(backend)?;
        let executor = crate::backends::BackendConfig::Onnx(backend.clone()).open()?;
        Ok(Self::open(executor, config)?.with_tokenizer(Arc::new(tokenizer)))
    }

    /// Attaches the tokenizer used by the text-accepting runs.
    #[must_use]
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenize>) -> Self {
        if let Some(collaborators) = self.collaborators.as_mut() {
            collaborators.tokenizer = Some(tokenizer);
        }
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.collaborators.is_some()
    }

    /// Releases the executor and tokenizer. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.collaborators.take().is_some() {
            debug!("embedding session closed");
        }
    }

    /// Embeds `texts` with the given batch size and worker count, blocking
    /// until every batch has settled.
    ///
    /// Must not be called from within a tokio runtime; use
    /// [`EmbeddingSession::run_async`] there instead.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::NestedRuntime`] when called from inside a
    /// tokio runtime, [`PipelineError::Config`] for a zero batch size or
    /// worker count, [`PipelineError::Tokenize`] if any text fails to tokenize, and
    /// the run-level errors of [`WorkerPool::run`].
    pub fn run<S: AsRef<str>>(
        &self,
        texts: &[S],
        batch_size: usize,
        worker_count: usize,
    ) -> Result<(Vec<EmbeddingResult>, PipelineMetrics), PipelineError> {
        self.run_with_cancel(texts, batch_size, worker_count, &CancellationSignal::new())
    }

    /// As [`EmbeddingSession::run`], stopping early once `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`EmbeddingSession::run`], plus [`PipelineError::Cancelled`].
    pub fn run_with_cancel<S: AsRef<str>>(
        &self,
        texts: &[S],
        batch_size: usize,
        worker_count: usize,
        cancel: &CancellationSignal,
    ) -> Result<(Vec<EmbeddingResult>, PipelineMetrics), PipelineError> {
        let collaborators = self.collaborators()?;
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(PipelineError::NestedRuntime);
        }
        let pool = collaborators.pool.resized(batch_size, worker_count)?;
        let records = tokenize_all(collaborators, texts)?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(worker_count)
            .enable_all()
            .build()
            .map_err(|err| PipelineError::Runtime(Box::new(err)))?;
        runtime.block_on(pool.run(records, cancel))
    }

    /// Embeds `texts` on the caller's tokio runtime using the session
    /// configuration.
    ///
    /// # Errors
    ///
    /// As [`EmbeddingSession::run_with_cancel`].
    pub async fn run_async<S: AsRef<str>>(
        &self,
        texts: &[S],
        cancel: &CancellationSignal,
    ) -> Result<(Vec<EmbeddingResult>, PipelineMetrics), PipelineError> {
        let records = tokenize_all(self.collaborators()?, texts)?;
        self.run_records(records, cancel).await
    }

    /// Embeds already tokenized records using the session configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::SessionClosed`] after
    /// [`EmbeddingSession::close`], otherwise as [`WorkerPool::run`].
    pub async fn run_records(
        &self,
        records: Vec<TokenizedRecord>,
        cancel: &CancellationSignal,
    ) -> Result<(Vec<EmbeddingResult>, PipelineMetrics), PipelineError> {
        self.collaborators()?.pool.run(records, cancel).await
    }

    fn collaborators(&self) -> Result<&Collaborators, PipelineError> {
        self.collaborators
            .as_ref()
            .ok_or(PipelineError::SessionClosed)
    }
}

fn tokenize_all<S: AsRef<str>>(
    collaborators: &Collaborators,
    texts: &[S],
) -> Result<Vec<TokenizedRecord>, PipelineError> {
    let tokenizer = collaborators
        .tokenizer
        .as_ref()
        .ok_or_else(|| PipelineError::config("session has no tokenizer for text input"))?;
    let records = texts
        .iter()
        .enumerate()
        .map(|(index, text)| tokenizer.tokenize(index, text.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;
    info!(records = records.len(), "inputs tokenized");
    Ok(records)
}
