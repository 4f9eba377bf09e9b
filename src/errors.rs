//! Error taxonomy for the embedding pipeline.
//!
//! Configuration errors are fatal and surface before any work starts. The
//! per-batch variants are caught at the worker boundary and recorded in
//! [`PipelineMetrics`](crate::PipelineMetrics) instead of aborting the run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::PipelineMetrics;
#[cfg(feature = "onnx")]
use crate::backends::onnx::OnnxBackendError;

/// Boxed error raised by a graph executor or tokenizer.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while configuring or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid batch size, worker count or queue capacity.
    #[error("invalid configuration: {message}")]
    Config { message: String },
    /// The graph declares an input the tensor builder cannot populate.
    #[error("graph input \"{name}\" has no population rule")]
    UnrecognizedTensorName { name: String },
    /// The graph executor failed while running a batch.
    #[error("graph execution failed: {0}")]
    Execution(#[source] BoxedError),
    /// Declared output dimensions disagree with the returned buffer.
    #[error("output \"{name}\" declares {declared} but buffer holds {actual} values")]
    ShapeMismatch {
        name: String,
        declared: String,
        actual: usize,
    },
    /// The executor did not return the output selected for pooling.
    #[error("output \"{name}\" missing from executor results")]
    MissingOutput { name: String },
    /// A batch exceeded the configured deadline.
    #[error("batch {ordinal} exceeded the {limit:?} deadline")]
    Timeout { ordinal: usize, limit: Duration },
    /// A record's token, type and attention sequences differ in length.
    #[error(
        "record {index} has {tokens} token ids, {types} type ids and {mask} attention mask values"
    )]
    RaggedRecord {
        index: usize,
        tokens: usize,
        types: usize,
        mask: usize,
    },
    /// The tokenizer rejected an input text.
    #[error("failed to tokenize input {index}: {source}")]
    Tokenize {
        index: usize,
        #[source]
        source: BoxedError,
    },
    /// Every batch of a non-empty run failed.
    #[error("all {} batches failed", .metrics.failed_batches)]
    AllBatchesFailed { metrics: Box<PipelineMetrics> },
    /// The run was cancelled before the record stream was exhausted.
    #[error("pipeline run was cancelled")]
    Cancelled,
    /// The session was used after [`close`](crate::EmbeddingSession::close).
    #[error("embedding session is closed")]
    SessionClosed,
    /// The async runtime could not be built or a task could not be joined.
    #[error("runtime failure: {0}")]
    Runtime(#[source] BoxedError),
    /// A blocking run was started from inside an async runtime.
    #[error("blocking run called from within a tokio runtime; use run_async instead")]
    NestedRuntime,
    #[cfg(feature = "onnx")]
    #[error(transparent)]
    Backend(#[from] OnnxBackendError),
}

impl PipelineError {
    /// Builds a [`PipelineError::Config`] from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Wraps an executor failure as [`PipelineError::Execution`].
    pub fn execution(source: impl Into<BoxedError>) -> Self {
        Self::Execution(source.into())
    }

    /// Only execution failures are worth another attempt; the remaining
    /// per-batch errors come from configuration and repeat deterministically.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Classifies the error for failure reports.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnrecognizedTensorName { .. } => FailureKind::UnrecognizedTensorName,
            Self::Execution(_) => FailureKind::Execution,
            Self::ShapeMismatch { .. } => FailureKind::ShapeMismatch,
            Self::MissingOutput { .. } => FailureKind::MissingOutput,
            Self::Timeout { .. } => FailureKind::Timeout,
            _ => FailureKind::Other,
        }
    }
}

/// Category of a per-batch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnrecognizedTensorName,
    Execution,
    ShapeMismatch,
    MissingOutput,
    Timeout,
    Other,
}
