//! Concurrent batch embedding.
//!
//! Tokenized records are grouped into batches, padded into input tensors,
//! run through a [`GraphExecutor`] by a pool of workers and pooled back into
//! one vector per record, returned in their original order.

pub mod aggregate;
pub mod assembler;
#[cfg(feature = "onnx")]
pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod errors;
pub mod graph;
pub mod pool;
pub mod record;
pub mod reshape;
pub mod session;
pub mod tensor;

pub use aggregate::{BatchFailure, BatchOutcome, PipelineMetrics, ResultAggregator};
pub use assembler::{Batches, assemble};
#[cfg(feature = "onnx")]
pub use backends::BackendConfig;
#[cfg(feature = "cli")]
pub use cli::EmbedArgs;
pub use config::PipelineConfig;
pub use errors::{FailureKind, PipelineError};
pub use graph::{Dimension, GraphExecutor, InputOutputInfo, OutputArray, RawOutput};
pub use pool::{CancellationSignal, QueueCounters, WorkerPool};
pub use record::{Batch, EmbeddingResult, TokenizedRecord};
pub use reshape::{OutputReshaper, Pooling};
pub use session::{EmbeddingSession, Tokenize};
pub use tensor::{InputTensor, InputTensorSet, PaddingMask, TensorBuilder};

pub mod tests;
