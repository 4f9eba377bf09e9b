//! Configuration for the ONNX backend.

use serde::{Deserialize, Serialize};

use super::artefact::ModelArtefact;

/// Sequence cap applied by the tokenizer when none is configured.
pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 512;

/// Artefacts and session options for an ONNX sentence-embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnnxBackendConfig {
    /// Model graph to load.
    pub model: ModelArtefact,
    /// `tokenizer.json` consumed by `tokenizers`.
    pub tokenizer: ModelArtefact,
    /// Longest token sequence the tokenizer emits; longer inputs are
    /// truncated from the right. Padding happens per batch, not here.
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
    /// Threads ONNX Runtime may use inside a single operator.
    #[serde(default = "default_threads")]
    pub intra_threads: usize,
    /// Threads ONNX Runtime may use to run independent operators at once.
    #[serde(default = "default_threads")]
    pub inter_threads: usize,
    /// Let ONNX Runtime plan allocations from the first run's shapes.
    #[serde(default = "default_memory_pattern")]
    pub memory_pattern: bool,
}

impl OnnxBackendConfig {
    #[must_use]
    pub fn new(model: ModelArtefact, tokenizer: ModelArtefact) -> Self {
        Self {
            model,
            tokenizer,
            max_sequence_length: DEFAULT_MAX_SEQUENCE_LENGTH,
            intra_threads: default_threads(),
            inter_threads: default_threads(),
            memory_pattern: default_memory_pattern(),
        }
    }
}

fn default_max_sequence_length() -> usize {
    DEFAULT_MAX_SEQUENCE_LENGTH
}

fn default_threads() -> usize {
    1
}

fn default_memory_pattern() -> bool {
    true
}
