//! Graph executor backends, selected once from configuration.

pub mod onnx;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{errors::PipelineError, graph::GraphExecutor};

/// Which executor implementation to load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// ONNX Runtime session loaded from a verified model file.
    Onnx(onnx::OnnxBackendConfig),
}

impl BackendConfig {
    /// Loads the configured executor.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Backend`] when the backend's artefacts fail
    /// verification or the runtime rejects the model.
    pub fn open(&self) -> Result<Arc<dyn GraphExecutor>, PipelineError> {
        match self {
            Self::Onnx(config) => Ok(Arc::new(onnx::OnnxExecutor::load(config)?)),
        }
    }
}
