//! Contract between the pipeline and a numeric graph executor.
//!
//! An executor declares its input and output metadata once, when it is
//! loaded, and is then invoked concurrently by every worker in the pool.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{errors::PipelineError, tensor::InputTensorSet};

/// One declared tensor dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    /// Size fixed when the graph was exported.
    Fixed(usize),
    /// Size resolved per call from the batch being processed.
    Dynamic,
}

impl Dimension {
    /// Interprets a graph-declared size, where negative values mark a
    /// dynamic axis.
    #[must_use]
    pub fn from_declared(size: i64) -> Self {
        usize::try_from(size).map_or(Self::Dynamic, Self::Fixed)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(size) => write!(f, "{size}"),
            Self::Dynamic => f.write_str("?"),
        }
    }
}

/// Name and declared shape of a graph input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputOutputInfo {
    pub name: String,
    pub dimensions: Vec<Dimension>,
}

impl InputOutputInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, dimensions: Vec<Dimension>) -> Self {
        Self {
            name: name.into(),
            dimensions,
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dimensions.len()
    }

    /// Renders the declared shape as `[?, ?, 384]`.
    #[must_use]
    pub fn shape_label(&self) -> String {
        let dims: Vec<String> = self.dimensions.iter().map(ToString::to_string).collect();
        format!("[{}]", dims.join(", "))
    }
}

/// Flat output buffer exactly as returned by an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub name: String,
    pub data: Vec<f32>,
}

impl RawOutput {
    #[must_use]
    pub fn new(name: impl Into<String>, data: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Output buffer paired with its fully resolved shape.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputArray {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Runs a numeric graph on named input tensors.
///
/// Implementations must tolerate concurrent calls from several workers;
/// any serialisation they need happens inside [`GraphExecutor::run`].
pub trait GraphExecutor: Send + Sync {
    /// Inputs in the order the graph declares them.
    fn input_info(&self) -> &[InputOutputInfo];

    /// Outputs in the order the graph declares them.
    fn output_info(&self) -> &[InputOutputInfo];

    /// Execute the graph for one batch.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Execution`] when the graph fails to run.
    fn run(&self, inputs: &InputTensorSet) -> Result<Vec<RawOutput>, PipelineError>;
}
