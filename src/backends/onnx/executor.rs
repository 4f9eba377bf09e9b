use std::{borrow::Cow, sync::Mutex};

use ort::{
    session::{Session, SessionInputValue},
    value::{TensorRef, ValueType},
};
use tracing::debug;

use super::{config::OnnxBackendConfig, errors::OnnxBackendError};
use crate::{
    errors::PipelineError,
    graph::{Dimension, GraphExecutor, InputOutputInfo, RawOutput},
    tensor::InputTensorSet,
};

/// [`GraphExecutor`] over an ONNX Runtime session.
///
/// Calls from different workers are serialised on the session mutex.
#[derive(Debug)]
pub struct OnnxExecutor {
    session: Mutex<Session>,
    inputs: Vec<InputOutputInfo>,
    outputs: Vec<InputOutputInfo>,
}

impl OnnxExecutor {
    /// Verifies the model checksum and opens a session on it.
    ///
    /// # Errors
    ///
    /// Returns artefact errors when the model cannot be verified and
    /// session errors when ONNX Runtime rejects it.
    pub fn load(config: &OnnxBackendConfig) -> Result<Self, OnnxBackendError> {
        config.model.verify()?;
        let session = Session::builder()
            .map_err(OnnxBackendError::CreateSessionBuilder)?
            .with_intra_threads(config.intra_threads)
            .map_err(|err| OnnxBackendError::CreateSessionBuilder(err.into()))?
            .with_inter_threads(config.inter_threads)
            .map_err(|err| OnnxBackendError::CreateSessionBuilder(err.into()))?
            .with_memory_pattern(config.memory_pattern)
            .map_err(|err| OnnxBackendError::CreateSessionBuilder(err.into()))?
            .commit_from_file(&config.model.path)
            .map_err(OnnxBackendError::CreateSession)?;
        let inputs: Vec<_> = session
            .inputs
            .iter()
            .map(|input| describe(&input.name, &input.input_type))
            .collect();
        let outputs: Vec<_> = session
            .outputs
            .iter()
            .map(|output| describe(&output.name, &output.output_type))
            .collect();
        for info in inputs.iter().chain(&outputs) {
            debug!(name = %info.name, shape = %info.shape_label(), "graph tensor declared");
        }
        Ok(Self {
            session: Mutex::new(session),
            inputs,
            outputs,
        })
    }
}

fn describe(name: &str, value_type: &ValueType) -> InputOutputInfo {
    let dimensions = match value_type {
        ValueType::Tensor { shape, .. } => shape
            .iter()
            .map(|size| Dimension::from_declared(*size))
            .collect(),
        _ => Vec::new(),
    };
    InputOutputInfo::new(name, dimensions)
}

impl GraphExecutor for OnnxExecutor {
    fn input_info(&self) -> &[InputOutputInfo] {
        &self.inputs
    }

    fn output_info(&self) -> &[InputOutputInfo] {
        &self.outputs
    }

    fn run(&self, inputs: &InputTensorSet) -> Result<Vec<RawOutput>, PipelineError> {
        let mut values: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for tensor in inputs.iter() {
            let view = TensorRef::from_array_view((tensor.shape, tensor.data.as_slice()))
                .map_err(PipelineError::execution)?;
            values.push((Cow::Borrowed(tensor.name.as_str()), view.into()));
        }
        let mut session = self
            .session
            .lock()
            .map_err(|_| PipelineError::execution("session mutex was poisoned by a previous panic"))?;
        let outputs = session.run(values).map_err(PipelineError::execution)?;
        let mut raw = Vec::with_capacity(self.outputs.len());
        for info in &self.outputs {
            let Some(value) = outputs.get(info.name.as_str()) else {
                continue;
            };
            let (_, data) = value
                .try_extract_tensor::<f32>()
                .map_err(PipelineError::execution)?;
            raw.push(RawOutput::new(info.name.clone(), data.to_vec()));
        }
        Ok(raw)
    }
}
