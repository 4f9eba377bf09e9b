//! ONNX Runtime executor and `tokenizers` adapter with artefact verification.
mod artefact;
mod config;
mod errors;
mod executor;
mod tokenizer;

pub use artefact::{ModelArtefact, compute_sha256};
pub use config::OnnxBackendConfig;
pub use errors::OnnxBackendError;
pub use executor::OnnxExecutor;
pub use tokenizer::HfTokenizer;
