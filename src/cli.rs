//! CLI argument types and layered configuration for the `batch-embed`
//! binary. Loads from CLI args, environment (prefix `BATCH_EMBED_`), and
//! optional config files.

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use ortho_config::OrthoError;
use serde::Deserialize;
use std::path::PathBuf;

use crate::{
    config::{DEFAULT_BATCH_SIZE, DEFAULT_WORKER_COUNT, PipelineConfig},
    errors::PipelineError,
    reshape::Pooling,
};

/// Command-line arguments for the `batch-embed` binary.
///
/// The binary reads one text per line from standard input and writes one
/// JSON embedding per line to standard output.
///
/// # Examples
///
/// Parse flags directly:
/// ```
/// use batch_embed::cli::EmbedArgs;
/// use ortho_config::OrthoConfig;
///
/// let args = EmbedArgs::load_from_iter(["batch-embed", "--batch-size", "8", "--dry-run=true"])
///     .expect("load args from CLI iterator");
/// assert!(args.dry_run);
/// assert_eq!(args.batch_size, 8);
/// ```
///
/// Load from a configuration file:
/// ```
/// use batch_embed::cli::EmbedArgs;
/// use ortho_config::OrthoConfig;
/// use std::io::Write;
/// use tempfile::NamedTempFile;
///
/// let mut file = NamedTempFile::new().expect("create temp file");
/// writeln!(file, "worker_count = 2\npooling = \"cls\"").expect("write config");
/// let path = file.path().to_str().expect("path str");
/// let args = EmbedArgs::load_from_iter(["batch-embed", "--config-path", path])
///     .expect("load args from config path");
/// assert_eq!(args.worker_count, 2);
/// ```
#[derive(Debug, Deserialize, ortho_config::OrthoConfig)]
#[ortho_config(prefix = "BATCH_EMBED")]
pub struct EmbedArgs {
    /// Print the resolved pipeline configuration and exit.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub dry_run: bool,

    /// Records per batch.
    #[ortho_config(default = 32)]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Parallel workers.
    #[ortho_config(default = 4)]
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Per-batch deadline in milliseconds.
    #[serde(default)]
    pub batch_timeout_ms: Option<u64>,

    /// Extra attempts for batches whose execution fails.
    #[ortho_config(default = 0)]
    #[serde(default)]
    pub max_retries: usize,

    /// Graph output to pool.
    #[serde(default)]
    pub output_name: Option<String>,

    /// `mean` or `cls`.
    #[serde(default)]
    pub pooling: Option<Pooling>,

    /// Scale embeddings to unit length.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub normalize: bool,

    /// ONNX model file.
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    /// Expected SHA-256 of the model file.
    #[serde(default)]
    pub model_sha256: Option<String>,

    /// `tokenizer.json` matching the model.
    #[serde(default)]
    pub tokenizer_path: Option<PathBuf>,

    /// Expected SHA-256 of the tokenizer file.
    #[serde(default)]
    pub tokenizer_sha256: Option<String>,

    /// Longest token sequence passed to the model.
    #[serde(default)]
    pub max_sequence_length: Option<usize>,

    /// ONNX Runtime threads within one operator.
    #[serde(default)]
    pub intra_threads: Option<usize>,

    /// ONNX Runtime threads across independent operators.
    #[serde(default)]
    pub inter_threads: Option<usize>,

    /// Optional path to a configuration file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

impl EmbedArgs {
    /// Load configuration solely from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if any variable cannot be parsed.
    pub fn load_from_env() -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Env::prefixed("BATCH_EMBED_"))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if the file cannot be read or parsed.
    pub fn load_from_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from environment variables and a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if either source contains invalid values.
    pub fn load_from_env_and_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("BATCH_EMBED_"))
            .extract()
            .map_err(Into::into)
    }

    /// Builds and validates the pipeline configuration these arguments
    /// describe.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] for an out-of-range value.
    pub fn pipeline_config(&self) -> Result<PipelineConfig, PipelineError> {
        PipelineConfig {
            batch_size: self.batch_size,
            worker_count: self.worker_count,
            batch_timeout_ms: self.batch_timeout_ms,
            max_retries: self.max_retries,
            output_name: self.output_name.clone(),
            pooling: self.pooling.unwrap_or_default(),
            normalize: self.normalize,
            ..PipelineConfig::default()
        }
        .validate()
    }

    /// Builds the ONNX backend configuration from the artefact arguments.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when a path or checksum is missing.
    #[cfg(feature = "onnx")]
    pub fn backend_config(
        &self,
    ) -> Result<crate::backends::onnx::OnnxBackendConfig, PipelineError> {
        use crate::backends::onnx::{ModelArtefact, OnnxBackendConfig};

        fn required<'a, T>(value: Option<&'a T>, flag: &str) -> Result<&'a T, PipelineError>
        where
            T: ?Sized,
        {
            value.ok_or_else(|| PipelineError::config(format!("--{flag} is required")))
        }

        let model = ModelArtefact::new(
            required(self.model_path.as_ref(), "model-path")?.clone(),
            required(self.model_sha256.as_deref(), "model-sha256")?,
        );
        let tokenizer = ModelArtefact::new(
            required(self.tokenizer_path.as_ref(), "tokenizer-path")?.clone(),
            required(self.tokenizer_sha256.as_deref(), "tokenizer-sha256")?,
        );
        let mut config = OnnxBackendConfig::new(model, tokenizer);
        if let Some(max) = self.max_sequence_length {
            config.max_sequence_length = max;
        }
        if let Some(threads) = self.intra_threads {
            config.intra_threads = threads;
        }
        if let Some(threads) = self.inter_threads {
            config.inter_threads = threads;
        }
        Ok(config)
    }
}
