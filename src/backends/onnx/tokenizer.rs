use std::path::PathBuf;

use tokenizers::{Tokenizer, TruncationDirection, TruncationParams, TruncationStrategy};

use super::{config::OnnxBackendConfig, errors::OnnxBackendError};
use crate::{errors::PipelineError, record::TokenizedRecord, session::Tokenize};

/// [`Tokenize`] over a Hugging Face `tokenizer.json`.
///
/// Encodings are truncated to the configured maximum and left unpadded;
/// the tensor builder pads each batch to its own longest record.
#[derive(Debug)]
pub struct HfTokenizer {
    inner: Tokenizer,
    path: PathBuf,
}

impl HfTokenizer {
    /// Verifies and loads the tokenizer artefact named by `config`.
    ///
    /// # Errors
    ///
    /// Returns artefact errors when verification fails and tokenizer errors
    /// when the file cannot be parsed or truncation cannot be configured.
    pub fn load(config: &OnnxBackendConfig) -> Result<Self, OnnxBackendError> {
        if config.max_sequence_length == 0 {
            return Err(OnnxBackendError::ZeroSequenceLength);
        }
        config.tokenizer.verify()?;
        let path = config.tokenizer.path.clone();
        let mut inner =
            Tokenizer::from_file(&path).map_err(|source| OnnxBackendError::LoadTokenizer {
                path: path.clone(),
                source,
            })?;
        inner
            .with_truncation(Some(TruncationParams {
                max_length: config.max_sequence_length,
                strategy: TruncationStrategy::LongestFirst,
                stride: 0,
                direction: TruncationDirection::Right,
            }))
            .map_err(OnnxBackendError::ConfigureTruncation)?;
        inner.with_padding(None);
        Ok(Self { inner, path })
    }
}

impl Tokenize for HfTokenizer {
    fn tokenize(&self, index: usize, text: &str) -> Result<TokenizedRecord, PipelineError> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|source| PipelineError::Tokenize { index, source })?;
        TokenizedRecord::new(
            index,
            encoding.get_ids().to_vec(),
            encoding.get_type_ids().to_vec(),
            encoding.get_attention_mask().to_vec(),
        )
        .map_err(|err| {
            tracing::warn!(path = %self.path.display(), error = %err, "tokenizer produced ragged encoding");
            err
        })
    }
}
