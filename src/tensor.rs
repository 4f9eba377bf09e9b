//! Input tensor construction.
//!
//! Turns a [`Batch`] into one flat `i64` buffer per declared graph input,
//! laid out record-major then position, and derives the padding mask that
//! later gates pooling. The sequence axis is sized to the longest record in
//! the batch, so short batches carry no more padding than they need.

use crate::{
    errors::PipelineError,
    graph::InputOutputInfo,
    record::{Batch, TokenizedRecord},
};

/// Input carrying [`TokenizedRecord::token_ids`].
pub const INPUT_IDS: &str = "input_ids";
/// Input carrying [`TokenizedRecord::type_ids`].
pub const TOKEN_TYPE_IDS: &str = "token_type_ids";
/// Input carrying [`TokenizedRecord::attention_mask`].
pub const ATTENTION_MASK: &str = "attention_mask";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TensorSource {
    TokenIds,
    TypeIds,
    AttentionMask,
}

impl TensorSource {
    fn for_name(name: &str) -> Option<Self> {
        match name {
            INPUT_IDS => Some(Self::TokenIds),
            TOKEN_TYPE_IDS => Some(Self::TypeIds),
            ATTENTION_MASK => Some(Self::AttentionMask),
            _ => None,
        }
    }

    fn values(self, record: &TokenizedRecord) -> &[u32] {
        match self {
            Self::TokenIds => &record.token_ids,
            Self::TypeIds => &record.type_ids,
            Self::AttentionMask => &record.attention_mask,
        }
    }
}

/// One named input buffer of shape `[batch_size, max_sequence_length]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTensor {
    pub name: String,
    pub shape: [usize; 2],
    pub data: Vec<i64>,
}

/// Every input tensor built for one batch, in the graph's declared order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputTensorSet {
    batch_size: usize,
    max_sequence_length: usize,
    tensors: Vec<InputTensor>,
}

impl InputTensorSet {
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    /// Looks up a tensor by input name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&InputTensor> {
        self.tensors.iter().find(|tensor| tensor.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputTensor> {
        self.tensors.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}

/// Per-record real/pad indicator over the batch's sequence axis.
///
/// Position `k` of row `j` is real iff `k` is below the length of record
/// `j`'s token ids. Attention mask values play no part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaddingMask {
    max_sequence_length: usize,
    rows: Vec<Vec<bool>>,
}

impl PaddingMask {
    /// Derives the mask from the token lengths of `batch`.
    #[must_use]
    pub fn from_batch(batch: &Batch) -> Self {
        let max_sequence_length = batch.max_sequence_length();
        let rows = batch
            .records()
            .iter()
            .map(|record| (0..max_sequence_length).map(|k| k < record.len()).collect())
            .collect();
        Self {
            max_sequence_length,
            rows,
        }
    }

    /// Builds a mask directly from per-record real lengths.
    #[must_use]
    pub fn from_lengths(lengths: &[usize], max_sequence_length: usize) -> Self {
        let rows = lengths
            .iter()
            .map(|len| (0..max_sequence_length).map(|k| k < *len).collect())
            .collect();
        Self {
            max_sequence_length,
            rows,
        }
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    #[must_use]
    pub fn row(&self, record: usize) -> Option<&[bool]> {
        self.rows.get(record).map(Vec::as_slice)
    }

    /// Whether position `k` of record `j` holds a real token.
    #[must_use]
    pub fn is_real(&self, record: usize, position: usize) -> bool {
        self.row(record)
            .and_then(|row| row.get(position))
            .copied()
            .unwrap_or(false)
    }
}

/// Builds padded input tensors for the inputs a graph declares.
#[derive(Debug, Clone)]
pub struct TensorBuilder {
    inputs: Vec<(String, Option<TensorSource>)>,
}

impl TensorBuilder {
    /// Resolves a population rule for each declared input.
    ///
    /// Unknown names are kept and reported by [`TensorBuilder::build`].
    #[must_use]
    pub fn new(inputs: &[InputOutputInfo]) -> Self {
        let inputs = inputs
            .iter()
            .map(|info| (info.name.clone(), TensorSource::for_name(&info.name)))
            .collect();
        Self { inputs }
    }

    /// Names of the inputs this builder has no rule for.
    pub fn unrecognized(&self) -> impl Iterator<Item = &str> {
        self.inputs
            .iter()
            .filter(|(_, source)| source.is_none())
            .map(|(name, _)| name.as_str())
    }

    /// Builds the tensors and padding mask for `batch`.
    ///
    /// Each buffer holds `batch.len() * batch.max_sequence_length()` values;
    /// positions past a record's length are zero.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::UnrecognizedTensorName`] for the first
    /// declared input without a population rule.
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_embed::{Batch, Dimension, InputOutputInfo, TensorBuilder, TokenizedRecord};
    ///
    /// let inputs = [InputOutputInfo::new("input_ids", vec![Dimension::Dynamic; 2])];
    /// let batch = Batch::new(0, vec![
    ///     TokenizedRecord::from_ids(0, vec![101, 102]),
    ///     TokenizedRecord::from_ids(1, vec![101, 7, 102]),
    /// ]);
    /// let (tensors, mask) = TensorBuilder::new(&inputs).build(&batch).expect("known input");
    /// let ids = tensors.get("input_ids").expect("input_ids built");
    /// assert_eq!(ids.data, vec![101, 102, 0, 101, 7, 102]);
    /// assert_eq!(mask.row(0), Some(&[true, true, false][..]));
    /// ```
    pub fn build(&self, batch: &Batch) -> Result<(InputTensorSet, PaddingMask), PipelineError> {
        let batch_size = batch.len();
        let max_sequence_length = batch.max_sequence_length();
        let mut tensors = Vec::with_capacity(self.inputs.len());
        for (name, source) in &self.inputs {
            let source = source.ok_or_else(|| PipelineError::UnrecognizedTensorName {
                name: name.clone(),
            })?;
            tensors.push(InputTensor {
                name: name.clone(),
                shape: [batch_size, max_sequence_length],
                data: fill(batch, source, max_sequence_length),
            });
        }
        let set = InputTensorSet {
            batch_size,
            max_sequence_length,
            tensors,
        };
        Ok((set, PaddingMask::from_batch(batch)))
    }
}

fn fill(batch: &Batch, source: TensorSource, max_sequence_length: usize) -> Vec<i64> {
    let mut data = vec![0_i64; batch.len() * max_sequence_length];
    if max_sequence_length == 0 {
        return data;
    }
    for (row, record) in data
        .chunks_exact_mut(max_sequence_length)
        .zip(batch.records())
    {
        let real = source.values(record).iter().take(record.len());
        for (slot, value) in row.iter_mut().zip(real) {
            *slot = i64::from(*value);
        }
    }
    data
}
