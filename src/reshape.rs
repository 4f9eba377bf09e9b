//! Output reshaping and pooling.
//!
//! Resolves an output's declared shape against the batch that produced it,
//! then turns the flat buffer into one vector per record. Per-token outputs
//! (`batch × sequence × hidden`) are pooled over the positions the padding
//! mask marks as real; pooled outputs (`batch × hidden`) are split as-is.

use serde::{Deserialize, Serialize};

use crate::{
    errors::PipelineError,
    graph::{Dimension, InputOutputInfo, OutputArray, RawOutput},
    record::EmbeddingResult,
    tensor::PaddingMask,
};

/// How per-token outputs collapse into one vector per record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pooling {
    /// Average over the real positions of each record.
    #[default]
    Mean,
    /// Take the first position, provided it is real.
    Cls,
}

impl std::str::FromStr for Pooling {
    type Err = PipelineError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim() {
            name if name.eq_ignore_ascii_case("mean") => Ok(Self::Mean),
            name if name.eq_ignore_ascii_case("cls") => Ok(Self::Cls),
            other => Err(PipelineError::config(format!(
                "unknown pooling \"{other}\"; expected mean or cls"
            ))),
        }
    }
}

impl std::fmt::Display for Pooling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Mean => "mean",
            Self::Cls => "cls",
        })
    }
}

/// Converts raw executor buffers into per-record embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputReshaper {
    output: InputOutputInfo,
    pooling: Pooling,
    normalize: bool,
}

impl OutputReshaper {
    /// Selects the output to reshape from the graph's declared outputs.
    ///
    /// `output_name` picks an output by name; when absent the first
    /// declared output is used.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when no matching output is declared.
    pub fn select(
        outputs: &[InputOutputInfo],
        output_name: Option<&str>,
        pooling: Pooling,
        normalize: bool,
    ) -> Result<Self, PipelineError> {
        let output = match output_name {
            Some(name) => outputs.iter().find(|info| info.name == name).ok_or_else(|| {
                PipelineError::config(format!("graph declares no output named \"{name}\""))
            })?,
            None => outputs
                .first()
                .ok_or_else(|| PipelineError::config("graph declares no outputs"))?,
        };
        Ok(Self::new(output.clone(), pooling, normalize))
    }

    #[must_use]
    pub fn new(output: InputOutputInfo, pooling: Pooling, normalize: bool) -> Self {
        Self {
            output,
            pooling,
            normalize,
        }
    }

    /// Metadata of the output this reshaper consumes.
    #[must_use]
    pub fn output(&self) -> &InputOutputInfo {
        &self.output
    }

    /// Pairs `raw` with its concrete shape for this call.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] when the declared dimensions
    /// cannot describe the buffer.
    pub fn resolve(
        &self,
        raw: RawOutput,
        batch_size: usize,
        max_sequence_length: usize,
    ) -> Result<OutputArray, PipelineError> {
        let shape = resolve_shape(&self.output, batch_size, max_sequence_length, raw.data.len())?;
        Ok(OutputArray {
            name: raw.name,
            shape,
            data: raw.data,
        })
    }

    /// Reshapes `raw` into one embedding per record of the batch.
    ///
    /// `indices` carries the original stream position of each record in
    /// batch order.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::ShapeMismatch`] when the buffer disagrees
    /// with the declared shape, the padding mask, or the record count.
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_embed::{Dimension, InputOutputInfo, OutputReshaper, PaddingMask, Pooling, RawOutput};
    ///
    /// let meta = InputOutputInfo::new("last_hidden_state", vec![Dimension::Dynamic, Dimension::Dynamic, Dimension::Fixed(1)]);
    /// let reshaper = OutputReshaper::new(meta, Pooling::Mean, false);
    /// let mask = PaddingMask::from_lengths(&[2], 4);
    /// let raw = RawOutput::new("last_hidden_state", vec![1.0, 3.0, 100.0, -50.0]);
    /// let out = reshaper.reshape(raw, &mask, &[0]).expect("shape resolves");
    /// assert_eq!(out[0].embedding, vec![2.0]);
    /// ```
    pub fn reshape(
        &self,
        raw: RawOutput,
        padding_mask: &PaddingMask,
        indices: &[usize],
    ) -> Result<Vec<EmbeddingResult>, PipelineError> {
        let batch_size = padding_mask.batch_size();
        if indices.len() != batch_size {
            return Err(PipelineError::ShapeMismatch {
                name: self.output.name.clone(),
                declared: format!("{batch_size} records in padding mask"),
                actual: indices.len(),
            });
        }
        let array = self.resolve(raw, batch_size, padding_mask.max_sequence_length())?;
        let vectors = match array.shape.as_slice() {
            [_, hidden] => split_pooled(&array, *hidden)?,
            [_, sequence, hidden] => self.pool_tokens(&array, padding_mask, *sequence, *hidden)?,
            _ => return Err(self.mismatch(array.data.len())),
        };
        Ok(indices
            .iter()
            .zip(vectors)
            .map(|(index, mut embedding)| {
                if self.normalize {
                    l2_normalize(&mut embedding);
                }
                EmbeddingResult {
                    index: *index,
                    embedding,
                }
            })
            .collect())
    }

    fn pool_tokens(
        &self,
        array: &OutputArray,
        padding_mask: &PaddingMask,
        sequence: usize,
        hidden: usize,
    ) -> Result<Vec<Vec<f32>>, PipelineError> {
        (0..padding_mask.batch_size())
            .map(|record| {
                let positions = (0..sequence).filter(|k| padding_mask.is_real(record, *k));
                let selected: Vec<usize> = match self.pooling {
                    Pooling::Mean => positions.collect(),
                    Pooling::Cls => positions.take(1).filter(|k| *k == 0).collect(),
                };
                let mut rows = Vec::with_capacity(selected.len());
                for position in selected {
                    let start = (record * sequence + position) * hidden;
                    let row = array
                        .data
                        .get(start..start + hidden)
                        .ok_or_else(|| self.mismatch(array.data.len()))?;
                    rows.push(row);
                }
                Ok(mean(&rows, hidden))
            })
            .collect()
    }

    fn mismatch(&self, actual: usize) -> PipelineError {
        PipelineError::ShapeMismatch {
            name: self.output.name.clone(),
            declared: self.output.shape_label(),
            actual,
        }
    }
}

/// Resolves `info`'s dimensions for one call.
///
/// The leading dynamic axis is the batch; in a rank-3 output the second
/// dynamic axis is the sequence. A single remaining dynamic axis is inferred
/// from the buffer length.
///
/// # Errors
///
/// Returns [`PipelineError::ShapeMismatch`] for unsupported ranks, fixed
/// dimensions that contradict the batch, more than one unresolvable axis, or
/// a product that differs from `buffer_len`.
pub fn resolve_shape(
    info: &InputOutputInfo,
    batch_size: usize,
    max_sequence_length: usize,
    buffer_len: usize,
) -> Result<Vec<usize>, PipelineError> {
    let mismatch = || PipelineError::ShapeMismatch {
        name: info.name.clone(),
        declared: info.shape_label(),
        actual: buffer_len,
    };
    let rank = info.rank();
    if rank != 2 && rank != 3 {
        return Err(mismatch());
    }
    let mut resolved: Vec<Option<usize>> = info
        .dimensions
        .iter()
        .enumerate()
        .map(|(axis, dim)| match (axis, dim) {
            (_, Dimension::Fixed(size)) => Some(*size),
            (0, Dimension::Dynamic) => Some(batch_size),
            (1, Dimension::Dynamic) if rank == 3 => Some(max_sequence_length),
            _ => None,
        })
        .collect();

    let mut unresolved = resolved
        .iter()
        .enumerate()
        .filter(|(_, dim)| dim.is_none())
        .map(|(axis, _)| axis);
    let (first, second) = (unresolved.next(), unresolved.next());
    match (first, second) {
        (None, _) => {}
        (Some(axis), None) => {
            let known: usize = resolved.iter().flatten().product();
            if known == 0 || buffer_len % known != 0 {
                return Err(mismatch());
            }
            if let Some(slot) = resolved.get_mut(axis) {
                *slot = Some(buffer_len / known);
            }
        }
        (Some(_), Some(_)) => return Err(mismatch()),
    }

    let shape: Vec<usize> = resolved.into_iter().flatten().collect();
    let leading_ok = shape.first() == Some(&batch_size);
    let sequence_ok = rank == 2 || shape.get(1) == Some(&max_sequence_length);
    if shape.len() != rank
        || !leading_ok
        || !sequence_ok
        || shape.iter().product::<usize>() != buffer_len
    {
        return Err(mismatch());
    }
    Ok(shape)
}

fn split_pooled(array: &OutputArray, hidden: usize) -> Result<Vec<Vec<f32>>, PipelineError> {
    if hidden == 0 {
        return Ok(array.shape.first().map_or_else(Vec::new, |batch| vec![Vec::new(); *batch]));
    }
    Ok(array.data.chunks_exact(hidden).map(<[f32]>::to_vec).collect())
}

/// Averages `rows` component-wise; no rows gives the zero vector.
#[expect(clippy::float_arithmetic, reason = "pooling averages activations")]
fn mean(rows: &[&[f32]], hidden: usize) -> Vec<f32> {
    let mut sum = vec![0.0_f32; hidden];
    for row in rows {
        for (acc, value) in sum.iter_mut().zip(row.iter()) {
            *acc += *value;
        }
    }
    if rows.len() > 1 {
        #[expect(clippy::cast_precision_loss, reason = "token counts are far below 2^24")]
        let count = rows.len() as f32;
        for acc in &mut sum {
            *acc /= count;
        }
    }
    sum
}

/// Scales `vector` to unit length; the zero vector is left alone.
#[expect(clippy::float_arithmetic, reason = "normalisation divides by the norm")]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}
