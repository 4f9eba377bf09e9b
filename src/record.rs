//! Records flowing through the pipeline: tokenized inputs, batches of them,
//! and the embeddings produced for each.

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// One tokenized input together with its position in the original stream.
///
/// The three id sequences always share a length when built through
/// [`TokenizedRecord::new`] or [`TokenizedRecord::from_ids`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedRecord {
    pub index: usize,
    pub token_ids: Vec<u32>,
    pub type_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl TokenizedRecord {
    /// Builds a record, rejecting sequences of unequal length.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RaggedRecord`] when the sequences differ in length.
    ///
    /// # Examples
    ///
    /// ```
    /// use batch_embed::TokenizedRecord;
    ///
    /// let record = TokenizedRecord::new(0, vec![101, 7592, 102], vec![0; 3], vec![1; 3])
    ///     .expect("equal lengths");
    /// assert_eq!(record.len(), 3);
    /// assert!(TokenizedRecord::new(1, vec![101], vec![], vec![1]).is_err());
    /// ```
    pub fn new(
        index: usize,
        token_ids: Vec<u32>,
        type_ids: Vec<u32>,
        attention_mask: Vec<u32>,
    ) -> Result<Self, PipelineError> {
        if token_ids.len() != type_ids.len() || token_ids.len() != attention_mask.len() {
            return Err(PipelineError::RaggedRecord {
                index,
                tokens: token_ids.len(),
                types: type_ids.len(),
                mask: attention_mask.len(),
            });
        }
        Ok(Self {
            index,
            token_ids,
            type_ids,
            attention_mask,
        })
    }

    /// Builds a single-segment record: every type id is zero and every
    /// position is attended.
    #[must_use]
    pub fn from_ids(index: usize, token_ids: Vec<u32>) -> Self {
        let len = token_ids.len();
        Self {
            index,
            token_ids,
            type_ids: vec![0; len],
            attention_mask: vec![1; len],
        }
    }

    /// Number of real tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.token_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.token_ids.is_empty()
    }
}

/// An ordered group of records processed together by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    ordinal: usize,
    records: Vec<TokenizedRecord>,
    max_sequence_length: usize,
}

impl Batch {
    /// Wraps `records` and derives the longest token sequence among them.
    #[must_use]
    pub fn new(ordinal: usize, records: Vec<TokenizedRecord>) -> Self {
        let max_sequence_length = records
            .iter()
            .map(TokenizedRecord::len)
            .max()
            .unwrap_or(0);
        Self {
            ordinal,
            records,
            max_sequence_length,
        }
    }

    /// Position of this batch in the assembled sequence.
    #[must_use]
    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    #[must_use]
    pub fn records(&self) -> &[TokenizedRecord] {
        &self.records
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Longest `token_ids` length across the batch.
    #[must_use]
    pub fn max_sequence_length(&self) -> usize {
        self.max_sequence_length
    }

    /// Original stream positions of the records, in batch order.
    #[must_use]
    pub fn indices(&self) -> Vec<usize> {
        self.records.iter().map(|record| record.index).collect()
    }

    #[must_use]
    pub fn into_records(self) -> Vec<TokenizedRecord> {
        self.records
    }
}

/// Fixed-width embedding for one record, tagged with its original position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub index: usize,
    pub embedding: Vec<f32>,
}
