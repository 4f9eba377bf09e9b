//! Batch assembly.
//!
//! Partitions a record stream into consecutive batches of a fixed size. The
//! partitioning is lazy: records are pulled from the source only when the
//! next batch is requested, so a bounded downstream queue throttles the
//! source as well.

use std::iter::FusedIterator;

use crate::{
    errors::PipelineError,
    record::{Batch, TokenizedRecord},
};

/// Splits `records` into batches of `batch_size`, preserving order.
///
/// Only the final batch may be shorter, and it is never empty.
///
/// # Errors
///
/// Returns [`PipelineError::Config`] when `batch_size` is zero.
///
/// # Examples
///
/// ```
/// use batch_embed::{assemble, TokenizedRecord};
///
/// let records = (0..5).map(|i| TokenizedRecord::from_ids(i, vec![1, 2]));
/// let sizes: Vec<usize> = assemble(records, 2)
///     .expect("non-zero batch size")
///     .map(|batch| batch.len())
///     .collect();
/// assert_eq!(sizes, vec![2, 2, 1]);
/// ```
pub fn assemble<I>(records: I, batch_size: usize) -> Result<Batches<I::IntoIter>, PipelineError>
where
    I: IntoIterator<Item = TokenizedRecord>,
{
    if batch_size == 0 {
        return Err(PipelineError::config("batch_size must be greater than 0"));
    }
    Ok(Batches {
        records: records.into_iter(),
        batch_size,
        next_ordinal: 0,
        exhausted: false,
    })
}

/// Lazy iterator of [`Batch`] values returned by [`assemble`].
#[derive(Debug)]
pub struct Batches<I> {
    records: I,
    batch_size: usize,
    next_ordinal: usize,
    exhausted: bool,
}

impl<I> Batches<I> {
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }
}

impl<I> Iterator for Batches<I>
where
    I: Iterator<Item = TokenizedRecord>,
{
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let mut chunk = Vec::with_capacity(self.batch_size);
        chunk.extend(self.records.by_ref().take(self.batch_size));
        if chunk.len() < self.batch_size {
            self.exhausted = true;
        }
        if chunk.is_empty() {
            return None;
        }
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Some(Batch::new(ordinal, chunk))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.exhausted {
            return (0, Some(0));
        }
        let (lower, upper) = self.records.size_hint();
        (
            lower.div_ceil(self.batch_size),
            upper.map(|upper| upper.div_ceil(self.batch_size)),
        )
    }
}

impl<I> FusedIterator for Batches<I> where I: Iterator<Item = TokenizedRecord> {}
