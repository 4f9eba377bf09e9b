//! In-memory collaborators for exercising the pipeline without a model.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::Duration,
};

use crate::{
    errors::PipelineError,
    graph::{Dimension, GraphExecutor, InputOutputInfo, RawOutput},
    record::TokenizedRecord,
    session::Tokenize,
    tensor::{ATTENTION_MASK, INPUT_IDS, InputTensorSet, TOKEN_TYPE_IDS},
};

/// Value written at padded positions of per-token outputs. Any pooling that
/// lets it through produces an obviously wrong embedding.
pub const PADDING_SENTINEL: f32 = -1000.0;

#[expect(clippy::float_arithmetic, reason = "tolerance comparison")]
#[must_use]
pub fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

/// Callback observing every executor call before it runs.
pub type Probe = Arc<dyn Fn(&InputTensorSet) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    /// `batch × sequence × hidden`, every hidden value equal to the token id.
    PerToken { hidden: usize },
    /// `batch × hidden`, every value equal to the record's first token id.
    Pooled { hidden: usize },
}

/// Deterministic [`GraphExecutor`] whose outputs are derived from the
/// input ids, with knobs for injecting failures and delays.
pub struct ScriptedExecutor {
    inputs: Vec<InputOutputInfo>,
    outputs: Vec<InputOutputInfo>,
    mode: OutputMode,
    fail_on_first_token: Option<i64>,
    transient_failures: AtomicUsize,
    delay: Duration,
    calls: AtomicUsize,
    probe: Option<Probe>,
}

impl std::fmt::Debug for ScriptedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedExecutor")
            .field("mode", &self.mode)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

fn text_inputs() -> Vec<InputOutputInfo> {
    [INPUT_IDS, TOKEN_TYPE_IDS, ATTENTION_MASK]
        .into_iter()
        .map(|name| InputOutputInfo::new(name, vec![Dimension::Dynamic, Dimension::Dynamic]))
        .collect()
}

impl ScriptedExecutor {
    /// Declares `last_hidden_state` as `[?, ?, hidden]`.
    #[must_use]
    pub fn per_token(hidden: usize) -> Self {
        Self::with_mode(
            OutputMode::PerToken { hidden },
            InputOutputInfo::new(
                "last_hidden_state",
                vec![Dimension::Dynamic, Dimension::Dynamic, Dimension::Fixed(hidden)],
            ),
        )
    }

    /// Declares `sentence_embedding` as `[?, hidden]`.
    #[must_use]
    pub fn pooled(hidden: usize) -> Self {
        Self::with_mode(
            OutputMode::Pooled { hidden },
            InputOutputInfo::new(
                "sentence_embedding",
                vec![Dimension::Dynamic, Dimension::Fixed(hidden)],
            ),
        )
    }

    fn with_mode(mode: OutputMode, output: InputOutputInfo) -> Self {
        Self {
            inputs: text_inputs(),
            outputs: vec![output],
            mode,
            fail_on_first_token: None,
            transient_failures: AtomicUsize::new(0),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            probe: None,
        }
    }

    /// Replaces the declared inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Vec<InputOutputInfo>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Fails every batch whose first record starts with `token`.
    #[must_use]
    pub fn failing_on_token(mut self, token: u32) -> Self {
        self.fail_on_first_token = Some(i64::from(token));
        self
    }

    /// Fails the first `count` calls, whatever their input.
    #[must_use]
    pub fn failing_first(self, count: usize) -> Self {
        self.transient_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Sleeps for `delay` inside every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Number of times [`GraphExecutor::run`] has been entered.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn take_transient_failure(&self) -> bool {
        self.transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[expect(clippy::cast_precision_loss, reason = "scripted token ids are small")]
fn token_value(id: i64) -> f32 {
    id as f32
}

impl GraphExecutor for ScriptedExecutor {
    fn input_info(&self) -> &[InputOutputInfo] {
        &self.inputs
    }

    fn output_info(&self) -> &[InputOutputInfo] {
        &self.outputs
    }

    fn run(&self, inputs: &InputTensorSet) -> Result<Vec<RawOutput>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            probe(inputs);
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if self.take_transient_failure() {
            return Err(PipelineError::execution("scripted transient failure"));
        }
        let ids = inputs
            .get(INPUT_IDS)
            .ok_or_else(|| PipelineError::execution("input_ids not supplied"))?;
        if self.fail_on_first_token.is_some() && ids.data.first().copied() == self.fail_on_first_token
        {
            return Err(PipelineError::execution("scripted failure for batch"));
        }
        let mask = inputs.get(ATTENTION_MASK).map(|tensor| tensor.data.as_slice());
        let sequence = inputs.max_sequence_length();
        let data = match self.mode {
            OutputMode::PerToken { hidden } => ids
                .data
                .iter()
                .enumerate()
                .flat_map(|(position, id)| {
                    let real = mask.is_none_or(|mask| mask.get(position) == Some(&1));
                    let value = if real {
                        token_value(*id)
                    } else {
                        PADDING_SENTINEL
                    };
                    std::iter::repeat_n(value, hidden)
                })
                .collect(),
            OutputMode::Pooled { hidden } => ids
                .data
                .chunks(sequence.max(1))
                .take(inputs.batch_size())
                .flat_map(|row| {
                    let first = row.first().copied().unwrap_or(0);
                    std::iter::repeat_n(token_value(first), hidden)
                })
                .collect(),
        };
        let name = self
            .outputs
            .first()
            .map(|info| info.name.clone())
            .unwrap_or_default();
        Ok(vec![RawOutput::new(name, data)])
    }
}

/// Tokenizes text as `[101, len(word)…, 102]`. Text containing a NUL byte
/// is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordLengthTokenizer;

impl Tokenize for WordLengthTokenizer {
    fn tokenize(&self, index: usize, text: &str) -> Result<TokenizedRecord, PipelineError> {
        if text.contains('\0') {
            return Err(PipelineError::Tokenize {
                index,
                source: "text contains a NUL byte".into(),
            });
        }
        let ids = std::iter::once(101)
            .chain(
                text.split_whitespace()
                    .map(|word| u32::try_from(word.len()).unwrap_or(u32::MAX)),
            )
            .chain(std::iter::once(102))
            .collect();
        Ok(TokenizedRecord::from_ids(index, ids))
    }
}

/// `count` single-segment records whose token ids all equal their index
/// plus one, with lengths cycling through 1..=`max_len`.
#[must_use]
pub fn indexed_records(count: usize, max_len: usize) -> Vec<TokenizedRecord> {
    (0..count)
        .map(|index| {
            let len = index % max_len.max(1) + 1;
            let id = u32::try_from(index + 1).unwrap_or(u32::MAX);
            TokenizedRecord::from_ids(index, vec![id; len])
        })
        .collect()
}
