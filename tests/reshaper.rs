//! Output reshaping against the padding mask of a built batch.

use batch_embed::{
    Batch, Dimension, InputOutputInfo, OutputReshaper, PaddingMask, PipelineError, Pooling,
    RawOutput, TensorBuilder, TokenizedRecord, tests::support::approx_eq,
};
use rstest::rstest;

fn hidden_state(hidden: usize) -> InputOutputInfo {
    InputOutputInfo::new(
        "last_hidden_state",
        vec![Dimension::Dynamic, Dimension::Dynamic, Dimension::Fixed(hidden)],
    )
}

#[rstest]
fn padded_positions_never_enter_the_mean() {
    let batch = Batch::new(
        0,
        vec![
            TokenizedRecord::from_ids(0, vec![1, 3]),
            TokenizedRecord::from_ids(1, vec![1, 1, 1, 1]),
        ],
    );
    let builder = TensorBuilder::new(&[InputOutputInfo::new(
        "input_ids",
        vec![Dimension::Dynamic, Dimension::Dynamic],
    )]);
    let (_, mask) = builder
        .build(&batch)
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    let reshaper = OutputReshaper::new(hidden_state(1), Pooling::Mean, false);
    let raw = RawOutput::new(
        "last_hidden_state",
        vec![1.0, 3.0, f32::MAX, -99.0, 5.0, 5.0, 5.0, 5.0],
    );
    let out = reshaper
        .reshape(raw, &mask, &batch.indices())
        .unwrap_or_else(|e| panic!("reshape failed: {e}"));
    let first = out
        .first()
        .and_then(|result| result.embedding.first())
        .copied()
        .unwrap_or(f32::NAN);
    let second = out
        .get(1)
        .and_then(|result| result.embedding.first())
        .copied()
        .unwrap_or(f32::NAN);
    assert!(approx_eq(first, 2.0, 1e-6));
    assert!(approx_eq(second, 5.0, 1e-6));
}

#[rstest]
#[case(23)]
#[case(25)]
#[case(0)]
fn buffer_disagreeing_with_declared_shape_is_rejected(#[case] len: usize) {
    let reshaper = OutputReshaper::new(hidden_state(4), Pooling::Mean, false);
    let mask = PaddingMask::from_lengths(&[3, 2], 3);
    let raw = RawOutput::new("last_hidden_state", vec![0.5; len]);
    let err = reshaper.reshape(raw, &mask, &[0, 1]);
    assert!(matches!(
        err,
        Err(PipelineError::ShapeMismatch { name, actual, .. })
            if name == "last_hidden_state" && actual == len
    ));
}

#[rstest]
fn index_count_must_match_mask() {
    let reshaper = OutputReshaper::new(hidden_state(1), Pooling::Mean, false);
    let mask = PaddingMask::from_lengths(&[1, 1], 1);
    let raw = RawOutput::new("last_hidden_state", vec![1.0, 2.0]);
    assert!(matches!(
        reshaper.reshape(raw, &mask, &[0]),
        Err(PipelineError::ShapeMismatch { .. })
    ));
}

#[rstest]
fn select_defaults_to_first_output_and_rejects_unknown_names() {
    let outputs = [
        hidden_state(8),
        InputOutputInfo::new("pooler_output", vec![Dimension::Dynamic, Dimension::Fixed(8)]),
    ];
    let first = OutputReshaper::select(&outputs, None, Pooling::Mean, false)
        .unwrap_or_else(|e| panic!("select failed: {e}"));
    assert_eq!(first.output().name, "last_hidden_state");
    let named = OutputReshaper::select(&outputs, Some("pooler_output"), Pooling::Mean, false)
        .unwrap_or_else(|e| panic!("select failed: {e}"));
    assert_eq!(named.output().rank(), 2);
    assert!(matches!(
        OutputReshaper::select(&outputs, Some("logits"), Pooling::Mean, false),
        Err(PipelineError::Config { .. })
    ));
}
