//! Tensor construction and padding mask behaviour.

use batch_embed::{
    Batch, Dimension, InputOutputInfo, PipelineError, TensorBuilder, TokenizedRecord,
};
use rstest::{fixture, rstest};

fn input(name: &str) -> InputOutputInfo {
    InputOutputInfo::new(name, vec![Dimension::Dynamic, Dimension::Dynamic])
}

#[fixture]
fn builder() -> TensorBuilder {
    TensorBuilder::new(&[
        input("input_ids"),
        input("token_type_ids"),
        input("attention_mask"),
    ])
}

#[fixture]
fn ragged_batch() -> Batch {
    Batch::new(
        0,
        vec![
            TokenizedRecord::from_ids(0, vec![101, 11, 102]),
            TokenizedRecord::from_ids(1, vec![101, 21, 22, 23, 102]),
            TokenizedRecord::from_ids(2, vec![101, 102]),
        ],
    )
}

#[rstest]
fn buffers_are_padded_to_longest_record(builder: TensorBuilder, ragged_batch: Batch) {
    let (tensors, mask) = builder
        .build(&ragged_batch)
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    assert_eq!(ragged_batch.max_sequence_length(), 5);
    assert_eq!(tensors.len(), 3);
    assert!(tensors.iter().all(|tensor| tensor.data.len() == 15));
    assert!(tensors.iter().all(|tensor| tensor.shape == [3, 5]));

    let ids = tensors
        .get("input_ids")
        .unwrap_or_else(|| panic!("input_ids missing"));
    #[rustfmt::skip]
    let expected: Vec<i64> = vec![
        101, 11, 102, 0, 0,
        101, 21, 22, 23, 102,
        101, 102, 0, 0, 0,
    ];
    assert_eq!(ids.data, expected);

    assert_eq!(mask.row(0), Some(&[true, true, true, false, false][..]));
    assert_eq!(mask.row(1), Some(&[true; 5][..]));
    assert_eq!(mask.row(2), Some(&[true, true, false, false, false][..]));
}

#[rstest]
fn mask_follows_token_length_only(builder: TensorBuilder) {
    let record = TokenizedRecord::new(0, vec![5, 6, 7], vec![0, 0, 0], vec![1, 0, 0])
        .unwrap_or_else(|e| panic!("record rejected: {e}"));
    let batch = Batch::new(0, vec![record, TokenizedRecord::from_ids(1, vec![1; 4])]);
    let (tensors, mask) = builder
        .build(&batch)
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    assert_eq!(mask.row(0), Some(&[true, true, true, false][..]));
    let attention = tensors
        .get("attention_mask")
        .unwrap_or_else(|| panic!("attention_mask missing"));
    assert_eq!(attention.data.get(..4), Some(&[1, 0, 0, 0][..]));
}

#[rstest]
fn building_twice_is_bit_identical(builder: TensorBuilder, ragged_batch: Batch) {
    let first = builder
        .build(&ragged_batch)
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    let second = builder
        .build(&ragged_batch)
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    assert_eq!(first, second);
}

#[rstest]
fn unknown_input_name_is_rejected(ragged_batch: Batch) {
    let builder = TensorBuilder::new(&[input("input_ids"), input("pixel_values")]);
    assert_eq!(builder.unrecognized().collect::<Vec<_>>(), vec!["pixel_values"]);
    let err = builder.build(&ragged_batch);
    assert!(matches!(
        err,
        Err(PipelineError::UnrecognizedTensorName { name }) if name == "pixel_values"
    ));
}

#[rstest]
fn only_declared_inputs_are_built(ragged_batch: Batch) {
    let builder = TensorBuilder::new(&[input("attention_mask"), input("input_ids")]);
    let (tensors, _) = builder
        .build(&ragged_batch)
        .unwrap_or_else(|e| panic!("build failed: {e}"));
    let names: Vec<&str> = tensors.iter().map(|tensor| tensor.name.as_str()).collect();
    assert_eq!(names, vec!["attention_mask", "input_ids"]);
    assert!(tensors.get("token_type_ids").is_none());
}
