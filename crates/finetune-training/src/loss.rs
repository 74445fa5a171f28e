//! Loss and accuracy helpers on logits.

use burn::{
    prelude::*,
    tensor::{activation::log_softmax, ElementConversion},
};

/// Mean categorical cross-entropy between softmax(`logits`) and one-hot `targets`.
///
/// Computed from log-softmax so large logits stay finite.
pub fn categorical_cross_entropy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    log_softmax(logits, 1)
        .mul(targets)
        .sum_dim(1)
        .neg()
        .mean()
}

/// Rows whose arg-max prediction equals the arg-max target
pub fn count_correct<B: Backend>(predictions: Tensor<B, 2>, targets: Tensor<B, 2>) -> usize {
    let predicted = predictions.argmax(1);
    let expected = targets.argmax(1);
    let correct: i64 = predicted.equal(expected).int().sum().into_scalar().elem();
    correct as usize
}
