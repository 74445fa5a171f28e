//! Training and evaluation steps for the classifier model.
//!
//! [`Classifier`] owns the model, its optimizer and the metric
//! accumulators. A training step runs in [`Mode::Train`] on the autodiff
//! backend and updates only parameters that still require gradients; an
//! evaluation step runs the inference copy of the model in [`Mode::Eval`].

use burn::{
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use finetune_core::{MetricSet, MetricsSnapshot, Result, DEFAULT_LEARNING_RATE};
use finetune_dataset::ClassifierBatch;
use tracing::debug;

use crate::layers::Mode;
use crate::loss::{categorical_cross_entropy, count_correct};
use crate::model::ClassifierModel;

/// Adam with β1 = 0.9, β2 = 0.999 and ε = 1e-7
pub fn adam_optimizer<B: AutodiffBackend>() -> impl Optimizer<ClassifierModel<B>, B> {
    AdamConfig::new()
        .with_beta_1(0.9)
        .with_beta_2(0.999)
        .with_epsilon(1e-7)
        .init::<B, ClassifierModel<B>>()
}

/// Model plus optimizer plus running metrics
pub struct Classifier<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ClassifierModel<B>, B>,
{
    model: ClassifierModel<B>,
    optimizer: O,
    learning_rate: f64,
    metrics: MetricSet,
    /// Inference copy of `model`, dropped whenever the model changes
    eval_model: Option<ClassifierModel<B::InnerBackend>>,
}

impl<B, O> Classifier<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ClassifierModel<B>, B>,
{
    pub fn new(model: ClassifierModel<B>, optimizer: O, learning_rate: f64) -> Self {
        Self {
            model,
            optimizer,
            learning_rate,
            metrics: MetricSet::new(),
            eval_model: None,
        }
    }

    pub fn model(&self) -> &ClassifierModel<B> {
        &self.model
    }

    pub fn into_model(self) -> ClassifierModel<B> {
        self.model
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    pub fn metrics(&self) -> &MetricSet {
        &self.metrics
    }

    /// Clears the loss mean and the accuracy back to no observations
    pub fn reset_metrics(&mut self) {
        self.metrics.reset_all();
    }

    /// One optimizer update on `batch`; returns the running metrics.
    pub fn train_step(&mut self, batch: &ClassifierBatch<B>) -> Result<MetricsSnapshot> {
        self.model.check_batch(&batch.images, &batch.targets)?;

        let logits = self.model.forward_logits(batch.images.clone(), Mode::Train);
        let mut loss = categorical_cross_entropy(logits.clone(), batch.targets.clone());
        if let Some(regularization) = self.model.regularization_loss() {
            loss = loss + regularization;
        }

        let loss_value: f64 = loss.clone().into_scalar().elem();
        let correct = count_correct(logits.detach(), batch.targets.clone());

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self
            .optimizer
            .step(self.learning_rate, self.model.clone(), grads);
        self.eval_model = None;

        self.metrics.update(loss_value, correct, batch.len());
        debug!("train step: loss {loss_value:.4}, {correct}/{} correct", batch.len());
        Ok(self.metrics.snapshot())
    }

    /// Forward and loss in inference mode; no gradients, no parameter update.
    pub fn test_step(
        &mut self,
        batch: &ClassifierBatch<B::InnerBackend>,
    ) -> Result<MetricsSnapshot> {
        let model = self.eval_model.get_or_insert_with(|| self.model.valid());
        model.check_batch(&batch.images, &batch.targets)?;

        let logits = model.forward_logits(batch.images.clone(), Mode::Eval);
        let mut loss = categorical_cross_entropy(logits.clone(), batch.targets.clone());
        if let Some(regularization) = model.regularization_loss() {
            loss = loss + regularization;
        }

        let loss_value: f64 = loss.into_scalar().elem();
        let correct = count_correct(logits, batch.targets.clone());

        self.metrics.update(loss_value, correct, batch.len());
        Ok(self.metrics.snapshot())
    }
}

/// Classifier with the default Adam optimizer and learning rate 1e-4
pub fn adam_classifier<B: AutodiffBackend>(
    model: ClassifierModel<B>,
) -> Classifier<B, impl Optimizer<ClassifierModel<B>, B>> {
    Classifier::new(model, adam_optimizer(), DEFAULT_LEARNING_RATE)
}
