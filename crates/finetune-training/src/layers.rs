//! Layers whose behavior depends on whether the model is training.
//!
//! The mode is an explicit argument instead of being derived from the
//! backend, so a frozen block can run in inference mode inside an autodiff
//! training step.

use burn::{
    module::{Param, RunningState},
    nn::Initializer,
    prelude::*,
    tensor::Distribution,
};

/// Forward-pass mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Dropout active, batch-norm on batch statistics
    Train,
    /// Dropout disabled, batch-norm on running statistics
    Eval,
}

/// Configuration for [`BatchNorm`]
#[derive(Config, Debug)]
pub struct BatchNormConfig {
    /// Number of channels (dimension 1 of the input)
    pub num_features: usize,
    /// Weight of the old running statistics in each update
    #[config(default = "0.99")]
    pub momentum: f64,
    #[config(default = "1e-3")]
    pub epsilon: f64,
}

impl BatchNormConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> BatchNorm<B> {
        let n = self.num_features;
        BatchNorm {
            gamma: Initializer::Ones.init([n], device),
            beta: Initializer::Zeros.init([n], device),
            running_mean: RunningState::new(Tensor::zeros([n], device)),
            running_var: RunningState::new(Tensor::ones([n], device)),
            momentum: self.momentum,
            epsilon: self.epsilon,
        }
    }
}

/// Batch normalization over dimension 1 of a `[N, C, ...]` tensor
#[derive(Module, Debug)]
pub struct BatchNorm<B: Backend> {
    pub gamma: Param<Tensor<B, 1>>,
    pub beta: Param<Tensor<B, 1>>,
    pub running_mean: RunningState<Tensor<B, 1>>,
    pub running_var: RunningState<Tensor<B, 1>>,
    momentum: f64,
    epsilon: f64,
}

impl<B: Backend> BatchNorm<B> {
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>, mode: Mode) -> Tensor<B, D> {
        let dims = x.dims();
        let channels = dims[1];
        let mut shape = [1usize; D];
        shape[1] = channels;

        let (mean, var) = match mode {
            Mode::Eval => (self.running_mean.value(), self.running_var.value()),
            Mode::Train => self.batch_statistics(x.clone(), channels),
        };

        let mean: Tensor<B, D> = mean.reshape(shape);
        let std: Tensor<B, D> = var.add_scalar(self.epsilon).sqrt().reshape(shape);
        let gamma: Tensor<B, D> = self.gamma.val().reshape(shape);
        let beta: Tensor<B, D> = self.beta.val().reshape(shape);

        (x - mean).div(std).mul(gamma).add(beta)
    }

    /// Per-channel mean and biased variance; folds them into the running state.
    fn batch_statistics<const D: usize>(
        &self,
        x: Tensor<B, D>,
        channels: usize,
    ) -> (Tensor<B, 1>, Tensor<B, 1>) {
        let count = x.dims().iter().product::<usize>() / channels;
        let flat: Tensor<B, 2> = x.swap_dims(0, 1).reshape([channels, count]);

        let mean = flat.clone().mean_dim(1);
        let var = (flat - mean.clone()).powf_scalar(2.0).mean_dim(1);
        let mean: Tensor<B, 1> = mean.reshape([channels]);
        let var: Tensor<B, 1> = var.reshape([channels]);

        let keep = self.momentum;
        let running_mean = self.running_mean.value_sync();
        let running_var = self.running_var.value_sync();
        self.running_mean.update(
            running_mean
                .mul_scalar(keep)
                .add(mean.clone().detach().mul_scalar(1.0 - keep)),
        );
        self.running_var.update(
            running_var
                .mul_scalar(keep)
                .add(var.clone().detach().mul_scalar(1.0 - keep)),
        );

        (mean, var)
    }
}

/// Inverted dropout, active only in [`Mode::Train`]
#[derive(Module, Clone, Debug)]
pub struct Dropout {
    prob: f64,
}

impl Dropout {
    pub fn new(prob: f64) -> Self {
        Self { prob }
    }

    pub fn prob(&self) -> f64 {
        self.prob
    }

    pub fn forward<B: Backend, const D: usize>(&self, x: Tensor<B, D>, mode: Mode) -> Tensor<B, D> {
        if mode == Mode::Eval || self.prob == 0.0 {
            return x;
        }
        let keep = 1.0 - self.prob;
        let mask = x.random_like(Distribution::Bernoulli(keep));
        x.mul(mask).div_scalar(keep)
    }
}
