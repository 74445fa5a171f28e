//! Classification head appended to the backbone.
//!
//! Layers are a tagged enum: `Dense` and `Relu` are stateless, `BatchNorm`
//! and `Dropout` take the forward mode into account.

use burn::{
    nn::{Initializer, Linear, LinearConfig, Relu},
    prelude::*,
};

use crate::layers::{BatchNorm, BatchNormConfig, Dropout, Mode};

/// Configuration for [`Head`]
#[derive(Config, Debug)]
pub struct HeadConfig {
    /// Flattened backbone feature count
    pub input_features: usize,
    #[config(default = "vec![512, 256]")]
    pub hidden_units: Vec<usize>,
    #[config(default = "4")]
    pub num_classes: usize,
    #[config(default = "0.2")]
    pub dropout_rate: f64,
    /// L2 penalty on dense kernels; 0 adds no regularization loss
    #[config(default = "0.0")]
    pub kernel_l2: f64,
}

impl HeadConfig {
    /// Builds dense → relu → batch-norm → dropout per hidden width, then the
    /// output dense layer.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Head<B> {
        let mut layers = Vec::with_capacity(self.hidden_units.len() * 4 + 1);
        let mut features = self.input_features;

        for &units in &self.hidden_units {
            layers.push(HeadLayer::Dense(dense(features, units, device)));
            layers.push(HeadLayer::Relu(Relu::new()));
            layers.push(HeadLayer::BatchNorm(BatchNormConfig::new(units).init(device)));
            layers.push(HeadLayer::Dropout(Dropout::new(self.dropout_rate)));
            features = units;
        }
        layers.push(HeadLayer::Dense(dense(features, self.num_classes, device)));

        Head {
            layers,
            kernel_l2: self.kernel_l2,
        }
    }
}

fn dense<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    LinearConfig::new(d_input, d_output)
        .with_initializer(Initializer::XavierUniform { gain: 1.0 })
        .init(device)
}

/// One head layer
#[derive(Module, Debug)]
pub enum HeadLayer<B: Backend> {
    Dense(Linear<B>),
    Relu(Relu),
    BatchNorm(BatchNorm<B>),
    Dropout(Dropout),
}

impl<B: Backend> HeadLayer<B> {
    pub fn forward(&self, x: Tensor<B, 2>, mode: Mode) -> Tensor<B, 2> {
        match self {
            HeadLayer::Dense(linear) => linear.forward(x),
            HeadLayer::Relu(relu) => relu.forward(x),
            HeadLayer::BatchNorm(norm) => norm.forward(x, mode),
            HeadLayer::Dropout(dropout) => dropout.forward(x, mode),
        }
    }

    /// True for layers whose output depends on the mode
    pub fn is_mode_dependent(&self) -> bool {
        matches!(self, HeadLayer::BatchNorm(_) | HeadLayer::Dropout(_))
    }
}

/// Flatten followed by the configured layers; returns logits
#[derive(Module, Debug)]
pub struct Head<B: Backend> {
    pub layers: Vec<HeadLayer<B>>,
    kernel_l2: f64,
}

impl<B: Backend> Head<B> {
    /// `[N, C, H, W]` features to `[N, num_classes]` logits
    pub fn forward(&self, features: Tensor<B, 4>, mode: Mode) -> Tensor<B, 2> {
        let x: Tensor<B, 2> = features.flatten(1, 3);
        self.layers.iter().fold(x, |x, layer| layer.forward(x, mode))
    }

    /// `kernel_l2 * Σ w²` over the dense kernels, or `None` when disabled
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        if self.kernel_l2 <= 0.0 {
            return None;
        }
        self.layers
            .iter()
            .filter_map(|layer| match layer {
                HeadLayer::Dense(linear) => Some(linear.weight.val().powf_scalar(2.0).sum()),
                _ => None,
            })
            .reduce(|a, b| a + b)
            .map(|total| total.mul_scalar(self.kernel_l2))
    }

    /// The final dense layer
    pub fn output_layer(&self) -> Option<&Linear<B>> {
        self.layers.iter().rev().find_map(|layer| match layer {
            HeadLayer::Dense(linear) => Some(linear),
            _ => None,
        })
    }
}
