//! ResNet bottleneck backbone.
//!
//! Layers are addressed by their ResNet-50 unit names: the stem is `conv1`
//! and the bottleneck blocks are `conv{stage + 2}_block{index + 1}`, so the
//! default `[3, 4, 6, 3]` layout ends with `conv5_block3`.
//!
//! A block whose parameters no longer require gradients is frozen and always
//! runs its batch-norm layers in inference mode.

use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::layers::{BatchNorm, BatchNormConfig, Mode};

/// Configuration for [`Backbone`]
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Bottleneck blocks per stage
    #[config(default = "vec![3, 4, 6, 3]")]
    pub stage_blocks: Vec<usize>,
    /// Output channels of the stem; stage `s` is `base << s` wide
    #[config(default = "64")]
    pub base_channels: usize,
    /// Ratio between a block's output width and its bottleneck width
    #[config(default = "4")]
    pub expansion: usize,
    #[config(default = "3")]
    pub in_channels: usize,
    /// Batch-norm epsilon of every backbone layer (Keras ResNet50 value)
    #[config(default = "1.001e-5")]
    pub norm_epsilon: f64,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let eps = self.norm_epsilon;
        let stem = Stem::new(self.in_channels, self.base_channels, eps, device);

        let mut in_channels = self.base_channels;
        let stages = self
            .stage_blocks
            .iter()
            .enumerate()
            .map(|(stage, &num_blocks)| {
                let width = self.base_channels << stage;
                let out_channels = width * self.expansion;
                let stride = if stage == 0 { 1 } else { 2 };
                let blocks = (0..num_blocks)
                    .map(|index| {
                        let block = if index == 0 {
                            Bottleneck::new(in_channels, width, out_channels, stride, eps, device)
                        } else {
                            Bottleneck::new(out_channels, width, out_channels, 1, eps, device)
                        };
                        in_channels = out_channels;
                        block
                    })
                    .collect();
                Stage { blocks }
            })
            .collect();

        Backbone { stem, stages }
    }

    /// Channels of the final feature map
    pub fn out_channels(&self) -> usize {
        let last_stage = self.stage_blocks.len().saturating_sub(1);
        (self.base_channels << last_stage) * self.expansion
    }

    /// Spatial side length of the final feature map for a square input
    pub fn feature_size(&self, input_size: usize) -> usize {
        // stem conv and max-pool, then one stride-2 stage after the first
        let halvings = 2 + self.stage_blocks.len().saturating_sub(1);
        (0..halvings).fold(input_size, |n, _| (n.saturating_sub(1)) / 2 + 1)
    }

    /// Unit names in forward order
    pub fn layer_names(&self) -> Vec<String> {
        let mut names = vec![STEM_NAME.to_string()];
        for (stage, &num_blocks) in self.stage_blocks.iter().enumerate() {
            names.extend((0..num_blocks).map(|index| block_name(stage, index)));
        }
        names
    }
}

pub(crate) const STEM_NAME: &str = "conv1";

pub(crate) fn block_name(stage: usize, index: usize) -> String {
    format!("conv{}_block{}", stage + 2, index + 1)
}

fn conv<B: Backend>(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .init(device)
}

fn norm<B: Backend>(features: usize, epsilon: f64, device: &B::Device) -> BatchNorm<B> {
    BatchNormConfig::new(features)
        .with_epsilon(epsilon)
        .init(device)
}

/// 7x7 stride-2 convolution, batch-norm, relu and 3x3 stride-2 max-pool
#[derive(Module, Debug)]
pub struct Stem<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> Stem<B> {
    fn new(in_channels: usize, out_channels: usize, epsilon: f64, device: &B::Device) -> Self {
        Self {
            conv: conv([in_channels, out_channels], 7, 2, 3, device),
            norm: norm(out_channels, epsilon, device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        B::ad_enabled() && !self.conv.weight.val().is_require_grad()
    }

    pub fn forward(&self, x: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let mode = if self.is_frozen() { Mode::Eval } else { mode };
        let x = self.conv.forward(x);
        let x = self.relu.forward(self.norm.forward(x, mode));
        self.pool.forward(x)
    }
}

/// 1x1 projection on the residual path when shape changes
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    pub conv: Conv2d<B>,
    pub norm: BatchNorm<B>,
}

/// 1x1 reduce, 3x3 (strided), 1x1 expand, plus the residual connection
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub conv1: Conv2d<B>,
    pub norm1: BatchNorm<B>,
    pub conv2: Conv2d<B>,
    pub norm2: BatchNorm<B>,
    pub conv3: Conv2d<B>,
    pub norm3: BatchNorm<B>,
    pub downsample: Option<Downsample<B>>,
    pub relu: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn new(
        in_channels: usize,
        width: usize,
        out_channels: usize,
        stride: usize,
        epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels).then(|| Downsample {
            conv: conv([in_channels, out_channels], 1, stride, 0, device),
            norm: norm(out_channels, epsilon, device),
        });

        Self {
            conv1: conv([in_channels, width], 1, 1, 0, device),
            norm1: norm(width, epsilon, device),
            conv2: conv([width, width], 3, stride, 1, device),
            norm2: norm(width, epsilon, device),
            conv3: conv([width, out_channels], 1, 1, 0, device),
            norm3: norm(out_channels, epsilon, device),
            downsample,
            relu: Relu::new(),
        }
    }

    pub fn is_frozen(&self) -> bool {
        B::ad_enabled() && !self.conv1.weight.val().is_require_grad()
    }

    pub fn forward(&self, x: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let mode = if self.is_frozen() { Mode::Eval } else { mode };

        let identity = match &self.downsample {
            Some(down) => down.norm.forward(down.conv.forward(x.clone()), mode),
            None => x.clone(),
        };

        let out = self.relu.forward(self.norm1.forward(self.conv1.forward(x), mode));
        let out = self.relu.forward(self.norm2.forward(self.conv2.forward(out), mode));
        let out = self.norm3.forward(self.conv3.forward(out), mode);

        self.relu.forward(out + identity)
    }
}

#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    pub blocks: Vec<Bottleneck<B>>,
}

/// Convolutional feature extractor: stem followed by bottleneck stages
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    pub stem: Stem<B>,
    pub stages: Vec<Stage<B>>,
}

impl<B: Backend> Backbone<B> {
    /// `[N, C, H, W]` images to `[N, C', H', W']` feature maps
    pub fn forward(&self, x: Tensor<B, 4>, mode: Mode) -> Tensor<B, 4> {
        let x = self.stem.forward(x, mode);
        self.stages.iter().fold(x, |x, stage| {
            stage.blocks.iter().fold(x, |x, block| block.forward(x, mode))
        })
    }

    /// Unit names in forward order
    pub fn layer_names(&self) -> Vec<String> {
        let mut names = vec![STEM_NAME.to_string()];
        for (stage, s) in self.stages.iter().enumerate() {
            names.extend((0..s.blocks.len()).map(|index| block_name(stage, index)));
        }
        names
    }

    /// Names of the units whose parameters are frozen
    pub fn frozen_layers(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.stem.is_frozen() {
            names.push(STEM_NAME.to_string());
        }
        for (stage, s) in self.stages.iter().enumerate() {
            for (index, block) in s.blocks.iter().enumerate() {
                if block.is_frozen() {
                    names.push(block_name(stage, index));
                }
            }
        }
        names
    }

    /// Rebuilds the backbone, passing each named unit through the matching function
    pub(crate) fn map_units(
        self,
        mut stem_fn: impl FnMut(&str, Stem<B>) -> Stem<B>,
        mut block_fn: impl FnMut(&str, Bottleneck<B>) -> Bottleneck<B>,
    ) -> Self {
        let stem = stem_fn(STEM_NAME, self.stem);
        let stages = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(stage, s)| Stage {
                blocks: s
                    .blocks
                    .into_iter()
                    .enumerate()
                    .map(|(index, block)| block_fn(&block_name(stage, index), block))
                    .collect(),
            })
            .collect();
        Self { stem, stages }
    }
}
