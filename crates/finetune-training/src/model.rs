//! Classifier model: backbone, freeze plan and head.

use burn::{prelude::*, tensor::activation::softmax};
use finetune_core::{Error, PipelineConfig, WeightSource, CHANNELS};
use tracing::info;

use crate::backbone::{Backbone, BackboneConfig};
use crate::freeze::FreezePlan;
use crate::head::{Head, HeadConfig};
use crate::layers::Mode;
use crate::weights::load_backbone_weights;

/// Configuration for [`ClassifierModel`]
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub backbone: BackboneConfig,
    /// Side length of the square input images
    #[config(default = "224")]
    pub input_size: usize,
    #[config(default = "4")]
    pub num_classes: usize,
    #[config(default = "vec![512, 256]")]
    pub hidden_units: Vec<usize>,
    #[config(default = "0.2")]
    pub dropout_rate: f64,
    #[config(default = "0.0")]
    pub kernel_l2: f64,
    /// Backbone layers left trainable
    #[config(default = "vec![\"conv5_block3\".to_string()]")]
    pub trainable_layers: Vec<String>,
}

impl ClassifierConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        let model = &config.model;
        let backbone = BackboneConfig::new()
            .with_stage_blocks(model.stage_blocks.clone())
            .with_base_channels(model.base_channels);

        Self::new(backbone)
            .with_input_size(config.data.image_size)
            .with_num_classes(config.data.num_classes)
            .with_hidden_units(model.hidden_units.clone())
            .with_dropout_rate(model.dropout_rate)
            .with_kernel_l2(model.kernel_l2)
            .with_trainable_layers(model.trainable_layers.clone())
    }

    /// Flattened feature count fed into the head
    pub fn head_input_features(&self) -> usize {
        let side = self.backbone.feature_size(self.input_size);
        self.backbone.out_channels() * side * side
    }

    /// Builds the backbone, loads `weights` into it, freezes it and adds the head.
    pub fn init<B: Backend>(
        &self,
        weights: &WeightSource,
        device: &B::Device,
    ) -> finetune_core::Result<ClassifierModel<B>> {
        if self.backbone.stage_blocks.is_empty() || self.input_size == 0 {
            return Err(Error::Config(
                "backbone needs at least one stage and a non-empty input".into(),
            ));
        }

        let backbone = self.backbone.init(device);
        let backbone = load_backbone_weights(backbone, weights, device)?;
        let backbone = FreezePlan::trainable(self.trainable_layers.iter().cloned()).apply(backbone)?;

        let head = HeadConfig::new(self.head_input_features())
            .with_hidden_units(self.hidden_units.clone())
            .with_num_classes(self.num_classes)
            .with_dropout_rate(self.dropout_rate)
            .with_kernel_l2(self.kernel_l2)
            .init(device);

        let model = ClassifierModel {
            backbone,
            head,
            input_size: self.input_size,
            num_classes: self.num_classes,
        };
        info!(
            "Built classifier: {} classes, {} head inputs, {} parameters",
            self.num_classes,
            self.head_input_features(),
            model.num_params()
        );
        Ok(model)
    }
}

/// Pretrained backbone with a trainable classification head
#[derive(Module, Debug)]
pub struct ClassifierModel<B: Backend> {
    pub backbone: Backbone<B>,
    pub head: Head<B>,
    input_size: usize,
    num_classes: usize,
}

impl<B: Backend> ClassifierModel<B> {
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Images `[N, 3, H, W]` to logits `[N, num_classes]`
    pub fn forward_logits(&self, images: Tensor<B, 4>, mode: Mode) -> Tensor<B, 2> {
        let features = self.backbone.forward(images, mode);
        self.head.forward(features, mode)
    }

    /// Images `[N, 3, H, W]` to class probabilities `[N, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>, mode: Mode) -> Tensor<B, 2> {
        softmax(self.forward_logits(images, mode), 1)
    }

    /// Sum of the regularization terms contributed by the layers
    pub fn regularization_loss(&self) -> Option<Tensor<B, 1>> {
        self.head.regularization_loss()
    }

    /// Rejects batches the network cannot consume
    pub fn check_batch(
        &self,
        images: &Tensor<B, 4>,
        targets: &Tensor<B, 2>,
    ) -> finetune_core::Result<()> {
        let [n, c, h, w] = images.dims();
        let [tn, classes] = targets.dims();

        if n == 0 {
            return Err(Error::Shape("empty batch".into()));
        }
        if c != CHANNELS || h != self.input_size || w != self.input_size {
            return Err(Error::Shape(format!(
                "expected images [N, {CHANNELS}, {size}, {size}], got [{n}, {c}, {h}, {w}]",
                size = self.input_size
            )));
        }
        if tn != n || classes != self.num_classes {
            return Err(Error::Shape(format!(
                "expected targets [{n}, {}], got [{tn}, {classes}]",
                self.num_classes
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn tiny_config() -> ClassifierConfig {
        ClassifierConfig::new(
            BackboneConfig::new()
                .with_stage_blocks(vec![1, 1, 1, 1])
                .with_base_channels(4),
        )
        .with_input_size(64)
        .with_hidden_units(vec![16, 8])
        .with_trainable_layers(vec!["conv5_block1".to_string()])
    }

    #[test]
    fn test_default_head_input_matches_resnet50() {
        let config = ClassifierConfig::new(BackboneConfig::new());
        assert_eq!(config.head_input_features(), 2048 * 7 * 7);
    }

    #[test]
    fn test_forward_returns_probabilities() {
        let device = Default::default();
        let model = tiny_config()
            .init::<TestBackend>(&WeightSource::Random, &device)
            .unwrap();

        let images = Tensor::<TestBackend, 4>::random(
            [2, 3, 64, 64],
            burn::tensor::Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let probs = model.forward(images, Mode::Eval);
        assert_eq!(probs.dims(), [2, 4]);

        let rows = probs.sum_dim(1).into_data().to_vec::<f32>().unwrap();
        for total in rows {
            assert!((total - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_check_batch() {
        let device = Default::default();
        let model = tiny_config()
            .init::<TestBackend>(&WeightSource::Random, &device)
            .unwrap();

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let targets = Tensor::<TestBackend, 2>::zeros([2, 4], &device);
        assert!(model.check_batch(&images, &targets).is_ok());

        let wrong_size = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        assert!(matches!(
            model.check_batch(&wrong_size, &targets),
            Err(Error::Shape(_))
        ));

        let wrong_classes = Tensor::<TestBackend, 2>::zeros([2, 5], &device);
        assert!(matches!(
            model.check_batch(&images, &wrong_classes),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn test_unknown_trainable_layer_fails_construction() {
        let config = tiny_config().with_trainable_layers(vec!["conv6_block1".to_string()]);
        let result = config.init::<TestBackend>(&WeightSource::Random, &Default::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_from_pipeline() {
        let mut pipeline = PipelineConfig::default();
        pipeline.data.image_size = 96;
        pipeline.model.kernel_l2 = 1e-4;

        let config = ClassifierConfig::from_pipeline(&pipeline);
        assert_eq!(config.input_size, 96);
        assert_eq!(config.backbone.stage_blocks, vec![3, 4, 6, 3]);
        assert_eq!(config.trainable_layers, vec!["conv5_block3".to_string()]);
        assert!((config.kernel_l2 - 1e-4).abs() < f64::EPSILON);
    }
}
